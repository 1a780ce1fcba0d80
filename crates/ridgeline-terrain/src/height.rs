//! Per-biome elevation functions.
//!
//! [`sample_height`] is the single source of truth for terrain elevation
//! before erosion. Worker threads call it while filling chunk grids and the
//! host thread calls it (through [`ground_height`]) for synchronous point
//! queries, so both paths always agree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::noise::{lerp, noise, ridge, smoothstep, warp};

/// Terrain biome selecting which height function a chunk uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainType {
    /// Domain-warped ridged mountains. The only biome that gets eroded.
    #[default]
    Standard,
    /// Rolling sand dunes.
    Dunes,
    /// Atoll: reef ring around a shallow lagoon.
    Islands,
    /// Cone with summit crater fading into flat parkland.
    Volcano,
}

impl TerrainType {
    /// All terrain types, in declaration order.
    pub const ALL: [TerrainType; 4] = [
        TerrainType::Standard,
        TerrainType::Dunes,
        TerrainType::Islands,
        TerrainType::Volcano,
    ];

    /// Lowercase name used in config files and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            TerrainType::Standard => "standard",
            TerrainType::Dunes => "dunes",
            TerrainType::Islands => "islands",
            TerrainType::Volcano => "volcano",
        }
    }
}

impl fmt::Display for TerrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown terrain name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown terrain type `{0}` (expected standard, dunes, islands or volcano)")]
pub struct ParseTerrainTypeError(pub String);

impl FromStr for TerrainType {
    type Err = ParseTerrainTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TerrainType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseTerrainTypeError(s.to_string()))
    }
}

// --- Atoll layout ---

const RING_RADIUS: f64 = 80.0;
const RING_WIDTH: f64 = 35.0;
const DEEP_OCEAN: f64 = -25.0;
const REEF_SHELF: f64 = -3.0;
const BEACH: f64 = 1.2;
const RIDGE: f64 = 9.0;
const LAGOON_BED: f64 = -5.0;

// --- Volcano layout ---

const CONE_HEIGHT: f64 = 120.0;
const CONE_FALLOFF: f64 = 0.015;
const CRATER_DEPTH: f64 = 80.0;
const CRATER_FALLOFF: f64 = 0.05;
const PARK_START: f64 = 150.0;
const PARK_END: f64 = 200.0;

/// Evaluate terrain elevation at world coordinates `(x, z)`.
///
/// Pure: identical inputs give bit-identical output on every thread.
pub fn sample_height(x: f64, z: f64, terrain: TerrainType) -> f32 {
    let h = match terrain {
        TerrainType::Standard => standard(x, z),
        TerrainType::Dunes => dunes(x, z),
        TerrainType::Islands => islands(x, z),
        TerrainType::Volcano => volcano(x, z),
    };
    h as f32
}

/// Host-side ground lookup for snapping objects onto un-eroded terrain.
///
/// Same function the workers use; exposed under its own name so call sites
/// read as what they are.
#[inline]
pub fn ground_height(x: f64, z: f64, terrain: TerrainType) -> f32 {
    sample_height(x, z, terrain)
}

fn standard(x: f64, z: f64) -> f64 {
    (warp(x * 0.015, z * 0.015) - 0.5) * 70.0
}

fn dunes(x: f64, z: f64) -> f64 {
    // Stretched along z so crests run across the prevailing wind.
    let n = noise(x * 0.03, z * 0.012);
    let detail = noise(x * 0.35, z * 0.35);
    ridge(n) * 12.0 + detail * 0.2
}

fn islands(x: f64, z: f64) -> f64 {
    let dist = libm::sqrt(x * x + z * z);
    let p_dist = dist + noise(x * 0.03, z * 0.03) * 12.0;

    let ring = (1.0 - (p_dist - RING_RADIUS).abs() / RING_WIDTH).clamp(0.0, 1.0);

    let base = if p_dist < RING_RADIUS {
        LAGOON_BED + (noise(x * 0.08, z * 0.08) - 0.5) * 2.0
    } else {
        DEEP_OCEAN
    };

    let mut h = lerp(base, REEF_SHELF, smoothstep(0.0, 0.15, ring));
    h = lerp(h, BEACH, smoothstep(0.25, 0.4, ring));
    lerp(h, RIDGE, smoothstep(0.4, 0.9, ring))
}

fn volcano(x: f64, z: f64) -> f64 {
    let d = libm::sqrt(x * x + z * z);

    let cone = CONE_HEIGHT * libm::exp(-CONE_FALLOFF * d);
    let crater = CRATER_DEPTH * libm::exp(-CRATER_FALLOFF * d);
    let detail = (warp(x * 0.02, z * 0.02) - 0.5) * 15.0;
    let mountain = cone - crater + detail;

    let park = (noise(x * 0.01, z * 0.01) - 0.5) * 3.0;

    lerp(mountain, park, smoothstep(PARK_START, PARK_END, d))
}
