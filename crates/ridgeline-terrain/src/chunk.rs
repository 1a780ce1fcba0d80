//! Per-chunk generation pipeline: heights, optional erosion, normals.
//!
//! A [`ChunkRequest`] describes a world-space window `[offset_x, offset_x +
//! width] × [offset_z, offset_z + depth]` and a resolution. The pipeline
//! samples [`sample_height`] on a regular grid, erodes the grid for the
//! highest-detail standard tier, and derives one unit normal per node.
//!
//! Normals come from one of two paths:
//!
//! - eroded grids use central differences over the grid itself, so shading
//!   follows the carved channels;
//! - every other grid re-evaluates the height function around each node.
//!   That path never looks at neighbouring samples, so two chunks that share
//!   an edge compute identical normals along it.

use std::time::Instant;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::erosion::{DEFAULT_DROPLETS, ErosionParams, erode};
use crate::error::ChunkError;
use crate::height::{TerrainType, sample_height};
use crate::heightfield::Heightfield;
use crate::seed::chunk_rng;

/// Offset used when finite-differencing the height function for normals.
pub const DEFAULT_NORMAL_EPSILON: f64 = 0.1;

/// Largest segment count accepted along either axis.
pub const DEFAULT_MAX_SEGMENTS: u32 = 1024;

fn default_lod() -> f64 {
    1.0
}

/// A request to generate one terrain chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// Correlation id. Assigned by the worker pool on dispatch.
    #[serde(default)]
    pub id: u64,
    /// World-space extent along x.
    pub width: f64,
    /// World-space extent along z.
    pub depth: f64,
    /// Full-detail segment count along x.
    pub segments_w: u32,
    /// Full-detail segment count along z.
    pub segments_d: u32,
    /// World-space x of the chunk's first node.
    #[serde(default)]
    pub offset_x: f64,
    /// World-space z of the chunk's first node.
    #[serde(default)]
    pub offset_z: f64,
    /// Level of detail; `floor(lod)` is the grid stride.
    #[serde(default = "default_lod")]
    pub lod: f64,
    /// Biome to evaluate.
    #[serde(default)]
    pub terrain_type: TerrainType,
}

impl ChunkRequest {
    /// Full-detail standard terrain request at the origin.
    pub fn new(width: f64, depth: f64, segments_w: u32, segments_d: u32) -> Self {
        Self {
            id: 0,
            width,
            depth,
            segments_w,
            segments_d,
            offset_x: 0.0,
            offset_z: 0.0,
            lod: default_lod(),
            terrain_type: TerrainType::Standard,
        }
    }

    /// Move the sampling window.
    pub fn with_offset(mut self, offset_x: f64, offset_z: f64) -> Self {
        self.offset_x = offset_x;
        self.offset_z = offset_z;
        self
    }

    /// Set the level of detail.
    pub fn with_lod(mut self, lod: f64) -> Self {
        self.lod = lod;
        self
    }

    /// Set the biome.
    pub fn with_terrain(mut self, terrain_type: TerrainType) -> Self {
        self.terrain_type = terrain_type;
        self
    }

    /// Grid stride, `max(1, floor(lod))`.
    pub fn stride(&self) -> u32 {
        // Saturating float-to-int cast; NaN lands on 0 and is lifted to 1.
        (self.lod.floor() as u32).max(1)
    }

    /// Node counts `(grid_w, grid_d)` after applying the stride.
    pub fn grid_size(&self) -> (usize, usize) {
        let stride = self.stride();
        (
            (self.segments_w / stride) as usize + 1,
            (self.segments_d / stride) as usize + 1,
        )
    }

    /// Whether this request gets an erosion pass.
    ///
    /// Only full-detail standard terrain is eroded. Coarser tiers and other
    /// biomes stay pure functions of position so their seams line up.
    pub fn erodes(&self) -> bool {
        self.lod == 1.0 && self.terrain_type == TerrainType::Standard
    }
}

/// Heights and normals for one generated chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkData {
    /// Nodes along x.
    pub grid_w: usize,
    /// Nodes along z.
    pub grid_d: usize,
    /// Row-major heights, `grid_w * grid_d` entries.
    pub heights: Vec<f32>,
    /// Row-major unit normals, xyz interleaved, `grid_w * grid_d * 3` entries.
    pub normals: Vec<f32>,
    /// Whether the heights went through erosion.
    pub eroded: bool,
}

impl ChunkData {
    /// Height at node `(i, j)`.
    pub fn height(&self, i: usize, j: usize) -> f32 {
        self.heights[j * self.grid_w + i]
    }

    /// Normal at node `(i, j)`.
    pub fn normal(&self, i: usize, j: usize) -> Vec3 {
        let k = (j * self.grid_w + i) * 3;
        Vec3::new(self.normals[k], self.normals[k + 1], self.normals[k + 2])
    }
}

/// The settled outcome of a chunk request.
#[derive(Debug)]
pub struct ChunkResponse {
    /// Id of the request this answers.
    pub id: u64,
    /// Generated chunk, or why there is none.
    pub result: Result<ChunkData, ChunkError>,
}

/// Tunables for [`ChunkGenerator`].
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorSettings {
    /// Droplets simulated per eroded chunk.
    pub erosion_droplets: u32,
    /// Base seed mixed into every chunk's erosion RNG.
    pub erosion_seed: u64,
    /// Droplet simulation constants.
    pub erosion: ErosionParams,
    /// Finite-difference offset for analytical normals.
    pub normal_epsilon: f64,
    /// Largest accepted segment count per axis.
    pub max_segments: u32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            erosion_droplets: DEFAULT_DROPLETS,
            erosion_seed: 0,
            erosion: ErosionParams::default(),
            normal_epsilon: DEFAULT_NORMAL_EPSILON,
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }
}

/// Something that turns chunk requests into chunk data.
///
/// The worker pool runs one shared source on every worker thread.
pub trait ChunkSource: Send + Sync + 'static {
    /// Generate the chunk described by `request`.
    fn generate(&self, request: &ChunkRequest) -> Result<ChunkData, ChunkError>;
}

/// The terrain pipeline.
#[derive(Clone, Debug, Default)]
pub struct ChunkGenerator {
    settings: GeneratorSettings,
}

impl ChunkGenerator {
    /// Create a generator with the given settings.
    pub fn new(settings: GeneratorSettings) -> Self {
        Self { settings }
    }

    /// Current settings.
    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Reject requests the pipeline cannot turn into a sensible grid.
    pub fn validate(&self, request: &ChunkRequest) -> Result<(), ChunkError> {
        for (field, extent) in [("width", request.width), ("depth", request.depth)] {
            if !extent.is_finite() || extent <= 0.0 {
                return Err(ChunkError::invalid(
                    field,
                    format!("must be finite and positive, got {extent}"),
                ));
            }
        }
        for (field, offset) in [("offset_x", request.offset_x), ("offset_z", request.offset_z)] {
            if !offset.is_finite() {
                return Err(ChunkError::invalid(field, format!("must be finite, got {offset}")));
            }
        }
        if !request.lod.is_finite() || request.lod < 1.0 {
            return Err(ChunkError::invalid(
                "lod",
                format!("must be finite and at least 1, got {}", request.lod),
            ));
        }

        let stride = request.stride();
        for (field, segments) in [
            ("segments_w", request.segments_w),
            ("segments_d", request.segments_d),
        ] {
            if segments == 0 || segments > self.settings.max_segments {
                return Err(ChunkError::invalid(
                    field,
                    format!("must be in 1..={}, got {segments}", self.settings.max_segments),
                ));
            }
            if stride > segments {
                return Err(ChunkError::invalid(
                    field,
                    format!("{segments} segments cannot be sampled at stride {stride}"),
                ));
            }
        }
        Ok(())
    }

    /// Run the full pipeline for one request.
    pub fn generate(&self, request: &ChunkRequest) -> Result<ChunkData, ChunkError> {
        self.validate(request)?;
        let start = Instant::now();

        let mut grid = sample_grid(request);

        let eroded = request.erodes() && self.settings.erosion_droplets > 0;
        if eroded {
            let mut rng = chunk_rng(self.settings.erosion_seed, request);
            let stats = erode(
                &mut grid,
                self.settings.erosion_droplets,
                &self.settings.erosion,
                &mut rng,
            );
            debug!(
                id = request.id,
                droplets = stats.droplets,
                steps = stats.steps,
                eroded = stats.eroded,
                deposited = stats.deposited,
                "erosion pass complete"
            );
        }

        let normals = if eroded {
            grid_normals(&grid, request)
        } else {
            analytical_normals(&grid, request, self.settings.normal_epsilon)
        };

        let (grid_w, grid_d) = (grid.width(), grid.depth());
        debug!(
            id = request.id,
            terrain = %request.terrain_type,
            grid_w,
            grid_d,
            eroded,
            elapsed_us = start.elapsed().as_micros() as u64,
            "chunk generated"
        );

        Ok(ChunkData {
            grid_w,
            grid_d,
            heights: grid.into_vec(),
            normals,
            eroded,
        })
    }
}

impl ChunkSource for ChunkGenerator {
    fn generate(&self, request: &ChunkRequest) -> Result<ChunkData, ChunkError> {
        ChunkGenerator::generate(self, request)
    }
}

/// World coordinate of node `index` out of `nodes` spanning `[offset, offset + extent]`.
#[inline]
fn node_coord(offset: f64, extent: f64, index: usize, nodes: usize) -> f64 {
    offset + (index as f64 / (nodes - 1) as f64) * extent
}

fn sample_grid(request: &ChunkRequest) -> Heightfield {
    let (grid_w, grid_d) = request.grid_size();
    let mut grid = Heightfield::new(grid_w, grid_d);
    for j in 0..grid_d {
        let z = node_coord(request.offset_z, request.depth, j, grid_d);
        for i in 0..grid_w {
            let x = node_coord(request.offset_x, request.width, i, grid_w);
            grid.set(i, j, sample_height(x, z, request.terrain_type));
        }
    }
    grid
}

#[inline]
fn push_normal(normals: &mut Vec<f32>, dh_dx: f64, dh_dz: f64) {
    let n = Vec3::new(-dh_dx as f32, 1.0, -dh_dz as f32).normalize();
    normals.extend_from_slice(&[n.x, n.y, n.z]);
}

fn analytical_normals(grid: &Heightfield, request: &ChunkRequest, eps: f64) -> Vec<f32> {
    let (grid_w, grid_d) = (grid.width(), grid.depth());
    let terrain = request.terrain_type;
    let mut normals = Vec::with_capacity(grid_w * grid_d * 3);

    for j in 0..grid_d {
        let z = node_coord(request.offset_z, request.depth, j, grid_d);
        for i in 0..grid_w {
            let x = node_coord(request.offset_x, request.width, i, grid_w);
            let left = f64::from(sample_height(x - eps, z, terrain));
            let right = f64::from(sample_height(x + eps, z, terrain));
            let back = f64::from(sample_height(x, z - eps, terrain));
            let front = f64::from(sample_height(x, z + eps, terrain));
            push_normal(
                &mut normals,
                (right - left) / (2.0 * eps),
                (front - back) / (2.0 * eps),
            );
        }
    }
    normals
}

fn grid_normals(grid: &Heightfield, request: &ChunkRequest) -> Vec<f32> {
    let (grid_w, grid_d) = (grid.width(), grid.depth());
    let cell_x = request.width / (grid_w - 1) as f64;
    let cell_z = request.depth / (grid_d - 1) as f64;
    let mut normals = Vec::with_capacity(grid_w * grid_d * 3);

    for j in 0..grid_d {
        let j0 = j.saturating_sub(1);
        let j1 = (j + 1).min(grid_d - 1);
        for i in 0..grid_w {
            let i0 = i.saturating_sub(1);
            let i1 = (i + 1).min(grid_w - 1);
            let dh_dx = f64::from(grid.get(i1, j) - grid.get(i0, j)) / ((i1 - i0) as f64 * cell_x);
            let dh_dz = f64::from(grid.get(i, j1) - grid.get(i, j0)) / ((j1 - j0) as f64 * cell_z);
            push_normal(&mut normals, dh_dx, dh_dz);
        }
    }
    normals
}
