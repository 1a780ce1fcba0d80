//! Particle-based hydraulic erosion over a [`Heightfield`].
//!
//! Each droplet rolls downhill from a random spawn point, picking up sediment
//! where it speeds up and dropping it where it slows down or climbs. Droplets
//! run one after another against the same grid, so later droplets see the
//! channels carved by earlier ones.

use rand::Rng;

use crate::heightfield::Heightfield;

/// Droplet count used for the highest-detail standard terrain tier.
pub const DEFAULT_DROPLETS: u32 = 35_000;

/// Tuning constants for the droplet simulation.
#[derive(Clone, Debug, PartialEq)]
pub struct ErosionParams {
    /// Fraction of the previous direction a droplet keeps each step (0-1).
    pub inertia: f32,
    /// Lower bound on slope used for capacity, so flat runs still carry sediment.
    pub min_slope: f32,
    /// Sediment capacity multiplier.
    pub capacity: f32,
    /// Fraction of surplus sediment dropped per step.
    pub deposition: f32,
    /// Fraction of spare capacity filled from the terrain per step.
    pub erosion: f32,
    /// Fraction of water lost per step.
    pub evaporation: f32,
    /// Acceleration applied per unit of descent.
    pub gravity: f32,
    /// Maximum steps simulated per droplet.
    pub max_steps: u32,
    /// Water volume at spawn.
    pub initial_water: f32,
    /// Speed at spawn.
    pub initial_speed: f32,
}

impl Default for ErosionParams {
    fn default() -> Self {
        Self {
            inertia: 0.05,
            min_slope: 0.01,
            capacity: 4.0,
            deposition: 0.3,
            erosion: 0.3,
            evaporation: 0.02,
            gravity: 4.0,
            max_steps: 64,
            initial_water: 1.0,
            initial_speed: 1.0,
        }
    }
}

/// Water droplets below this volume are dropped.
const MIN_WATER: f32 = 0.01;

/// Totals gathered over one erosion pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ErosionStats {
    /// Droplets spawned.
    pub droplets: u32,
    /// Steps simulated across all droplets.
    pub steps: u64,
    /// Material removed from the grid.
    pub eroded: f64,
    /// Material added back to the grid.
    pub deposited: f64,
}

struct Droplet {
    x: f32,
    z: f32,
    dir_x: f32,
    dir_z: f32,
    speed: f32,
    water: f32,
    sediment: f32,
}

/// Run `iterations` droplets over `grid` in place.
///
/// A droplet that climbs fills the hole behind it with `min(climb, sediment)`
/// rather than a capacity-based amount, so a deposit is never negative.
///
/// Grids narrower than two nodes on either axis are left untouched.
pub fn erode<R: Rng>(
    grid: &mut Heightfield,
    iterations: u32,
    params: &ErosionParams,
    rng: &mut R,
) -> ErosionStats {
    let mut stats = ErosionStats::default();
    if grid.width() < 2 || grid.depth() < 2 {
        return stats;
    }

    let max_x = (grid.width() - 1) as f32;
    let max_z = (grid.depth() - 1) as f32;

    for _ in 0..iterations {
        let mut drop = Droplet {
            x: rng.random::<f32>() * max_x,
            z: rng.random::<f32>() * max_z,
            dir_x: 0.0,
            dir_z: 0.0,
            speed: params.initial_speed,
            water: params.initial_water,
            sediment: 0.0,
        };
        stats.droplets += 1;

        for _ in 0..params.max_steps {
            // Guards against the spawn roll landing exactly on the far edge.
            if drop.x >= max_x || drop.z >= max_z {
                break;
            }
            stats.steps += 1;

            let old_x = drop.x;
            let old_z = drop.z;
            let (old_height, grad_x, grad_z) = grid.height_and_gradient(old_x, old_z);

            drop.dir_x = drop.dir_x * params.inertia - grad_x * (1.0 - params.inertia);
            drop.dir_z = drop.dir_z * params.inertia - grad_z * (1.0 - params.inertia);
            let len = (drop.dir_x * drop.dir_x + drop.dir_z * drop.dir_z).sqrt();
            if len <= f32::EPSILON {
                break;
            }
            drop.dir_x /= len;
            drop.dir_z /= len;

            drop.x += drop.dir_x;
            drop.z += drop.dir_z;
            if drop.x < 0.0 || drop.z < 0.0 || drop.x >= max_x || drop.z >= max_z {
                break;
            }

            let (new_height, _, _) = grid.height_and_gradient(drop.x, drop.z);
            let descent = old_height - new_height;

            let capacity =
                descent.max(params.min_slope) * drop.speed * drop.water * params.capacity;

            if drop.sediment > capacity || descent < 0.0 {
                let amount = if descent < 0.0 {
                    (-descent).min(drop.sediment)
                } else {
                    (drop.sediment - capacity) * params.deposition
                };
                drop.sediment -= amount;
                spread(grid, old_x, old_z, amount);
                stats.deposited += f64::from(amount);
            } else {
                let amount = ((capacity - drop.sediment) * params.erosion).min(descent);
                drop.sediment += amount;
                spread(grid, old_x, old_z, -amount);
                stats.eroded += f64::from(amount);
            }

            drop.speed = (drop.speed * drop.speed + descent * params.gravity).max(0.0).sqrt();
            drop.water *= 1.0 - params.evaporation;
            if drop.water < MIN_WATER {
                break;
            }
        }
    }

    stats
}

/// Add `amount` to the four nodes around `(x, z)` using bilinear weights.
fn spread(grid: &mut Heightfield, x: f32, z: f32, amount: f32) {
    let cx = x as usize;
    let cz = z as usize;
    let u = x - cx as f32;
    let v = z - cz as f32;

    grid.add(cx, cz, amount * (1.0 - u) * (1.0 - v));
    grid.add(cx + 1, cz, amount * u * (1.0 - v));
    grid.add(cx, cz + 1, amount * (1.0 - u) * v);
    grid.add(cx + 1, cz + 1, amount * u * v);
}
