//! Procedural terrain chunks: value noise, analytic height functions,
//! droplet erosion and a crash-isolated worker pool that builds chunks off
//! the caller's thread.

mod heightfield;
mod seed;

pub mod chunk;
pub mod erosion;
pub mod error;
pub mod height;
pub mod noise;
pub mod worker_pool;

pub use chunk::{
    ChunkData, ChunkGenerator, ChunkRequest, ChunkResponse, ChunkSource, DEFAULT_MAX_SEGMENTS,
    DEFAULT_NORMAL_EPSILON, GeneratorSettings,
};
pub use erosion::{DEFAULT_DROPLETS, ErosionParams, ErosionStats, erode};
pub use error::ChunkError;
pub use height::{ParseTerrainTypeError, TerrainType, ground_height, sample_height};
pub use heightfield::Heightfield;
pub use seed::{chunk_rng, derive_chunk_seed};
pub use worker_pool::{ChunkTicket, PoolOptions, WorkerPool, default_pool_size};
