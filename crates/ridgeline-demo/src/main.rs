//! Generates a square block of terrain chunks on the worker pool and logs
//! what came back.
//!
//! Configuration is loaded from `ridgeline.ron` and can be overridden via
//! CLI flags, e.g. `ridgeline --terrain islands --radius 2 --pool-size 3`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use ridgeline_config::{CliArgs, Config, default_config_dir};
use ridgeline_terrain::{
    ChunkData, ChunkError, ChunkRequest, GeneratorSettings, PoolOptions, TerrainType, WorkerPool,
    ground_height,
};
use tracing::{debug, error, info, warn};

/// Ridgeline chunk generation demo.
#[derive(Parser, Debug)]
#[command(name = "ridgeline", about = "Generate a block of terrain chunks")]
struct DemoArgs {
    #[command(flatten)]
    common: CliArgs,

    /// Terrain type (standard, dunes, islands, volcano).
    #[arg(long, default_value_t = TerrainType::Standard)]
    terrain: TerrainType,

    /// Chunks generated in each direction from the origin chunk.
    #[arg(long, default_value_t = 1)]
    radius: u32,

    /// Full-detail segments per chunk side.
    #[arg(long, default_value_t = 64)]
    segments: u32,

    /// Level of detail; the grid stride is `floor(lod)`.
    #[arg(long, default_value_t = 1.0)]
    lod: f64,

    /// Chunk side length in world units.
    #[arg(long, default_value_t = 64.0)]
    chunk_size: f64,
}

fn generator_settings(config: &Config) -> GeneratorSettings {
    GeneratorSettings {
        erosion_droplets: config.terrain.erosion_droplets,
        erosion_seed: config.terrain.erosion_seed,
        normal_epsilon: config.terrain.normal_epsilon,
        max_segments: config.terrain.max_segments,
        ..Default::default()
    }
}

fn pool_options(config: &Config) -> PoolOptions {
    PoolOptions {
        size: config.workers.pool_size(),
        request_timeout: config.workers.request_timeout(),
    }
}

/// `(2r+1)^2` requests centred on the origin chunk, row by row.
fn chunk_block(args: &DemoArgs) -> Vec<ChunkRequest> {
    let r = args.radius as i64;
    let mut requests = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
    for cz in -r..=r {
        for cx in -r..=r {
            requests.push(
                ChunkRequest::new(args.chunk_size, args.chunk_size, args.segments, args.segments)
                    .with_offset(cx as f64 * args.chunk_size, cz as f64 * args.chunk_size)
                    .with_lod(args.lod)
                    .with_terrain(args.terrain),
            );
        }
    }
    requests
}

fn height_range(data: &ChunkData) -> (f32, f32) {
    data.heights
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| {
            (lo.min(h), hi.max(h))
        })
}

fn resolve_config_dir(args: &CliArgs) -> PathBuf {
    args.config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| PathBuf::from(".ridgeline"))
}

fn run(args: &DemoArgs, config: &Config) -> Result<(), ChunkError> {
    let pool = WorkerPool::with_generator(generator_settings(config), pool_options(config));
    pool.warm_up()?;

    let requests = chunk_block(args);
    info!(
        chunks = requests.len(),
        workers = pool.size(),
        terrain = %args.terrain,
        lod = args.lod,
        "dispatching chunk block"
    );

    let start = Instant::now();
    let tickets = requests
        .iter()
        .map(|request| pool.dispatch(request.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut origin = None;
    let mut failed = 0usize;
    let mut eroded = 0usize;
    let mut low = f32::INFINITY;
    let mut high = f32::NEG_INFINITY;

    for (request, ticket) in requests.iter().zip(tickets) {
        let id = ticket.id();
        match ticket.wait() {
            Ok(data) => {
                let (lo, hi) = height_range(&data);
                debug!(
                    id,
                    offset_x = request.offset_x,
                    offset_z = request.offset_z,
                    grid_w = data.grid_w,
                    grid_d = data.grid_d,
                    min = lo,
                    max = hi,
                    eroded = data.eroded,
                    "chunk ready"
                );
                low = low.min(lo);
                high = high.max(hi);
                eroded += usize::from(data.eroded);
                if request.offset_x == 0.0 && request.offset_z == 0.0 {
                    origin = Some(data);
                }
            }
            Err(e) => {
                failed += 1;
                warn!(id, error = %e, "chunk failed");
            }
        }
    }

    info!(
        ok = requests.len() - failed,
        failed,
        eroded,
        min_height = low,
        max_height = high,
        replacements = pool.replacements(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "chunk block complete"
    );

    if let Some(data) = origin {
        let from_worker = data.height(0, 0);
        let from_host = ground_height(0.0, 0.0, args.terrain);
        if data.eroded {
            info!(
                from_worker,
                from_host,
                "ground query at origin (worker height includes erosion)"
            );
        } else if from_worker.to_bits() == from_host.to_bits() {
            info!(height = from_host, "ground query matches worker at origin");
        } else {
            warn!(from_worker, from_host, "ground query disagrees with worker at origin");
        }
    }

    pool.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    let args = DemoArgs::parse();

    let config_dir = resolve_config_dir(&args.common);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args.common);

    let log_dir = config_dir.join("logs");
    ridgeline_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "chunk demo failed");
            ExitCode::FAILURE
        }
    }
}
