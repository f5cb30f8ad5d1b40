use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::IVec3;
use spatial_common::{Coord, Loader};
use spatial_kernel::{PlainFactory, World};
use spatial_persist::{ArchiveLoadProcessor, ArchiveUnloadProcessor, NodeArchive};
use spatial_schedule::{Engine, EngineConfig};
use spatial_stream::StreamConfig;
use spatial_tools::SpatialInspector;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spatial-cli", about = "CLI tool for spatial world operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and default configuration
    Info,
    /// Drive a world with one moving loader
    Simulate {
        /// Engine config file (.yaml, .yml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        /// Loader sphere radius, in cells of each level
        #[arg(short, long, default_value = "2")]
        radius: u32,
        /// Levels the loader streams, starting at 0
        #[arg(short, long, default_value = "3")]
        levels: u8,
        /// Level-0 cells the loader moves along +X every tick
        #[arg(long, default_value = "1")]
        speed: i32,
        /// Level tick interval, overriding the config
        #[arg(long)]
        stagger: Option<u32>,
        /// Worker threads, overriding the config
        #[arg(long)]
        threads: Option<usize>,
        /// Archive directory: restored on load, written on exit
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Print a summary every N ticks
        #[arg(long, default_value = "25")]
        report_every: u64,
    },
    /// Validate a config file and print it, or print the defaults
    Config {
        path: Option<PathBuf>,
    },
    /// Simulate, then print one node's details
    Inspect {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        y: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,
        #[arg(default_value = "0")]
        level: u8,
        /// Ticks to run with a stationary loader at the origin first
        #[arg(short, long, default_value = "1")]
        ticks: u64,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            let config = EngineConfig::default();
            println!("spatial-cli v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "levels={} eviction_timeout={:?} tick_interval={:?}",
                config.world.level_count,
                config.world.eviction_timeout(),
                config.tick_interval()
            );
            println!("archive schema: v{}", spatial_persist::ARCHIVE_SCHEMA_VERSION);
        }
        Commands::Simulate {
            config,
            ticks,
            radius,
            levels,
            speed,
            stagger,
            threads,
            archive,
            report_every,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(interval) = stagger {
                config.stream = StreamConfig {
                    level_tick_interval: interval,
                    ..config.stream
                };
            }
            if threads.is_some() {
                config.threads = threads;
            }
            let max_level = levels.min(config.world.level_count);

            let store = match &archive {
                Some(dir) if dir.join("manifest.json").exists() => Arc::new(
                    NodeArchive::open_dir(dir)
                        .with_context(|| format!("opening archive {}", dir.display()))?,
                ),
                _ => Arc::new(NodeArchive::new()),
            };

            let mut world = World::new(config.world.clone(), PlainFactory);
            if archive.is_some() {
                world.register_load_processor(ArchiveLoadProcessor::new(store.clone()));
                world.register_unload_processor(ArchiveUnloadProcessor::new(store.clone()));
            }

            let mut engine = Engine::new(config)?;
            let world_id = engine.insert_world(world);
            let loader = engine.add_loader(Loader::new(IVec3::ZERO, radius, 0, max_level));

            println!("Simulating {ticks} ticks: radius={radius} levels=0..{max_level} speed={speed}");
            for t in 0..ticks {
                let stats = engine.tick()?;
                if let Some(l) = engine.loader_mut(loader) {
                    l.position.x += speed;
                }
                if report_every > 0 && (t + 1) % report_every == 0 {
                    println!(
                        "tick {:>5}: nodes={} created={} destroyed={} evicted={} took={:?}",
                        stats.tick,
                        engine.node_count(),
                        stats.created,
                        stats.destroyed,
                        stats.stream.evicted,
                        stats.duration
                    );
                }
            }

            tracing::info!(world = %world_id, nodes = engine.node_count(), "simulation finished");
            if let Some(world) = engine.world(world_id) {
                world.validate_links().context("link validation after simulation")?;
                print!("{}", SpatialInspector::summary(world));
            }
            println!("{}", SpatialInspector::engine_summary(&engine));

            if let Some(dir) = &archive {
                let manifest = store.save_to_dir(dir)?;
                println!("Archive: {} records, sha256={}", manifest.record_count, manifest.sha256);
            }
        }
        Commands::Config { path } => {
            let config = load_config(path.as_ref())?;
            print!("{}", config.to_yaml_string()?);
        }
        Commands::Inspect {
            x,
            y,
            z,
            level,
            ticks,
        } => {
            let mut engine = Engine::new(EngineConfig::default())?;
            let world_id = engine.add_world(PlainFactory);
            let level_count = engine.level_count();
            engine.add_loader(Loader::new(IVec3::ZERO, 2, 0, level_count));
            engine.run_ticks(ticks)?;

            let coord = Coord::from_xyz(x, y, z, level);
            let world = engine.world(world_id).context("world vanished")?;
            match SpatialInspector::inspect_node(world, coord) {
                Some(info) => println!("{info}"),
                None => println!("{coord}: not resident"),
            }
        }
    }

    Ok(())
}
