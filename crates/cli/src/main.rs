//! Coherence engine driver CLI.
//!
//! This binary builds a tiled memory system and drives it with synthetic workloads. It performs:
//! 1. **System setup:** Default or JSON configuration, overridden by command-line flags.
//! 2. **Workload run:** One core thread per tile issuing loads, stores and locked updates.
//! 3. **Verification:** Checks the coherent result of the workload after all cores finish.
//! 4. **Reporting:** Prints statistics as a table or as JSON.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tilesim_core::common::{LockSignal, MemComponent, MemOp, ProtocolError, TileId};
use tilesim_core::stats::STATS_SECTIONS;
use tilesim_core::{Config, MemoryManager, System};

#[derive(Parser, Debug)]
#[command(
    name = "tilesim",
    author,
    version,
    about = "Directory-based cache coherence engine",
    long_about = "Build a tiled memory system and drive it with a synthetic workload.\n\n\
                  Examples:\n  \
                  tilesim run --tiles 4 --iterations 1000 --workload counter\n  \
                  tilesim run --config chip.json --workload sharing --json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one workload to completion and print statistics.
    Run {
        /// Number of tiles (overrides the configuration file).
        #[arg(short, long)]
        tiles: Option<usize>,

        /// Operations issued by each core.
        #[arg(short, long, default_value_t = 1000)]
        iterations: u64,

        /// Access pattern of the cores.
        #[arg(short, long, value_enum, default_value_t = Workload::Counter)]
        workload: Workload,

        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print statistics as JSON instead of a table.
        #[arg(long)]
        json: bool,

        /// Statistics sections to print (default: all).
        #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(STATS_SECTIONS))]
        section: Vec<String>,
    },
}

/// Synthetic access patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Workload {
    /// Every core increments one shared counter under LOCK/UNLOCK.
    Counter,
    /// Every core writes its own word of one shared line.
    Sharing,
    /// Every core writes and reads back a private array.
    Private,
}

const COUNTER_ADDRESS: u64 = 0x1000;
const SHARING_BASE: u64 = 0x2000;
const PRIVATE_BASE: u64 = 0x10_0000;
const PRIVATE_STRIDE: u64 = 0x10_0000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            tiles,
            iterations,
            workload,
            config,
            json,
            section,
        } => cmd_run(tiles, iterations, workload, config, json, &section),
    }
}

/// Builds the system, runs the workload on one thread per tile, verifies and reports.
fn cmd_run(
    tiles: Option<usize>,
    iterations: u64,
    workload: Workload,
    config_path: Option<PathBuf>,
    json: bool,
    sections: &[String],
) {
    let mut config = match config_path {
        Some(path) => Config::from_file(&path).unwrap_or_else(|e| {
            eprintln!("Error: {}: {e}", path.display());
            process::exit(2);
        }),
        None => Config::default(),
    };
    if let Some(tiles) = tiles {
        config.general.total_tiles = tiles;
        config.general.memory_controller_tiles.retain(|t| t.index() < tiles);
    }

    let system = System::new(config).unwrap_or_else(|e| {
        eprintln!("Error: invalid configuration: {e}");
        process::exit(2);
    });
    if !json {
        println!(
            "[*] {:?} workload: {} tiles x {iterations} iterations",
            workload,
            system.total_tiles()
        );
    }

    let result = thread::scope(|scope| {
        let handles: Vec<_> = (0..system.total_tiles())
            .filter_map(|id| system.tile(TileId::from(id)))
            .map(|tile| scope.spawn(move || run_core(&tile, workload, iterations)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(ProtocolError::TileShutDown(TileId(0)))))
            .collect::<Result<Vec<()>, _>>()
    });
    if let Err(e) = result {
        eprintln!("Error: core failed: {e}");
        if let Some(first) = system.first_error() {
            eprintln!("  first protocol failure: {first}");
        }
        process::exit(1);
    }
    if !system.wait_until_idle(Duration::from_secs(10)) {
        eprintln!("Error: network did not drain");
        process::exit(1);
    }

    let verdict = system
        .tile(TileId(0))
        .map(|tile| verify(&tile, workload, iterations, system.total_tiles()));
    let stats = system.shutdown().unwrap_or_else(|e| {
        eprintln!("Error: protocol failure: {e}");
        process::exit(1);
    });

    match verdict {
        Some(Ok(())) => {}
        Some(Err(msg)) => {
            eprintln!("Error: verification failed: {msg}");
            process::exit(1);
        }
        None => {
            eprintln!("Error: system has no tile 0");
            process::exit(1);
        }
    }

    if json {
        match serde_json::to_string_pretty(&stats) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: cannot serialize statistics: {e}");
                process::exit(1);
            }
        }
    } else {
        println!("[*] Verified coherent result");
        stats.print_sections(sections);
    }
}

fn load_u64(tile: &MemoryManager, address: u64, modeled: bool) -> Result<u64, ProtocolError> {
    let mut word = [0u8; 8];
    let _ = tile.core_access(
        MemComponent::L1DCache,
        LockSignal::None,
        MemOp::Read,
        address,
        &mut word,
        modeled,
    )?;
    Ok(u64::from_le_bytes(word))
}

fn store_u64(tile: &MemoryManager, address: u64, value: u64) -> Result<(), ProtocolError> {
    let mut word = value.to_le_bytes();
    tile.core_access(
        MemComponent::L1DCache,
        LockSignal::None,
        MemOp::Write,
        address,
        &mut word,
        true,
    )
    .map(|_| ())
}

/// Atomic read-modify-write: exclusive read under LOCK, write under UNLOCK.
fn increment(tile: &MemoryManager, address: u64) -> Result<(), ProtocolError> {
    let mut word = [0u8; 8];
    let _ = tile.core_access(
        MemComponent::L1DCache,
        LockSignal::Lock,
        MemOp::ReadEx,
        address,
        &mut word,
        true,
    )?;
    let mut next = (u64::from_le_bytes(word) + 1).to_le_bytes();
    let _ = tile.core_access(
        MemComponent::L1DCache,
        LockSignal::Unlock,
        MemOp::Write,
        address,
        &mut next,
        true,
    )?;
    Ok(())
}

fn run_core(
    tile: &Arc<MemoryManager>,
    workload: Workload,
    iterations: u64,
) -> Result<(), ProtocolError> {
    let id = u64::from(tile.tile().0);
    match workload {
        Workload::Counter => (0..iterations).try_for_each(|_| increment(tile, COUNTER_ADDRESS)),
        Workload::Sharing => {
            (1..=iterations).try_for_each(|i| store_u64(tile, SHARING_BASE + 8 * id, i))
        }
        Workload::Private => {
            let base = PRIVATE_BASE + PRIVATE_STRIDE * id;
            for i in 0..iterations {
                store_u64(tile, base + 8 * i, i ^ id)?;
            }
            for i in 0..iterations {
                let _ = load_u64(tile, base + 8 * i, true)?;
            }
            Ok(())
        }
    }
}

fn verify(
    tile: &MemoryManager,
    workload: Workload,
    iterations: u64,
    tiles: usize,
) -> Result<(), String> {
    let check = |address: u64, expected: u64| -> Result<(), String> {
        let found = load_u64(tile, address, false).map_err(|e| e.to_string())?;
        if found == expected {
            Ok(())
        } else {
            Err(format!("{address:#x}: expected {expected}, found {found}"))
        }
    };
    match workload {
        Workload::Counter => check(COUNTER_ADDRESS, iterations * tiles as u64),
        Workload::Sharing => {
            (0..tiles as u64).try_for_each(|id| check(SHARING_BASE + 8 * id, iterations))
        }
        Workload::Private => (0..tiles as u64).try_for_each(|id| {
            let base = PRIVATE_BASE + PRIVATE_STRIDE * id;
            (0..iterations).try_for_each(|i| check(base + 8 * i, i ^ id))
        }),
    }
}
