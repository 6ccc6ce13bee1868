//! packtool
//!
//! Inspect and verify packet files from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use packstore::index::{probe_header, IndexHeader, INDEX_FILE_NAME};
use packstore::manifest::total_size;
use packstore::{Config, FilePool, PacketReader, SortKey};
use tracing_subscriber::{fmt, EnvFilter};

/// Packet file inspection tool
#[derive(Parser, Debug)]
#[command(name = "packtool")]
#[command(about = "Inspect and verify packstore packet files")]
#[command(version)]
struct Args {
    /// Max file descriptors to keep open
    #[arg(long, global = true, default_value = "64")]
    fds: usize,

    /// Read cache blocks per bundle (0 disables the cache)
    #[arg(long, global = true, default_value = "0")]
    cache_blocks: usize,

    /// Read cache block size in bytes
    #[arg(long, global = true, default_value = "4194304")]
    cache_block_size: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show index header and bundle summary
    Info {
        /// Packet file directory
        target: PathBuf,
    },

    /// Print entries in key order
    Dump {
        target: PathBuf,

        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Read every record and check all checksums
    Verify { target: PathBuf },

    /// List the physical files backing a packet file
    Manifest { target: PathBuf },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,packstore=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .descriptor_budget(args.fds)
        .read_cache(args.cache_blocks, args.cache_block_size)
        .build();
    let pool = match FilePool::from_config(&config) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to create file pool: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&pool, &config, &args.command) {
        eprintln!("packtool: {}", e);
        std::process::exit(if e.is_corruption() { 2 } else { 1 });
    }
}

fn run(pool: &Arc<FilePool>, config: &Config, command: &Command) -> packstore::Result<()> {
    let target = match command {
        Command::Info { target }
        | Command::Dump { target, .. }
        | Command::Verify { target }
        | Command::Manifest { target } => target,
    };

    let header = probe_header(pool, &target.join(INDEX_FILE_NAME))?;
    match header.key_width {
        4 => run_typed::<u32>(pool, config, target, &header, command),
        8 => run_typed::<u64>(pool, config, target, &header, command),
        16 => run_typed::<u128>(pool, config, target, &header, command),
        width => Err(packstore::StoreError::Config(format!(
            "unsupported key width {} (expected 4, 8 or 16)",
            width
        ))),
    }
}

fn run_typed<K: SortKey>(
    pool: &Arc<FilePool>,
    config: &Config,
    target: &Path,
    header: &IndexHeader,
    command: &Command,
) -> packstore::Result<()> {
    let mut reader = PacketReader::<K>::open_with_config(pool, target, config)?;

    match command {
        Command::Info { .. } => {
            let bundle = reader.bundle();
            println!("target:         {}", target.display());
            println!("entries:        {}", reader.count());
            println!("key width:      {} bytes", header.key_width);
            println!("record crc:     {}", header.data_has_crc());
            println!("data size:      {} bytes", bundle.data_size());
            println!("segments:       {}", bundle.segment_count());
            println!("segment break:  {} bytes", bundle.segment_break());
            println!("written at:     {}", bundle.original_dir().display());
        }

        Command::Dump { limit, .. } => {
            let limit = limit.unwrap_or(u64::MAX);
            let mut shown = 0;
            while shown < limit {
                let Some(entry) = reader.next_entry()? else {
                    break;
                };
                println!(
                    "{:?}\toffset={}\tsize={}\ttag={}",
                    entry.key, entry.offset, entry.size, entry.tag
                );
                shown += 1;
            }
        }

        Command::Verify { .. } => {
            let mut buf = Vec::new();
            let mut verified = 0u64;
            let mut previous: Option<K> = None;
            while let Some((key, _)) = reader.read_next(&mut buf)? {
                if previous.as_ref().map_or(false, |prev| key < *prev) {
                    return Err(packstore::StoreError::CorruptEntry {
                        path: target.join(INDEX_FILE_NAME),
                        index: verified,
                    });
                }
                previous = Some(key);
                verified += 1;
            }
            tracing::info!("Verified {} records in {}", verified, target.display());
            if let Some(stats) = reader.bundle().cache_stats() {
                tracing::info!("Read cache: {} hits, {} misses", stats.hits, stats.misses);
            }
            println!("ok: {} records", verified);
        }

        Command::Manifest { .. } => {
            let manifest = reader.manifest()?;
            for entry in &manifest {
                let moved = if entry.is_relocated() { " (relocated)" } else { "" };
                println!(
                    "{:<14} {:>12}  {}{}",
                    entry.role.to_string(),
                    entry.size,
                    entry.current_path.display(),
                    moved
                );
            }
            println!("total          {:>12}", total_size(&manifest));
        }
    }
    Ok(())
}
