// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use storage_sys::{LocalImageAllocator, LocalImageMounter, SystemCommandRunner, read_partition_table};
use storage_thickcopy::{ThickCopy, ThickCopyConfig, logging, read_extents_file};
use storage_types::{ByteRange, SourceDisk, ThickCopyStatus, VmDisks, bytes_to_pretty};

#[derive(Debug, Parser)]
#[command(name = "thickcopy-extents")]
#[command(about = "Find the byte ranges of VM disks that hold allocated data")]
struct Cli {
    /// Configuration file (defaults to $THICKCOPY_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Allocate destination images and write extents files for one VM
    Discover {
        #[arg(long)]
        vm: String,
        /// Source disk as `path` or `path=capacity_bytes`; repeat per disk
        #[arg(long = "disk", required = true)]
        disks: Vec<String>,
        /// Directory receiving the empty destination images
        #[arg(long)]
        dest_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the partition table of a block device
    Partitions {
        device: String,
        #[arg(long)]
        json: bool,
    },
    /// Validate an extents file
    Check { file: PathBuf },
}

fn parse_disk(arg: &str, dest_dir: &Path) -> Result<SourceDisk> {
    let (path, capacity) = match arg.rsplit_once('=') {
        Some((path, capacity)) => {
            let capacity = capacity
                .parse::<u64>()
                .with_context(|| format!("invalid capacity in --disk {arg}"))?;
            (path, capacity)
        }
        None => {
            let metadata = std::fs::metadata(arg).with_context(|| format!("cannot stat {arg}"))?;
            if metadata.len() == 0 {
                bail!("cannot determine the capacity of {arg}, pass it as {arg}=<bytes>");
            }
            (arg, metadata.len())
        }
    };

    let name = Path::new(path)
        .file_name()
        .with_context(|| format!("{path} has no file name"))?;
    Ok(SourceDisk {
        source: path.to_string(),
        capacity,
        destination: dest_dir.join(name),
    })
}

fn print_ranges(ranges: &[ByteRange]) {
    let total: u64 = ranges.iter().map(ByteRange::size).sum();
    println!("{} ranges, {} ({total} bytes)", ranges.len(), bytes_to_pretty(&total, false));
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ThickCopyConfig::resolve(cli.config.as_deref())?;
    logging::init(&config.logging);

    let runner = SystemCommandRunner;
    match cli.command {
        Command::Discover {
            vm,
            disks,
            dest_dir,
            json,
        } => {
            let disks = disks
                .iter()
                .map(|arg| parse_disk(arg, &dest_dir))
                .collect::<Result<Vec<_>>>()?;
            let request = VmDisks { vm_id: vm, disks };

            let engine = ThickCopy::new(&config, &runner, &LocalImageMounter, &LocalImageAllocator);
            let result = engine.discover_extents(&request)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }
            match &result.status {
                ThickCopyStatus::Ready => println!("{}: ready", result.vm_id),
                ThickCopyStatus::Void(reason) => println!("{}: void ({reason})", result.vm_id),
            }
            for (source, disk) in &result.disks {
                let file = disk
                    .extents_file
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |path| path.display().to_string());
                println!(
                    "  {source}: {} in {} blocks -> {file}",
                    bytes_to_pretty(&disk.total_bytes, true),
                    disk.total_blocks
                );
            }
            Ok(())
        }
        Command::Partitions { device, json } => {
            let table = read_partition_table(&runner, &device)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
                return Ok(());
            }
            let label = table.kind.map_or("none", |kind| kind.as_str());
            println!("{device}: {label}, sector size {}", table.sector_size);
            for entry in &table.entries {
                println!(
                    "  {:<16} {:>12} {:>12} {:>6} {}",
                    entry.device, entry.start_sector, entry.end_sector, entry.type_id, entry.system
                );
            }
            Ok(())
        }
        Command::Check { file } => {
            let ranges = read_extents_file(&file)?;
            print_ranges(&ranges);
            Ok(())
        }
    }
}
