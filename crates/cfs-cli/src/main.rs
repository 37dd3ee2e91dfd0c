#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use cfs_core::{CfsError, CowFs, FileMode, VersionNumber};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;

/// Default logical capacity for new images: 1 MiB.
const DEFAULT_DISK_SIZE: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(name = "cfs", about = "ChronoFS, a versioned copy-on-write image toolkit")]
struct Cli {
    /// Path to the image file.
    #[arg(long, global = true, default_value = "chronofs.img")]
    image: PathBuf,

    /// Logical capacity in bytes when creating a new image.
    #[arg(long, global = true, default_value_t = DEFAULT_DISK_SIZE)]
    size: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List files in the image.
    Ls {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Create an empty file.
    Create {
        /// Filename (unique within the image).
        name: String,
    },
    /// Write a file's new content, recording a version.
    Write {
        /// Target filename.
        name: String,
        /// Inline content; read from stdin when omitted.
        #[arg(long)]
        data: Option<String>,
        /// Create the file first if it does not exist.
        #[arg(long)]
        create: bool,
    },
    /// Print a file's current content to stdout.
    Cat {
        /// Filename to read.
        name: String,
    },
    /// Show a file's version history.
    History {
        /// Filename to inspect.
        name: String,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Roll a file back to an earlier version, discarding later ones.
    Rollback {
        /// Filename to roll back.
        name: String,
        /// Target version number (1-based).
        version: u32,
    },
    /// Sweep unreferenced blocks back onto the free list.
    Gc,
    /// Show status for one file.
    Stat {
        /// Filename to inspect.
        name: String,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Dump the whole image's metadata.
    Inspect {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Run the integrity check and report findings.
    Check,
}

fn main() {
    init_tracing();
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut fs = CowFs::open_image(&cli.image, cli.size)
        .with_context(|| format!("failed to open image: {}", cli.image.display()))?;

    match cli.command {
        Command::Ls { json } => ls(&fs, json)?,
        Command::Create { name } => {
            fs.create(&name).context("create failed")?;
            println!("created {name}");
        }
        Command::Write { name, data, create } => write_cmd(&mut fs, &name, data, create)?,
        Command::Cat { name } => cat(&mut fs, &name)?,
        Command::History { name, json } => history(&mut fs, &name, json)?,
        Command::Rollback { name, version } => {
            let fd = fs
                .open(&name, FileMode::Write)
                .with_context(|| format!("failed to open {name}"))?;
            fs.rollback_to_version(fd, VersionNumber(version))
                .context("rollback failed")?;
            println!("{name} rolled back to version {version}");
        }
        Command::Gc => {
            let reclaimed = fs.garbage_collect();
            println!("garbage collection reclaimed {reclaimed} blocks");
        }
        Command::Stat { name, json } => stat(&mut fs, &name, json)?,
        Command::Inspect { json } => inspect(&fs, json)?,
        Command::Check => {
            let findings = fs.check();
            if findings.is_empty() {
                println!("image is healthy");
            } else {
                for finding in &findings {
                    println!("{finding}");
                }
                fs.close().context("failed to close image")?;
                std::process::exit(2);
            }
        }
    }

    fs.close().context("failed to close image")?;
    Ok(())
}

fn ls(fs: &CowFs, json: bool) -> Result<()> {
    let files = fs.list_files();
    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
    } else {
        for name in files {
            println!("{name}");
        }
    }
    Ok(())
}

fn write_cmd(fs: &mut CowFs, name: &str, data: Option<String>, create: bool) -> Result<()> {
    let content = match data {
        Some(data) => data.into_bytes(),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let fd = match fs.open(name, FileMode::Write) {
        Ok(fd) => fd,
        Err(CfsError::NotFound(_)) if create => fs.create(name).context("create failed")?,
        Err(error) => {
            return Err(error).with_context(|| format!("failed to open {name}"));
        }
    };

    let written = fs.write(fd, &content).context("write failed")?;
    let version = fs.get_version_count(fd).context("version count")?;
    println!("wrote {written} bytes to {name} (version {version})");
    Ok(())
}

fn cat(fs: &mut CowFs, name: &str) -> Result<()> {
    let fd = fs
        .open(name, FileMode::Read)
        .with_context(|| format!("failed to open {name}"))?;
    let size = fs.get_file_size(fd).context("size")? as usize;
    let mut buf = vec![0_u8; size];
    let mut done = 0;
    while done < size {
        let n = fs.read(fd, &mut buf[done..]).context("read failed")?;
        if n == 0 {
            bail!("short read: {done} of {size} bytes");
        }
        done += n;
    }
    use std::io::Write;
    std::io::stdout()
        .write_all(&buf)
        .context("failed to write stdout")?;
    Ok(())
}

fn history(fs: &mut CowFs, name: &str, json: bool) -> Result<()> {
    let fd = fs
        .open(name, FileMode::Read)
        .with_context(|| format!("failed to open {name}"))?;
    let versions = fs.get_version_history(fd).context("history")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
    } else {
        println!("{name}: {} versions", versions.len());
        for v in &versions {
            println!(
                "  v{} at {}  {} bytes  delta [{}, +{})",
                v.version_number, v.timestamp, v.size, v.delta_start, v.delta_size
            );
        }
    }
    Ok(())
}

fn stat(fs: &mut CowFs, name: &str, json: bool) -> Result<()> {
    let fd = fs
        .open(name, FileMode::Read)
        .with_context(|| format!("failed to open {name}"))?;
    let status = fs.get_file_status(fd);

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("name: {name}");
        println!("open: {}", status.is_open);
        println!("modified: {}", status.is_modified);
        println!("size: {}", status.current_size);
        println!("version: {}", status.current_version);
    }
    Ok(())
}

fn inspect(fs: &CowFs, json: bool) -> Result<()> {
    let snapshot = fs.metadata_snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("ChronoFS Image");
    println!("disk_size: {}", snapshot.disk_size);
    println!("block_size: {}", snapshot.block_size);
    println!("total_blocks: {}", snapshot.total_blocks);
    println!("blocks_in_use: {}", snapshot.blocks_in_use);
    println!("free_blocks: {}", snapshot.free_blocks);
    println!("memory_usage: {}", snapshot.total_memory_usage);
    println!("files: {}", snapshot.files.len());
    for file in &snapshot.files {
        println!(
            "  {}  {} bytes, {} versions",
            file.name, file.size, file.version_count
        );
        for v in &file.versions {
            println!(
                "    v{} at {}  {} bytes in {} blocks",
                v.version_number, v.timestamp, v.size, v.chain_blocks
            );
        }
    }
    Ok(())
}
