#![forbid(unsafe_code)]

mod format;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use e2s::{
    BlockNumber, Cx, DEFAULT_MAX_BLOCKS, DEFAULT_MAX_DEPTH, E2sError, Ext2Volume, InodeInfo,
    InodeNumber, OpenOptions, QueryResult, SearchOptions, SearchReport,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ── Production Cx acquisition ───────────────────────────────────────────────

fn cli_cx() -> Cx {
    Cx::for_request()
}

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "e2s", version, about = "Read-only ext2 filesystem explorer")]
struct Cli {
    /// More log output (-v debug, -vv trace). `E2S_LOG` overrides this.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Open images whose inode and block group counts disagree.
    #[arg(long, global = true)]
    lenient: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the superblock summary.
    Superblock {
        /// Path to the ext2 image.
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// List a directory.
    Ls {
        /// Path to the ext2 image.
        image: PathBuf,
        /// Inode number or absolute path of the directory.
        #[arg(default_value = "2")]
        target: String,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Show every field of one inode.
    Inode {
        /// Path to the ext2 image.
        image: PathBuf,
        /// Inode number or absolute path.
        target: String,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Show the data blocks of an inode in logical order.
    Blocks {
        /// Path to the ext2 image.
        image: PathBuf,
        /// Inode number or absolute path.
        target: String,
        /// Stop after this many blocks.
        #[arg(long, default_value_t = DEFAULT_MAX_BLOCKS)]
        max: usize,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Find names containing a term; an all-digit term shows that inode.
    Search {
        /// Path to the ext2 image.
        image: PathBuf,
        /// Case-insensitive name fragment, or an inode number.
        term: String,
        /// Deepest directory level to expand.
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,
        /// Stop after this many matches.
        #[arg(long)]
        max_matches: Option<usize>,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Write the superblock summary to a file.
    Export {
        /// Path to the ext2 image.
        image: PathBuf,
        /// Output file.
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
    Text,
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct BlocksOutput {
    inode: InodeNumber,
    max_blocks: usize,
    blocks: Vec<BlockNumber>,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(error) = run(cli) {
        eprintln!("error: {error:#}");
        std::process::exit(exit_code(&error));
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("E2S_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// The errno of the first `E2sError` in the chain, else 1.
fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<E2sError>())
        .map_or(1, E2sError::to_errno)
}

fn run(cli: Cli) -> Result<()> {
    let options = OpenOptions {
        strict_geometry: !cli.lenient,
    };
    let cx = cli_cx();

    match cli.command {
        Command::Superblock { image, json } => superblock(&cx, &image, &options, json),
        Command::Ls {
            image,
            target,
            json,
        } => ls(&cx, &image, &options, &target, json),
        Command::Inode {
            image,
            target,
            json,
        } => inode(&cx, &image, &options, &target, json),
        Command::Blocks {
            image,
            target,
            max,
            json,
        } => blocks(&cx, &image, &options, &target, max, json),
        Command::Search {
            image,
            term,
            max_depth,
            max_matches,
            json,
        } => {
            let search = SearchOptions {
                max_depth,
                max_matches,
            };
            search_cmd(&cx, &image, &options, &term, &search, json)
        }
        Command::Export { image, out, format } => export(&cx, &image, &options, &out, format),
    }
}

fn open_volume(cx: &Cx, path: &Path, options: &OpenOptions) -> Result<Ext2Volume> {
    debug!(image = %path.display(), strict = options.strict_geometry, "opening image");
    Ext2Volume::open_with_options(cx, path, options)
        .with_context(|| format!("failed to open ext2 image {}", path.display()))
}

/// An inode number, or an absolute path resolved from the root.
fn resolve_target(cx: &Cx, vol: &Ext2Volume, target: &str) -> Result<InodeNumber> {
    if target.starts_with('/') {
        let (ino, _) = vol
            .resolve_path(cx, target)
            .with_context(|| format!("cannot resolve {target}"))?;
        return Ok(ino);
    }
    match target.parse::<u64>() {
        Ok(n) => Ok(InodeNumber(n)),
        Err(_) => bail!("expected an inode number or absolute path, got {target:?}"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}

// ── Commands ────────────────────────────────────────────────────────────────

fn superblock(cx: &Cx, image: &Path, options: &OpenOptions, json: bool) -> Result<()> {
    let vol = open_volume(cx, image, options)?;
    let summary = vol.superblock_summary();
    if json {
        return print_json(&summary);
    }
    print!(
        "{}",
        format::render_fields("Filesystem Information", &format::superblock_fields(&summary))
    );
    Ok(())
}

fn ls(cx: &Cx, image: &Path, options: &OpenOptions, target: &str, json: bool) -> Result<()> {
    let vol = open_volume(cx, image, options)?;
    let ino = resolve_target(cx, &vol, target)?;
    let entries = vol
        .list_directory(cx, ino)
        .with_context(|| format!("cannot list inode {ino}"))?;
    if json {
        return print_json(&entries);
    }
    for line in format::listing_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

fn print_inode(info: &InodeInfo) {
    print!(
        "{}",
        format::render_fields("File Metadata", &format::inode_fields(info))
    );
}

fn print_blocks(ino: InodeNumber, blocks: &[BlockNumber], max: usize) {
    println!("inode {ino}: {} data block(s)", blocks.len());
    for row in format::block_rows(blocks) {
        println!("  {row}");
    }
    if blocks.len() == max {
        println!("  (limited to {max} blocks)");
    }
}

fn inode(cx: &Cx, image: &Path, options: &OpenOptions, target: &str, json: bool) -> Result<()> {
    let vol = open_volume(cx, image, options)?;
    let ino = resolve_target(cx, &vol, target)?;
    let info = vol.inode_info(cx, ino)?;
    if json {
        return print_json(&info);
    }
    print_inode(&info);
    Ok(())
}

fn blocks(
    cx: &Cx,
    image: &Path,
    options: &OpenOptions,
    target: &str,
    max: usize,
    json: bool,
) -> Result<()> {
    let vol = open_volume(cx, image, options)?;
    let ino = resolve_target(cx, &vol, target)?;
    let blocks = vol
        .block_map(cx, ino, max)
        .with_context(|| format!("cannot map blocks of inode {ino}"))?;
    if json {
        return print_json(&BlocksOutput {
            inode: ino,
            max_blocks: max,
            blocks,
        });
    }
    print_blocks(ino, &blocks, max);
    Ok(())
}

fn print_report(report: &SearchReport) {
    for m in &report.matches {
        println!(
            "{:>8} {:<16} {:>11}  {}",
            m.inode.0,
            m.file_type.as_str(),
            format::human_size(m.size),
            m.path
        );
    }
    for branch in &report.abandoned {
        eprintln!("skipped {} (inode {}): {:?}", branch.path, branch.inode, branch.reason);
    }
    let noun = if report.matches.len() == 1 { "match" } else { "matches" };
    println!("{} {noun} for {:?}", report.matches.len(), report.term);
    if report.truncated {
        println!("(stopped at the match limit)");
    }
}

fn search_cmd(
    cx: &Cx,
    image: &Path,
    options: &OpenOptions,
    term: &str,
    search: &SearchOptions,
    json: bool,
) -> Result<()> {
    let vol = open_volume(cx, image, options)?;
    let result = if term.bytes().all(|b| b.is_ascii_digit()) {
        vol.query(cx, term)?
    } else {
        QueryResult::Search(vol.search_with_options(cx, term, search)?)
    };
    if json {
        return print_json(&result);
    }
    match &result {
        QueryResult::Inode { info, blocks } => {
            print_inode(info);
            println!();
            print_blocks(info.inode, blocks, DEFAULT_MAX_BLOCKS);
        }
        QueryResult::Search(report) => print_report(report),
    }
    Ok(())
}

fn export(
    cx: &Cx,
    image: &Path,
    options: &OpenOptions,
    out: &Path,
    format: ExportFormat,
) -> Result<()> {
    let vol = open_volume(cx, image, options)?;
    let summary = vol.superblock_summary();
    let body = match format {
        ExportFormat::Json => {
            let mut text =
                serde_json::to_string_pretty(&summary).context("serialize superblock")?;
            text.push('\n');
            text
        }
        ExportFormat::Text => {
            format::render_fields("Filesystem Information", &format::superblock_fields(&summary))
        }
    };
    fs::write(out, body).with_context(|| format!("failed to write {}", out.display()))?;
    eprintln!("metadata exported to {}", out.display());
    Ok(())
}
