//! tarbundle - Build and maintain gzip-compressed tar bundles of media files.
//!
//! Usage:
//!   tarbundle create SOURCE OUTPUT      Scan SOURCE and write a fresh bundle
//!   tarbundle list ARCHIVE              List entries
//!   tarbundle info ARCHIVE NAME         Show one entry's header metadata
//!   tarbundle add ARCHIVE FILES...      Append files in place
//!   tarbundle remove ARCHIVE NAMES...   Drop entries in place
//!   tarbundle update ARCHIVE NAME FILE  Replace one entry in place
//!   tarbundle --help                    Show help

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tarbundle_core::{ArchiveEntryMetadata, BatchReport, FilterMode, ModificationOutcome};
use tarbundle_ops::{
    ArchiveConfig, Archiver, CompressionLevel, DEFAULT_BATCH_SIZE, ModificationRequest,
    ModifyEvent,
};

#[derive(Parser)]
#[command(
    name = "tarbundle",
    version,
    about = "Build and incrementally maintain gzip-compressed tar bundles",
    long_about = "tarbundle packs a directory tree of photos and videos into a single \
                  .tar.gz and lets you add, remove or replace entries afterwards without \
                  rebuilding it. Entries are stored under their base file name."
)]
struct Cli {
    /// Log progress events to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory and write a fresh bundle
    Create {
        /// Directory to scan
        source: PathBuf,

        /// Bundle to write (overwritten if present)
        output: PathBuf,

        /// Only archive files directly inside SOURCE
        #[arg(long)]
        no_recursive: bool,

        /// Selection mode: all, photos or videos
        #[arg(short, long, default_value = "all")]
        filter: FilterMode,

        /// Restrict to these extensions (only with --filter all, repeatable)
        #[arg(short, long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Concurrent entry writers
        #[arg(short = 'j', long, default_value_t = tarbundle_core::DEFAULT_ENTRY_WORKERS)]
        workers: usize,
    },

    /// List the entries of a bundle
    List {
        archive: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Show one entry's metadata
    Info {
        archive: PathBuf,
        name: String,

        #[arg(long)]
        json: bool,
    },

    /// Append files to a bundle (created if missing)
    Add {
        archive: PathBuf,

        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Remove entries from a bundle
    Remove {
        archive: PathBuf,

        /// Entry names; only the final path component is used
        #[arg(required = true)]
        names: Vec<String>,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Replace an entry with the contents of FILE
    Update {
        archive: PathBuf,
        name: String,
        file: PathBuf,

        /// Compression level: none, fast, default or best
        #[arg(short, long, default_value = "default")]
        level: CompressionLevel,

        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct BatchArgs {
    /// Requests committed per rewrite
    #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Compression level: none, fast, default or best
    #[arg(short, long, default_value = "default")]
    level: CompressionLevel,

    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Create {
            source,
            output,
            no_recursive,
            filter,
            extensions,
            workers,
        } => {
            let config = ArchiveConfig::builder()
                .source_path(source)
                .output_path(output)
                .recursive(!no_recursive)
                .filter_mode(filter)
                .allowed_extensions(extensions)
                .entry_workers(workers)
                .build()
                .context("Invalid configuration")?;
            run_create(config).await?;
        }
        Command::List { archive, json } => {
            run_list(&archive, json).await?;
        }
        Command::Info {
            archive,
            name,
            json,
        } => {
            run_info(&archive, &name, json).await?;
        }
        Command::Add {
            archive,
            files,
            batch,
        } => {
            let report = session(&archive)
                .batch_add(files, batch.batch_size, batch.level)
                .await;
            print_report(&report, batch.json)?;
        }
        Command::Remove {
            archive,
            names,
            batch,
        } => {
            let report = session(&archive)
                .batch_remove(names, batch.batch_size, batch.level)
                .await;
            print_report(&report, batch.json)?;
        }
        Command::Update {
            archive,
            name,
            file,
            level,
            json,
        } => {
            run_update(&archive, name, file, level, json).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// A session over an existing bundle; the source directory is unused.
fn session(archive: &Path) -> Archiver {
    Archiver::new(ArchiveConfig::new(".", archive))
}

/// Scan, filter and write a fresh bundle.
async fn run_create(config: ArchiveConfig) -> Result<()> {
    let archiver = Archiver::new(config);
    let source = archiver.config().source_path.clone();

    eprintln!("Scanning {}...", source.display());

    let scanned = archiver.scan().context("Scan failed")?;
    let selected = archiver.filter(scanned);
    let summary = archiver.create(selected).await.context("Archive failed")?;
    let state = archiver.finish();

    for err in &summary.skipped {
        eprintln!("warning: {err}");
    }

    println!();
    println!("{}", "─".repeat(60));
    println!(
        " {} - {}",
        archiver.config().output_path.display(),
        format_size(summary.bytes_written)
    );
    println!(
        " {} files archived, {} skipped",
        summary.files_written,
        summary.skipped.len()
    );
    for (category, counts) in &state.category_counts {
        let total: u64 = counts.values().sum();
        let breakdown: Vec<String> = counts.iter().map(|(ext, n)| format!("{ext}: {n}")).collect();
        println!("   {category:<6} {total:>6}  ({})", breakdown.join(", "));
    }
    println!(" Finished in {:.2}s", state.elapsed.as_secs_f64());
    println!("{}", "─".repeat(60));

    Ok(())
}

/// List a bundle's entries.
async fn run_list(archive: &Path, json: bool) -> Result<()> {
    let index = session(archive)
        .index()
        .await
        .with_context(|| format!("Failed to read {}", archive.display()))?;

    if json {
        let entries: Vec<&ArchiveEntryMetadata> = index.iter().collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in index.iter() {
        println!(
            "{:>10}  {}  {}",
            format_size(entry.size),
            entry.mod_time.format("%Y-%m-%d %H:%M"),
            entry.name
        );
    }
    println!();
    println!(
        " {} entries, {}",
        index.len(),
        format_size(index.total_size())
    );

    Ok(())
}

/// Show one entry.
async fn run_info(archive: &Path, name: &str, json: bool) -> Result<()> {
    let entry = session(archive).get_file_info(name).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    println!(" Name:     {}", entry.name);
    println!(" Size:     {} ({} bytes)", format_size(entry.size), entry.size);
    println!(" Modified: {}", entry.mod_time.to_rfc3339());
    println!(" Mode:     {:o}", entry.mode);

    Ok(())
}

/// Replace one entry and report the outcome.
async fn run_update(
    archive: &Path,
    name: String,
    file: PathBuf,
    level: CompressionLevel,
    json: bool,
) -> Result<()> {
    let archiver = session(archive);
    let mut events = archiver.modify(vec![ModificationRequest::update(name, file)], level)?;

    let mut outcomes = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            ModifyEvent::Outcome(outcome) => outcomes.push(outcome),
            ModifyEvent::Committed(_) => {}
            ModifyEvent::Aborted(err) => return Err(err).context("Update was not committed"),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        outcomes.iter().for_each(print_outcome);
    }

    if outcomes.iter().any(|o| !o.succeeded) {
        bail!("update failed");
    }
    Ok(())
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        report.outcomes.iter().for_each(print_outcome);
        for failure in &report.batch_failures {
            eprintln!(" batch {} not committed: {}", failure.batch_index, failure.error);
        }
        println!();
        println!(
            " {} succeeded, {} failed",
            report.succeeded_count, report.failed_count
        );
    }

    if !report.is_success() {
        bail!(
            "{} request(s) failed, {} batch(es) not committed",
            report.failed_count,
            report.batch_failures.len()
        );
    }
    Ok(())
}

fn print_outcome(outcome: &ModificationOutcome) {
    match &outcome.error {
        None => println!(" ok      {:<6} {}", outcome.operation, outcome.name),
        Some(err) => println!(" failed  {:<6} {}  ({err})", outcome.operation, outcome.name),
    }
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
