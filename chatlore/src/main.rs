//! chatlore - chat history archiver and analyzer
//!
//! Imports platform chat exports into SQLite-backed store files, merges
//! later exports of the same chat into them, and runs behavioral analytics
//! over the result.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Stores: $XDG_DATA_HOME/chatlore/ (~/.local/share/chatlore/)
//! - Logs: $XDG_STATE_HOME/chatlore/chatlore.log (~/.local/state/chatlore/chatlore.log)
//! - Config: $XDG_CONFIG_HOME/chatlore/config.toml (~/.config/chatlore/config.toml)

mod report;

use anyhow::{bail, Context, Result};
use chatlore_core::analytics::AnalysisOptions;
use chatlore_core::format;
use chatlore_core::ingest::{analyze_merge, import_file, merge_file, ImportOptions};
use chatlore_core::progress::{ImportStage, ProgressEvent, ProgressSink};
use chatlore_core::{ChatStore, Config};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "chatlore")]
#[command(about = "Import, merge, and analyze chat history exports")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import an export file into a new chat store
    Import {
        /// Export file to import
        input: PathBuf,

        /// Store file to create; defaults to <input stem>.chatlore in the data dir
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Chat to pick when the export contains several (name or id)
        #[arg(long)]
        chat: Option<String>,
    },

    /// Merge another export of the same chat into an existing store
    Merge {
        /// Existing store file
        store: PathBuf,

        /// Export file to merge in
        input: PathBuf,

        /// Report what would be added without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Run an analytics report over a store
    Analyze {
        /// Store file to analyze
        store: PathBuf,

        /// Report to run (use --list to see them)
        #[arg(short, long, default_value = "activity")]
        report: String,

        /// List available reports
        #[arg(long)]
        list: bool,

        /// Output format: text (default) or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Start of the analysis range, YYYY-MM-DD
        #[arg(long)]
        since: Option<String>,

        /// End of the analysis range, YYYY-MM-DD (exclusive)
        #[arg(long)]
        until: Option<String>,

        /// UTC offset in hours for day/hour bucketing; defaults to the host offset
        #[arg(long)]
        utc_offset: Option<i32>,
    },

    /// Export a store back to canonical JSONL
    Export {
        /// Store file to export
        store: PathBuf,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List supported export formats, or explain why a file fails detection
    Formats {
        /// File to diagnose
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        chatlore_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match cli.command {
        Command::Import { input, out, chat } => cmd_import(&config, &input, out, chat),
        Command::Merge {
            store,
            input,
            dry_run,
        } => cmd_merge(&config, &store, &input, dry_run),
        Command::Analyze {
            store,
            report,
            list,
            format,
            since,
            until,
            utc_offset,
        } => cmd_analyze(&config, &store, &report, list, &format, since, until, utc_offset),
        Command::Export { store, out } => cmd_export(&store, out),
        Command::Formats { file } => cmd_formats(file.as_deref()),
    }
}

// ============================================
// Progress bar
// ============================================

/// [`ProgressSink`] rendering to an indicatif bar.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg} {wide_bar} {percent}%")
                .context("bad progress template")?,
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Ok(Self { bar })
    }
}

impl ProgressSink for BarProgress {
    fn report(&self, event: &ProgressEvent) {
        match event.stage {
            ImportStage::Detecting => self.bar.set_message("Detecting format"),
            ImportStage::Parsing => {
                if event.total_bytes > 0 {
                    self.bar.set_length(event.total_bytes);
                    self.bar.set_position(event.bytes_read);
                }
                self.bar.set_message("Parsing");
            }
            ImportStage::Importing => self
                .bar
                .set_message(format!("{} messages", event.messages_processed)),
            ImportStage::Saving => self.bar.set_message(
                event
                    .message
                    .clone()
                    .unwrap_or_else(|| "Saving".to_string()),
            ),
            ImportStage::Done | ImportStage::Error => self.bar.finish_and_clear(),
        }
    }
}

// ============================================
// Commands
// ============================================

fn cmd_import(
    config: &Config,
    input: &Path,
    out: Option<PathBuf>,
    chat: Option<String>,
) -> Result<()> {
    let store_path = match out {
        Some(path) => path,
        None => {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("chat");
            let dir = Config::data_dir();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            dir.join(format!("{}.chatlore", stem))
        }
    };

    let mut options = ImportOptions::from_config(config);
    options.parse.chat_selector = chat;
    install_cancel_handler(&options.parse.cancel)?;

    let progress = BarProgress::new()?;
    let outcome = import_file(input, &store_path, &options, &progress)
        .with_context(|| format!("failed to import {}", input.display()))?;

    println!("Imported as {} into {}", outcome.format, store_path.display());
    println!(
        "  {} messages, {} members, {} sessions",
        outcome.messages_written, outcome.members_created, outcome.sessions
    );
    if outcome.parse_skipped + outcome.skips.total() > 0 {
        println!(
            "  skipped: {} malformed, {} without sender, {} without name, {} with bad timestamp",
            outcome.parse_skipped,
            outcome.skips.missing_sender,
            outcome.skips.missing_name,
            outcome.skips.invalid_timestamp
        );
    }
    Ok(())
}

fn cmd_merge(config: &Config, store_path: &Path, input: &Path, dry_run: bool) -> Result<()> {
    let store = ChatStore::open(store_path)
        .with_context(|| format!("failed to open {}", store_path.display()))?;

    let mut options = ImportOptions::from_config(config).parse;
    install_cancel_handler(&options.cancel)?;
    options.chat_selector = None;

    if dry_run {
        let preview = analyze_merge(&store, input, &options)
            .with_context(|| format!("failed to analyze {}", input.display()))?;
        println!(
            "Would add {} message(s) ({} duplicate(s) skipped), {} new member(s)",
            preview.new_messages, preview.duplicates, preview.new_members
        );
        return Ok(());
    }

    let progress = BarProgress::new()?;
    let outcome = merge_file(
        &store,
        input,
        &options,
        config.analytics.session_gap_secs,
        &progress,
    )
    .with_context(|| format!("failed to merge {}", input.display()))?;

    println!(
        "Merged: {} added, {} duplicates skipped, {} new member(s), {} session(s)",
        outcome.messages_added,
        outcome.duplicates_skipped,
        outcome.members_created,
        outcome.sessions
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_analyze(
    config: &Config,
    store_path: &Path,
    report_name: &str,
    list: bool,
    format: &str,
    since: Option<String>,
    until: Option<String>,
    utc_offset: Option<i32>,
) -> Result<()> {
    if list {
        println!("Available reports:");
        for name in report::REPORT_NAMES {
            println!("  - {}", name);
        }
        return Ok(());
    }

    let store = ChatStore::open(store_path)
        .with_context(|| format!("failed to open {}", store_path.display()))?;

    let mut options = AnalysisOptions::default();
    if let Some(hours) = utc_offset {
        options.utc_offset_secs = hours * 3600;
    }
    options.range = parse_range(since.as_deref(), until.as_deref(), options.utc_offset_secs)?;

    let json = match format {
        "json" => true,
        "text" => false,
        other => bail!("unknown output format '{}', expected text or json", other),
    };

    report::run(&store, report_name, &options, config, json)
}

fn cmd_export(store_path: &Path, out: Option<PathBuf>) -> Result<()> {
    let store = ChatStore::open(store_path)
        .with_context(|| format!("failed to open {}", store_path.display()))?;

    match out {
        Some(path) => {
            let records = chatlore_core::export::export_to_path(&store, &path)
                .with_context(|| format!("failed to export to {}", path.display()))?;
            println!("Wrote {} record(s) to {}", records, path.display());
        }
        None => {
            let stdout = std::io::stdout();
            chatlore_core::export::export_jsonl(&store, stdout.lock())
                .context("failed to export")?;
        }
    }
    Ok(())
}

fn cmd_formats(file: Option<&Path>) -> Result<()> {
    let Some(file) = file else {
        println!("Supported export formats (detection order):");
        for descriptor in format::CATALOG {
            println!(
                "  {:15} {} ({})",
                descriptor.id.as_str(),
                descriptor.name,
                descriptor.platform.display_name()
            );
        }
        return Ok(());
    };

    let matches = format::detect(file)?;
    if !matches.is_empty() {
        println!("{} matches:", file.display());
        for descriptor in matches {
            println!("  - {} ({})", descriptor.id, descriptor.name);
        }
        return Ok(());
    }

    println!("{} matched no known format:", file.display());
    for diag in format::diagnose(file)? {
        let reason = if diag.extension_rejected {
            "extension not recognized".to_string()
        } else if !diag.signature_matched {
            "head signature not found".to_string()
        } else {
            format!("missing fields: {}", diag.missing_fields.join(", "))
        };
        println!("  {:15} {}", diag.format.as_str(), reason);
    }
    Ok(())
}

// ============================================
// Helpers
// ============================================

/// Ctrl-C flips the shared cancel token; the pipeline notices at the next
/// batch boundary and rolls back.
fn install_cancel_handler(cancel: &chatlore_core::CancelToken) -> Result<()> {
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        token.cancel();
    })
    .context("failed to install Ctrl-C handler")
}

/// `YYYY-MM-DD` bounds to a half-open UTC timestamp range, interpreted in
/// analysis-local time.
fn parse_range(
    since: Option<&str>,
    until: Option<&str>,
    utc_offset_secs: i32,
) -> Result<Option<(i64, i64)>> {
    let parse = |s: &str| -> Result<i64> {
        let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", s))?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .context("invalid date")?
            .and_utc()
            .timestamp();
        Ok(midnight - utc_offset_secs as i64)
    };

    Ok(match (since, until) {
        (None, None) => None,
        (since, until) => {
            let start = since.map(parse).transpose()?.unwrap_or(i64::MIN);
            let end = until.map(parse).transpose()?.unwrap_or(i64::MAX);
            Some((start, end))
        }
    })
}
