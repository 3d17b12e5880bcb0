use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use crate::db::Database;
use crate::downsample::{build_low_res_view, Resolution};
use crate::ingest::{self, IngestSummary};
use crate::query::{self, TimeRange};
use crate::readings::format_timestamp;
use crate::settings::Settings;
use crate::writer::WriteCacheConfig;

#[derive(Parser, Debug)]
#[command(name = "sailtrack")]
#[command(about = "Convert B&G logger output, build map views and find tacks", long_about = None)]
pub struct Cli {
    /// JSON settings file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// SQLite database (overrides settings and SAILTRACK_DB)
    #[arg(long, global = true, value_name = "FILE")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store every reading as a per-type document
    Transform {
        file: PathBuf,
        /// Collection to create, usually the day as yymmdd
        #[arg(short, long)]
        collection: String,
    },
    /// Store one fused row per position window
    Fuse {
        file: PathBuf,
        #[arg(short, long)]
        collection: String,
    },
    /// Write per-type documents as JSON lines (default `<file>.mong`)
    Export {
        file: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a SailNjord CSV (default `<file>sn.csv`)
    Sailnjord {
        file: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build a low-resolution position view of a collection
    LowRes {
        #[arg(short, long)]
        collection: String,
        /// Seconds per sample: 1, 6 or 60
        #[arg(short, long, default_value_t = 6)]
        resolution: u64,
    },
    /// Count the record descriptions in a logger file
    Fields { file: PathBuf },
    /// List tack times between two RFC 3339 instants
    Tacks {
        #[arg(long)]
        start: String,
        #[arg(long)]
        stop: String,
        /// Collection holding the wind documents
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        table: Option<String>,
        /// Read a logger file instead of the database
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the six-second track for a day
    Position { day: String },
}

impl Cli {
    /// Settings file, then environment, then `--db`.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(db) = &self.db {
            settings.database_path = db.clone();
        }
        Ok(settings)
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    let settings = cli.settings()?;
    let writes = WriteCacheConfig::from(&settings);

    match cli.command {
        Command::Transform { file, collection } => {
            let store = open_store(&settings)?;
            let summary =
                ingest::transform_to_store(store, open_input(&file)?, &collection, writes).await?;
            report(&file, &summary);
        }
        Command::Fuse { file, collection } => {
            let store = open_store(&settings)?;
            let summary = ingest::fuse_to_store(
                store,
                open_input(&file)?,
                &collection,
                writes,
                settings.min_emit_interval()?,
            )
            .await?;
            report(&file, &summary);
        }
        Command::Export { file, output } => {
            let output = output.unwrap_or_else(|| ingest::documents_output_path(&file));
            let summary = ingest::export_documents(open_input(&file)?, create_output(&output)?)?;
            info!("{} documents written to {}", summary.written, output.display());
        }
        Command::Sailnjord { file, output } => {
            let output = output.unwrap_or_else(|| ingest::csv_output_path(&file));
            let summary = ingest::export_csv(
                open_input(&file)?,
                create_output(&output)?,
                settings.min_emit_interval()?,
            )?;
            info!("{} rows written to {}", summary.written, output.display());
        }
        Command::LowRes {
            collection,
            resolution,
        } => {
            let resolution = Resolution::from_secs(resolution)?;
            let store = open_store(&settings)?;
            let summary = build_low_res_view(
                store,
                &collection,
                resolution,
                writes,
                settings.cursor_page_size,
            )
            .await?;
            info!(
                "{}: {} of {} positions kept",
                summary.collection, summary.emitted, summary.read
            );
        }
        Command::Fields { file } => {
            let census = ingest::count_descriptions(open_input(&file)?)?;
            let mut out = io::stdout().lock();
            for (description, count) in &census.counts {
                writeln!(out, "{description}: {count}")?;
            }
            writeln!(out, "lines: {}", census.lines)?;
            if census.malformed > 0 {
                writeln!(out, "malformed: {}", census.malformed)?;
            }
        }
        Command::Tacks {
            start,
            stop,
            table,
            file,
        } => {
            let range = TimeRange::parse(&start, &stop)?;
            let tacks = match (table, file) {
                (_, Some(file)) => query::tack_times_from_lines(open_input(&file)?, range)?,
                (Some(table), None) => {
                    let store = open_store(&settings)?;
                    query::tack_times(store.as_ref(), &table, range, settings.cursor_page_size)
                        .await?
                }
                (None, None) => anyhow::bail!("either --table or --file is required"),
            };
            let times: Vec<String> = tacks.iter().map(format_timestamp).collect();
            print_json(&times)?;
        }
        Command::Position { day } => {
            let store = open_store(&settings)?;
            let positions =
                query::position_series(store.as_ref(), &day, settings.cursor_page_size).await?;
            print_json(&positions)?;
        }
    }
    Ok(())
}

fn open_store(settings: &Settings) -> Result<Arc<Database>> {
    Ok(Arc::new(Database::new(settings.database_path.clone())?))
}

fn open_input(path: &Path) -> Result<BufReader<File>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn report(file: &Path, summary: &IngestSummary) {
    info!(
        "{}: {} lines, {} written, {} skipped, {} bad timestamps",
        file.display(),
        summary.lines,
        summary.written,
        summary.skipped,
        summary.bad_timestamps
    );
}
