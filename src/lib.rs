pub mod cli;
pub mod db;
pub mod downsample;
pub mod error;
pub mod fusion;
pub mod ingest;
pub mod query;
pub mod readings;
pub mod settings;
pub mod store;
pub mod tack;
pub mod utils;
pub mod writer;

use clap::Parser;

pub use db::Database;
pub use error::TelemetryError;
pub use settings::Settings;
pub use store::{Document, DocumentStore};

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = cli::Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(cli::execute(cli)) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
