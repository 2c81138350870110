use std::process::ExitCode;

use clap::Parser;
use tracing::info;

mod app;
mod app_state;
mod cli;
mod config;
mod db;
mod error;
mod events;
mod formatter;
mod graph;
mod ingestion;
mod logging;
mod oracle;
mod queue;
mod services;
mod signals;
mod status;
mod sweep;
mod utils;
mod web;

use app::App;
use cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut app = match App::new().await {
        Ok(app) => app,
        Err(e) => {
            // Logging isn't configured yet if config load itself failed, so
            // this one line goes straight to stderr via eprintln rather than
            // through the tracing subscriber.
            eprintln!("failed to start farecrawl: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    logging::setup_logging(app.config(), args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        "starting farecrawl"
    );

    app.setup_services();
    app.start_services();

    app.run().await
}
