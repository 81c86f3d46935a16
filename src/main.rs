//! chart-publisher
//!
//! Drone plugin entry point: loads `PLUGIN_*` settings, packages every chart
//! below the source dir and uploads the archives to the storage URL.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chart_publisher::{Plugin, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("chart-publisher: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&settings);

    info!("Starting chart-publisher v{}", env!("CARGO_PKG_VERSION"));

    match Plugin::new(settings).exec().await {
        Ok(summary) => {
            info!(
                charts = summary.charts_found,
                stored = summary.stored,
                skipped = summary.skipped,
                "Publish finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Publish failed: {}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

/// Structured logging; `RUST_LOG` overrides the default level
fn init_tracing(settings: &Settings) {
    let level = if settings.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chart_publisher={level},warn")));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}
