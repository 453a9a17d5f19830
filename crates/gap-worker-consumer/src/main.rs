use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

mod bus;
mod supervisor;

use supervisor::Supervisor;

/// Gap analysis worker — consumes analysis requests from the bus and
/// publishes validated research gaps back to the orchestrator.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override DB_PATH from the environment.
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_file_guard = init_logging();

    let cli = Cli::parse();

    let mut settings = gap_worker_core::Settings::from_env()?;
    if let Some(db_path) = cli.db_path {
        settings.db_path = db_path;
    }

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    Supervisor::new(settings).run(cancel).await
}

/// Console output always; an additional non-blocking file sink when
/// `LOG_FILE` is set, mirroring the source's console-plus-file logging
/// split without needing its exact multi-sink-per-service layout.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let console_layer = tracing_subscriber::fmt::layer();

    match std::env::var("LOG_FILE") {
        Ok(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_default();
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);

            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry().with(filter).with(console_layer).init();
            None
        }
    }
}
