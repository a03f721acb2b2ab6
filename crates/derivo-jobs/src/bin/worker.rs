//! derivo-worker - background derivative generation worker

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use derivo_db::Database;
use derivo_jobs::{Generator, GeneratorConfig, RunMode, Worker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "derivo_worker=debug,derivo_jobs=debug,derivo_db=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "derivo_worker=debug,derivo_jobs=debug,derivo_db=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("derivo-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/derivo".to_string());
    let generator_config = GeneratorConfig::from_env()?;
    let worker_config = WorkerConfig::from_env();

    // WORKER_RUN_MODE: "forever" (default), "drain", or "max:<n>"
    let run_mode = match std::env::var("WORKER_RUN_MODE").as_deref() {
        Ok("drain") => RunMode::Drain,
        Ok(v) if v.starts_with("max:") => {
            let n = v[4..].parse::<u64>().unwrap_or(1);
            RunMode::Max(n)
        }
        _ => RunMode::Forever,
    };

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    info!("Database connected");

    // Run pending database migrations on startup
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    info!(
        worker_id = %worker_config.worker_id,
        source_root = %generator_config.source_root.display(),
        derivatives_root = %generator_config.derivatives_root.display(),
        ?run_mode,
        "Starting derivative worker"
    );

    let generator = Generator::new(db.clone(), generator_config)?;
    let worker = Worker::new(db, generator, worker_config);

    match run_mode {
        RunMode::Forever => {
            let handle = worker.start(RunMode::Forever);
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            handle.shutdown().await?;
        }
        mode => {
            let processed = worker.run(mode).await?;
            info!(processed, "Worker run complete");
        }
    }

    Ok(())
}
