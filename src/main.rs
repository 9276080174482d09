//! Application entry point for the `cwsi-engine` service.
//!
//! This binary orchestrates the full startup sequence for the analysis engine,
//! including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool and creating the schema
//! - Spawning the analysis scheduler and the nightly audit workers
//! - Serving the `/health` endpoint until Ctrl-C, then stopping the workers
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `APP_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `APP_SPAN_EVENTS` (optional) – span event mode for tracing
//! - see `config.rs` for the engine settings
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use cwsi_engine::alerts::{AlertCoalescer, AlertDispatcher, LogAlertDispatcher, WebhookAlertDispatcher};
use cwsi_engine::analysis::EnvironmentalDataProvider;
use cwsi_engine::audit::{AuditSettings, NightlyAudit};
use cwsi_engine::clock::SystemClock;
use cwsi_engine::heartbeat::Heartbeat;
use cwsi_engine::store::PgStore;
use cwsi_engine::weather::HttpWeatherProvider;
use cwsi_engine::{config, routes, schema, AnalysisScheduler, EngineServices};

// ---

/// How often the audit worker checks whether its hour has come.
const AUDIT_POLL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let alerts: Arc<dyn AlertDispatcher> = match &cfg.alert_webhook_url {
        Some(url) => Arc::new(WebhookAlertDispatcher::new(url.clone())),
        None => Arc::new(LogAlertDispatcher),
    };
    let coalescer = Arc::new(AlertCoalescer::new(cfg.alert_summary_window()));
    let heartbeat = Arc::new(Heartbeat::new());

    let services = EngineServices {
        plants: store.clone(),
        readings: store.clone(),
        results: store,
        alerts,
        clock: Arc::new(SystemClock),
        coalescer: Arc::clone(&coalescer),
        heartbeat: Arc::clone(&heartbeat),
    };

    let weather = Arc::new(HttpWeatherProvider::new(
        cfg.weather_api_url.clone(),
        cfg.weather_api_key.clone(),
    ));
    let environment =
        EnvironmentalDataProvider::new(weather, cfg.weather_cache_ttl()).with_coalescer(coalescer);

    let scheduler = AnalysisScheduler::new(services.clone(), environment, cfg.analysis_interval());
    let audit = NightlyAudit::new(
        services,
        AuditSettings {
            hour: cfg.audit_hour,
            utc_offset_minutes: cfg.audit_utc_offset_minutes,
            lookback: chrono::Duration::hours(i64::from(cfg.audit_lookback_hours)),
            delta_threshold_c: cfg.anomaly_delta_c,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let audit_task = tokio::spawn(audit.run(AUDIT_POLL, shutdown_rx.clone()));

    let app = routes::router(heartbeat);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Workers finish the tick in progress before exiting.
    shutdown_tx.send(true).ok();
    scheduler_task.await?;
    audit_task.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `APP_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, falling back to `APP_LOG_LEVEL`
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("APP_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to APP_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("APP_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
