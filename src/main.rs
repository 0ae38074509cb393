//! # Whisper Studio Backend - Main Application Entry Point
//!
//! An Actix-web server that wraps Whisper speech recognition behind a small
//! REST API and a bundled browser UI: upload audio, edit the transcript
//! segment by segment, download it as SRT, VTT or plain text.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **state**: Shared application state, metrics and the loaded model
//! - **audio**: Container decoding and resampling to the model's input format
//! - **transcription**: The Whisper engine, model catalog and lifecycle registry
//! - **transcript**: In-memory transcript store with paging and edits
//! - **export**: SRT, VTT and plain-text serializers
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and per-endpoint metrics
//! - **handlers**: HTTP request handlers
//! - **error**: Error types and their HTTP mappings

mod audio;
mod config;
mod device;
mod error;
mod export;
mod handlers;
mod health;
mod middleware;
mod state;
mod transcript;
mod transcription;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag, set by the signal handler task and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// How often the transcript store is swept for expired sessions.
const CLEANUP_INTERVAL_SECONDS: u64 = 60;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting whisper-studio-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    if config.models.preload {
        preload_model(&app_state).await;
    }

    spawn_store_sweeper(app_state.clone());
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/", web::get().to(handlers::index))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/models/whisper", web::get().to(handlers::list_whisper_models))
                    .route("/models/whisper/load", web::post().to(handlers::load_whisper_model))
                    .route("/models/whisper/unload", web::post().to(handlers::unload_whisper_model))
                    .route("/models/status", web::get().to(handlers::get_model_status))
                    .route("/transcripts", web::post().to(handlers::create_transcript))
                    .route("/transcripts/{id}", web::get().to(handlers::get_transcript))
                    .route("/transcripts/{id}", web::delete().to(handlers::delete_transcript))
                    .route(
                        "/transcripts/{id}/segments/{index}",
                        web::put().to(handlers::edit_segment),
                    )
                    .route(
                        "/transcripts/{id}/export",
                        web::get().to(handlers::export_transcript),
                    ),
            )
            // Health check at root level for load balancers
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Load the configured default model before accepting traffic.
///
/// A failed preload is logged and the server starts anyway; the first
/// transcription request will retry the load.
async fn preload_model(app_state: &AppState) {
    let size = app_state.get_config().default_model_size();
    info!("Preloading {} model", size);

    app_state
        .registry
        .update_model_status(size, transcription::ModelStatus::Loading)
        .await;

    match app_state.engine.load_model(size).await {
        Ok(()) => {
            app_state
                .registry
                .update_model_status(
                    size,
                    transcription::ModelStatus::Loaded {
                        loaded_at: transcription::registry::current_timestamp(),
                        memory_usage_bytes: size.size_mb() as usize * 1024 * 1024,
                    },
                )
                .await;
            info!("Preloaded {} model", size);
        }
        Err(e) => {
            app_state
                .registry
                .update_model_status(
                    size,
                    transcription::ModelStatus::Error {
                        message: e.to_string(),
                        error_at: transcription::registry::current_timestamp(),
                    },
                )
                .await;
            warn!("Preload of {} model failed, will load on demand: {}", size, e);
        }
    }
}

/// Periodically drop transcripts that have not been touched within the
/// configured TTL. Reads the TTL on every pass so config updates apply
/// without a restart.
fn spawn_store_sweeper(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(CLEANUP_INTERVAL_SECONDS));
        interval.tick().await;

        loop {
            interval.tick().await;
            let ttl = app_state.get_config().transcripts.ttl_seconds;
            app_state.transcripts.cleanup_expired(ttl);
        }
    });
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_studio_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
