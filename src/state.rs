//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler. Configuration and
//! request metrics sit behind `Arc<RwLock<T>>`; the engine, registry and
//! transcript store are internally synchronized and shared via plain `Arc`.

use crate::config::AppConfig;
use crate::device::create_device_from_string;
use crate::transcript::TranscriptStore;
use crate::transcription::{ModelRegistry, TranscriptionConfig, TranscriptionEngine};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
///
/// Multiple requests read the same data simultaneously; writers take the
/// lock exclusively. Lock poisoning is treated as unrecoverable, hence the
/// `unwrap()` on lock acquisition throughout.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request metrics, updated by middleware on every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Whisper inference engine holding the loaded model
    pub engine: Arc<TranscriptionEngine>,

    /// Lifecycle status and usage counters per model size
    pub registry: Arc<ModelRegistry>,

    /// In-memory transcript sessions
    pub transcripts: Arc<TranscriptStore>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Transcription requests currently running inference
    pub active_transcriptions: u32,

    /// Per-endpoint statistics, keyed like "GET /api/v1/transcripts/{id}"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a single endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Cumulative processing time across all requests (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    /// Build the full shared state from a validated configuration.
    pub fn new(config: AppConfig) -> Self {
        let device = create_device_from_string(&config.models.device);
        let engine = TranscriptionEngine::new(TranscriptionConfig::default(), device);
        let registry = ModelRegistry::new(config.max_model_memory_bytes());
        let transcripts = TranscriptStore::new(config.transcripts.max_stored);

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            engine: Arc::new(engine),
            registry: Arc::new(registry),
            transcripts: Arc::new(transcripts),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; cloning releases the lock
    /// immediately so readers never block each other for long.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record one request against its endpoint's counters.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn increment_active_transcriptions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_transcriptions += 1;
    }

    /// Underflow-checked so mismatched calls never panic the counter.
    pub fn decrement_active_transcriptions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_transcriptions > 0 {
            metrics.active_transcriptions -= 1;
        }
    }

    /// Consistent copy of the metrics for the /metrics endpoint. Cloning
    /// avoids holding the lock while the response serializes.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_transcriptions: metrics.active_transcriptions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate in `[0.0, 1.0]`.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_accounting() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.error_count, 1);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_active_transcriptions_never_underflow() {
        let state = AppState::new(AppConfig::default());
        state.decrement_active_transcriptions();
        assert_eq!(state.get_metrics_snapshot().active_transcriptions, 0);

        state.increment_active_transcriptions();
        state.decrement_active_transcriptions();
        state.decrement_active_transcriptions();
        assert_eq!(state.get_metrics_snapshot().active_transcriptions, 0);
    }
}
