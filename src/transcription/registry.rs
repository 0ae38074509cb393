//! # Model Registry
//!
//! Tracks every Whisper model size the service can serve: lifecycle status,
//! rolling usage metrics and the memory budget check that gates loads. The
//! registry is bookkeeping only; the engine owns the actual weights.

use crate::transcription::model::{ModelInfo, ModelSize};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Lifecycle state of one model size.
///
/// Available -> Loading -> Loaded -> Unloaded, with Error reachable from
/// anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelStatus {
    /// Weights not fetched or loaded yet.
    Available,
    /// Weights are being fetched and mapped into memory.
    Loading,
    /// Ready for inference.
    Loaded {
        loaded_at: u64,
        memory_usage_bytes: usize,
    },
    /// Was loaded earlier in this process, currently evicted.
    Unloaded { unloaded_at: u64 },
    Error { message: String, error_at: u64 },
}

impl ModelStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelStatus::Loaded { .. })
    }

    pub fn is_preparing(&self) -> bool {
        matches!(self, ModelStatus::Loading)
    }

    pub fn description(&self) -> String {
        match self {
            ModelStatus::Available => "Available for loading".to_string(),
            ModelStatus::Loading => "Fetching and loading".to_string(),
            ModelStatus::Loaded { .. } => "Ready for inference".to_string(),
            ModelStatus::Unloaded { .. } => "Unloaded from memory".to_string(),
            ModelStatus::Error { message, .. } => format!("Error: {}", message),
        }
    }
}

/// Registry entry pairing model metadata with status and usage counters.
#[derive(Debug, Clone)]
pub struct ModelRegistryEntry {
    pub info: ModelInfo,
    pub status: ModelStatus,
    pub metrics: ModelMetrics,
    pub last_updated: u64,
}

/// Rolling usage counters per model size.
#[derive(Debug, Clone, Default)]
pub struct ModelMetrics {
    pub total_requests: u64,
    /// Audio seconds transcribed with this model.
    pub total_audio_duration: f64,
    pub total_processing_time_ms: u64,
    pub failed_requests: u64,
}

impl ModelMetrics {
    pub fn success_rate(&self) -> f32 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_requests - self.failed_requests) as f32 / self.total_requests as f32
        }
    }

    /// Audio seconds transcribed per wall-clock second; above 1.0 means
    /// faster than real time.
    pub fn speed_factor(&self) -> f64 {
        if self.total_processing_time_ms == 0 {
            0.0
        } else {
            self.total_audio_duration * 1000.0 / self.total_processing_time_ms as f64
        }
    }

    pub fn record(&mut self, audio_duration: f64, processing_time_ms: u64, success: bool) {
        self.total_requests += 1;
        self.total_audio_duration += audio_duration;
        self.total_processing_time_ms += processing_time_ms;
        if !success {
            self.failed_requests += 1;
        }
    }
}

/// Shared bookkeeping for all model sizes.
pub struct ModelRegistry {
    models: Arc<RwLock<HashMap<ModelSize, ModelRegistryEntry>>>,
    current_loaded: Arc<RwLock<Option<ModelSize>>>,
    /// Memory budget for loaded weights; loads that would exceed it are
    /// refused up front.
    memory_limit_bytes: usize,
}

impl ModelRegistry {
    pub fn new(memory_limit_bytes: usize) -> Self {
        let mut models = HashMap::new();
        for size in ModelSize::ALL {
            models.insert(
                size,
                ModelRegistryEntry {
                    info: ModelInfo::new(size),
                    status: ModelStatus::Available,
                    metrics: ModelMetrics::default(),
                    last_updated: current_timestamp(),
                },
            );
        }
        Self {
            models: Arc::new(RwLock::new(models)),
            current_loaded: Arc::new(RwLock::new(None)),
            memory_limit_bytes,
        }
    }

    pub async fn list_models(&self) -> Vec<ModelRegistryEntry> {
        let models = self.models.read().await;
        let mut entries: Vec<_> = models.values().cloned().collect();
        entries.sort_by_key(|entry| entry.info.size_mb);
        entries
    }

    pub async fn get_model(&self, size: ModelSize) -> Option<ModelRegistryEntry> {
        self.models.read().await.get(&size).cloned()
    }

    pub async fn get_current_loaded(&self) -> Option<ModelSize> {
        *self.current_loaded.read().await
    }

    /// Record a lifecycle change; keeps `current_loaded` consistent.
    pub async fn update_model_status(&self, size: ModelSize, status: ModelStatus) {
        let mut models = self.models.write().await;
        if let Some(entry) = models.get_mut(&size) {
            entry.status = status.clone();
            entry.last_updated = current_timestamp();

            match status {
                ModelStatus::Loaded { .. } => {
                    let mut current = self.current_loaded.write().await;
                    // A load replaces whatever was resident before.
                    if let Some(previous) = current.replace(size) {
                        if previous != size {
                            if let Some(old) = models.get_mut(&previous) {
                                if old.status.is_loaded() {
                                    old.status = ModelStatus::Unloaded {
                                        unloaded_at: current_timestamp(),
                                    };
                                    old.last_updated = current_timestamp();
                                }
                            }
                        }
                    }
                }
                ModelStatus::Unloaded { .. } | ModelStatus::Error { .. } => {
                    let mut current = self.current_loaded.write().await;
                    if *current == Some(size) {
                        *current = None;
                    }
                }
                _ => {}
            }
        }
    }

    pub async fn update_model_metrics(
        &self,
        size: ModelSize,
        audio_duration: f64,
        processing_time_ms: u64,
        success: bool,
    ) {
        let mut models = self.models.write().await;
        if let Some(entry) = models.get_mut(&size) {
            entry.metrics.record(audio_duration, processing_time_ms, success);
            entry.last_updated = current_timestamp();
        }
    }

    /// Whether loading `size` stays inside the memory budget. The check
    /// covers the swap peak where the old and new weights are briefly
    /// resident together.
    pub async fn can_load_model(&self, size: ModelSize) -> bool {
        let models = self.models.read().await;
        let resident: usize = models
            .values()
            .filter_map(|entry| match entry.status {
                ModelStatus::Loaded { memory_usage_bytes, .. } => Some(memory_usage_bytes),
                _ => None,
            })
            .sum();
        let requested = size.size_mb() as usize * 1024 * 1024;
        resident + requested <= self.memory_limit_bytes
    }

    pub async fn get_registry_summary(&self) -> RegistrySummary {
        let models = self.models.read().await;
        let current_loaded = *self.current_loaded.read().await;

        let loaded_models = models.values().filter(|e| e.status.is_loaded()).count();
        let total_memory_usage_bytes = models
            .values()
            .filter_map(|entry| match entry.status {
                ModelStatus::Loaded { memory_usage_bytes, .. } => Some(memory_usage_bytes),
                _ => None,
            })
            .sum();

        RegistrySummary {
            total_models: models.len(),
            loaded_models,
            current_loaded,
            total_memory_usage_bytes,
            memory_limit_bytes: self.memory_limit_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegistrySummary {
    pub total_models: usize,
    pub loaded_models: usize,
    pub current_loaded: Option<ModelSize>,
    pub total_memory_usage_bytes: usize,
    pub memory_limit_bytes: usize,
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_status() {
        assert!(!ModelStatus::Available.is_loaded());
        assert!(ModelStatus::Loading.is_preparing());

        let loaded = ModelStatus::Loaded {
            loaded_at: 12345,
            memory_usage_bytes: 1_000_000,
        };
        assert!(loaded.is_loaded());
        assert!(!loaded.is_preparing());
    }

    #[test]
    fn test_model_metrics() {
        let mut metrics = ModelMetrics::default();
        metrics.record(2.0, 1000, true);
        metrics.record(3.0, 1500, true);

        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.total_audio_duration, 5.0);
        assert_eq!(metrics.success_rate(), 1.0);
        assert!((metrics.speed_factor() - 2.0).abs() < 0.001);

        metrics.record(1.0, 500, false);
        assert_eq!(metrics.failed_requests, 1);
        assert!((metrics.success_rate() - 0.667).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_registry_tracks_loads() {
        let registry = ModelRegistry::new(4 * 1024 * 1024 * 1024);

        assert_eq!(registry.list_models().await.len(), 5);
        assert_eq!(registry.get_current_loaded().await, None);

        registry
            .update_model_status(
                ModelSize::Tiny,
                ModelStatus::Loaded {
                    loaded_at: 1,
                    memory_usage_bytes: 39 * 1024 * 1024,
                },
            )
            .await;
        assert_eq!(registry.get_current_loaded().await, Some(ModelSize::Tiny));

        // loading another size marks the first one unloaded
        registry
            .update_model_status(
                ModelSize::Base,
                ModelStatus::Loaded {
                    loaded_at: 2,
                    memory_usage_bytes: 74 * 1024 * 1024,
                },
            )
            .await;
        assert_eq!(registry.get_current_loaded().await, Some(ModelSize::Base));
        let tiny = registry.get_model(ModelSize::Tiny).await.unwrap();
        assert!(matches!(tiny.status, ModelStatus::Unloaded { .. }));

        let summary = registry.get_registry_summary().await;
        assert_eq!(summary.loaded_models, 1);
        assert_eq!(summary.current_loaded, Some(ModelSize::Base));
    }

    #[tokio::test]
    async fn test_memory_budget_gates_loads() {
        let registry = ModelRegistry::new(100 * 1024 * 1024);
        assert!(registry.can_load_model(ModelSize::Tiny).await);
        assert!(!registry.can_load_model(ModelSize::Large).await);

        registry
            .update_model_status(
                ModelSize::Tiny,
                ModelStatus::Loaded {
                    loaded_at: 1,
                    memory_usage_bytes: 80 * 1024 * 1024,
                },
            )
            .await;
        // the swap peak would exceed the budget
        assert!(!registry.can_load_model(ModelSize::Base).await);
    }
}
