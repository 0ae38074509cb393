//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__HOST, APP_MODELS__WHISPER_MODEL, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::device::DevicePreference;
use crate::transcription::ModelSize;

/// Main application configuration containing all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub upload: UploadConfig,
    pub transcripts: TranscriptsConfig,
    pub performance: PerformanceConfig,
}

/// Server bind settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Whisper model settings.
///
/// ## Fields:
/// - `whisper_model`: Size loaded by default ("tiny", "base", "small", "medium", "large")
/// - `device`: Compute device preference ("auto", "cpu", "cuda", "metal")
/// - `preload`: Load the default model at startup instead of on first request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub device: String,
    pub preload: bool,
}

/// Upload limits for the transcription endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Rejects larger files with 413 before any decoding happens.
    pub max_file_size_mb: usize,
}

/// Retention and pagination for stored transcripts.
///
/// ## Fields:
/// - `page_size`: Segments per page when none is requested
/// - `ttl_seconds`: Idle time before a transcript is swept
/// - `max_stored`: Hard cap on concurrently stored transcripts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptsConfig {
    pub page_size: usize,
    pub ttl_seconds: u64,
    pub max_stored: usize,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Memory budget for loaded model weights.
    pub max_model_memory_mb: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                whisper_model: "medium".to_string(),
                device: "auto".to_string(),
                preload: false,
            },
            upload: UploadConfig {
                max_file_size_mb: 200,
            },
            transcripts: TranscriptsConfig {
                page_size: 50,
                ttl_seconds: 3600,
                max_stored: 32,
            },
            performance: PerformanceConfig {
                // Fits the large model with room for a swap.
                max_model_memory_mb: 4096,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle bare HOST and PORT variables used by deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore keeps snake_case keys addressable:
            // APP_SERVER__HOST becomes server.host, APP_UPLOAD__MAX_FILE_SIZE_MB
            // becomes upload.max_file_size_mb.
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching bad values here gives one clear startup error instead of
    /// failures deep inside request handling.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        self.models
            .whisper_model
            .parse::<ModelSize>()
            .map_err(|e| anyhow::anyhow!("Invalid models.whisper_model: {}", e))?;

        self.models
            .device
            .parse::<DevicePreference>()
            .map_err(|e| anyhow::anyhow!("Invalid models.device: {}", e))?;

        if self.upload.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("Upload size limit must be greater than 0"));
        }

        if self.transcripts.page_size == 0 {
            return Err(anyhow::anyhow!("Transcript page size must be greater than 0"));
        }

        if self.transcripts.max_stored == 0 {
            return Err(anyhow::anyhow!(
                "Max stored transcripts must be greater than 0"
            ));
        }

        if self.performance.max_model_memory_mb == 0 {
            return Err(anyhow::anyhow!("Model memory budget must be greater than 0"));
        }

        Ok(())
    }

    /// Default model size; `validate()` guarantees this parses.
    pub fn default_model_size(&self) -> ModelSize {
        self.models
            .whisper_model
            .parse::<ModelSize>()
            .unwrap_or_default()
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.upload.max_file_size_mb * 1024 * 1024
    }

    pub fn max_model_memory_bytes(&self) -> usize {
        self.performance.max_model_memory_mb * 1024 * 1024
    }

    /// Apply a partial runtime update from a JSON document.
    ///
    /// Only the fields present in the JSON change; everything else keeps
    /// its current value. Server bind settings are not updatable at
    /// runtime and are ignored here.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(models) = partial.get("models") {
            if let Some(model) = models.get("whisper_model").and_then(|v| v.as_str()) {
                self.models.whisper_model = model.to_string();
            }
            if let Some(device) = models.get("device").and_then(|v| v.as_str()) {
                self.models.device = device.to_string();
            }
            if let Some(preload) = models.get("preload").and_then(|v| v.as_bool()) {
                self.models.preload = preload;
            }
        }

        if let Some(upload) = partial.get("upload") {
            if let Some(limit) = upload.get("max_file_size_mb").and_then(|v| v.as_u64()) {
                self.upload.max_file_size_mb = limit as usize;
            }
        }

        if let Some(transcripts) = partial.get("transcripts") {
            if let Some(page_size) = transcripts.get("page_size").and_then(|v| v.as_u64()) {
                self.transcripts.page_size = page_size as usize;
            }
            if let Some(ttl) = transcripts.get("ttl_seconds").and_then(|v| v.as_u64()) {
                self.transcripts.ttl_seconds = ttl;
            }
            if let Some(max) = transcripts.get("max_stored").and_then(|v| v.as_u64()) {
                self.transcripts.max_stored = max as usize;
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(memory) = performance
                .get("max_model_memory_mb")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_model_memory_mb = memory as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.models.whisper_model, "medium");
        assert_eq!(config.upload.max_file_size_mb, 200);
        assert_eq!(config.transcripts.page_size, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.whisper_model = "gigantic".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.max_file_size_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [models]
            whisper_model = "tiny"
            device = "cpu"
            preload = true

            [upload]
            max_file_size_mb = 50

            [transcripts]
            page_size = 20
            ttl_seconds = 600
            max_stored = 8

            [performance]
            max_model_memory_mb = 512
        "#;

        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.default_model_size(), ModelSize::Tiny);
        assert_eq!(config.max_upload_bytes(), 50 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"models": {"whisper_model": "small"}, "transcripts": {"ttl_seconds": 120}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.models.whisper_model, "small");
        assert_eq!(config.transcripts.ttl_seconds, 120);
        // untouched fields keep their values
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = AppConfig::default();
        let json = r#"{"models": {"whisper_model": "huge"}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
