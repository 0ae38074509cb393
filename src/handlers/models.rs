//! # Model Management REST API Handlers
//!
//! HTTP endpoints for managing Whisper models: loading, unloading and
//! status checking. All handlers operate on the shared engine and registry
//! in [`AppState`], so a load survives across requests.
//!
//! ## Available Endpoints:
//! - `GET /models/whisper` - List available models and current status
//! - `POST /models/whisper/load` - Load a specific Whisper model
//! - `POST /models/whisper/unload` - Unload the current model
//! - `GET /models/status` - Registry status and memory usage

use crate::device::{DeviceManager, DevicePreference};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::model::ModelSize;
use crate::transcription::registry::{current_timestamp, ModelStatus};
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Request body for loading a specific model.
#[derive(Debug, Deserialize)]
pub struct LoadModelRequest {
    /// Model size to load (tiny, base, small, medium, large)
    pub model_size: String,
    /// Optional device preference (auto, cpu, cuda, metal)
    pub device: Option<String>,
}

/// Response structure for model information.
#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub size: String,
    pub name: String,
    pub description: String,
    pub size_mb: u32,
    pub performance: String,
    pub status: String,
    pub loaded: bool,
}

/// Response structure for model loading operations.
#[derive(Debug, Serialize)]
pub struct ModelLoadResponse {
    pub success: bool,
    pub message: String,
    pub model_size: String,
    pub load_time_seconds: Option<f64>,
    pub memory_usage_mb: Option<u32>,
}

/// List all available Whisper models with their current status.
///
/// ## Endpoint: `GET /api/v1/models/whisper`
///
/// ## Response:
/// ```json
/// {
///   "models": [
///     {
///       "size": "medium",
///       "name": "medium",
///       "description": "Good accuracy, handles technical vocabulary",
///       "size_mb": 769,
///       "performance": "accurate",
///       "status": "Ready for inference",
///       "loaded": true
///     }
///   ],
///   "current_loaded": "medium",
///   "total_memory_usage_mb": 769
/// }
/// ```
pub async fn list_whisper_models(app_state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let models = app_state.registry.list_models().await;
    let current_loaded = app_state.registry.get_current_loaded().await;
    let summary = app_state.registry.get_registry_summary().await;

    let model_responses: Vec<ModelInfoResponse> = models
        .into_iter()
        .map(|entry| ModelInfoResponse {
            size: entry.info.size.to_string(),
            name: entry.info.name,
            description: entry.info.description,
            size_mb: entry.info.size_mb,
            performance: entry.info.performance,
            status: entry.status.description(),
            loaded: entry.status.is_loaded(),
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "models": model_responses,
        "current_loaded": current_loaded.map(|s| s.to_string()),
        "total_memory_usage_mb": summary.total_memory_usage_bytes / (1024 * 1024),
        "memory_limit_mb": summary.memory_limit_bytes / (1024 * 1024)
    })))
}

/// Load a specific Whisper model, replacing the current one.
///
/// ## Endpoint: `POST /api/v1/models/whisper/load`
///
/// ## Request Body:
/// ```json
/// {
///   "model_size": "medium",
///   "device": "cpu"
/// }
/// ```
pub async fn load_whisper_model(
    app_state: web::Data<AppState>,
    request: web::Json<LoadModelRequest>,
) -> AppResult<HttpResponse> {
    let start_time = std::time::Instant::now();

    let model_size: ModelSize = request
        .model_size
        .parse()
        .map_err(|e| AppError::ValidationError(format!("Invalid model size: {}", e)))?;

    // The compute device is chosen once at startup. A request may restate
    // it, but asking for a different device than the instance runs on is
    // an error rather than a silent ignore.
    if let Some(device_str) = request.device.as_deref() {
        let preference: DevicePreference = device_str
            .parse()
            .map_err(|e| AppError::ValidationError(format!("Invalid device: {}", e)))?;
        let requested = DeviceManager::get_device(preference);
        let active = DeviceManager::get_device_info(app_state.engine.device());
        if DeviceManager::get_device_info(&requested) != active {
            return Err(AppError::ValidationError(format!(
                "Device is fixed at startup; this instance runs on {}",
                active
            )));
        }
    }

    if app_state.engine.loaded_model().await == Some(model_size) {
        return Ok(HttpResponse::Ok().json(ModelLoadResponse {
            success: true,
            message: format!("Whisper {} model is already loaded", model_size),
            model_size: model_size.to_string(),
            load_time_seconds: Some(0.0),
            memory_usage_mb: Some(model_size.size_mb()),
        }));
    }

    if !app_state.registry.can_load_model(model_size).await {
        return Err(AppError::ValidationError(format!(
            "Loading the {} model would exceed the memory budget; unload the current model first",
            model_size
        )));
    }

    app_state
        .registry
        .update_model_status(model_size, ModelStatus::Loading)
        .await;

    match app_state.engine.load_model(model_size).await {
        Ok(()) => {
            let load_time = start_time.elapsed();
            let memory_usage_bytes = model_size.size_mb() as usize * 1024 * 1024;
            app_state
                .registry
                .update_model_status(
                    model_size,
                    ModelStatus::Loaded {
                        loaded_at: current_timestamp(),
                        memory_usage_bytes,
                    },
                )
                .await;

            Ok(HttpResponse::Ok().json(ModelLoadResponse {
                success: true,
                message: format!("Whisper {} model loaded successfully", model_size),
                model_size: model_size.to_string(),
                load_time_seconds: Some(load_time.as_secs_f64()),
                memory_usage_mb: Some(model_size.size_mb()),
            }))
        }
        Err(e) => {
            app_state
                .registry
                .update_model_status(
                    model_size,
                    ModelStatus::Error {
                        message: e.to_string(),
                        error_at: current_timestamp(),
                    },
                )
                .await;

            Ok(HttpResponse::InternalServerError().json(ModelLoadResponse {
                success: false,
                message: format!("Failed to load model: {}", e),
                model_size: model_size.to_string(),
                load_time_seconds: None,
                memory_usage_mb: None,
            }))
        }
    }
}

/// Unload the currently loaded Whisper model.
///
/// ## Endpoint: `POST /api/v1/models/whisper/unload`
///
/// ## Response:
/// ```json
/// {
///   "success": true,
///   "message": "Model unloaded successfully",
///   "freed_memory_mb": 769
/// }
/// ```
pub async fn unload_whisper_model(app_state: web::Data<AppState>) -> AppResult<HttpResponse> {
    match app_state.engine.unload_model().await {
        Some(size) => {
            app_state
                .registry
                .update_model_status(
                    size,
                    ModelStatus::Unloaded {
                        unloaded_at: current_timestamp(),
                    },
                )
                .await;

            Ok(HttpResponse::Ok().json(json!({
                "success": true,
                "message": "Model unloaded successfully",
                "freed_memory_mb": size.size_mb(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            })))
        }
        None => Ok(HttpResponse::BadRequest().json(json!({
            "success": false,
            "message": "No model is currently loaded",
            "freed_memory_mb": 0
        }))),
    }
}

/// Get overall model registry status and system information.
///
/// ## Endpoint: `GET /api/v1/models/status`
pub async fn get_model_status(app_state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let summary = app_state.registry.get_registry_summary().await;
    let current_loaded = app_state.registry.get_current_loaded().await;

    let current_model_info = match current_loaded {
        Some(loaded_size) => app_state
            .registry
            .get_model(loaded_size)
            .await
            .map(|entry| {
                json!({
                    "size": loaded_size.to_string(),
                    "name": entry.info.name,
                    "description": entry.info.description,
                    "status": entry.status.description(),
                    "total_requests": entry.metrics.total_requests,
                    "speed_factor": entry.metrics.speed_factor(),
                    "last_updated": entry.last_updated
                })
            }),
        None => None,
    };

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "system": {
            "total_models": summary.total_models,
            "loaded_models": summary.loaded_models,
            "memory_usage_mb": summary.total_memory_usage_bytes / (1024 * 1024),
            "memory_limit_mb": summary.memory_limit_bytes / (1024 * 1024)
        },
        "current_model": current_model_info,
        "device": DeviceManager::get_device_info(app_state.engine.device())
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_load_model_request_parsing() {
        let json = r#"{"model_size": "medium", "device": "cpu"}"#;
        let request: LoadModelRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.model_size, "medium");
        assert_eq!(request.device, Some("cpu".to_string()));
    }

    #[actix_web::test]
    async fn test_list_models_endpoint() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/models/whisper", web::get().to(list_whisper_models)),
        )
        .await;

        let req = test::TestRequest::get().uri("/models/whisper").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["models"].as_array().unwrap().len(), 5);
        assert!(body["current_loaded"].is_null());
        assert_eq!(body["total_memory_usage_mb"], 0);
    }

    #[actix_web::test]
    async fn test_load_rejects_unknown_size() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/models/whisper/load", web::post().to(load_whisper_model)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/models/whisper/load")
            .set_json(json!({"model_size": "gigantic"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_unload_without_model() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/models/whisper/unload", web::post().to(unload_whisper_model)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/models/whisper/unload")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_model_status_endpoint() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/models/status", web::get().to(get_model_status)),
        )
        .await;

        let req = test::TestRequest::get().uri("/models/status").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["system"]["total_models"], 5);
        assert!(body["current_model"].is_null());
        assert!(!body["device"].as_str().unwrap().is_empty());
    }
}
