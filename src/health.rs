//! Health and metrics endpoints.
//!
//! `/health` is a cheap liveness probe with a coarse system summary.
//! `/metrics` reports per-endpoint counters collected by the metrics
//! middleware plus model and store occupancy.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let registry = state.registry.get_registry_summary().await;
    let loaded_model = state.engine.loaded_model().await;

    let memory_info = get_memory_info();
    let system_status = get_system_status(&registry, metrics.active_transcriptions);

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_transcriptions": metrics.active_transcriptions
        },
        "memory": memory_info,
        "model": {
            "configured_default": config.models.whisper_model,
            "loaded": loaded_model.map(|m| m.to_string()),
            "available": loaded_model.is_some(),
            "device": crate::device::DeviceManager::get_device_info(state.engine.device())
        },
        "transcripts": {
            "stored": state.transcripts.len(),
            "capacity": config.transcripts.max_stored
        },
        "system": system_status
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let registry = state.registry.get_registry_summary().await;

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_transcriptions": metrics.active_transcriptions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "registry": registry,
        "transcripts": {
            "stored": state.transcripts.len(),
            "capacity": state.get_config().transcripts.max_stored
        }
    }))
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(
    registry: &crate::transcription::registry::RegistrySummary,
    active_transcriptions: u32,
) -> serde_json::Value {
    let memory_usage = if registry.memory_limit_bytes > 0 {
        registry.total_memory_usage_bytes as f64 / registry.memory_limit_bytes as f64
    } else {
        0.0
    };

    let status = if memory_usage > 0.9 {
        "high_load"
    } else if memory_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "model_memory_usage_percent": (memory_usage * 100.0).round(),
        "model_memory_limit_bytes": registry.memory_limit_bytes,
        "model_memory_usage_bytes": registry.total_memory_usage_bytes,
        "active_transcriptions": active_transcriptions,
        "load_warnings": if memory_usage > 0.8 {
            vec!["Model memory budget nearly exhausted; unload the current model before loading a larger one"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_check_reports_service() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model"]["available"], false);
        assert_eq!(body["transcripts"]["stored"], 0);
        assert_eq!(body["system"]["status"], "normal");
    }

    #[actix_web::test]
    async fn test_detailed_metrics_shape() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        state.increment_request_count();
        state.record_endpoint_request("GET /health", 3, false);

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["overall"]["total_requests"], 1);
        let endpoints = body["endpoints"].as_array().unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0]["endpoint"], "GET /health");
        assert_eq!(body["registry"]["total_models"], 5);
    }
}
