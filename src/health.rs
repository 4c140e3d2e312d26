//! Health and metrics endpoints.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /health`: liveness plus a summary of call activity.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let config = &state.config;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "calls": {
            "active_rooms": state.registry.room_count(),
            "active_sessions": state.registry.session_count(),
            "supported_languages": config.supported_languages()
        },
        "metrics": metrics
    }))
}

/// `GET /api/v1/health`: the summary plus per-route request statistics.
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let uptime_seconds = state.uptime_seconds();

    let mut endpoint_stats: Vec<_> = state
        .metrics
        .endpoints()
        .into_iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    let flushes_per_minute = if uptime_seconds > 0 {
        metrics.utterances_flushed as f64 * 60.0 / uptime_seconds as f64
    } else {
        0.0
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "calls": {
            "active_rooms": state.registry.room_count(),
            "active_sessions": state.registry.session_count(),
            "flushes_per_minute": flushes_per_minute
        },
        "pipeline": {
            "timeout_secs": state.config.pipeline.timeout_secs,
            "max_concurrent_jobs": state.config.engines.max_concurrent_jobs
        },
        "metrics": metrics,
        "endpoints": endpoint_stats
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::engines::testing::hello_bonjour;
    use crate::transport::testing::RecordingConnection;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn state() -> AppState {
        let (_, _, engines) = hello_bonjour();
        AppState::new(AppConfig::default(), engines)
    }

    #[actix_web::test]
    async fn test_health_reports_sessions() {
        let state = state();
        let _a = state
            .registry
            .join("r1", "a", "en", Arc::new(RecordingConnection::new()))
            .unwrap();
        state.metrics.utterance_flushed();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], "voice-bridge");
        assert_eq!(body["calls"]["active_rooms"], 1);
        assert_eq!(body["calls"]["active_sessions"], 1);
        assert_eq!(body["metrics"]["utterances_flushed"], 1);
    }

    #[actix_web::test]
    async fn test_detailed_metrics_lists_endpoints() {
        let state = state();
        state.metrics.record_request("GET /health", 4, false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/api/v1/health", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["endpoints"][0]["endpoint"], "GET /health");
        assert_eq!(body["endpoints"][0]["request_count"], 1);
        assert_eq!(body["pipeline"]["timeout_secs"], 30);
    }
}
