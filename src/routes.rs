use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    controller::{GenerateOutcome, GenerationController},
    models::{AdvancedSettings, GenerateRequest, ServiceInfo, SettingsLimits},
    store::ImageStore,
};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<GenerationController>,
    pub images: Arc<ImageStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate", post(generate_image))
        .route("/api/state", get(get_state))
        .route("/api/images/:id", get(get_image))
        .route("/api/download", get(download_image))
        .route("/api/config", get(get_config))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

/// Responds with the state as this call left it, not whatever a later request produced.
pub async fn generate_image(State(state): State<AppState>, Json(body): Json<GenerateRequest>) -> Response {
    tracing::info!("🚀 Generate requested ({}x{}, {} steps)", body.settings.width, body.settings.height, body.settings.num_inference_steps);

    let report = state.controller.generate_report(&body.prompt, &body.settings).await;
    let status = match report.outcome {
        GenerateOutcome::Skipped => StatusCode::BAD_REQUEST,
        GenerateOutcome::Rejected => StatusCode::CONFLICT,
        GenerateOutcome::Succeeded | GenerateOutcome::Failed(_) => StatusCode::OK,
    };
    (status, Json(report.snapshot)).into_response()
}

pub async fn get_state(State(state): State<AppState>) -> Response {
    Json(state.controller.snapshot()).into_response()
}

pub async fn get_image(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    match state.images.get(&id) {
        Some(img) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&img.mime_type) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (StatusCode::OK, headers, img.bytes).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn download_image(State(state): State<AppState>) -> Response {
    let Some(file) = state.controller.download() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    tracing::info!("💾 Serving download {}", file.file_name);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&file.mime_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    (StatusCode::OK, headers, file.bytes).into_response()
}

pub async fn get_config(State(state): State<AppState>) -> Json<ServiceInfo> {
    let backend = state.controller.backend();
    Json(ServiceInfo {
        configured: backend.is_configured(),
        supports_advanced_parameters: backend.supports_advanced_parameters(),
        defaults: AdvancedSettings::default(),
        limits: SettingsLimits::default(),
    })
}
