use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    services::devices::{DeviceClient, evaluate_device},
    services::gate,
    state::AppState,
};

/// The response payload for `/api/service/health`.
#[derive(Serialize)]
pub struct ServiceHealthResponse {
    pub available: bool,
}

/// The configured device client, or 503 when the feature is off.
fn require_device_client(state: &AppState) -> Result<&DeviceClient> {
    state
        .device_client()
        .ok_or_else(|| AppError::ServiceUnavailable("Device service not configured".to_string()))
}

/// Returns the current health verdict for every device in the fleet.
#[axum::debug_handler]
pub async fn list_device_status(State(state): State<AppState>) -> Result<Response> {
    let client = require_device_client(&state)?;

    let devices = client.list_devices().await?;
    let statuses = join_all(devices.iter().map(|d| client.check_device_status(&d.id))).await;

    Ok(Json(statuses).into_response())
}

/// Returns the current health verdict for one device.
#[axum::debug_handler]
pub async fn device_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Response> {
    let client = require_device_client(&state)?;

    match client.get_device(&device_id).await? {
        Some(device) => Ok(Json(evaluate_device(&device, Utc::now())).into_response()),
        None => Err(AppError::NotFound),
    }
}

/// Returns the aggregate gate decision for the fleet.
#[axum::debug_handler]
pub async fn gate_status(State(state): State<AppState>) -> Result<Response> {
    require_device_client(&state)?;

    let decision = gate::evaluate(state.device_client()).await;
    Ok(Json(decision).into_response())
}

/// Probes the device service's availability.
#[axum::debug_handler]
pub async fn service_health(State(state): State<AppState>) -> Result<Response> {
    let client = require_device_client(&state)?;

    Ok(Json(ServiceHealthResponse {
        available: client.server_health().await,
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    // The test config carries no device service, so every endpoint
    // must answer "not configured" rather than erroring.
    #[tokio::test]
    async fn endpoints_report_unconfigured_service_as_unavailable() {
        let state = AppState::new(&Config::for_tests()).unwrap();

        let err = list_device_status(State(state.clone())).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));

        let err = gate_status(State(state.clone())).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));

        let err = service_health(State(state)).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }
}
