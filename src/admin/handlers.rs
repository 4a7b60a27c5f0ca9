use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::admin::AdminState;
use crate::queue::{QueuedRequest, RequestId};
use crate::resilience::circuit_breaker::CircuitState;
use crate::selector::ProviderStatus;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub providers: ProviderCounts,
    pub queue: QueueCounts,
}

#[derive(Debug, Serialize)]
pub struct ProviderCounts {
    pub total: usize,
    pub healthy: usize,
    pub open_circuits: usize,
    pub disabled: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub tracked: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let providers = state.layer.provider_snapshot();
    let serving = providers
        .values()
        .filter(|p| p.enabled && p.healthy && p.disabled_reason.is_none())
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if serving > 0 { "operational" } else { "degraded" },
        providers: ProviderCounts {
            total: providers.len(),
            healthy: providers.values().filter(|p| p.healthy).count(),
            open_circuits: providers
                .values()
                .filter(|p| p.circuit_state == CircuitState::Open)
                .count(),
            disabled: providers
                .values()
                .filter(|p| !p.enabled || p.disabled_reason.is_some())
                .count(),
        },
        queue: QueueCounts {
            pending: state.layer.pending_count(),
            in_flight: state.layer.in_flight_count(),
            tracked: state.layer.request_snapshot().len(),
        },
    })
}

pub async fn get_providers(State(state): State<AdminState>) -> Json<BTreeMap<String, ProviderStatus>> {
    Json(state.layer.provider_snapshot())
}

pub async fn get_requests(State(state): State<AdminState>) -> Json<Vec<QueuedRequest>> {
    Json(state.layer.request_snapshot())
}

pub async fn get_request(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<QueuedRequest>, StatusCode> {
    let id: RequestId = id.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    state
        .layer
        .request_status(id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
