//! Liveness endpoint handlers
//!
//! Every endpoint answers `200 ok` or `500 internal server error: <detail>`.

use super::routes::LivenessState;
use crate::observability::health::component_name;
use axum::{
    extract::{Path, State},
    http::StatusCode,
};

pub type LivenessResponse = (StatusCode, String);

const RELOAD_COMPONENT: &str = "kms-config-reload";

fn respond(result: Result<(), String>) -> LivenessResponse {
    match result {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(detail) => {
            (StatusCode::INTERNAL_SERVER_ERROR, format!("internal server error: {}", detail))
        }
    }
}

fn reload_result(state: &LivenessState) -> Result<(), String> {
    match &state.reload {
        Some(status) => status.check(),
        None => Ok(()),
    }
}

async fn providers_result(state: &LivenessState) -> Result<(), String> {
    let report = state.health.check_all().await;
    if report.is_healthy() {
        Ok(())
    } else {
        Err(report.text())
    }
}

/// `GET /healthz`: every check below.
pub async fn healthz_handler(State(state): State<LivenessState>) -> LivenessResponse {
    let result = providers_result(&state).await.and_then(|()| {
        reload_result(&state).map_err(|message| format!("{}: {}", RELOAD_COMPONENT, message))
    });
    respond(result)
}

/// `GET /healthz/kms-providers`: all providers, first failure reported.
pub async fn kms_providers_handler(State(state): State<LivenessState>) -> LivenessResponse {
    respond(providers_result(&state).await)
}

/// `GET /healthz/kms-config-reload`: outcome of the latest reload.
pub async fn config_reload_handler(State(state): State<LivenessState>) -> LivenessResponse {
    respond(reload_result(&state))
}

/// `GET /healthz/kms-provider-<i>`: one provider.
pub async fn kms_provider_handler(
    State(state): State<LivenessState>,
    Path(component): Path<String>,
) -> LivenessResponse {
    let index = component
        .strip_prefix("kms-provider-")
        .and_then(|suffix| suffix.parse::<usize>().ok())
        .filter(|index| component == component_name(*index));

    let Some(index) = index else {
        return (StatusCode::NOT_FOUND, format!("unknown health check '{}'", component));
    };

    match state.health.check_index(index).await {
        Some(check) => respond(match check.status.message() {
            None => Ok(()),
            Some(message) => Err(message.to_string()),
        }),
        None => (StatusCode::NOT_FOUND, format!("unknown health check '{}'", component)),
    }
}
