use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::errors::AppError;
use crate::models::{
    EnrichmentReport, EnrichmentRequest, IdentityAttributes, LookupAudit, TriggerStatus,
};
use crate::orchestrator::Orchestrator;
use crate::store::EnrichmentStore;

const MAX_SUBJECT_ID_LEN: usize = 128;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runs and schedules enrichment passes.
    pub orchestrator: Orchestrator,
    /// Read side for profile, risk and lookup queries.
    pub store: Arc<dyn EnrichmentStore>,
}

/// Body of `POST /api/v1/subjects/:subject_id/enrich`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub subject_id: String,
    pub status: TriggerStatus,
}

/// Trimmed subject id, or 400 when it is blank or too long.
fn validate_subject_id(subject_id: &str) -> Result<&str, AppError> {
    let trimmed = subject_id.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_SUBJECT_ID_LEN {
        return Err(AppError::BadRequest(format!(
            "subject_id must be 1-{} characters",
            MAX_SUBJECT_ID_LEN
        )));
    }
    Ok(trimmed)
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-subject-enrichment",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/subjects/:subject_id/enrich
///
/// Fire-and-forget trigger. Answers 202 as soon as the subject is claimed
/// (or found busy, already enriched, or without attributes).
pub async fn trigger_enrichment(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
    Json(body): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), Response> {
    let subject_id = validate_subject_id(&subject_id).map_err(IntoResponse::into_response)?;
    tracing::info!("POST /subjects/{}/enrich (force: {})", subject_id, body.force);

    let request = EnrichmentRequest {
        subject_id: subject_id.to_string(),
        attributes: IdentityAttributes {
            email: body.email,
            phone: body.phone,
            display_name: body.name,
        },
        force: body.force,
    };

    let status = state
        .orchestrator
        .trigger(request)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            subject_id: subject_id.to_string(),
            status,
        }),
    ))
}

/// GET /api/v1/subjects/:subject_id/profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> Result<Json<EnrichmentReport>, AppError> {
    let subject_id = validate_subject_id(&subject_id)?;

    state
        .store
        .get_profile(subject_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No enrichment profile for {}", subject_id)))
}

/// GET /api/v1/subjects/:subject_id/risk
pub async fn get_risk(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let subject_id = validate_subject_id(&subject_id)?;

    let subject = state
        .store
        .get_subject(subject_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subject {} not found", subject_id)))?;

    let assessment = state
        .store
        .get_risk_assessment(subject_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No risk assessment for {}", subject_id)))?;

    Ok(Json(json!({
        "subject_id": subject.subject_id,
        "status": subject.status,
        "assessment": assessment,
    })))
}

/// GET /api/v1/subjects/:subject_id/lookups
pub async fn get_lookups(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> Result<Json<Vec<LookupAudit>>, AppError> {
    let subject_id = validate_subject_id(&subject_id)?;
    Ok(Json(state.store.get_lookup_history(subject_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_id_validation() {
        assert_eq!(validate_subject_id("subject-42").unwrap(), "subject-42");
        assert_eq!(validate_subject_id("  subject-42\n").unwrap(), "subject-42");
        assert!(validate_subject_id("   ").is_err());
        assert!(validate_subject_id(&"x".repeat(MAX_SUBJECT_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_trigger_request_defaults() {
        let body: TriggerRequest = serde_json::from_str(r#"{"email": "a@b.co"}"#).unwrap();
        assert_eq!(body.email.as_deref(), Some("a@b.co"));
        assert!(body.phone.is_none());
        assert!(!body.force);
    }
}
