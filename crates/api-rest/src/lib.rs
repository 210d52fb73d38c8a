//! # API REST
//!
//! REST surface for the eligibility document engine.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (DTO shapes, JSON serialization, CORS)
//!
//! Uses `api-shared` for auth and health, `elig-core` for all business
//! logic. Error messages returned to callers are the validation/gateway
//! messages passed through verbatim, so audit records and user feedback
//! stay consistent.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use api_shared::{auth, HealthRes, HealthService};
use elig_core::{
    Actor, AuditAction, AuditOutcome, AuditQuery, AuditSortKey, DocumentOverrides,
    DocumentService, EligError, EligibilityDocument, ServiceType, SortOrder, Statistics,
};

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DocumentService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        check_eligibility,
        draft_preview,
        issue_document,
        get_document,
        retry_document,
        amend_document,
        cancel_document,
        document_history,
        audit_stats,
        audit_entries,
        audit_export,
    ),
    components(schemas(
        HealthRes,
        ActorReq,
        OverridesDto,
        IssueDocumentReq,
        AmendDocumentReq,
        CheckEligibilityReq,
        CheckEligibilityRes,
        DocumentRes,
        DraftRes,
        IssueDocumentRes,
        ErrorRes,
    ))
)]
struct ApiDoc;

/// Build the REST router over a configured document service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/eligibility/check", post(check_eligibility))
        .route("/encounters/:id/draft", get(draft_preview))
        .route("/documents", post(issue_document))
        .route("/documents/:id", get(get_document))
        .route("/documents/:id/retry", post(retry_document))
        .route("/documents/:id/amend", post(amend_document))
        .route("/documents/:id/cancel", post(cancel_document))
        .route("/patients/:patient_ref/documents", get(document_history))
        .route("/audit/stats", get(audit_stats))
        .route("/audit/entries", get(audit_entries))
        .route("/audit/export", get(audit_export))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Actor attribution carried on every mutating request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ActorReq {
    pub actor_name: String,
    pub actor_role: String,
}

impl ActorReq {
    fn to_actor(&self) -> Actor {
        Actor::new(self.actor_name.clone(), self.actor_role.clone())
    }
}

/// Caller overrides on top of the auto-populated draft. Every field is
/// optional; absent fields keep the resolved value.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct OverridesDto {
    pub insurance_card_number: Option<String>,
    /// `"outpatient"` or `"inpatient"`.
    pub service_type: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub diagnosis_code: Option<String>,
    pub diagnosis_name: Option<String>,
    pub polyclinic_code: Option<String>,
    pub treatment_class: Option<String>,
    pub rest_days: Option<u32>,
    pub notes: Option<String>,
}

impl OverridesDto {
    fn to_overrides(&self) -> Result<DocumentOverrides, Failure> {
        let service_type = match self.service_type.as_deref() {
            None => None,
            Some("outpatient") => Some(ServiceType::Outpatient),
            Some("inpatient") => Some(ServiceType::Inpatient),
            Some(other) => {
                return Err(bad_request(format!(
                    "unknown service type: {other} (expected outpatient or inpatient)"
                )))
            }
        };
        Ok(DocumentOverrides {
            insurance_card_number: self.insurance_card_number.clone(),
            service_type,
            issue_date: self.issue_date,
            diagnosis_code: self.diagnosis_code.clone(),
            diagnosis_name: self.diagnosis_name.clone(),
            polyclinic_code: self.polyclinic_code.clone(),
            treatment_class: self.treatment_class.clone(),
            rest_days: self.rest_days,
            notes: self.notes.clone(),
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IssueDocumentReq {
    pub encounter_id: String,
    #[serde(default)]
    pub overrides: OverridesDto,
    pub actor_name: String,
    pub actor_role: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AmendDocumentReq {
    pub overrides: OverridesDto,
    pub actor_name: String,
    pub actor_role: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckEligibilityReq {
    pub card_number: String,
    pub service_date: NaiveDate,
    pub actor_name: String,
    pub actor_role: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckEligibilityRes {
    pub eligible: bool,
    /// `active`, `inactive`, `expired` or `suspended`.
    pub status: String,
    pub message: Option<String>,
}

/// Wire shape of an eligibility document.
#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentRes {
    pub id: Uuid,
    pub document_number: Option<String>,
    pub patient_ref: String,
    pub encounter_ref: String,
    pub patient_name: Option<String>,
    pub insurance_card_number: Option<String>,
    pub service_type: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub diagnosis_code: Option<String>,
    pub diagnosis_name: Option<String>,
    pub polyclinic_code: Option<String>,
    pub treatment_class: Option<String>,
    pub rest_days: Option<u32>,
    pub notes: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EligibilityDocument> for DocumentRes {
    fn from(doc: EligibilityDocument) -> Self {
        Self {
            id: doc.id,
            document_number: doc.document_number,
            patient_ref: doc.patient_ref,
            encounter_ref: doc.encounter_ref,
            patient_name: doc.patient_name,
            insurance_card_number: doc.insurance_card_number,
            service_type: doc.service_type.map(|s| s.to_string()),
            issue_date: doc.issue_date,
            diagnosis_code: doc.diagnosis_code,
            diagnosis_name: doc.diagnosis_name,
            polyclinic_code: doc.polyclinic_code,
            treatment_class: doc.treatment_class,
            rest_days: doc.rest_days,
            notes: doc.notes,
            status: doc.status.to_string(),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

/// Auto-population preview: the populated draft plus any fields that could
/// not be resolved and still need manual input.
#[derive(Debug, Serialize, ToSchema)]
pub struct DraftRes {
    pub draft: DocumentRes,
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IssueDocumentRes {
    pub document: DocumentRes,
    /// Advisory validation warnings; these never block issuance.
    pub warnings: Vec<String>,
}

/// Uniform error body. `errors`/`warnings` carry the validation detail when
/// issuance was blocked before any external call.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Time-range parameters for statistics.
#[derive(Debug, Default, Deserialize)]
pub struct AuditRangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Filter/sort parameters for ledger views and export.
#[derive(Debug, Default, Deserialize)]
pub struct AuditViewParams {
    pub action: Option<AuditAction>,
    pub status: Option<AuditOutcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort: AuditSortKey,
    #[serde(default)]
    pub order: SortOrder,
}

impl AuditViewParams {
    fn to_query(&self) -> AuditQuery {
        AuditQuery {
            action: self.action,
            outcome: self.status,
            from: self.from,
            to: self.to,
            sort: self.sort,
            order: self.order,
        }
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

type Failure = (StatusCode, Json<ErrorRes>);

fn bad_request(message: String) -> Failure {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorRes {
            error: message,
            errors: Vec::new(),
            warnings: Vec::new(),
        }),
    )
}

/// Map a core error to an HTTP response, passing the underlying message
/// through rather than inventing one.
fn fail(err: EligError) -> Failure {
    let status = match &err {
        EligError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EligError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EligError::PatientNotFound(_)
        | EligError::EncounterNotFound(_)
        | EligError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
        EligError::DuplicateIssuance { .. }
        | EligError::IllegalTransition { .. }
        | EligError::OperationInProgress(_) => StatusCode::CONFLICT,
        EligError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        EligError::GatewayRejection(_) => StatusCode::BAD_GATEWAY,
        EligError::TaskJoin(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("request failed: {err:?}");
    } else {
        tracing::debug!("request rejected: {err}");
    }

    let (errors, warnings) = match &err {
        EligError::ValidationFailed { errors, warnings } => (errors.clone(), warnings.clone()),
        _ => (Vec::new(), Vec::new()),
    };
    (
        status,
        Json(ErrorRes {
            error: err.to_string(),
            errors,
            warnings,
        }),
    )
}

/// Mutating routes require the `x-api-key` header.
fn require_api_key(headers: &HeaderMap) -> Result<(), Failure> {
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorRes {
                    error: "missing x-api-key header".into(),
                    errors: Vec::new(),
                    warnings: Vec::new(),
                }),
            )
        })?;
    auth::validate_api_key(provided).map_err(|e| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorRes {
                error: e.to_string(),
                errors: Vec::new(),
                warnings: Vec::new(),
            }),
        )
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint used for monitoring and load balancer checks.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/eligibility/check",
    request_body = CheckEligibilityReq,
    responses(
        (status = 200, description = "Coverage check result", body = CheckEligibilityRes),
        (status = 502, description = "Authority rejected the probe", body = ErrorRes),
        (status = 504, description = "Authority unreachable", body = ErrorRes)
    )
)]
/// Read-only coverage probe against the eligibility authority.
///
/// The probe is audited like every other gateway call; the authority's
/// `message` is passed through untouched.
#[axum::debug_handler]
async fn check_eligibility(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckEligibilityReq>,
) -> Result<Json<CheckEligibilityRes>, Failure> {
    require_api_key(&headers)?;
    let actor = Actor::new(req.actor_name, req.actor_role);
    let check = state
        .service
        .check_eligibility(&req.card_number, req.service_date, &actor)
        .await
        .map_err(fail)?;
    Ok(Json(CheckEligibilityRes {
        eligible: check.eligible,
        status: format!("{:?}", check.status).to_lowercase(),
        message: check.message,
    }))
}

#[utoipa::path(
    get,
    path = "/encounters/{id}/draft",
    responses(
        (status = 200, description = "Populated draft and its unresolved fields", body = DraftRes),
        (status = 404, description = "Unknown encounter or patient", body = ErrorRes)
    )
)]
/// Preview the auto-populated draft for an encounter without issuing it.
#[axum::debug_handler]
async fn draft_preview(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<DraftRes>, Failure> {
    let resolved = state.service.resolve_draft(&id).map_err(fail)?;
    Ok(Json(DraftRes {
        draft: resolved.draft.into(),
        missing_fields: resolved.missing_fields,
    }))
}

#[utoipa::path(
    post,
    path = "/documents",
    request_body = IssueDocumentReq,
    responses(
        (status = 201, description = "Document issued", body = IssueDocumentRes),
        (status = 404, description = "Unknown encounter or patient", body = ErrorRes),
        (status = 409, description = "Duplicate issuance or operation in progress", body = ErrorRes),
        (status = 422, description = "Validation failed; no external call was made", body = ErrorRes),
        (status = 502, description = "Authority rejected the document", body = ErrorRes),
        (status = 504, description = "Authority unreachable; document left in error status", body = ErrorRes)
    )
)]
/// Issue an eligibility document for an encounter.
///
/// Auto-populates a draft from the encounter and patient records, applies
/// the caller's overrides, validates, and submits to the authority. On ack
/// the document lands in `approved` with its assigned number; on gateway
/// failure it is stored in `error` status and can be retried.
#[axum::debug_handler]
async fn issue_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IssueDocumentReq>,
) -> Result<(StatusCode, Json<IssueDocumentRes>), Failure> {
    require_api_key(&headers)?;
    let actor = Actor::new(req.actor_name, req.actor_role);
    let overrides = req.overrides.to_overrides()?;
    let outcome = state
        .service
        .issue_document(&req.encounter_id, &overrides, &actor)
        .await
        .map_err(fail)?;
    Ok((
        StatusCode::CREATED,
        Json(IssueDocumentRes {
            document: outcome.document.into(),
            warnings: outcome.warnings,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/documents/{id}",
    responses(
        (status = 200, description = "Document", body = DocumentRes),
        (status = 404, description = "Unknown document", body = ErrorRes)
    )
)]
#[axum::debug_handler]
async fn get_document(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<DocumentRes>, Failure> {
    let doc = state.service.get_document(id).map_err(fail)?;
    Ok(Json(doc.into()))
}

#[utoipa::path(
    post,
    path = "/documents/{id}/retry",
    request_body = ActorReq,
    responses(
        (status = 200, description = "Document re-submitted and approved", body = IssueDocumentRes),
        (status = 409, description = "Not in error status, or operation in progress", body = ErrorRes)
    )
)]
/// Re-submit a document that previously failed (legal from `error` only).
#[axum::debug_handler]
async fn retry_document(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ActorReq>,
) -> Result<Json<IssueDocumentRes>, Failure> {
    require_api_key(&headers)?;
    let outcome = state
        .service
        .retry_document(id, &req.to_actor())
        .await
        .map_err(fail)?;
    Ok(Json(IssueDocumentRes {
        document: outcome.document.into(),
        warnings: outcome.warnings,
    }))
}

#[utoipa::path(
    post,
    path = "/documents/{id}/amend",
    request_body = AmendDocumentReq,
    responses(
        (status = 200, description = "Document amended", body = IssueDocumentRes),
        (status = 409, description = "Not amendable in its current status", body = ErrorRes),
        (status = 422, description = "Amended payload failed validation", body = ErrorRes)
    )
)]
/// Amend an approved document and push the update to the authority.
#[axum::debug_handler]
async fn amend_document(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    headers: HeaderMap,
    Json(req): Json<AmendDocumentReq>,
) -> Result<Json<IssueDocumentRes>, Failure> {
    require_api_key(&headers)?;
    let actor = Actor::new(req.actor_name, req.actor_role);
    let overrides = req.overrides.to_overrides()?;
    let outcome = state
        .service
        .amend_document(id, &overrides, &actor)
        .await
        .map_err(fail)?;
    Ok(Json(IssueDocumentRes {
        document: outcome.document.into(),
        warnings: outcome.warnings,
    }))
}

#[utoipa::path(
    post,
    path = "/documents/{id}/cancel",
    request_body = ActorReq,
    responses(
        (status = 200, description = "Document cancelled", body = DocumentRes),
        (status = 409, description = "Not cancellable in its current status", body = ErrorRes)
    )
)]
/// Cancel a document. Cancellation is terminal.
#[axum::debug_handler]
async fn cancel_document(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ActorReq>,
) -> Result<Json<DocumentRes>, Failure> {
    require_api_key(&headers)?;
    let doc = state
        .service
        .cancel_document(id, &req.to_actor())
        .await
        .map_err(fail)?;
    Ok(Json(doc.into()))
}

#[utoipa::path(
    get,
    path = "/patients/{patient_ref}/documents",
    responses(
        (status = 200, description = "All documents for the patient, oldest first", body = [DocumentRes])
    )
)]
#[axum::debug_handler]
async fn document_history(
    State(state): State<AppState>,
    AxumPath(patient_ref): AxumPath<String>,
) -> Json<Vec<DocumentRes>> {
    let docs = state
        .service
        .document_history(&patient_ref)
        .into_iter()
        .map(DocumentRes::from)
        .collect();
    Json(docs)
}

#[utoipa::path(
    get,
    path = "/audit/stats",
    responses(
        (status = 200, description = "Aggregate gateway-call statistics for the optional from/to range")
    )
)]
/// Success rate, latency and per-day tallies derived from the audit ledger.
#[axum::debug_handler]
async fn audit_stats(
    State(state): State<AppState>,
    Query(params): Query<AuditRangeParams>,
) -> Json<Statistics> {
    let query = AuditQuery {
        from: params.from,
        to: params.to,
        ..Default::default()
    };
    Json(state.service.audit_stats(&query))
}

#[utoipa::path(
    get,
    path = "/audit/entries",
    responses(
        (status = 200, description = "Filtered, sorted audit entries")
    )
)]
/// Filtered, sorted view of the audit ledger (filter by `action`/`status`,
/// sort by `timestamp` or `latency`, `asc`/`desc`).
#[axum::debug_handler]
async fn audit_entries(
    State(state): State<AppState>,
    Query(params): Query<AuditViewParams>,
) -> Json<Vec<elig_core::AuditLogEntry>> {
    Json(state.service.audit_entries(&params.to_query()))
}

#[utoipa::path(
    get,
    path = "/audit/export",
    responses(
        (status = 200, description = "CSV export of the filtered, sorted audit view")
    )
)]
/// CSV download of the same view `/audit/entries` serves. Export never
/// mutates the ledger.
#[axum::debug_handler]
async fn audit_export(
    State(state): State<AppState>,
    Query(params): Query<AuditViewParams>,
) -> impl IntoResponse {
    let csv = state.service.export_audit_csv(&params.to_query());
    (
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"audit_log.csv\"",
            ),
        ],
        csv,
    )
}
