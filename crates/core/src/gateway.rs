//! Eligibility authority gateway client.
//!
//! The authority is reached through the [`EligibilityGateway`] trait so the
//! lifecycle manager can be exercised against a scripted gateway in tests.
//! [`HttpGateway`] is the production implementation; [`AuditedGateway`] wraps
//! any implementation with the retry policy and the audit ledger, and is the
//! single place that upholds "exactly one ledger entry per logical call".
//!
//! Outcome classes: success, transient failure (network/timeout/5xx,
//! retryable) and business rejection (a definitive authority negative,
//! never retried).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::Actor;
use crate::config::CoreConfig;
use crate::document::{EligibilityDocument, ServiceType};
use crate::ledger::{AuditAction, AuditLedger, AuditLogEntry, AuditOutcome};
use crate::{EligError, EligResult};

/// Mutating document operations the authority supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentAction {
    Create,
    Update,
    Cancel,
}

impl DocumentAction {
    pub fn audit_action(self) -> AuditAction {
        match self {
            DocumentAction::Create => AuditAction::DocumentCreate,
            DocumentAction::Update => AuditAction::DocumentUpdate,
            DocumentAction::Cancel => AuditAction::DocumentCancel,
        }
    }
}

/// Request payload for document create/update/cancel calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub card_number: String,
    pub service_type: ServiceType,
    pub issue_date: NaiveDate,
    pub diagnosis_code: String,
    pub diagnosis_name: Option<String>,
    pub provider_code: String,
    pub polyclinic_code: Option<String>,
    pub treatment_class: Option<String>,
    /// Authority-assigned document number; required for update and cancel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
    #[serde(skip)]
    pub patient_name: Option<String>,
}

impl DocumentRequest {
    /// Build a request from a validated document.
    ///
    /// # Errors
    ///
    /// Returns `EligError::InvalidInput` if a field the wire contract
    /// requires is still blank; the validation engine normally rules this
    /// out before any request is built.
    pub fn from_document(doc: &EligibilityDocument, provider_code: &str) -> EligResult<Self> {
        let card_number = doc
            .insurance_card_number
            .clone()
            .ok_or_else(|| EligError::InvalidInput("card number required".into()))?;
        let service_type = doc
            .service_type
            .ok_or_else(|| EligError::InvalidInput("service type required".into()))?;
        let issue_date = doc
            .issue_date
            .ok_or_else(|| EligError::InvalidInput("issue date required".into()))?;
        let diagnosis_code = doc
            .diagnosis_code
            .clone()
            .ok_or_else(|| EligError::InvalidInput("diagnosis code required".into()))?;

        Ok(Self {
            card_number,
            service_type,
            issue_date,
            diagnosis_code,
            diagnosis_name: doc.diagnosis_name.clone(),
            provider_code: provider_code.to_string(),
            polyclinic_code: doc.polyclinic_code.clone(),
            treatment_class: doc.treatment_class.clone(),
            document_number: doc.document_number.clone(),
            patient_name: doc.patient_name.clone(),
        })
    }
}

/// Successful authority response to a document call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayAck {
    pub external_reference: Option<String>,
    pub message: Option<String>,
}

/// Read-only coverage probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EligibilityProbe {
    pub card_number: String,
    pub service_date: NaiveDate,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoverageStatus {
    Active,
    Inactive,
    Expired,
    Suspended,
}

/// Authority answer to an eligibility probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EligibilityCheck {
    pub eligible: bool,
    pub status: CoverageStatus,
    pub message: Option<String>,
}

/// Failure classes the client distinguishes. Transient failures are the
/// only retryable class.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("transient gateway failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Rejection(String),
}

/// External eligibility authority, abstracted for testability.
#[async_trait::async_trait]
pub trait EligibilityGateway: Send + Sync {
    async fn check(&self, probe: &EligibilityProbe) -> Result<EligibilityCheck, GatewayError>;

    async fn call(
        &self,
        action: DocumentAction,
        request: &DocumentRequest,
    ) -> Result<GatewayAck, GatewayError>;
}

/// Generic JSON wire shape of a document response; not tied to any one
/// national authority's format.
#[derive(Debug, Deserialize)]
struct WireDocumentResponse {
    success: bool,
    external_reference: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCheckResponse {
    eligible: bool,
    status: CoverageStatus,
    message: Option<String>,
}

/// HTTP implementation of the authority contract.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    /// # Errors
    ///
    /// Returns `EligError::InvalidInput` if the HTTP client cannot be built.
    pub fn new(cfg: &CoreConfig) -> EligResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.gateway_timeout())
            .build()
            .map_err(|e| EligError::InvalidInput(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: cfg.gateway_base_url().trim_end_matches('/').to_string(),
        })
    }

    fn classify(err: reqwest::Error) -> GatewayError {
        // Timeouts and connection problems are transient; anything the
        // authority answered is handled from the response body/status.
        GatewayError::Transient(err.to_string())
    }

    async fn read_document_response(
        response: reqwest::Response,
    ) -> Result<GatewayAck, GatewayError> {
        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Transient(format!(
                "authority returned {status}"
            )));
        }
        let body: WireDocumentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("malformed authority response: {e}")))?;
        if body.success {
            Ok(GatewayAck {
                external_reference: body.external_reference,
                message: body.message,
            })
        } else {
            Err(GatewayError::Rejection(
                body.message
                    .unwrap_or_else(|| "request rejected by authority".into()),
            ))
        }
    }
}

#[async_trait::async_trait]
impl EligibilityGateway for HttpGateway {
    async fn check(&self, probe: &EligibilityProbe) -> Result<EligibilityCheck, GatewayError> {
        let url = format!("{}/eligibility/check", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(probe)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Transient(format!(
                "authority returned {status}"
            )));
        }
        if status.is_client_error() {
            return Err(GatewayError::Rejection(format!(
                "authority returned {status}"
            )));
        }
        let body: WireCheckResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("malformed authority response: {e}")))?;
        Ok(EligibilityCheck {
            eligible: body.eligible,
            status: body.status,
            message: body.message,
        })
    }

    async fn call(
        &self,
        action: DocumentAction,
        request: &DocumentRequest,
    ) -> Result<GatewayAck, GatewayError> {
        let reference_for = |req: &DocumentRequest| {
            req.document_number
                .clone()
                .ok_or_else(|| GatewayError::Rejection("document number required".into()))
        };

        let response = match action {
            DocumentAction::Create => {
                let url = format!("{}/documents", self.base_url);
                self.client.post(&url).json(request).send().await
            }
            DocumentAction::Update => {
                let reference = reference_for(request)?;
                let url = format!("{}/documents/{reference}", self.base_url);
                self.client.put(&url).json(request).send().await
            }
            DocumentAction::Cancel => {
                let reference = reference_for(request)?;
                let url = format!("{}/documents/{reference}/cancel", self.base_url);
                self.client.post(&url).json(request).send().await
            }
        };

        let response = response.map_err(Self::classify)?;
        if response.status().is_client_error() {
            return Err(GatewayError::Rejection(format!(
                "authority returned {}",
                response.status()
            )));
        }
        Self::read_document_response(response).await
    }
}

/// How many attempts one logical call makes and how long to pause between
/// them. Only transient failures are retried.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &CoreConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts(),
            backoff: cfg.retry_backoff(),
        }
    }

    pub fn is_retryable(&self, err: &GatewayError) -> bool {
        matches!(err, GatewayError::Transient(_))
    }
}

/// Gateway wrapper that times every logical call and appends exactly one
/// ledger entry for it, win or lose. Retries happen inside the logical
/// call, so `latency_ms` covers the total elapsed time across attempts.
pub struct AuditedGateway {
    gateway: Arc<dyn EligibilityGateway>,
    retry: RetryPolicy,
    ledger: Arc<AuditLedger>,
}

impl AuditedGateway {
    pub fn new(gateway: Arc<dyn EligibilityGateway>, retry: RetryPolicy, ledger: Arc<AuditLedger>) -> Self {
        Self {
            gateway,
            retry,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    async fn with_retries<T, F, Fut>(&self, mut attempt_fn: F) -> (Result<T, GatewayError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt_fn().await {
                Ok(value) => return (Ok(value), attempts),
                Err(err) => {
                    if attempts < self.retry.max_attempts && self.retry.is_retryable(&err) {
                        tracing::warn!(attempt = attempts, error = %err, "retrying gateway call");
                        tokio::time::sleep(self.retry.backoff).await;
                        continue;
                    }
                    return (Err(err), attempts);
                }
            }
        }
    }

    fn record(
        &self,
        action: AuditAction,
        card_number: String,
        patient_name: Option<String>,
        document_number: Option<String>,
        actor: &Actor,
        error_message: Option<String>,
        latency_ms: u64,
    ) {
        self.ledger.append(AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            outcome: if error_message.is_none() {
                AuditOutcome::Success
            } else {
                AuditOutcome::Failed
            },
            card_number,
            patient_name,
            document_number,
            actor: actor.stamp(),
            error_message,
            latency_ms,
        });
    }

    /// One logical document call: bounded retries, one ledger entry.
    ///
    /// # Errors
    ///
    /// `EligError::GatewayTimeout` when the retry budget is exhausted on
    /// transient failures, `EligError::GatewayRejection` on a definitive
    /// authority negative. Both are already in the ledger when returned.
    pub async fn execute(
        &self,
        action: DocumentAction,
        request: &DocumentRequest,
        actor: &Actor,
    ) -> EligResult<GatewayAck> {
        let started = Instant::now();
        let (result, attempts) = self
            .with_retries(|| self.gateway.call(action, request))
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(ack) => {
                let document_number = ack
                    .external_reference
                    .clone()
                    .or_else(|| request.document_number.clone());
                self.record(
                    action.audit_action(),
                    request.card_number.clone(),
                    request.patient_name.clone(),
                    document_number,
                    actor,
                    None,
                    latency_ms,
                );
                Ok(ack)
            }
            Err(err) => {
                self.record(
                    action.audit_action(),
                    request.card_number.clone(),
                    request.patient_name.clone(),
                    request.document_number.clone(),
                    actor,
                    Some(err.to_string()),
                    latency_ms,
                );
                match err {
                    GatewayError::Transient(message) => Err(EligError::GatewayTimeout {
                        message,
                        attempts,
                    }),
                    GatewayError::Rejection(message) => Err(EligError::GatewayRejection(message)),
                }
            }
        }
    }

    /// One logical eligibility probe, audited like any other call.
    pub async fn probe(
        &self,
        probe: &EligibilityProbe,
        patient_name: Option<String>,
        actor: &Actor,
    ) -> EligResult<EligibilityCheck> {
        let started = Instant::now();
        let (result, attempts) = self.with_retries(|| self.gateway.check(probe)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(check) => {
                self.record(
                    AuditAction::EligibilityCheck,
                    probe.card_number.clone(),
                    patient_name,
                    None,
                    actor,
                    None,
                    latency_ms,
                );
                Ok(check)
            }
            Err(err) => {
                self.record(
                    AuditAction::EligibilityCheck,
                    probe.card_number.clone(),
                    patient_name,
                    None,
                    actor,
                    Some(err.to_string()),
                    latency_ms,
                );
                match err {
                    GatewayError::Transient(message) => Err(EligError::GatewayTimeout {
                        message,
                        attempts,
                    }),
                    GatewayError::Rejection(message) => Err(EligError::GatewayRejection(message)),
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Script, ScriptedGateway};
    use super::*;
    use crate::ledger::AuditOutcome;

    fn request() -> DocumentRequest {
        DocumentRequest {
            card_number: "0001234567890".into(),
            service_type: ServiceType::Outpatient,
            issue_date: NaiveDate::from_ymd_opt(2025, 5, 12).unwrap(),
            diagnosis_code: "A09".into(),
            diagnosis_name: Some("Gastroenteritis".into()),
            provider_code: "RS001".into(),
            polyclinic_code: Some("INT".into()),
            treatment_class: None,
            document_number: None,
            patient_name: Some("Ratna Dewi".into()),
        }
    }

    fn audited(gateway: Arc<ScriptedGateway>, max_attempts: u32) -> AuditedGateway {
        AuditedGateway::new(
            gateway,
            RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(1),
            },
            Arc::new(AuditLedger::new()),
        )
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds_with_one_entry() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Transient("connection reset"),
            Script::Ack(Some("0301R0010525V000001")),
        ]));
        let audited = audited(gateway.clone(), 2);
        let actor = Actor::new("tester", "admission");

        let ack = audited
            .execute(DocumentAction::Create, &request(), &actor)
            .await
            .unwrap();
        assert_eq!(ack.external_reference.as_deref(), Some("0301R0010525V000001"));
        assert_eq!(gateway.call_count(), 2);

        let entries = audited.ledger().snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AuditOutcome::Success);
        assert_eq!(
            entries[0].document_number.as_deref(),
            Some("0301R0010525V000001")
        );
    }

    #[tokio::test]
    async fn exhausted_retry_budget_yields_timeout_and_one_failed_entry() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Transient("timed out"),
            Script::Transient("timed out"),
        ]));
        let audited = audited(gateway.clone(), 2);
        let actor = Actor::new("tester", "admission");

        let err = audited
            .execute(DocumentAction::Create, &request(), &actor)
            .await;
        assert!(matches!(
            err,
            Err(EligError::GatewayTimeout { attempts: 2, .. })
        ));
        assert_eq!(gateway.call_count(), 2);

        let entries = audited.ledger().snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AuditOutcome::Failed);
        assert_eq!(
            entries[0].error_message.as_deref(),
            Some("transient gateway failure: timed out")
        );
    }

    #[tokio::test]
    async fn business_rejection_is_not_retried() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Reject("card not found")]));
        let audited = audited(gateway.clone(), 3);
        let actor = Actor::new("tester", "admission");

        let err = audited
            .execute(DocumentAction::Create, &request(), &actor)
            .await;
        assert!(matches!(err, Err(EligError::GatewayRejection(msg)) if msg == "card not found"));
        assert_eq!(gateway.call_count(), 1);

        let entries = audited.ledger().snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error_message.as_deref(), Some("card not found"));
    }

    #[tokio::test]
    async fn probe_is_audited_as_eligibility_check() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Check(
            true,
            CoverageStatus::Active,
        )]));
        let audited = audited(gateway, 2);
        let actor = Actor::new("tester", "admission");

        let check = audited
            .probe(
                &EligibilityProbe {
                    card_number: "0001234567890".into(),
                    service_date: NaiveDate::from_ymd_opt(2025, 5, 12).unwrap(),
                },
                Some("Ratna Dewi".into()),
                &actor,
            )
            .await
            .unwrap();
        assert!(check.eligible);

        let entries = audited.ledger().snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::EligibilityCheck);
        assert!(entries[0].document_number.is_none());
    }

    #[test]
    fn request_from_incomplete_document_is_invalid_input() {
        let doc = EligibilityDocument::draft("p-1", "enc-1");
        let err = DocumentRequest::from_document(&doc, "RS001");
        assert!(matches!(err, Err(EligError::InvalidInput(_))));
    }
}
