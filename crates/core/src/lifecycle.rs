//! Document lifecycle manager.
//!
//! [`DocumentService`] owns the state machine for eligibility documents:
//!
//! ```text
//! draft --(validate ok, submit)--> submitted --(authority ack)--> approved
//! submitted --(authority reject / timeout)--> error
//! approved --(amend, submit)--> updated
//! draft|submitted|approved|updated --(cancel)--> cancelled
//! error --(retry)--> submitted
//! ```
//!
//! At most one transition is in flight per document; a concurrent attempt is
//! rejected with `EligError::OperationInProgress` rather than queued.
//! Transition bodies run in a spawned task, so a caller abandoning its
//! request cannot stop the gateway outcome from being committed and audited:
//! the ledger reflects what actually happened externally.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::actor::Actor;
use crate::config::CoreConfig;
use crate::directory::{EncounterDirectory, PatientDirectory};
use crate::document::{
    DocumentOverrides, DocumentStatus, DocumentStore, EligibilityDocument,
};
use crate::draft::{DraftResolver, ResolvedDraft};
use crate::gateway::{
    AuditedGateway, DocumentAction, DocumentRequest, EligibilityCheck, EligibilityGateway,
    EligibilityProbe, RetryPolicy,
};
use crate::ledger::{AuditLedger, AuditLogEntry, AuditQuery};
use crate::stats::{self, Statistics};
use crate::validation::{validate, ValidationPolicy};
use crate::{export, EligError, EligResult};

/// An issued (or amended) document together with any advisory warnings the
/// validation pass produced.
#[derive(Clone, Debug)]
pub struct IssueOutcome {
    pub document: EligibilityDocument,
    pub warnings: Vec<String>,
}

/// Releases the per-document in-flight slot when the transition body ends,
/// however it ends.
struct InFlightGuard {
    id: Uuid,
    slots: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Orchestrates draft resolution, validation, gateway calls and status
/// commits for eligibility documents.
pub struct DocumentService {
    cfg: Arc<CoreConfig>,
    store: Arc<DocumentStore>,
    resolver: DraftResolver,
    gateway: Arc<AuditedGateway>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl DocumentService {
    pub fn new(
        cfg: Arc<CoreConfig>,
        patients: Arc<dyn PatientDirectory>,
        encounters: Arc<dyn EncounterDirectory>,
        gateway: Arc<dyn EligibilityGateway>,
        ledger: Arc<AuditLedger>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&cfg);
        Self {
            cfg,
            store: Arc::new(DocumentStore::new()),
            resolver: DraftResolver::new(patients, encounters),
            gateway: Arc::new(AuditedGateway::new(gateway, retry, ledger)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        self.gateway.ledger()
    }

    /// Claim the single in-flight slot for a document.
    fn begin_transition(&self, id: Uuid) -> EligResult<InFlightGuard> {
        let mut slots = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !slots.insert(id) {
            return Err(EligError::OperationInProgress(id));
        }
        Ok(InFlightGuard {
            id,
            slots: self.in_flight.clone(),
        })
    }

    fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy::from_config(&self.cfg, Utc::now().date_naive())
    }

    /// Populate a draft for an encounter without issuing it. Exposed so
    /// callers can preview what auto-population found and which fields
    /// still need manual input.
    pub fn resolve_draft(&self, encounter_id: &str) -> EligResult<ResolvedDraft> {
        self.resolver.resolve(encounter_id)
    }

    /// Issue a document for an encounter: resolve, apply overrides,
    /// validate, then submit to the authority.
    ///
    /// # Errors
    ///
    /// `EligError::ValidationFailed` aborts before any external call (and
    /// before anything is stored); `EligError::DuplicateIssuance` if the
    /// encounter already carries a live document; gateway failures leave the
    /// document stored in `error` status for a later retry.
    pub async fn issue_document(
        &self,
        encounter_id: &str,
        overrides: &DocumentOverrides,
        actor: &Actor,
    ) -> EligResult<IssueOutcome> {
        let ResolvedDraft {
            mut draft,
            missing_fields,
        } = self.resolver.resolve(encounter_id)?;
        if !missing_fields.is_empty() {
            tracing::debug!(encounter = encounter_id, ?missing_fields, "draft has gaps");
        }
        overrides.apply(&mut draft);

        let result = validate(&draft, &self.validation_policy());
        if !result.is_valid {
            return Err(EligError::ValidationFailed {
                errors: result.errors,
                warnings: result.warnings,
            });
        }

        let request = DocumentRequest::from_document(&draft, self.cfg.provider_code())?;
        let id = draft.id;
        self.store.insert(draft)?;
        let guard = self.begin_transition(id)?;

        let document = self
            .run_submission(id, request, actor.clone(), guard)
            .await?;
        Ok(IssueOutcome {
            document,
            warnings: result.warnings,
        })
    }

    /// Re-submit a document that previously failed.
    pub async fn retry_document(&self, id: Uuid, actor: &Actor) -> EligResult<IssueOutcome> {
        // Legality is only meaningful against the stored status while the
        // in-flight slot is held; a snapshot taken before the guard could be
        // stale by the time the transition runs.
        let guard = self.begin_transition(id)?;
        let doc = self.store.get(id)?;
        if doc.status != DocumentStatus::Error {
            return Err(EligError::IllegalTransition {
                from: doc.status,
                attempted: "retry",
            });
        }

        let result = validate(&doc, &self.validation_policy());
        if !result.is_valid {
            return Err(EligError::ValidationFailed {
                errors: result.errors,
                warnings: result.warnings,
            });
        }

        let request = DocumentRequest::from_document(&doc, self.cfg.provider_code())?;

        let document = self
            .run_submission(id, request, actor.clone(), guard)
            .await?;
        Ok(IssueOutcome {
            document,
            warnings: result.warnings,
        })
    }

    /// Amend an approved document: revalidate the amended payload, send the
    /// update, and commit the new field values together with the `updated`
    /// status only after the authority acknowledges. A failed amend leaves
    /// the document exactly as it was; the authority still holds the
    /// pre-amend version.
    pub async fn amend_document(
        &self,
        id: Uuid,
        overrides: &DocumentOverrides,
        actor: &Actor,
    ) -> EligResult<IssueOutcome> {
        // Legality checked under the guard, same as retry.
        let guard = self.begin_transition(id)?;
        let doc = self.store.get(id)?;
        if !doc.status.allows_amend() {
            return Err(EligError::IllegalTransition {
                from: doc.status,
                attempted: "amend",
            });
        }

        let mut amended = doc.clone();
        overrides.apply(&mut amended);
        let result = validate(&amended, &self.validation_policy());
        if !result.is_valid {
            return Err(EligError::ValidationFailed {
                errors: result.errors,
                warnings: result.warnings,
            });
        }

        let request = DocumentRequest::from_document(&amended, self.cfg.provider_code())?;

        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let overrides = overrides.clone();
        let actor = actor.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match gateway
                .execute(DocumentAction::Update, &request, &actor)
                .await
            {
                Ok(ack) => store.update_with(id, |doc| {
                    overrides.apply(doc);
                    doc.commit_status(DocumentStatus::Updated, ack.external_reference.clone())
                }),
                // A failed amend leaves the document in its prior status:
                // the authority still holds the pre-amend version, and the
                // failed attempt is already in the ledger. The caller amends
                // again once the authority is reachable.
                Err(err) => Err(err),
            }
        });

        let document = handle
            .await
            .map_err(|e| EligError::TaskJoin(e.to_string()))??;
        Ok(IssueOutcome {
            document,
            warnings: result.warnings,
        })
    }

    /// Cancel a document. A draft the authority never saw is cancelled
    /// locally with no gateway call and no audit entry; an issued document
    /// is cancelled at the authority first and committed only on ack.
    pub async fn cancel_document(&self, id: Uuid, actor: &Actor) -> EligResult<EligibilityDocument> {
        let guard = self.begin_transition(id)?;
        let doc = self.store.get(id)?;
        if !doc.status.allows_cancel() {
            return Err(EligError::IllegalTransition {
                from: doc.status,
                attempted: "cancel",
            });
        }

        if doc.status == DocumentStatus::Draft {
            let cancelled = self
                .store
                .update_with(id, |doc| doc.commit_status(DocumentStatus::Cancelled, None))?;
            drop(guard);
            return Ok(cancelled);
        }

        let request = DocumentRequest::from_document(&doc, self.cfg.provider_code())?;
        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let actor = actor.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match gateway
                .execute(DocumentAction::Cancel, &request, &actor)
                .await
            {
                Ok(_ack) => {
                    store.update_with(id, |doc| doc.commit_status(DocumentStatus::Cancelled, None))
                }
                // A failed cancel leaves the document in its prior status:
                // the external document still exists, and the failed attempt
                // is already in the ledger.
                Err(err) => Err(err),
            }
        });

        handle
            .await
            .map_err(|e| EligError::TaskJoin(e.to_string()))?
    }

    /// Read-only coverage probe against the authority, audited like every
    /// other gateway call.
    pub async fn check_eligibility(
        &self,
        card_number: &str,
        service_date: NaiveDate,
        actor: &Actor,
    ) -> EligResult<EligibilityCheck> {
        let probe = EligibilityProbe {
            card_number: card_number.to_string(),
            service_date,
        };
        self.gateway.probe(&probe, None, actor).await
    }

    pub fn get_document(&self, id: Uuid) -> EligResult<EligibilityDocument> {
        self.store.get(id)
    }

    pub fn find_by_encounter(&self, encounter_ref: &str) -> Option<EligibilityDocument> {
        self.store.get_by_encounter(encounter_ref)
    }

    /// All documents ever issued for a patient, oldest first.
    pub fn document_history(&self, patient_ref: &str) -> Vec<EligibilityDocument> {
        self.store.history(patient_ref)
    }

    /// Statistics over the ledger entries in the given (inclusive) range.
    pub fn audit_stats(&self, query: &AuditQuery) -> Statistics {
        stats::compute(&self.ledger().query(query))
    }

    /// Filtered, sorted ledger view for display.
    pub fn audit_entries(&self, query: &AuditQuery) -> Vec<AuditLogEntry> {
        self.ledger().query(query)
    }

    /// CSV rendering of a filtered, sorted ledger view.
    pub fn export_audit_csv(&self, query: &AuditQuery) -> String {
        export::export_csv(&self.ledger().query(query))
    }

    /// Shared submission body for issue and retry: one logical create call,
    /// committed as `submitted` on ack and immediately `approved` (the
    /// synchronous ack from the authority is the approval), or `error` on
    /// timeout/rejection. Runs detached so an abandoned caller cannot leave
    /// a half-committed transition.
    async fn run_submission(
        &self,
        id: Uuid,
        request: DocumentRequest,
        actor: Actor,
        guard: InFlightGuard,
    ) -> EligResult<EligibilityDocument> {
        let store = self.store.clone();
        let gateway = self.gateway.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match gateway
                .execute(DocumentAction::Create, &request, &actor)
                .await
            {
                Ok(ack) => store.update_with(id, |doc| {
                    doc.commit_status(DocumentStatus::Submitted, ack.external_reference.clone())?;
                    doc.commit_status(DocumentStatus::Approved, None)
                }),
                Err(err) => {
                    store.update_with(id, |doc| doc.commit_status(DocumentStatus::Error, None))?;
                    Err(err)
                }
            }
        });

        handle
            .await
            .map_err(|e| EligError::TaskJoin(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{EncounterRecord, InMemoryDirectory, PatientRecord};
    use crate::document::ServiceType;
    use crate::gateway::testing::{Script, ScriptedGateway};
    use crate::gateway::{CoverageStatus, GatewayAck, GatewayError};
    use crate::ledger::{AuditAction, AuditOutcome};
    use std::time::Duration;

    fn directory() -> Arc<InMemoryDirectory> {
        Arc::new(
            InMemoryDirectory::new()
                .with_patient(PatientRecord {
                    id: "p-1".into(),
                    name: Some("Ratna Dewi".into()),
                    insurance_card_number: Some("0001234567890".into()),
                })
                .with_encounter(EncounterRecord {
                    id: "enc-1".into(),
                    patient_id: "p-1".into(),
                    service_type: Some(ServiceType::Outpatient),
                    encounter_date: Some(Utc::now().date_naive()),
                    diagnosis_code: Some("A09".into()),
                    diagnosis_name: Some("Gastroenteritis".into()),
                    polyclinic_code: Some("INT".into()),
                    treatment_class: None,
                    rest_days: None,
                }),
        )
    }

    fn service(gateway: Arc<dyn EligibilityGateway>) -> DocumentService {
        let cfg = Arc::new(
            CoreConfig::new(
                "http://gateway.test".into(),
                "RS001".into(),
                Duration::from_secs(1),
                2,
                Duration::from_millis(1),
                14,
                500,
            )
            .unwrap(),
        );
        let dir = directory();
        DocumentService::new(cfg, dir.clone(), dir, gateway, Arc::new(AuditLedger::new()))
    }

    fn actor() -> Actor {
        Actor::new("a. sari", "admission")
    }

    #[tokio::test]
    async fn successful_issue_lands_approved_with_number_and_one_entry() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Ack(Some(
            "0301R0010525V000001",
        ))]));
        let svc = service(gateway);

        let outcome = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await
            .unwrap();
        assert_eq!(outcome.document.status, DocumentStatus::Approved);
        assert_eq!(
            outcome.document.document_number.as_deref(),
            Some("0301R0010525V000001")
        );

        let entries = svc.ledger().snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::DocumentCreate);
        assert_eq!(entries[0].outcome, AuditOutcome::Success);
        assert_eq!(entries[0].actor, "a. sari (admission)");
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_gateway_or_ledger() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Ack(None)]));
        let svc = service(gateway.clone());

        let overrides = DocumentOverrides {
            insurance_card_number: Some(String::new()),
            ..Default::default()
        };
        let err = svc.issue_document("enc-1", &overrides, &actor()).await;
        match err {
            Err(EligError::ValidationFailed { errors, .. }) => {
                assert_eq!(errors, vec!["card number required".to_string()]);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }

        assert_eq!(gateway.call_count(), 0);
        assert!(svc.ledger().is_empty());
        assert!(svc.find_by_encounter("enc-1").is_none());
    }

    #[tokio::test]
    async fn exhausted_timeouts_leave_error_status_and_one_failed_entry() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Transient("timed out"),
            Script::Transient("timed out"),
        ]));
        let svc = service(gateway.clone());

        let err = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await;
        assert!(matches!(
            err,
            Err(EligError::GatewayTimeout { attempts: 2, .. })
        ));
        assert_eq!(gateway.call_count(), 2);

        let doc = svc.find_by_encounter("enc-1").unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);
        assert!(doc.document_number.is_none());

        // Retries are internal to one logical call: exactly one entry.
        let entries = svc.ledger().snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AuditOutcome::Failed);
        assert!(entries[0].error_message.is_some());
    }

    #[tokio::test]
    async fn retry_from_error_reissues_and_approves() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Reject("authority unavailable for this provider"),
            Script::Ack(Some("0301R0010525V000002")),
        ]));
        let svc = service(gateway);

        let err = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await;
        assert!(matches!(err, Err(EligError::GatewayRejection(_))));
        let doc = svc.find_by_encounter("enc-1").unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);

        let outcome = svc.retry_document(doc.id, &actor()).await.unwrap();
        assert_eq!(outcome.document.status, DocumentStatus::Approved);
        assert_eq!(svc.ledger().len(), 2);
    }

    #[tokio::test]
    async fn retry_is_only_legal_from_error() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Ack(Some(
            "0301R0010525V000001",
        ))]));
        let svc = service(gateway);

        let outcome = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await
            .unwrap();
        let err = svc.retry_document(outcome.document.id, &actor()).await;
        assert!(matches!(
            err,
            Err(EligError::IllegalTransition {
                from: DocumentStatus::Approved,
                attempted: "retry"
            })
        ));
    }

    #[tokio::test]
    async fn second_issue_for_same_encounter_is_duplicate() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Ack(Some(
            "0301R0010525V000001",
        ))]));
        let svc = service(gateway);

        svc.issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await
            .unwrap();
        let err = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await;
        assert!(matches!(err, Err(EligError::DuplicateIssuance { .. })));
    }

    #[tokio::test]
    async fn amend_approved_document_commits_updated() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Ack(Some("0301R0010525V000001")),
            Script::Ack(None),
        ]));
        let svc = service(gateway);

        let issued = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await
            .unwrap();

        let overrides = DocumentOverrides {
            diagnosis_code: Some("K29".into()),
            ..Default::default()
        };
        let amended = svc
            .amend_document(issued.document.id, &overrides, &actor())
            .await
            .unwrap();
        assert_eq!(amended.document.status, DocumentStatus::Updated);
        assert_eq!(amended.document.diagnosis_code.as_deref(), Some("K29"));
        // Amendment keeps the originally assigned number.
        assert_eq!(
            amended.document.document_number.as_deref(),
            Some("0301R0010525V000001")
        );

        let entries = svc.ledger().snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, AuditAction::DocumentUpdate);
    }

    #[tokio::test]
    async fn failed_amend_leaves_document_and_number_untouched() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Ack(Some("0301R0010525V000001")),
            Script::Reject("update rejected by authority"),
            Script::Ack(None),
        ]));
        let svc = service(gateway);

        let issued = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await
            .unwrap();

        let overrides = DocumentOverrides {
            diagnosis_code: Some("K29".into()),
            ..Default::default()
        };
        let err = svc
            .amend_document(issued.document.id, &overrides, &actor())
            .await;
        assert!(matches!(err, Err(EligError::GatewayRejection(_))));

        // The rejected update changes nothing locally; the authority still
        // holds the pre-amend version under its original number.
        let doc = svc.get_document(issued.document.id).unwrap();
        assert_eq!(doc.status, DocumentStatus::Approved);
        assert_eq!(doc.diagnosis_code.as_deref(), Some("A09"));
        assert_eq!(doc.document_number.as_deref(), Some("0301R0010525V000001"));

        let entries = svc.ledger().snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, AuditAction::DocumentUpdate);
        assert_eq!(entries[1].outcome, AuditOutcome::Failed);

        // A second amend goes through once the authority accepts it.
        let amended = svc
            .amend_document(issued.document.id, &overrides, &actor())
            .await
            .unwrap();
        assert_eq!(amended.document.status, DocumentStatus::Updated);
        assert_eq!(amended.document.diagnosis_code.as_deref(), Some("K29"));
    }

    #[tokio::test]
    async fn amend_on_cancelled_document_is_illegal_and_stays_cancelled() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Ack(Some("0301R0010525V000001")),
            Script::Ack(None),
        ]));
        let svc = service(gateway.clone());

        let issued = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await
            .unwrap();
        svc.cancel_document(issued.document.id, &actor())
            .await
            .unwrap();
        let calls_before = gateway.call_count();

        let err = svc
            .amend_document(issued.document.id, &DocumentOverrides::default(), &actor())
            .await;
        assert!(matches!(
            err,
            Err(EligError::IllegalTransition {
                from: DocumentStatus::Cancelled,
                attempted: "amend"
            })
        ));
        // The amend never reaches the authority and the document stays
        // terminal.
        assert_eq!(gateway.call_count(), calls_before);
        assert_eq!(
            svc.get_document(issued.document.id).unwrap().status,
            DocumentStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn cancel_of_issued_document_calls_authority_and_terminates() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Ack(Some("0301R0010525V000001")),
            Script::Ack(None),
        ]));
        let svc = service(gateway);

        let issued = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await
            .unwrap();
        let cancelled = svc
            .cancel_document(issued.document.id, &actor())
            .await
            .unwrap();
        assert_eq!(cancelled.status, DocumentStatus::Cancelled);
        assert!(cancelled.document_number.is_none());

        let entries = svc.ledger().snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, AuditAction::DocumentCancel);
    }

    #[tokio::test]
    async fn cancel_on_cancelled_document_is_illegal_with_no_new_entry() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Ack(Some("0301R0010525V000001")),
            Script::Ack(None),
        ]));
        let svc = service(gateway);

        let issued = svc
            .issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await
            .unwrap();
        svc.cancel_document(issued.document.id, &actor())
            .await
            .unwrap();
        let before = svc.ledger().len();

        let err = svc.cancel_document(issued.document.id, &actor()).await;
        assert!(matches!(
            err,
            Err(EligError::IllegalTransition {
                from: DocumentStatus::Cancelled,
                attempted: "cancel"
            })
        ));
        assert_eq!(svc.ledger().len(), before);
        assert_eq!(
            svc.get_document(issued.document.id).unwrap().status,
            DocumentStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn eligibility_check_flows_through_to_ledger() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Check(
            false,
            CoverageStatus::Suspended,
        )]));
        let svc = service(gateway);

        let check = svc
            .check_eligibility("0001234567890", Utc::now().date_naive(), &actor())
            .await
            .unwrap();
        assert!(!check.eligible);
        assert_eq!(check.status, CoverageStatus::Suspended);

        let entries = svc.ledger().snapshot();
        assert_eq!(entries[0].action, AuditAction::EligibilityCheck);
        assert_eq!(entries[0].outcome, AuditOutcome::Success);
    }

    /// Gateway that parks every call until released, for exercising the
    /// in-flight exclusion and abandoned-caller behaviour.
    struct ParkedGateway {
        release: tokio::sync::Semaphore,
    }

    impl ParkedGateway {
        fn new() -> Self {
            Self {
                release: tokio::sync::Semaphore::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl EligibilityGateway for ParkedGateway {
        async fn check(
            &self,
            _probe: &EligibilityProbe,
        ) -> Result<EligibilityCheck, GatewayError> {
            Err(GatewayError::Rejection("not scripted".into()))
        }

        async fn call(
            &self,
            _action: DocumentAction,
            _request: &DocumentRequest,
        ) -> Result<GatewayAck, GatewayError> {
            self.release
                .acquire()
                .await
                .map_err(|_| GatewayError::Transient("gateway closed".into()))?
                .forget();
            Ok(GatewayAck {
                external_reference: Some("0301R0010525V000001".into()),
                message: None,
            })
        }
    }

    #[tokio::test]
    async fn concurrent_transition_on_same_document_is_rejected() {
        let gateway = Arc::new(ParkedGateway::new());
        let svc = Arc::new(service(gateway.clone()));

        let background = {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.issue_document("enc-1", &DocumentOverrides::default(), &actor())
                    .await
            })
        };

        // Wait for the draft to be stored and the gateway call to park.
        let doc = loop {
            if let Some(doc) = svc.find_by_encounter("enc-1") {
                break doc;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        let err = svc.cancel_document(doc.id, &actor()).await;
        assert!(matches!(err, Err(EligError::OperationInProgress(id)) if id == doc.id));

        gateway.release.add_permits(1);
        let outcome = background.await.unwrap().unwrap();
        assert_eq!(outcome.document.status, DocumentStatus::Approved);
    }

    #[tokio::test]
    async fn abandoned_caller_still_commits_and_audits_the_true_outcome() {
        let gateway = Arc::new(ParkedGateway::new());
        let svc = Arc::new(service(gateway.clone()));

        let abandoned = {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.issue_document("enc-1", &DocumentOverrides::default(), &actor())
                    .await
            })
        };

        let doc = loop {
            if let Some(doc) = svc.find_by_encounter("enc-1") {
                break doc;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        // The caller walks away while the authority call is in flight.
        tokio::time::sleep(Duration::from_millis(20)).await;
        abandoned.abort();
        let _ = abandoned.await;

        gateway.release.add_permits(1);
        let approved = loop {
            let current = svc.get_document(doc.id).unwrap();
            if current.status != DocumentStatus::Draft {
                break current;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        assert_eq!(approved.status, DocumentStatus::Approved);
        let entries = svc.ledger().snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn stats_and_export_reflect_the_same_filtered_view() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Ack(Some("0301R0010525V000001")),
            Script::Check(true, CoverageStatus::Active),
        ]));
        let svc = service(gateway);

        svc.issue_document("enc-1", &DocumentOverrides::default(), &actor())
            .await
            .unwrap();
        svc.check_eligibility("0001234567890", Utc::now().date_naive(), &actor())
            .await
            .unwrap();

        let query = AuditQuery {
            action: Some(AuditAction::DocumentCreate),
            ..Default::default()
        };
        let stats = svc.audit_stats(&query);
        assert_eq!(stats.overall.total_calls, 1);
        assert_eq!(stats.overall.success_rate, 1.0);

        let csv = svc.export_audit_csv(&query);
        assert_eq!(csv.lines().count(), 2);
        // Export never mutates the ledger.
        assert_eq!(svc.ledger().len(), 2);
    }
}
