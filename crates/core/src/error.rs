//! Error taxonomy for the eligibility document engine.
//!
//! Every failure mode that callers need to distinguish gets its own variant:
//! validation failures never reach the audit ledger (no external call was
//! made), gateway failures always do, and concurrency conflicts are surfaced
//! distinctly so a caller can poll instead of resubmitting.

use crate::document::DocumentStatus;

#[derive(Debug, thiserror::Error)]
pub enum EligError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("encounter not found: {0}")]
    EncounterNotFound(String),
    #[error("patient not found: {0}")]
    PatientNotFound(String),
    #[error("document not found: {0}")]
    DocumentNotFound(uuid::Uuid),
    #[error("validation failed: {}", errors.join("; "))]
    ValidationFailed {
        errors: Vec<String>,
        warnings: Vec<String>,
    },
    #[error("a document already exists for encounter {encounter_ref}")]
    DuplicateIssuance {
        encounter_ref: String,
        existing: uuid::Uuid,
    },
    #[error("illegal transition: cannot {attempted} a {from} document")]
    IllegalTransition {
        from: DocumentStatus,
        attempted: &'static str,
    },
    #[error("operation in progress for document {0}")]
    OperationInProgress(uuid::Uuid),
    #[error("gateway timed out after {attempts} attempt(s): {message}")]
    GatewayTimeout { message: String, attempts: u32 },
    #[error("gateway rejected the request: {0}")]
    GatewayRejection(String),
    #[error("internal task failure: {0}")]
    TaskJoin(String),
}

pub type EligResult<T> = Result<T, EligError>;
