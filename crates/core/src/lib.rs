//! # Eligibility Core
//!
//! Core business logic for the insurance-eligibility verification and
//! coverage-document issuance engine:
//! - Draft resolution from patient/encounter collaborator records
//! - Pure rule-based validation with per-service-type rule sets
//! - Document lifecycle state machine with per-document exclusion
//! - Retried, timed gateway calls against the external eligibility authority
//! - Append-only audit ledger with derived statistics and CSV export
//!
//! **No API concerns**: HTTP servers, authentication and DTO shapes belong
//! in `api-rest` and `api-shared`.

pub mod actor;
pub mod config;
pub mod directory;
pub mod document;
pub mod draft;
pub mod error;
pub mod export;
pub mod gateway;
pub mod ledger;
pub mod lifecycle;
pub mod stats;
pub mod validation;

pub use actor::Actor;
pub use config::CoreConfig;
pub use directory::{
    EncounterDirectory, EncounterRecord, InMemoryDirectory, PatientDirectory, PatientRecord,
};
pub use document::{
    DocumentOverrides, DocumentStatus, DocumentStore, EligibilityDocument, ServiceType,
};
pub use draft::{DraftResolver, ResolvedDraft};
pub use error::{EligError, EligResult};
pub use gateway::{
    AuditedGateway, CoverageStatus, DocumentAction, DocumentRequest, EligibilityCheck,
    EligibilityGateway, EligibilityProbe, GatewayAck, GatewayError, HttpGateway, RetryPolicy,
};
pub use ledger::{
    AuditAction, AuditLedger, AuditLogEntry, AuditOutcome, AuditQuery, AuditSortKey, SortOrder,
};
pub use lifecycle::{DocumentService, IssueOutcome};
pub use stats::{CallTally, Statistics};
pub use validation::{validate, ValidationPolicy, ValidationResult};
