//! Eligibility document domain model and in-memory store.
//!
//! An [`EligibilityDocument`] starts life as an auto-populated draft and moves
//! through a fixed status machine; it is never physically deleted (cancelled
//! is a terminal status, not a removal). The store keeps one live document
//! per encounter so an encounter can never be issued twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EligError, EligResult};

/// Closed set of service types a document can be issued for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Outpatient,
    Inpatient,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Outpatient => write!(f, "outpatient"),
            ServiceType::Inpatient => write!(f, "inpatient"),
        }
    }
}

/// Lifecycle status of an eligibility document.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Submitted,
    Approved,
    Updated,
    Cancelled,
    Error,
}

impl DocumentStatus {
    /// Statuses in which the external authority has acknowledged the
    /// document, i.e. the only statuses that carry a document number.
    pub fn is_issued(self) -> bool {
        matches!(
            self,
            DocumentStatus::Submitted | DocumentStatus::Approved | DocumentStatus::Updated
        )
    }

    /// A fresh submission is only legal from `Draft` (first issue) or
    /// `Error` (retry).
    pub fn allows_submit(self) -> bool {
        matches!(self, DocumentStatus::Draft | DocumentStatus::Error)
    }

    pub fn allows_amend(self) -> bool {
        matches!(self, DocumentStatus::Approved | DocumentStatus::Updated)
    }

    pub fn allows_cancel(self) -> bool {
        matches!(
            self,
            DocumentStatus::Draft
                | DocumentStatus::Submitted
                | DocumentStatus::Approved
                | DocumentStatus::Updated
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Submitted => "submitted",
            DocumentStatus::Approved => "approved",
            DocumentStatus::Updated => "updated",
            DocumentStatus::Cancelled => "cancelled",
            DocumentStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A coverage-verification document issued (or drafted) against a clinical
/// encounter.
///
/// Payload fields stay `Option` while the document is a draft; the
/// validation engine, not this type, decides which of them are required.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EligibilityDocument {
    pub id: Uuid,
    pub document_number: Option<String>,
    pub patient_ref: String,
    pub encounter_ref: String,
    pub patient_name: Option<String>,
    pub insurance_card_number: Option<String>,
    pub service_type: Option<ServiceType>,
    pub issue_date: Option<NaiveDate>,
    pub diagnosis_code: Option<String>,
    pub diagnosis_name: Option<String>,
    pub polyclinic_code: Option<String>,
    pub treatment_class: Option<String>,
    pub rest_days: Option<u32>,
    pub notes: Option<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EligibilityDocument {
    /// A blank draft tied to a patient and encounter.
    pub fn draft(patient_ref: impl Into<String>, encounter_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_number: None,
            patient_ref: patient_ref.into(),
            encounter_ref: encounter_ref.into(),
            patient_name: None,
            insurance_card_number: None,
            service_type: None,
            issue_date: None,
            diagnosis_code: None,
            diagnosis_name: None,
            polyclinic_code: None,
            treatment_class: None,
            rest_days: None,
            notes: None,
            status: DocumentStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Commit a status transition, keeping the number/status invariant:
    /// `document_number` is present exactly when the status is an issued one.
    ///
    /// # Errors
    ///
    /// Returns `EligError::InvalidInput` when moving to an issued status with
    /// no document number available (the gateway ack must have carried one).
    pub fn commit_status(
        &mut self,
        status: DocumentStatus,
        document_number: Option<String>,
    ) -> EligResult<()> {
        if status.is_issued() {
            if let Some(number) = document_number {
                self.document_number = Some(number);
            }
            if self.document_number.is_none() {
                return Err(EligError::InvalidInput(format!(
                    "cannot enter {status} status without a document number"
                )));
            }
        } else {
            self.document_number = None;
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Caller-supplied field overrides applied on top of an auto-populated draft.
///
/// Every payload field of the draft is independently overridable; absent
/// fields leave the resolved value in place.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DocumentOverrides {
    pub insurance_card_number: Option<String>,
    pub service_type: Option<ServiceType>,
    pub issue_date: Option<NaiveDate>,
    pub diagnosis_code: Option<String>,
    pub diagnosis_name: Option<String>,
    pub polyclinic_code: Option<String>,
    pub treatment_class: Option<String>,
    pub rest_days: Option<u32>,
    pub notes: Option<String>,
}

impl DocumentOverrides {
    pub fn apply(&self, doc: &mut EligibilityDocument) {
        if let Some(v) = &self.insurance_card_number {
            doc.insurance_card_number = Some(v.clone());
        }
        if let Some(v) = self.service_type {
            doc.service_type = Some(v);
        }
        if let Some(v) = self.issue_date {
            doc.issue_date = Some(v);
        }
        if let Some(v) = &self.diagnosis_code {
            doc.diagnosis_code = Some(v.clone());
        }
        if let Some(v) = &self.diagnosis_name {
            doc.diagnosis_name = Some(v.clone());
        }
        if let Some(v) = &self.polyclinic_code {
            doc.polyclinic_code = Some(v.clone());
        }
        if let Some(v) = &self.treatment_class {
            doc.treatment_class = Some(v.clone());
        }
        if let Some(v) = self.rest_days {
            doc.rest_days = Some(v);
        }
        if let Some(v) = &self.notes {
            doc.notes = Some(v.clone());
        }
    }
}

#[derive(Default)]
struct StoreInner {
    documents: HashMap<Uuid, EligibilityDocument>,
    by_encounter: HashMap<String, Uuid>,
}

/// In-memory document store.
///
/// Documents are mutated only through [`DocumentStore::update_with`], which
/// holds the write lock for the whole closure so readers never observe a
/// half-applied transition.
#[derive(Default)]
pub struct DocumentStore {
    inner: RwLock<StoreInner>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly resolved draft.
    ///
    /// # Errors
    ///
    /// Returns `EligError::DuplicateIssuance` if a non-cancelled document
    /// already exists for the draft's encounter. A cancelled document frees
    /// its encounter for a fresh issue.
    pub fn insert(&self, doc: EligibilityDocument) -> EligResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing_id) = inner.by_encounter.get(&doc.encounter_ref) {
            if let Some(existing) = inner.documents.get(existing_id) {
                if existing.status != DocumentStatus::Cancelled {
                    return Err(EligError::DuplicateIssuance {
                        encounter_ref: doc.encounter_ref.clone(),
                        existing: *existing_id,
                    });
                }
            }
        }
        inner.by_encounter.insert(doc.encounter_ref.clone(), doc.id);
        inner.documents.insert(doc.id, doc);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> EligResult<EligibilityDocument> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .documents
            .get(&id)
            .cloned()
            .ok_or(EligError::DocumentNotFound(id))
    }

    /// The document currently tied to an encounter, if any.
    pub fn get_by_encounter(&self, encounter_ref: &str) -> Option<EligibilityDocument> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_encounter
            .get(encounter_ref)
            .and_then(|id| inner.documents.get(id))
            .cloned()
    }

    /// All documents for a patient, oldest first.
    pub fn history(&self, patient_ref: &str) -> Vec<EligibilityDocument> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut docs: Vec<_> = inner
            .documents
            .values()
            .filter(|d| d.patient_ref == patient_ref)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.created_at);
        docs
    }

    /// Apply a mutation under the write lock and return the updated document.
    pub fn update_with<F>(&self, id: Uuid, mutate: F) -> EligResult<EligibilityDocument>
    where
        F: FnOnce(&mut EligibilityDocument) -> EligResult<()>,
    {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let doc = inner
            .documents
            .get_mut(&id)
            .ok_or(EligError::DocumentNotFound(id))?;
        mutate(doc)?;
        Ok(doc.clone())
    }
}
