//! Append-only audit ledger of gateway interactions.
//!
//! Every logical gateway call produces exactly one entry, written after the
//! call completed or timed out. Entries are immutable once appended and are
//! never deleted; retention is an external concern. Readers work on a
//! snapshot and never hold up writers.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The gateway interaction an entry records.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    EligibilityCheck,
    DocumentCreate,
    DocumentUpdate,
    DocumentCancel,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::EligibilityCheck => "eligibility_check",
            AuditAction::DocumentCreate => "document_create",
            AuditAction::DocumentUpdate => "document_update",
            AuditAction::DocumentCancel => "document_cancel",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failed,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// One gateway interaction, success or failure, with its measured latency.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(rename = "status")]
    pub outcome: AuditOutcome,
    pub card_number: String,
    pub patient_name: Option<String>,
    pub document_number: Option<String>,
    pub actor: String,
    pub error_message: Option<String>,
    pub latency_ms: u64,
}

/// Which column a query sorts on.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditSortKey {
    #[default]
    Timestamp,
    Latency,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filter and ordering for ledger reads. All filters are optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub outcome: Option<AuditOutcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort: AuditSortKey,
    #[serde(default)]
    pub order: SortOrder,
}

impl AuditQuery {
    fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(outcome) = self.outcome {
            if entry.outcome != outcome {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Append-only, totally ordered record of gateway calls.
#[derive(Default)]
pub struct AuditLedger {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry. Entries arrive ordered by call-completion time;
    /// the write lock makes each append atomic.
    pub fn append(&self, entry: AuditLogEntry) {
        tracing::debug!(
            action = %entry.action,
            outcome = %entry.outcome,
            latency_ms = entry.latency_ms,
            "audit entry appended"
        );
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent point-in-time copy of the whole ledger.
    pub fn snapshot(&self) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Filtered, sorted view. The sort is stable, so entries that tie on the
    /// sort key keep their ledger (completion) order.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditLogEntry> {
        let mut selected: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        // Stable sorts, with the comparator (not the result) reversed for
        // descending order so ties keep their ledger order either way.
        match (query.sort, query.order) {
            (AuditSortKey::Timestamp, SortOrder::Asc) => selected.sort_by_key(|e| e.timestamp),
            (AuditSortKey::Timestamp, SortOrder::Desc) => {
                selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp))
            }
            (AuditSortKey::Latency, SortOrder::Asc) => selected.sort_by_key(|e| e.latency_ms),
            (AuditSortKey::Latency, SortOrder::Desc) => {
                selected.sort_by(|a, b| b.latency_ms.cmp(&a.latency_ms))
            }
        }
        selected
    }
}

#[cfg(test)]
pub(crate) fn test_entry(
    action: AuditAction,
    outcome: AuditOutcome,
    timestamp: DateTime<Utc>,
    latency_ms: u64,
) -> AuditLogEntry {
    AuditLogEntry {
        id: Uuid::new_v4(),
        timestamp,
        action,
        outcome,
        card_number: "0001234567890".into(),
        patient_name: Some("Ratna Dewi".into()),
        document_number: None,
        actor: "tester (admission)".into(),
        error_message: match outcome {
            AuditOutcome::Success => None,
            AuditOutcome::Failed => Some("card not found".into()),
        },
        latency_ms,
    }
}
