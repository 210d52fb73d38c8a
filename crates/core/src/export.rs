//! CSV export of a filtered, sorted ledger view.
//!
//! Export is a pure rendering of entries it is given: it never mutates the
//! ledger, emits one row per entry in the displayed order, and renders empty
//! optionals as empty strings (not "null").

use crate::ledger::AuditLogEntry;

/// Column order is part of the export contract.
pub const CSV_HEADER: &str =
    "timestamp,action,status,card_number,patient_name,document_number,error_message,latency_ms";

/// RFC 4180 quoting: only fields containing a comma, quote or line break
/// are quoted, with embedded quotes doubled.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn row(entry: &AuditLogEntry) -> String {
    let columns = [
        entry.timestamp.to_rfc3339(),
        entry.action.to_string(),
        entry.outcome.to_string(),
        entry.card_number.clone(),
        entry.patient_name.clone().unwrap_or_default(),
        entry.document_number.clone().unwrap_or_default(),
        entry.error_message.clone().unwrap_or_default(),
        entry.latency_ms.to_string(),
    ];
    columns
        .iter()
        .map(|c| escape(c))
        .collect::<Vec<_>>()
        .join(",")
}

/// Render entries as CSV, header row first.
pub fn export_csv(entries: &[AuditLogEntry]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for entry in entries {
        out.push_str(&row(entry));
        out.push('\n');
    }
    out
}
