//! Validation engine for draft eligibility documents.
//!
//! `validate` is a pure function over the draft and an explicit
//! [`ValidationPolicy`]: the policy carries "today" and the configurable
//! thresholds, so identical inputs always produce identical results.
//!
//! Rules come in two sets: universal rules applied to every draft, and a
//! closed per-[`ServiceType`] rule list. Errors block issuance; warnings
//! signal "requires additional approval" and never block.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::document::{EligibilityDocument, ServiceType};

/// Outcome of validating one draft. Never persisted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Thresholds and the reference date the rules are evaluated against.
#[derive(Clone, Copy, Debug)]
pub struct ValidationPolicy {
    pub today: NaiveDate,
    pub max_rest_days: u32,
    pub max_notes_len: usize,
}

impl ValidationPolicy {
    pub fn from_config(cfg: &CoreConfig, today: NaiveDate) -> Self {
        Self {
            today,
            max_rest_days: cfg.max_rest_days(),
            max_notes_len: cfg.max_notes_len(),
        }
    }
}

enum Finding {
    Error(String),
    Warning(String),
}

type Rule = fn(&EligibilityDocument, &ValidationPolicy) -> Option<Finding>;

const UNIVERSAL_RULES: &[Rule] = &[
    card_number_present_and_well_formed,
    service_type_present,
    diagnosis_code_present,
    issue_date_present_and_not_future,
    notes_within_bound,
    rest_period_within_policy,
];

const INPATIENT_RULES: &[Rule] = &[treatment_class_selected];
const OUTPATIENT_RULES: &[Rule] = &[polyclinic_code_selected];

fn rules_for(service_type: ServiceType) -> &'static [Rule] {
    match service_type {
        ServiceType::Inpatient => INPATIENT_RULES,
        ServiceType::Outpatient => OUTPATIENT_RULES,
    }
}

/// Validate a draft against the universal rules plus the rules of its
/// service type. Pure and deterministic; re-running on an unchanged draft
/// yields the same result.
pub fn validate(doc: &EligibilityDocument, policy: &ValidationPolicy) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let per_type = doc.service_type.map(rules_for).unwrap_or(&[]);
    for rule in UNIVERSAL_RULES.iter().chain(per_type) {
        match rule(doc, policy) {
            Some(Finding::Error(msg)) => errors.push(msg),
            Some(Finding::Warning(msg)) => warnings.push(msg),
            None => {}
        }
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Insurance card numbers are 13 ASCII digits. A stricter authority-specific
/// checksum can replace this single function without touching the engine.
fn card_number_well_formed(card: &str) -> bool {
    card.len() == 13 && card.bytes().all(|b| b.is_ascii_digit())
}

fn card_number_present_and_well_formed(
    doc: &EligibilityDocument,
    _policy: &ValidationPolicy,
) -> Option<Finding> {
    match doc.insurance_card_number.as_deref() {
        None | Some("") => Some(Finding::Error("card number required".into())),
        Some(card) if !card_number_well_formed(card) => {
            Some(Finding::Error("card number must be 13 digits".into()))
        }
        Some(_) => None,
    }
}

fn service_type_present(doc: &EligibilityDocument, _policy: &ValidationPolicy) -> Option<Finding> {
    if doc.service_type.is_none() {
        Some(Finding::Error("service type required".into()))
    } else {
        None
    }
}

fn diagnosis_code_present(doc: &EligibilityDocument, _policy: &ValidationPolicy) -> Option<Finding> {
    match doc.diagnosis_code.as_deref() {
        None | Some("") => Some(Finding::Error("diagnosis code required".into())),
        Some(_) => None,
    }
}

fn issue_date_present_and_not_future(
    doc: &EligibilityDocument,
    policy: &ValidationPolicy,
) -> Option<Finding> {
    match doc.issue_date {
        None => Some(Finding::Error("issue date required".into())),
        Some(date) if date > policy.today => {
            Some(Finding::Error("issue date cannot be in the future".into()))
        }
        Some(_) => None,
    }
}

fn notes_within_bound(doc: &EligibilityDocument, policy: &ValidationPolicy) -> Option<Finding> {
    match &doc.notes {
        Some(notes) if notes.chars().count() > policy.max_notes_len => Some(Finding::Error(
            format!("notes exceed the {} character limit", policy.max_notes_len),
        )),
        _ => None,
    }
}

/// Exceeding the rest-period ceiling needs supervisor approval but does not
/// block issuance, so it is a warning.
fn rest_period_within_policy(
    doc: &EligibilityDocument,
    policy: &ValidationPolicy,
) -> Option<Finding> {
    match doc.rest_days {
        Some(days) if days > policy.max_rest_days => Some(Finding::Warning(format!(
            "rest period of {days} days exceeds the {}-day policy limit and requires additional approval",
            policy.max_rest_days
        ))),
        _ => None,
    }
}

fn treatment_class_selected(
    doc: &EligibilityDocument,
    _policy: &ValidationPolicy,
) -> Option<Finding> {
    match doc.treatment_class.as_deref() {
        None | Some("") => Some(Finding::Error(
            "treatment class required for inpatient service".into(),
        )),
        Some(_) => None,
    }
}

fn polyclinic_code_selected(
    doc: &EligibilityDocument,
    _policy: &ValidationPolicy,
) -> Option<Finding> {
    match doc.polyclinic_code.as_deref() {
        None | Some("") => Some(Finding::Error(
            "polyclinic code required for outpatient service".into(),
        )),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentStatus;

    fn policy() -> ValidationPolicy {
        ValidationPolicy {
            today: NaiveDate::from_ymd_opt(2025, 5, 12).unwrap(),
            max_rest_days: 14,
            max_notes_len: 500,
        }
    }

    fn complete_outpatient_draft() -> EligibilityDocument {
        let mut doc = EligibilityDocument::draft("p-1", "enc-1");
        doc.insurance_card_number = Some("0001234567890".into());
        doc.service_type = Some(ServiceType::Outpatient);
        doc.issue_date = NaiveDate::from_ymd_opt(2025, 5, 12);
        doc.diagnosis_code = Some("A09".into());
        doc.diagnosis_name = Some("Gastroenteritis".into());
        doc.polyclinic_code = Some("INT".into());
        doc
    }

    #[test]
    fn complete_outpatient_draft_is_valid() {
        let result = validate(&complete_outpatient_draft(), &policy());
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn missing_card_number_is_the_specified_error() {
        let mut doc = complete_outpatient_draft();
        doc.insurance_card_number = None;
        let result = validate(&doc, &policy());
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["card number required".to_string()]);
    }

    #[test]
    fn malformed_card_number_is_rejected() {
        let mut doc = complete_outpatient_draft();
        doc.insurance_card_number = Some("12AB".into());
        let result = validate(&doc, &policy());
        assert!(result.errors.contains(&"card number must be 13 digits".to_string()));
    }

    #[test]
    fn future_issue_date_is_rejected() {
        let mut doc = complete_outpatient_draft();
        doc.issue_date = NaiveDate::from_ymd_opt(2025, 5, 13);
        let result = validate(&doc, &policy());
        assert!(result
            .errors
            .contains(&"issue date cannot be in the future".to_string()));
    }

    #[test]
    fn inpatient_without_treatment_class_is_blocked_outpatient_is_not() {
        let mut inpatient = complete_outpatient_draft();
        inpatient.service_type = Some(ServiceType::Inpatient);
        inpatient.treatment_class = None;
        let result = validate(&inpatient, &policy());
        assert!(result
            .errors
            .contains(&"treatment class required for inpatient service".to_string()));

        let mut outpatient = complete_outpatient_draft();
        outpatient.treatment_class = None;
        let result = validate(&outpatient, &policy());
        assert!(result.is_valid);
    }

    #[test]
    fn outpatient_without_polyclinic_code_is_blocked() {
        let mut doc = complete_outpatient_draft();
        doc.polyclinic_code = None;
        let result = validate(&doc, &policy());
        assert!(result
            .errors
            .contains(&"polyclinic code required for outpatient service".to_string()));
    }

    #[test]
    fn long_rest_period_warns_but_does_not_block() {
        let mut doc = complete_outpatient_draft();
        doc.rest_days = Some(30);
        let result = validate(&doc, &policy());
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("requires additional approval"));
    }

    #[test]
    fn oversized_notes_are_rejected() {
        let mut doc = complete_outpatient_draft();
        doc.notes = Some("x".repeat(501));
        let result = validate(&doc, &policy());
        assert!(!result.is_valid);
    }

    #[test]
    fn validation_is_idempotent_and_consistent() {
        let mut doc = complete_outpatient_draft();
        doc.insurance_card_number = None;
        doc.diagnosis_code = None;
        // Status has no bearing on validation.
        doc.status = DocumentStatus::Error;

        let first = validate(&doc, &policy());
        let second = validate(&doc, &policy());
        assert_eq!(first, second);
        assert_eq!(first.is_valid, first.errors.is_empty());
    }
}
