//! Draft resolution from encounter and patient records.
//!
//! The resolver only collects facts: anything it cannot resolve is left
//! blank on the draft and named in `missing_fields`. Business-rule checking
//! belongs to the validation engine, so resolution and validation stay
//! independently testable.

use std::sync::Arc;

use crate::directory::{EncounterDirectory, PatientDirectory};
use crate::document::EligibilityDocument;
use crate::EligResult;

/// A populated draft plus the names of any fields that could not be
/// resolved from the collaborator records.
#[derive(Clone, Debug)]
pub struct ResolvedDraft {
    pub draft: EligibilityDocument,
    pub missing_fields: Vec<String>,
}

/// Pulls patient and encounter facts into a draft document.
#[derive(Clone)]
pub struct DraftResolver {
    patients: Arc<dyn PatientDirectory>,
    encounters: Arc<dyn EncounterDirectory>,
}

impl DraftResolver {
    pub fn new(patients: Arc<dyn PatientDirectory>, encounters: Arc<dyn EncounterDirectory>) -> Self {
        Self {
            patients,
            encounters,
        }
    }

    /// Resolve a draft for the given encounter.
    ///
    /// # Errors
    ///
    /// Returns `EligError::EncounterNotFound` or `EligError::PatientNotFound`
    /// when the collaborator has no record at all; individual absent fields
    /// are reported through `missing_fields` instead.
    pub fn resolve(&self, encounter_id: &str) -> EligResult<ResolvedDraft> {
        let encounter = self.encounters.get_encounter(encounter_id)?;
        let patient = self.patients.get_patient(&encounter.patient_id)?;

        let mut draft = EligibilityDocument::draft(patient.id.clone(), encounter.id.clone());
        let mut missing = Vec::new();

        match patient.name {
            Some(name) => draft.patient_name = Some(name),
            None => missing.push("patient_name".to_string()),
        }
        match patient.insurance_card_number {
            Some(card) => draft.insurance_card_number = Some(card),
            None => missing.push("insurance_card_number".to_string()),
        }
        match encounter.service_type {
            Some(st) => draft.service_type = Some(st),
            None => missing.push("service_type".to_string()),
        }
        match encounter.encounter_date {
            Some(date) => draft.issue_date = Some(date),
            None => missing.push("issue_date".to_string()),
        }
        match encounter.diagnosis_code {
            Some(code) => draft.diagnosis_code = Some(code),
            None => missing.push("diagnosis_code".to_string()),
        }
        match encounter.diagnosis_name {
            Some(name) => draft.diagnosis_name = Some(name),
            None => missing.push("diagnosis_name".to_string()),
        }
        match encounter.polyclinic_code {
            Some(code) => draft.polyclinic_code = Some(code),
            None => missing.push("polyclinic_code".to_string()),
        }
        match encounter.treatment_class {
            Some(class) => draft.treatment_class = Some(class),
            None => missing.push("treatment_class".to_string()),
        }
        draft.rest_days = encounter.rest_days;

        Ok(ResolvedDraft {
            draft,
            missing_fields: missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{EncounterRecord, InMemoryDirectory, PatientRecord};
    use crate::document::ServiceType;
    use crate::EligError;
    use chrono::NaiveDate;

    fn directory() -> Arc<InMemoryDirectory> {
        Arc::new(
            InMemoryDirectory::new()
                .with_patient(PatientRecord {
                    id: "p-1".into(),
                    name: Some("Ratna Dewi".into()),
                    insurance_card_number: Some("0001234567890".into()),
                })
                .with_patient(PatientRecord {
                    id: "p-2".into(),
                    name: Some("Budi Santoso".into()),
                    insurance_card_number: None,
                })
                .with_encounter(EncounterRecord {
                    id: "enc-1".into(),
                    patient_id: "p-1".into(),
                    service_type: Some(ServiceType::Outpatient),
                    encounter_date: NaiveDate::from_ymd_opt(2025, 5, 12),
                    diagnosis_code: Some("A09".into()),
                    diagnosis_name: Some("Gastroenteritis".into()),
                    polyclinic_code: Some("INT".into()),
                    treatment_class: None,
                    rest_days: None,
                })
                .with_encounter(EncounterRecord {
                    id: "enc-2".into(),
                    patient_id: "p-2".into(),
                    service_type: None,
                    encounter_date: None,
                    diagnosis_code: None,
                    diagnosis_name: None,
                    polyclinic_code: None,
                    treatment_class: None,
                    rest_days: Some(3),
                }),
        )
    }

    #[test]
    fn fully_recorded_encounter_resolves_without_missing_fields() {
        let dir = directory();
        let resolver = DraftResolver::new(dir.clone(), dir);
        let resolved = resolver.resolve("enc-1").unwrap();

        assert_eq!(resolved.draft.patient_ref, "p-1");
        assert_eq!(resolved.draft.insurance_card_number.as_deref(), Some("0001234567890"));
        assert_eq!(resolved.draft.service_type, Some(ServiceType::Outpatient));
        assert_eq!(resolved.draft.diagnosis_code.as_deref(), Some("A09"));
        // treatment_class is genuinely absent for this outpatient encounter.
        assert_eq!(resolved.missing_fields, vec!["treatment_class".to_string()]);
    }

    #[test]
    fn unresolvable_fields_are_blank_and_named() {
        let dir = directory();
        let resolver = DraftResolver::new(dir.clone(), dir);
        let resolved = resolver.resolve("enc-2").unwrap();

        assert!(resolved.draft.insurance_card_number.is_none());
        assert!(resolved.draft.service_type.is_none());
        assert!(resolved
            .missing_fields
            .contains(&"insurance_card_number".to_string()));
        assert!(resolved.missing_fields.contains(&"service_type".to_string()));
        assert_eq!(resolved.draft.rest_days, Some(3));
    }

    #[test]
    fn unknown_encounter_is_an_error() {
        let dir = directory();
        let resolver = DraftResolver::new(dir.clone(), dir);
        let err = resolver.resolve("enc-404");
        assert!(matches!(err, Err(EligError::EncounterNotFound(_))));
    }
}
