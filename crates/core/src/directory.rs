//! Collaborator lookups consumed by the draft resolver.
//!
//! Patient registration and encounter management live outside this engine;
//! these traits define the read-only slice of them the resolver needs. A
//! record field the collaborator cannot supply comes back as `None` and the
//! resolver reports it as missing rather than failing.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::document::ServiceType;
use crate::{EligError, EligResult};

/// Identity facts for one registered patient.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: String,
    pub name: Option<String>,
    pub insurance_card_number: Option<String>,
}

/// Clinical facts recorded against one encounter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncounterRecord {
    pub id: String,
    pub patient_id: String,
    pub service_type: Option<ServiceType>,
    pub encounter_date: Option<NaiveDate>,
    pub diagnosis_code: Option<String>,
    pub diagnosis_name: Option<String>,
    pub polyclinic_code: Option<String>,
    pub treatment_class: Option<String>,
    pub rest_days: Option<u32>,
}

/// Read-only patient lookup.
pub trait PatientDirectory: Send + Sync {
    /// # Errors
    ///
    /// Returns `EligError::PatientNotFound` for an unknown id.
    fn get_patient(&self, id: &str) -> EligResult<PatientRecord>;
}

/// Read-only encounter lookup.
pub trait EncounterDirectory: Send + Sync {
    /// # Errors
    ///
    /// Returns `EligError::EncounterNotFound` for an unknown id.
    fn get_encounter(&self, id: &str) -> EligResult<EncounterRecord>;
}

/// Map-backed directory for tests and the demo runner.
#[derive(Default)]
pub struct InMemoryDirectory {
    patients: HashMap<String, PatientRecord>,
    encounters: HashMap<String, EncounterRecord>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patient(mut self, patient: PatientRecord) -> Self {
        self.patients.insert(patient.id.clone(), patient);
        self
    }

    pub fn with_encounter(mut self, encounter: EncounterRecord) -> Self {
        self.encounters.insert(encounter.id.clone(), encounter);
        self
    }
}

impl PatientDirectory for InMemoryDirectory {
    fn get_patient(&self, id: &str) -> EligResult<PatientRecord> {
        self.patients
            .get(id)
            .cloned()
            .ok_or_else(|| EligError::PatientNotFound(id.to_string()))
    }
}

impl EncounterDirectory for InMemoryDirectory {
    fn get_encounter(&self, id: &str) -> EligResult<EncounterRecord> {
        self.encounters
            .get(id)
            .cloned()
            .ok_or_else(|| EligError::EncounterNotFound(id.to_string()))
    }
}
