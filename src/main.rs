//! Main entry point for the eligibility document engine.
//!
//! Resolves configuration from the environment once at startup, wires the
//! core services to the HTTP gateway, and serves the REST API.
//!
//! # Environment Variables
//! - `ELIG_REST_ADDR`: REST listen address (default: "0.0.0.0:3000")
//! - `ELIG_GATEWAY_URL`: base URL of the eligibility authority gateway
//! - `ELIG_PROVIDER_CODE`: provider/facility code stamped on every request
//! - `ELIG_SEED_DEMO`: set to "1" to seed a small demo patient/encounter set
//! - `API_KEY`: key required on mutating REST routes

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use elig_core::{
    AuditLedger, CoreConfig, DocumentService, EncounterRecord, HttpGateway, InMemoryDirectory,
    PatientRecord, ServiceType,
};

/// A handful of records to exercise the API without a hospital information
/// system behind it.
fn demo_directory() -> InMemoryDirectory {
    InMemoryDirectory::new()
        .with_patient(PatientRecord {
            id: "p-1".into(),
            name: Some("Ratna Dewi".into()),
            insurance_card_number: Some("0001234567890".into()),
        })
        .with_patient(PatientRecord {
            id: "p-2".into(),
            name: Some("Budi Santoso".into()),
            insurance_card_number: Some("0009876543210".into()),
        })
        .with_encounter(EncounterRecord {
            id: "enc-1".into(),
            patient_id: "p-1".into(),
            service_type: Some(ServiceType::Outpatient),
            encounter_date: Some(chrono::Utc::now().date_naive()),
            diagnosis_code: Some("A09".into()),
            diagnosis_name: Some("Gastroenteritis".into()),
            polyclinic_code: Some("INT".into()),
            treatment_class: None,
            rest_days: None,
        })
        .with_encounter(EncounterRecord {
            id: "enc-2".into(),
            patient_id: "p-2".into(),
            service_type: Some(ServiceType::Inpatient),
            encounter_date: Some(chrono::Utc::now().date_naive()),
            diagnosis_code: Some("J18".into()),
            diagnosis_name: Some("Pneumonia".into()),
            polyclinic_code: None,
            treatment_class: Some("2".into()),
            rest_days: Some(5),
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("elig_run=info".parse()?)
                .add_directive("elig_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("ELIG_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let gateway_base_url =
        std::env::var("ELIG_GATEWAY_URL").unwrap_or_else(|_| "http://localhost:8089".into());
    let provider_code = std::env::var("ELIG_PROVIDER_CODE").unwrap_or_else(|_| "RS001".into());
    let seed_demo = std::env::var("ELIG_SEED_DEMO").map(|v| v == "1").unwrap_or(false);

    let cfg = Arc::new(CoreConfig::with_defaults(gateway_base_url, provider_code)?);
    let gateway = Arc::new(HttpGateway::new(&cfg)?);
    let directory = Arc::new(if seed_demo {
        demo_directory()
    } else {
        InMemoryDirectory::new()
    });

    let service = Arc::new(DocumentService::new(
        cfg.clone(),
        directory.clone(),
        directory,
        gateway,
        Arc::new(AuditLedger::new()),
    ));

    tracing::info!(
        gateway = cfg.gateway_base_url(),
        provider = cfg.provider_code(),
        seed_demo,
        "-- Starting eligibility engine REST API on {}",
        addr
    );

    let app = router(AppState { service });
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
