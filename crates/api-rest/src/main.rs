//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own, wired to the HTTP gateway and an
//! in-memory directory. Useful for development and debugging; the
//! workspace's main `elig-run` binary is the intended entry point.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use elig_core::{
    AuditLedger, CoreConfig, DocumentService, HttpGateway, InMemoryDirectory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("ELIG_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let gateway_base_url =
        std::env::var("ELIG_GATEWAY_URL").unwrap_or_else(|_| "http://localhost:8089".into());
    let provider_code = std::env::var("ELIG_PROVIDER_CODE").unwrap_or_else(|_| "RS001".into());

    tracing::info!("-- Starting eligibility REST API on {}", addr);

    let cfg = Arc::new(CoreConfig::with_defaults(gateway_base_url, provider_code)?);
    let gateway = Arc::new(HttpGateway::new(&cfg)?);
    let directory = Arc::new(InMemoryDirectory::new());
    let service = Arc::new(DocumentService::new(
        cfg,
        directory.clone(),
        directory,
        gateway,
        Arc::new(AuditLedger::new()),
    ));

    let app = router(AppState { service });
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
