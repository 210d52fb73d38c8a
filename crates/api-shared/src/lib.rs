//! # API Shared
//!
//! Shared utilities and definitions for the eligibility engine APIs.
//!
//! Contains:
//! - Shared services like `HealthService`
//! - Authentication utilities usable by any API surface

pub mod auth;
pub mod health;

pub use auth::{validate_api_key, AuthError};
pub use health::{HealthRes, HealthService};
