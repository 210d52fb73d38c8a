//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into
//! core services as an `Arc<CoreConfig>`. The intent is to avoid reading
//! process-wide environment variables during request handling, which can lead
//! to inconsistent behaviour in multi-threaded runtimes and test harnesses.

use std::time::Duration;

use crate::{EligError, EligResult};

/// Default ceiling for a single gateway round trip.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(8);

/// Default number of attempts for one logical gateway call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default pause between retry attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Default rest-period length (days) above which validation warns.
pub const DEFAULT_MAX_REST_DAYS: u32 = 14;

/// Upper bound on the free-text notes field.
pub const DEFAULT_MAX_NOTES_LEN: usize = 500;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    gateway_base_url: String,
    provider_code: String,
    gateway_timeout: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
    max_rest_days: u32,
    max_notes_len: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `EligError::InvalidInput` if the gateway base URL or provider
    /// code is empty, or if `max_attempts` is zero (a logical call must make
    /// at least one attempt).
    pub fn new(
        gateway_base_url: String,
        provider_code: String,
        gateway_timeout: Duration,
        max_attempts: u32,
        retry_backoff: Duration,
        max_rest_days: u32,
        max_notes_len: usize,
    ) -> EligResult<Self> {
        if gateway_base_url.trim().is_empty() {
            return Err(EligError::InvalidInput(
                "gateway_base_url cannot be empty".into(),
            ));
        }
        if provider_code.trim().is_empty() {
            return Err(EligError::InvalidInput(
                "provider_code cannot be empty".into(),
            ));
        }
        if max_attempts == 0 {
            return Err(EligError::InvalidInput(
                "max_attempts must be at least 1".into(),
            ));
        }

        Ok(Self {
            gateway_base_url,
            provider_code,
            gateway_timeout,
            max_attempts,
            retry_backoff,
            max_rest_days,
            max_notes_len,
        })
    }

    /// Configuration with the default operational ceilings for a given
    /// authority endpoint and provider.
    pub fn with_defaults(gateway_base_url: String, provider_code: String) -> EligResult<Self> {
        Self::new(
            gateway_base_url,
            provider_code,
            DEFAULT_GATEWAY_TIMEOUT,
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_RETRY_BACKOFF,
            DEFAULT_MAX_REST_DAYS,
            DEFAULT_MAX_NOTES_LEN,
        )
    }

    pub fn gateway_base_url(&self) -> &str {
        &self.gateway_base_url
    }

    pub fn provider_code(&self) -> &str {
        &self.provider_code
    }

    pub fn gateway_timeout(&self) -> Duration {
        self.gateway_timeout
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    pub fn max_rest_days(&self) -> u32 {
        self.max_rest_days
    }

    pub fn max_notes_len(&self) -> usize {
        self.max_notes_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_url_is_rejected() {
        let err = CoreConfig::with_defaults("  ".into(), "RS001".into());
        assert!(matches!(err, Err(EligError::InvalidInput(_))));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = CoreConfig::new(
            "http://gateway.test".into(),
            "RS001".into(),
            DEFAULT_GATEWAY_TIMEOUT,
            0,
            DEFAULT_RETRY_BACKOFF,
            DEFAULT_MAX_REST_DAYS,
            DEFAULT_MAX_NOTES_LEN,
        );
        assert!(matches!(err, Err(EligError::InvalidInput(_))));
    }

    #[test]
    fn defaults_populate_operational_ceilings() {
        let cfg = CoreConfig::with_defaults("http://gateway.test".into(), "RS001".into()).unwrap();
        assert_eq!(cfg.gateway_timeout(), DEFAULT_GATEWAY_TIMEOUT);
        assert_eq!(cfg.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(cfg.max_rest_days(), DEFAULT_MAX_REST_DAYS);
    }
}
