//! Reconciler configuration.
//!
//! Loaded from TOML by the CLI; library users may build it directly.
//!
//! # Example (TOML)
//!
//! ```toml
//! [management]
//! base_url = "https://tenant.example.com/api/v2"
//! request_timeout = "30s"
//!
//! [reconcile]
//! prune_detached_credentials = false
//! deadline = "2m"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::CredResult;
use crate::context::ReconcileOptions;
use crate::error::CredentialsError;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientAuthConfig {
    /// Management API connection settings.
    pub management: ManagementConfig,

    /// Reconciliation behavior.
    pub reconcile: ReconcileSettings,
}

impl ClientAuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error naming the offending key.
    pub fn validate(&self) -> CredResult<()> {
        self.management.validate()?;
        if self.reconcile.deadline.is_some_and(|d| d.is_zero()) {
            return Err(CredentialsError::configuration(
                "reconcile.deadline must be > 0",
            ));
        }
        Ok(())
    }
}

/// Management API connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Base URL of the management API, e.g. `https://tenant/api/v2`.
    pub base_url: String,

    /// Bearer token. Usually supplied through the environment rather than
    /// the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Timeout for a single request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            request_timeout: Duration::from_secs(30),
            user_agent: format!("clientauth/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ManagementConfig {
    /// Validates the connection settings.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error naming the offending key.
    pub fn validate(&self) -> CredResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(CredentialsError::configuration(
                "management.base_url must not be empty",
            ));
        }
        let url = url::Url::parse(&self.base_url).map_err(|e| {
            CredentialsError::configuration(format!("management.base_url is invalid: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CredentialsError::configuration(
                "management.base_url must use http or https",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(CredentialsError::configuration(
                "management.request_timeout must be > 0",
            ));
        }
        Ok(())
    }
}

/// Reconciliation behavior.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Delete credentials that a method switch detached.
    pub prune_detached_credentials: bool,

    /// Upper bound for one reconciliation pass.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,
}

impl ReconcileSettings {
    /// Returns the options passed to the reconciler.
    #[must_use]
    pub fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            prune_detached_credentials: self.prune_detached_credentials,
        }
    }
}
