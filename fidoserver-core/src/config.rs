//! Relying party configuration for the verification core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Site specific verification policy. Every field has a conservative default, so an
/// embedder only sets what it needs.
///
/// ```
/// use fidoserver_core::CoreConfig;
///
/// let config = CoreConfig::default()
///     .rp_id("example.com")
///     .require_trusted_attestation(true);
/// assert_eq!(config.app_id_or_rp_id(), Some("example.com"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// When set, the rpIdHash of authenticator data must equal SHA-256 of this value.
    pub rp_id: Option<String>,
    /// The U2F appId hashed into the authentication to-be-signed object. Falls back to
    /// `rp_id`.
    pub app_id: Option<String>,
    /// Require the user present flag during registration.
    pub require_user_presence: bool,
    /// Require every attestation that carries a certificate chain to validate to a
    /// configured trust anchor.
    pub require_trusted_attestation: bool,
    /// How old an android-safetynet token may be, in milliseconds.
    pub safetynet_max_age_ms: u64,
    /// How far into the future an android-safetynet token may claim to be, in
    /// milliseconds.
    pub safetynet_max_future_skew_ms: u64,
    /// Consult the revocation checker while validating certificate chains.
    pub check_revocation: bool,
    /// The bound for the revocation checks of one chain, in milliseconds.
    pub revocation_timeout_ms: u64,
    /// Ignore certificate validity windows. Only for testing with expired vectors.
    pub danger_disable_certificate_time_checks: bool,
    /// Lifetime of a pending session, in milliseconds.
    pub session_ttl_ms: u64,
    /// Domain identifier passed to the storage collaborators.
    pub domain_id: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            rp_id: None,
            app_id: None,
            require_user_presence: true,
            require_trusted_attestation: false,
            safetynet_max_age_ms: 60_000,
            safetynet_max_future_skew_ms: 30_000,
            check_revocation: false,
            revocation_timeout_ms: 5_000,
            danger_disable_certificate_time_checks: false,
            session_ttl_ms: 300_000,
            domain_id: 1,
        }
    }
}

impl CoreConfig {
    /// Set the relying party id.
    pub fn rp_id(mut self, rp_id: &str) -> Self {
        self.rp_id = Some(rp_id.to_string());
        self
    }

    /// Set the U2F appId.
    pub fn app_id(mut self, app_id: &str) -> Self {
        self.app_id = Some(app_id.to_string());
        self
    }

    /// Require or relax the user present flag during registration.
    pub fn require_user_presence(mut self, require: bool) -> Self {
        self.require_user_presence = require;
        self
    }

    /// Require attestation chains to validate to a configured anchor.
    pub fn require_trusted_attestation(mut self, require: bool) -> Self {
        self.require_trusted_attestation = require;
        self
    }

    /// Set the android-safetynet freshness window.
    pub fn safetynet_window(mut self, max_age: Duration, max_future_skew: Duration) -> Self {
        self.safetynet_max_age_ms = max_age.as_millis() as u64;
        self.safetynet_max_future_skew_ms = max_future_skew.as_millis() as u64;
        self
    }

    /// Enable revocation checks with the given bound.
    pub fn check_revocation(mut self, timeout: Duration) -> Self {
        self.check_revocation = true;
        self.revocation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Ignore certificate validity windows.
    pub fn danger_disable_certificate_time_checks(mut self, disable: bool) -> Self {
        self.danger_disable_certificate_time_checks = disable;
        self
    }

    /// Set the pending session lifetime.
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Set the domain identifier passed to storage collaborators.
    pub fn domain_id(mut self, did: u64) -> Self {
        self.domain_id = did;
        self
    }

    /// The identifier hashed into the authentication to-be-signed object.
    pub fn app_id_or_rp_id(&self) -> Option<&str> {
        self.app_id.as_deref().or(self.rp_id.as_deref())
    }

    pub(crate) fn safetynet_max_age(&self) -> Duration {
        Duration::from_millis(self.safetynet_max_age_ms)
    }

    pub(crate) fn safetynet_max_future_skew(&self) -> Duration {
        Duration::from_millis(self.safetynet_max_future_skew_ms)
    }

    pub(crate) fn revocation_timeout(&self) -> Duration {
        Duration::from_millis(self.revocation_timeout_ms)
    }

    pub(crate) fn session_ttl_duration(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }
}
