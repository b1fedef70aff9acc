//! Provider configuration.
//!
//! Region and credential context is supplied by the environment or by the
//! caller as JSON. Credentials are carried as an opaque value and handed to
//! the control-plane implementation untouched.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ReconcileError;
use crate::schema::Diagnostic;

/// Environment variable selecting a single region.
pub const REGION_ENV: &str = "AWS_REGION";

/// Environment variable overriding the post-create retry attempt count.
pub const MAX_ATTEMPTS_ENV: &str = "HEMMER_RECONCILE_MAX_ATTEMPTS";

/// Region that global kinds (IAM, Route53) are listed and created in.
pub const DEFAULT_GLOBAL_REGION: &str = "us-east-1";

/// Attempts made for the post-create tagging step.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay between post-create tagging attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Fixed-delay retry policy for eventually consistent post-create steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// A policy that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_global_region() -> String {
    DEFAULT_GLOBAL_REGION.to_string()
}

/// Configuration for a reconciler.
///
/// # Example
///
/// ```
/// use hemmer_reconcile::config::{ProviderConfig, RetryPolicy};
///
/// let config = ProviderConfig::from_value(serde_json::json!({
///     "region": "eu-west-1",
///     "retry": {"max_attempts": 3}
/// }))
/// .unwrap();
/// assert_eq!(config.region.as_deref(), Some("eu-west-1"));
/// assert_eq!(config.retry.max_attempts, 3);
/// assert_eq!(config.global_region, "us-east-1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Restrict listing to a single region and use it as the default
    /// region of desired resources. When unset, every region reported by
    /// the control plane is listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Region used for kinds that are not region-scoped.
    #[serde(default = "default_global_region")]
    pub global_region: String,
    /// Retry policy for post-create tagging.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Opaque credential context for the control plane.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub credentials: Value,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: None,
            global_region: default_global_region(),
            retry: RetryPolicy::default(),
            credentials: Value::Null,
        }
    }
}

impl ProviderConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    pub fn from_value(value: Value) -> Result<Self, ReconcileError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| ReconcileError::Configuration(e.to_string()))
    }

    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(region) = lookup(REGION_ENV).filter(|r| !r.is_empty()) {
            self.region = Some(region);
        }
        if let Some(raw) = lookup(MAX_ATTEMPTS_ENV) {
            match raw.parse::<u32>() {
                Ok(attempts) => self.retry.max_attempts = attempts,
                Err(_) => warn!(
                    variable = MAX_ATTEMPTS_ENV,
                    value = %raw,
                    "Ignoring non-numeric retry attempt override"
                ),
            }
        }
        self
    }

    /// Set the single region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the region used for global kinds.
    pub fn with_global_region(mut self, region: impl Into<String>) -> Self {
        self.global_region = region.into();
        self
    }

    /// Set the post-create retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the opaque credential context.
    pub fn with_credentials(mut self, credentials: Value) -> Self {
        self.credentials = credentials;
        self
    }

    /// Check the configuration. Returns diagnostics (errors and warnings).
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if self.region.as_deref().is_some_and(str::is_empty) {
            diagnostics.push(
                Diagnostic::error("Region must not be empty")
                    .with_detail(format!("Unset it or set {} to a region name", REGION_ENV))
                    .with_attribute("region"),
            );
        }
        if self.global_region.is_empty() {
            diagnostics.push(
                Diagnostic::error("Global region must not be empty").with_attribute("global_region"),
            );
        }
        if self.retry.max_attempts == 0 {
            diagnostics.push(
                Diagnostic::error("Retry policy must allow at least one attempt")
                    .with_attribute("retry.max_attempts"),
            );
        }
        if self.retry.delay() > Duration::from_secs(60) {
            diagnostics.push(
                Diagnostic::warning("Retry delay is longer than a minute")
                    .with_detail("A pass waits for every retry of every tagged resource")
                    .with_attribute("retry.delay_ms"),
            );
        }

        diagnostics
    }

    /// Like [`validate`](Self::validate), but fails on the first error.
    pub fn validate_result(&self) -> Result<(), ReconcileError> {
        match self.validate().into_iter().find(Diagnostic::is_error) {
            Some(diagnostic) => Err(ReconcileError::Configuration(diagnostic.summary)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::default();
        assert!(config.region.is_none());
        assert_eq!(config.global_region, "us-east-1");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay(), Duration::from_secs(1));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_from_value() {
        let config = ProviderConfig::from_value(json!({
            "region": "us-west-2",
            "credentials": {"profile": "ops"},
            "retry": {"delay_ms": 250}
        }))
        .unwrap();
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.credentials["profile"], "ops");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay(), Duration::from_millis(250));

        assert_eq!(
            ProviderConfig::from_value(Value::Null).unwrap(),
            ProviderConfig::default()
        );
    }

    #[test]
    fn test_from_value_rejects_bad_types() {
        let err = ProviderConfig::from_value(json!({"region": 42})).unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            HashMap::from([(REGION_ENV, "ap-south-1"), (MAX_ATTEMPTS_ENV, "7")]);
        let config = ProviderConfig::default()
            .with_env_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.region.as_deref(), Some("ap-south-1"));
        assert_eq!(config.retry.max_attempts, 7);

        let config = ProviderConfig::default().with_env_overrides(|key| match key {
            MAX_ATTEMPTS_ENV => Some("lots".to_string()),
            REGION_ENV => Some(String::new()),
            _ => None,
        });
        assert!(config.region.is_none());
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_validate() {
        let config = ProviderConfig::default()
            .with_region("")
            .with_retry(RetryPolicy::immediate(0));
        let diagnostics = config.validate();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(Diagnostic::is_error));
        assert!(config.validate_result().is_err());

        let config = ProviderConfig::default()
            .with_retry(RetryPolicy::new(3, Duration::from_secs(120)));
        let diagnostics = config.validate();
        assert_eq!(diagnostics.len(), 1);
        assert!(!diagnostics[0].is_error());
        assert!(config.validate_result().is_ok());
    }
}
