//! Common type definitions shared by the configuration and relay crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Issuer Mode
// ============================================================================

/// Which certificate authority endpoint the issuer talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssuerMode {
    /// Staging endpoint; certificates are not publicly trusted.
    #[default]
    Test,
    /// Production endpoint.
    Production,
}

impl IssuerMode {
    /// Parse a mode name, accepting a few common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "test" | "staging" => Some(Self::Test),
            "production" | "prod" | "live" => Some(Self::Production),
            _ => None,
        }
    }

    /// Directory under the issuer's output root holding certificates
    /// issued in this mode.
    pub fn output_dir_name(self) -> &'static str {
        match self {
            Self::Test => "staging",
            Self::Production => "live",
        }
    }
}

impl fmt::Display for IssuerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Production => write!(f, "production"),
        }
    }
}

// ============================================================================
// Error Kinds
// ============================================================================

/// Failure taxonomy reported to requesters and used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The execution environment could not be reached.
    EnvironmentUnavailable,
    /// No DNS-provider credential is present.
    CredentialMissing,
    /// The CSR could not be parsed.
    InvalidRequest,
    /// The issuer ran and failed.
    IssuanceFailure,
}

impl ErrorKind {
    /// Whether a failure of this kind may be retried.
    ///
    /// `IssuanceFailure` is retryable until the retry cap is reached; the
    /// cap is enforced by the caller, not here.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidRequest)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnvironmentUnavailable => "environment_unavailable",
            Self::CredentialMissing => "credential_missing",
            Self::InvalidRequest => "invalid_request",
            Self::IssuanceFailure => "issuance_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Unit Status
// ============================================================================

/// Unit-level status reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum UnitStatus {
    /// Ready to issue certificates.
    Active,
    /// Temporarily unable to proceed; expected to resolve on its own.
    Waiting(String),
    /// Needs operator intervention (e.g. a missing credential).
    Blocked(String),
}

impl UnitStatus {
    pub fn waiting(reason: impl Into<String>) -> Self {
        Self::Waiting(reason.into())
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked(reason.into())
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Waiting(reason) => write!(f, "waiting: {}", reason),
            Self::Blocked(reason) => write!(f, "blocked: {}", reason),
        }
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output for development
    #[default]
    Pretty,
    /// One JSON object per line for log shippers
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Capped exponential backoff with jitter.
///
/// The delay before retry `n` (1-based) is `base * 2^(n-1)`, capped at
/// `max_delay`, then scaled by a random factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of re-queues allowed before a request fails permanently
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay", with = "duration_secs")]
    pub base_delay: Duration,

    /// Upper bound on any single delay (before jitter)
    #[serde(default = "default_max_delay", with = "duration_secs")]
    pub max_delay: Duration,

    /// Jitter fraction in `[0, 1)`
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    5
}
fn default_base_delay() -> Duration {
    Duration::from_secs(30)
}
fn default_max_delay() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry `attempt` (1-based).
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Apply jitter to a nominal delay given a sample in `[0, 1)`.
    ///
    /// Taking the sample as an argument keeps this deterministic; callers
    /// draw it from their RNG.
    pub fn jittered(&self, nominal: Duration, sample: f64) -> Duration {
        let jitter = self.jitter.clamp(0.0, 0.999);
        let scale = 1.0 - jitter + 2.0 * jitter * sample.clamp(0.0, 1.0);
        nominal.mul_f64(scale)
    }

    /// Whether another re-queue is allowed after `retries` re-queues.
    pub fn allows_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_issuer_mode_parse() {
        assert_eq!(IssuerMode::parse("test"), Some(IssuerMode::Test));
        assert_eq!(IssuerMode::parse("Staging"), Some(IssuerMode::Test));
        assert_eq!(IssuerMode::parse("production"), Some(IssuerMode::Production));
        assert_eq!(IssuerMode::parse("nope"), None);
        assert_eq!(IssuerMode::Test.output_dir_name(), "staging");
        assert_eq!(IssuerMode::Production.output_dir_name(), "live");
    }

    #[test]
    fn test_error_kind_retryability() {
        assert!(ErrorKind::EnvironmentUnavailable.is_retryable());
        assert!(ErrorKind::CredentialMissing.is_retryable());
        assert!(ErrorKind::IssuanceFailure.is_retryable());
        assert!(!ErrorKind::InvalidRequest.is_retryable());
    }

    #[test]
    fn test_unit_status_serialization() {
        let json = serde_json::to_string(&UnitStatus::waiting("no environment")).unwrap();
        assert_eq!(json, r#"{"status":"waiting","reason":"no environment"}"#);
        let json = serde_json::to_string(&UnitStatus::Active).unwrap();
        assert_eq!(json, r#"{"status":"active"}"#);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("Pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_nominal_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(30));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(60));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(120));
        assert_eq!(policy.nominal_delay(7), Duration::from_secs(1800));
        assert_eq!(policy.nominal_delay(40), Duration::from_secs(1800));
    }

    #[test]
    fn test_allows_retry() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_bounds(attempt in 1u32..20, sample in 0.0f64..1.0) {
            let policy = RetryPolicy::default();
            let nominal = policy.nominal_delay(attempt);
            let delay = policy.jittered(nominal, sample);
            prop_assert!(delay >= nominal.mul_f64(0.8) - Duration::from_millis(1));
            prop_assert!(delay <= nominal.mul_f64(1.2) + Duration::from_millis(1));
        }
    }
}
