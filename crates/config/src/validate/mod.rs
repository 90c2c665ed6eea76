//! Configuration validation
//!
//! - semantic checks on the configuration itself ([`validate_config`])
//! - host checks against the local filesystem ([`host`])
//! - best-practice linting ([`lint`])

pub mod host;
pub mod lint;

use std::fmt;

use crate::Config;

/// Validation error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid path in the execution environment
    Path,
    /// Issuer invocation settings
    Issuer,
    /// Retry or worker settings
    Retry,
    /// Credential source
    Credential,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Path => write!(f, "Path"),
            ErrorCategory::Issuer => write!(f, "Issuer"),
            ErrorCategory::Retry => write!(f, "Retry"),
            ErrorCategory::Credential => write!(f, "Credential"),
        }
    }
}

/// Validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Validation warning
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Validation result containing errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Create a new empty validation result
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Add a warning
    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Check if validation passed (no errors)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Check if there are any warnings
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Semantic validation that does not touch the filesystem.
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let issuer = &config.issuer;
    if issuer.binary.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Issuer,
            "Issuer binary must not be empty",
        ));
    }
    if issuer.dns_plugin.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Issuer,
            "DNS plugin must not be empty",
        ));
    } else if issuer.dns_plugin.starts_with('-') || issuer.dns_plugin.contains(char::is_whitespace)
    {
        result.add_error(ValidationError::new(
            ErrorCategory::Issuer,
            format!(
                "DNS plugin '{}' must be a bare plugin name such as 'dns-google'",
                issuer.dns_plugin
            ),
        ));
    }
    if issuer.command_timeout_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Issuer,
            "command-timeout-secs must be greater than zero",
        ));
    }
    if let Some(ref email) = issuer.email {
        if !email.contains('@') {
            result.add_error(ValidationError::new(
                ErrorCategory::Issuer,
                format!("Contact email '{}' is not an email address", email),
            ));
        }
    }
    if let Some(ref server) = issuer.server {
        if !server.starts_with("https://") {
            result.add_error(ValidationError::new(
                ErrorCategory::Issuer,
                format!("ACME directory '{}' must be an https:// URL", server),
            ));
        }
    }

    let paths = &config.paths;
    for (name, path) in [
        ("csr", &paths.csr),
        ("credential", &paths.credential),
        ("output-root", &paths.output_root),
        ("environment-root", &paths.environment_root),
    ] {
        if !path.is_absolute() {
            result.add_error(ValidationError::new(
                ErrorCategory::Path,
                format!("Path '{}' must be absolute: {:?}", name, path),
            ));
        }
    }
    if paths.csr == paths.credential {
        result.add_error(ValidationError::new(
            ErrorCategory::Path,
            format!(
                "CSR staging path and credential path must differ (both {:?})",
                paths.csr
            ),
        ));
    }
    if paths.csr.starts_with(&paths.output_root) {
        result.add_error(ValidationError::new(
            ErrorCategory::Path,
            format!(
                "CSR staging path {:?} must not be inside the issuer output root {:?}",
                paths.csr, paths.output_root
            ),
        ));
    }

    let retry = &config.retry;
    if retry.base_delay.is_zero() {
        result.add_error(ValidationError::new(
            ErrorCategory::Retry,
            "base-delay-secs must be greater than zero",
        ));
    }
    if retry.base_delay > retry.max_delay {
        result.add_error(ValidationError::new(
            ErrorCategory::Retry,
            format!(
                "base-delay-secs ({}) must not exceed max-delay-secs ({})",
                retry.base_delay.as_secs(),
                retry.max_delay.as_secs()
            ),
        ));
    }
    if !(0.0..1.0).contains(&retry.jitter) {
        result.add_error(ValidationError::new(
            ErrorCategory::Retry,
            format!("jitter must be in [0, 1), got {}", retry.jitter),
        ));
    }
    if config.workers.max_concurrent == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Retry,
            "workers max-concurrent must be at least 1",
        ));
    }

    if let Some(crate::CredentialSource::Json(ref json)) = config.credential {
        if json.trim().is_empty() {
            result.add_error(ValidationError::new(
                ErrorCategory::Credential,
                "Inline credential JSON is empty",
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let result = validate_config(&Config::default());
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_relative_paths_rejected() {
        let mut config = Config::default();
        config.paths.csr = PathBuf::from("tmp/csr");
        let result = validate_config(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.category == ErrorCategory::Path && e.message.contains("csr")));
    }

    #[test]
    fn test_shared_staging_path_rejected() {
        let mut config = Config::default();
        config.paths.credential = config.paths.csr.clone();
        assert!(!validate_config(&config).is_valid());
    }

    #[test]
    fn test_plugin_flag_injection_rejected() {
        let mut config = Config::default();
        config.issuer.dns_plugin = "-dns-google --staging".to_string();
        assert!(!validate_config(&config).is_valid());
    }

    #[test]
    fn test_retry_bounds() {
        let mut config = Config::default();
        config.retry.base_delay = Duration::from_secs(600);
        config.retry.max_delay = Duration::from_secs(60);
        config.retry.jitter = 1.5;
        config.workers.max_concurrent = 0;
        let result = validate_config(&config);
        assert_eq!(
            result
                .errors
                .iter()
                .filter(|e| e.category == ErrorCategory::Retry)
                .count(),
            3
        );
    }

    #[test]
    fn test_validate_reports_all_messages() {
        let mut config = Config::default();
        config.issuer.binary = String::new();
        config.issuer.server = Some("http://insecure.example".to_string());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Issuer binary must not be empty"));
        assert!(err.contains("https://"));
    }
}
