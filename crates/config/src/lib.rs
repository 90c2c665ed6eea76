//! Configuration module for certrelay
//!
//! This module provides configuration parsing, validation, and linting for
//! the certificate issuance relay. KDL is the primary format; JSON is
//! accepted as an alternative for generated configuration.
//!
//! # Example
//!
//! ```kdl
//! issuer {
//!     binary "certbot"
//!     mode "production"
//!     dns-plugin "dns-google"
//!     email "ops@example.com"
//! }
//!
//! paths {
//!     csr "/tmp/csr"
//!     credential "/root/google-creds.json"
//!     output-root "/etc/letsencrypt"
//! }
//!
//! credential {
//!     file "/etc/certrelay/google-creds.json"
//! }
//!
//! retry {
//!     max-retries 5
//!     base-delay-secs 30
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use certrelay_common::types::{IssuerMode, LogFormat, RetryPolicy};

mod defaults;
pub mod kdl;
pub mod validate;

pub use defaults::{create_default_config, DEFAULT_CONFIG_KDL};
pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

// ============================================================================
// Issuer Configuration
// ============================================================================

/// How to invoke the certificate-authority client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerConfig {
    /// Issuer binary name or absolute path
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Test (staging) or production endpoint
    #[serde(default)]
    pub mode: IssuerMode,

    /// DNS-01 plugin name, e.g. `dns-google`
    #[serde(default = "default_dns_plugin")]
    pub dns_plugin: String,

    /// Registration contact; omitted registrations are made without email
    #[serde(default)]
    pub email: Option<String>,

    /// ACME directory URL overriding the mode's default endpoint
    #[serde(default)]
    pub server: Option<String>,

    /// Seconds to wait for DNS propagation before validation
    #[serde(default)]
    pub propagation_seconds: Option<u32>,

    /// Upper bound on a single issuer run
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

pub(crate) fn default_binary() -> String {
    "certbot".to_string()
}

pub(crate) fn default_dns_plugin() -> String {
    "dns-google".to_string()
}

pub(crate) fn default_command_timeout_secs() -> u64 {
    600
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            mode: IssuerMode::default(),
            dns_plugin: default_dns_plugin(),
            email: None,
            server: None,
            propagation_seconds: None,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl IssuerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Fixed locations inside the execution environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Host directory the environment's filesystem is rooted at
    #[serde(default = "default_environment_root")]
    pub environment_root: PathBuf,

    /// Where the CSR is staged before each issuer run
    #[serde(default = "default_csr_path")]
    pub csr: PathBuf,

    /// Where the DNS-provider credential is installed
    #[serde(default = "default_credential_path")]
    pub credential: PathBuf,

    /// Issuer output root; certificates land in `<root>/<staging|live>/<domain>/`
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
}

pub(crate) fn default_environment_root() -> PathBuf {
    PathBuf::from("/")
}

pub(crate) fn default_csr_path() -> PathBuf {
    PathBuf::from("/tmp/csr")
}

pub(crate) fn default_credential_path() -> PathBuf {
    PathBuf::from("/root/google-creds.json")
}

pub(crate) fn default_output_root() -> PathBuf {
    PathBuf::from("/etc/letsencrypt")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            environment_root: default_environment_root(),
            csr: default_csr_path(),
            credential: default_credential_path(),
            output_root: default_output_root(),
        }
    }
}

// ============================================================================
// Credential Source
// ============================================================================

/// Where the DNS-provider credential comes from on the host side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Read from a file on the host
    File(PathBuf),
    /// Inline JSON document
    Json(String),
}

impl CredentialSource {
    /// Load the credential bytes.
    pub fn load(&self) -> Result<Vec<u8>> {
        match self {
            CredentialSource::File(path) => std::fs::read(path)
                .with_context(|| format!("Failed to read credential file: {:?}", path)),
            CredentialSource::Json(json) => Ok(json.as_bytes().to_vec()),
        }
    }
}

// ============================================================================
// Workers and Logging
// ============================================================================

/// Bounded pool running issuer processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of concurrent issuer runs
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

pub(crate) fn default_max_concurrent() -> usize {
    1
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

pub(crate) fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration structure for certrelay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub issuer: IssuerConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Credential to install on startup and reload
    #[serde(default)]
    pub credential: Option<CredentialSource>,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
    }

    /// Load the default embedded configuration.
    ///
    /// Falls back to the programmatic default if the embedded KDL fails to
    /// parse.
    pub fn default_embedded() -> Result<Self> {
        Self::from_kdl(DEFAULT_CONFIG_KDL).or_else(|e| {
            tracing::warn!(
                "Failed to parse embedded KDL config, using programmatic default: {}",
                e
            );
            Ok(create_default_config())
        })
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content.parse().map_err(|e: ::kdl::KdlError| {
            use miette::Diagnostic;

            let mut error_msg = String::new();
            error_msg.push_str("KDL configuration parse error:\n\n");

            let mut found_details = false;
            if let Some(related) = e.related() {
                for diagnostic in related {
                    error_msg.push_str(&format!("  {}\n", diagnostic));
                    found_details = true;

                    if let Some(labels) = diagnostic.labels() {
                        for label in labels {
                            let (line, col) = kdl::offset_to_line_col(content, label.offset());
                            error_msg
                                .push_str(&format!("\n  --> at line {}, column {}\n", line, col));

                            if let Some(line_content) = content.lines().nth(line.saturating_sub(1))
                            {
                                error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                                error_msg.push_str(&format!(
                                    "     | {}^",
                                    " ".repeat(col.saturating_sub(1))
                                ));
                                if let Some(label_msg) = label.label() {
                                    error_msg.push_str(&format!(" {}", label_msg));
                                }
                                error_msg.push('\n');
                            }
                        }
                    }

                    if let Some(help) = diagnostic.help() {
                        error_msg.push_str(&format!("\n  Help: {}\n", help));
                    }
                }
            }

            if !found_details {
                error_msg.push_str(&format!("  {}\n", e));
            }

            anyhow::anyhow!("{}", error_msg)
        })?;

        kdl::parse_kdl_document(doc)
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Check the configuration for errors that prevent startup.
    pub fn validate(&self) -> Result<()> {
        let result = validate::validate_config(self);
        if result.is_valid() {
            Ok(())
        } else {
            let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            Err(anyhow::anyhow!(
                "Configuration validation failed:\n  {}",
                messages.join("\n  ")
            ))
        }
    }

    /// Full check: semantic validation, host checks, and linting.
    pub fn check(&self) -> ValidationResult {
        let mut result = validate::validate_config(self);
        result.merge(validate::host::validate_host(self));
        result.merge(validate::lint::lint_config(self));
        result
    }

    /// Directory the issuer writes certificates for `domain` into.
    pub fn output_dir(&self, domain: &str) -> PathBuf {
        self.paths
            .output_root
            .join(self.issuer.mode.output_dir_name())
            .join(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_embedded_parses() {
        let config = Config::default_embedded().unwrap();
        assert_eq!(config, create_default_config());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_dir_follows_mode() {
        let mut config = Config::default();
        assert_eq!(
            config.output_dir("example.com"),
            PathBuf::from("/etc/letsencrypt/staging/example.com")
        );
        config.issuer.mode = IssuerMode::Production;
        assert_eq!(
            config.output_dir("example.com"),
            PathBuf::from("/etc/letsencrypt/live/example.com")
        );
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = Config::from_json(r#"{"issuer": {"mode": "production"}}"#).unwrap();
        assert_eq!(config.issuer.mode, IssuerMode::Production);
        assert_eq!(config.issuer.binary, "certbot");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.paths.csr, PathBuf::from("/tmp/csr"));
    }

    #[test]
    fn test_from_kdl_reports_location() {
        let err = Config::from_kdl("issuer {\n    binary \"certbot\n}\n").unwrap_err();
        assert!(err.to_string().contains("KDL configuration parse error"));
    }

    #[test]
    fn test_from_file_kdl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certrelay.kdl");
        std::fs::write(&path, "issuer {\n    mode \"production\"\n}\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.issuer.mode, IssuerMode::Production);
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certrelay.yaml");
        std::fs::write(&path, "issuer: {}").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_credential_source_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, b"{\"type\":\"service_account\"}").unwrap();
        let bytes = CredentialSource::File(path).load().unwrap();
        assert_eq!(bytes, b"{\"type\":\"service_account\"}");

        let inline = CredentialSource::Json("{}".to_string()).load().unwrap();
        assert_eq!(inline, b"{}");

        assert!(CredentialSource::File("/nonexistent/creds.json".into())
            .load()
            .is_err());
    }
}
