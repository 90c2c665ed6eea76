//! Configuration linting for best practices
//!
//! Checks configuration for missing best practices and potential issues.

use super::{ValidationResult, ValidationWarning};
use crate::{Config, CredentialSource};

use certrelay_common::types::IssuerMode;

/// Lint configuration for best practices
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    match config.issuer.mode {
        IssuerMode::Test => {
            result.add_warning(ValidationWarning::new(
                "Issuer mode is 'test'; issued certificates are not publicly trusted".to_string(),
            ));
        }
        IssuerMode::Production => {
            if config.issuer.email.is_none() {
                result.add_warning(ValidationWarning::new(
                    "Production issuer has no contact email (expiry notices will not be sent)"
                        .to_string(),
                ));
            }
        }
    }

    if config.retry.max_retries == 0 {
        result.add_warning(ValidationWarning::new(
            "max-retries is 0; requests fail on the first transient error".to_string(),
        ));
    }

    if config.issuer.propagation_seconds.is_none() {
        result.add_warning(ValidationWarning::new(format!(
            "No propagation-seconds set; '{}' uses its built-in default",
            config.issuer.dns_plugin
        )));
    }

    match config.credential {
        None => {
            result.add_warning(ValidationWarning::new(
                "No credential configured; issuance waits until one is installed".to_string(),
            ));
        }
        Some(CredentialSource::Json(_)) => {
            result.add_warning(ValidationWarning::new(
                "Credential is inlined in the configuration (prefer a file with mode 0600)"
                    .to_string(),
            ));
        }
        Some(CredentialSource::File(ref path)) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = std::fs::metadata(path) {
                    let mode = meta.permissions().mode();
                    if mode & 0o077 != 0 {
                        result.add_warning(ValidationWarning::new(format!(
                            "Credential file {:?} is accessible by other users (mode {:o})",
                            path,
                            mode & 0o777
                        )));
                    }
                }
            }
            #[cfg(not(unix))]
            let _ = path;
        }
    }

    result
}
