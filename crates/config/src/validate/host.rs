//! Host checks
//!
//! Validates the configuration against the local filesystem: the execution
//! environment root, the issuer binary, and the credential source. Missing
//! pieces are warnings because the environment may be provisioned after
//! startup; the relay reports them through its unit status instead.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::{Config, CredentialSource};

use certrelay_common::find_executable;

/// Validate host-side prerequisites
pub fn validate_host(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let root = &config.paths.environment_root;
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Path,
                format!("Environment root is not a directory: {:?}", root),
            ));
        }
        Err(_) => {
            result.add_warning(ValidationWarning::new(format!(
                "Environment root {:?} does not exist yet; issuance will wait for it",
                root
            )));
        }
    }

    if find_executable(&config.issuer.binary).is_none() {
        result.add_warning(ValidationWarning::new(format!(
            "Issuer binary '{}' not found; issuance will wait for it",
            config.issuer.binary
        )));
    }

    if let Some(CredentialSource::File(ref path)) = config.credential {
        if !path.exists() {
            result.add_warning(ValidationWarning::new(format!(
                "Credential file not found: {:?}",
                path
            )));
        } else if let Err(e) = std::fs::read(path) {
            result.add_error(ValidationError::new(
                ErrorCategory::Credential,
                format!("Failed to read credential file {:?}: {}", path, e),
            ));
        }
    }

    result
}
