//! DNS-provider credential store.
//!
//! The issuance path only ever asks whether a credential is present.
//! Installation happens when the configuration changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

use certrelay_config::Config;

use crate::environment::{EnvironmentError, ExecutionEnvironment};

/// Errors from installing a credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The environment holding the credential could not be reached.
    #[error("execution environment unreachable")]
    EnvironmentUnavailable,

    /// The credential was empty.
    #[error("credential is empty")]
    Empty,

    /// Writing the credential failed.
    #[error("failed to write credential to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<EnvironmentError> for CredentialError {
    fn from(err: EnvironmentError) -> Self {
        match err {
            EnvironmentError::Unreachable => Self::EnvironmentUnavailable,
            EnvironmentError::Io { path, source } => Self::Io { path, source },
        }
    }
}

/// Where the DNS-provider credential lives.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether a credential is present at the known location.
    async fn has_credential(&self) -> bool;

    /// Install `bytes` as the active credential, replacing any previous one.
    async fn install_credential(&self, bytes: &[u8]) -> Result<(), CredentialError>;
}

/// Credential kept as a private file inside the execution environment.
pub struct EnvironmentCredentialStore {
    environment: Arc<dyn ExecutionEnvironment>,
    path: PathBuf,
}

impl EnvironmentCredentialStore {
    pub fn new(environment: Arc<dyn ExecutionEnvironment>, path: impl Into<PathBuf>) -> Self {
        Self {
            environment,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for EnvironmentCredentialStore {
    async fn has_credential(&self) -> bool {
        self.environment.file_exists(&self.path).await
    }

    async fn install_credential(&self, bytes: &[u8]) -> Result<(), CredentialError> {
        if bytes.is_empty() {
            return Err(CredentialError::Empty);
        }
        if !self.environment.is_reachable().await {
            debug!("Cannot install credential, environment unreachable");
            return Err(CredentialError::EnvironmentUnavailable);
        }

        self.environment
            .stage_private_file(&self.path, bytes)
            .await?;

        info!(path = %self.path.display(), "Installed DNS-provider credential");
        Ok(())
    }
}

/// Load the credential named by the configuration, if any.
///
/// A source that cannot be read is logged and treated as absent so the
/// relay reports a blocked status instead of exiting.
pub fn configured_credential(config: &Config) -> Option<Vec<u8>> {
    let source = config.credential.as_ref()?;
    match source.load() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!(error = %e, "Failed to load configured credential");
            None
        }
    }
}
