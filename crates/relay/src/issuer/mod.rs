//! Issuer client.
//!
//! Drives one certificate issuance through the execution environment:
//! stage the CSR at the fixed staging path, run the issuer, read the chain
//! back from the deterministic output directory.
//!
//! The staging path is shared by every request, so a staging lock is taken
//! in [`IssuerClient::stage`] and released only when the issuer process has
//! exited, via the [`StagedCsr`] guard consumed by [`IssuerClient::execute`].

mod certificate;
mod command;
mod csr;

pub use certificate::{CertificateError, IssuedCertificate};
pub use command::{IssuerCommand, OutputPaths};
pub use csr::{csr_digest, CertificateSigningRequest, CsrError};

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use certrelay_common::ErrorKind;
use certrelay_config::Config;

use crate::environment::{EnvironmentError, ExecError, ExecutionEnvironment};

/// Longest stderr excerpt carried in an issuance failure.
const MAX_STDERR_BYTES: usize = 4096;

/// Errors from a single issuance attempt.
#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("invalid CSR: {0}")]
    InvalidRequest(#[from] CsrError),

    #[error("DNS-provider credential missing at {}", .path.display())]
    CredentialMissing { path: PathBuf },

    #[error("execution environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("issuer exited with {}: {stderr}", exit_description(.status))]
    IssuanceFailure { status: Option<i32>, stderr: String },

    #[error("issuer did not finish: {0}")]
    Timeout(String),

    #[error("issuer output unusable: {0}")]
    MalformedOutput(String),
}

fn exit_description(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl IssuerError {
    /// Failure kind reported upstream and used for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::CredentialMissing { .. } => ErrorKind::CredentialMissing,
            Self::EnvironmentUnavailable(_) => ErrorKind::EnvironmentUnavailable,
            Self::IssuanceFailure { .. } | Self::Timeout(_) | Self::MalformedOutput(_) => {
                ErrorKind::IssuanceFailure
            }
        }
    }
}

impl From<EnvironmentError> for IssuerError {
    fn from(err: EnvironmentError) -> Self {
        Self::EnvironmentUnavailable(err.to_string())
    }
}

impl From<ExecError> for IssuerError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Timeout { .. } => Self::Timeout(err.to_string()),
            ExecError::Unreachable | ExecError::Spawn { .. } => {
                Self::EnvironmentUnavailable(err.to_string())
            }
        }
    }
}

/// A CSR sitting at the staging path, with the staging lock held.
pub struct StagedCsr<'a> {
    command: IssuerCommand,
    fullchain: PathBuf,
    domain: String,
    _guard: MutexGuard<'a, ()>,
}

impl StagedCsr<'_> {
    pub fn command(&self) -> &IssuerCommand {
        &self.command
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

/// Runs the issuer for one CSR at a time.
pub struct IssuerClient {
    environment: Arc<dyn ExecutionEnvironment>,
    config: Config,
    staging: Mutex<()>,
}

impl IssuerClient {
    pub fn new(environment: Arc<dyn ExecutionEnvironment>, config: Config) -> Self {
        Self {
            environment,
            config,
            staging: Mutex::new(()),
        }
    }

    /// Take the staging lock, check prerequisites, and stage the CSR.
    pub async fn stage(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<StagedCsr<'_>, IssuerError> {
        let guard = self.staging.lock().await;

        if !self.environment.is_reachable().await {
            return Err(IssuerError::EnvironmentUnavailable(
                "execution environment unreachable".to_string(),
            ));
        }

        let credential = &self.config.paths.credential;
        if !self.environment.file_exists(credential).await {
            return Err(IssuerError::CredentialMissing {
                path: credential.clone(),
            });
        }

        self.environment
            .stage_file(&self.config.paths.csr, csr.pem().as_bytes())
            .await?;

        let command = IssuerCommand::certonly(&self.config, csr.domain());
        let fullchain = OutputPaths::in_dir(&self.config.output_dir(csr.domain())).fullchain;

        debug!(
            domain = %csr.domain(),
            csr_path = %self.config.paths.csr.display(),
            "Staged CSR"
        );

        Ok(StagedCsr {
            command,
            fullchain,
            domain: csr.domain().to_string(),
            _guard: guard,
        })
    }

    /// Run the issuer on a staged CSR and read back the chain.
    ///
    /// The staging lock is released when this returns.
    pub async fn execute(&self, staged: StagedCsr<'_>) -> Result<IssuedCertificate, IssuerError> {
        if !self.environment.is_reachable().await {
            return Err(IssuerError::EnvironmentUnavailable(
                "execution environment lost before issuer run".to_string(),
            ));
        }

        let output = self.environment.run_issuer_command(&staged.command).await?;
        if !output.success() {
            warn!(
                domain = %staged.domain,
                status = ?output.status,
                "Issuer failed"
            );
            return Err(IssuerError::IssuanceFailure {
                status: output.status,
                stderr: truncate(output.stderr.trim(), MAX_STDERR_BYTES),
            });
        }

        let chain = self
            .environment
            .read_file(&staged.fullchain)
            .await
            .map_err(|e| match e {
                EnvironmentError::Unreachable => IssuerError::from(e),
                EnvironmentError::Io { .. } => IssuerError::MalformedOutput(e.to_string()),
            })?;
        let chain = String::from_utf8(chain)
            .map_err(|_| IssuerError::MalformedOutput("chain is not UTF-8".to_string()))?;

        let issued = IssuedCertificate::from_chain_pem(&staged.domain, &chain)
            .map_err(|e| IssuerError::MalformedOutput(e.to_string()))?;

        info!(
            domain = %issued.domain,
            ca = %issued.ca,
            expires = %issued.expires,
            "Certificate issued"
        );
        Ok(issued)
    }

    /// Stage and execute in one call.
    pub async fn issue(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<IssuedCertificate, IssuerError> {
        let staged = self.stage(csr).await?;
        self.execute(staged).await
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
