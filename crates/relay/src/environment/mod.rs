//! Execution environment abstraction.
//!
//! The environment is wherever the issuer binary runs: a sidecar container,
//! a chroot, or the local host. The relay only needs to stage files into
//! it, read files back out, and run the issuer with a structured argument
//! vector. Nothing here goes through a shell.

mod local;

pub use local::LocalEnvironment;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::issuer::IssuerCommand;

/// Errors from staging or reading files in the environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// The environment could not be reached.
    #[error("execution environment unreachable")]
    Unreachable,

    /// A filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EnvironmentError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors from running the issuer process.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The environment could not be reached.
    #[error("execution environment unreachable")]
    Unreachable,

    /// The process could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran past its timeout and was killed.
    #[error("{program} did not finish within {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// An environment capable of running the issuer binary.
///
/// Callers check [`is_reachable`](Self::is_reachable) before staging or
/// executing, and must not assume staged files survive an environment
/// restart.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    /// Whether the environment can currently stage files and run the issuer.
    async fn is_reachable(&self) -> bool;

    /// Write `contents` to `path`, creating parent directories.
    async fn stage_file(&self, path: &Path, contents: &[u8]) -> Result<(), EnvironmentError>;

    /// Write a file readable only by its owner where the environment
    /// supports permissions.
    async fn stage_private_file(
        &self,
        path: &Path,
        contents: &[u8],
    ) -> Result<(), EnvironmentError> {
        self.stage_file(path, contents).await
    }

    async fn file_exists(&self, path: &Path) -> bool;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, EnvironmentError>;

    /// Run the issuer and capture its output.
    async fn run_issuer_command(&self, command: &IssuerCommand) -> Result<ProcessOutput, ExecError>;
}
