//! Environment backed by a directory on the local host.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use certrelay_common::find_executable;
use certrelay_config::Config;

use super::{EnvironmentError, ExecError, ExecutionEnvironment, ProcessOutput};
use crate::issuer::IssuerCommand;

/// Local execution environment.
///
/// Environment paths are resolved under `root`, so `/tmp/csr` with a root
/// of `/srv/issuer` is `/srv/issuer/tmp/csr` on the host. The issuer runs
/// on the host with `root` as its working directory, and its path-valued
/// arguments are mapped the same way.
#[derive(Debug, Clone)]
pub struct LocalEnvironment {
    root: PathBuf,
    binary: String,
    timeout: Duration,
}

impl LocalEnvironment {
    pub fn new(root: impl Into<PathBuf>, binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.paths.environment_root.clone(),
            config.issuer.binary.clone(),
            config.issuer.command_timeout(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an environment path to a host path.
    ///
    /// Root and parent components are dropped so a path can never escape
    /// the environment root.
    pub fn host_path(&self, path: &Path) -> PathBuf {
        let mut resolved = self.root.clone();
        for component in path.components() {
            if let Component::Normal(part) = component {
                resolved.push(part);
            }
        }
        resolved
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<PathBuf, EnvironmentError> {
        if !self.root_is_dir().await {
            return Err(EnvironmentError::Unreachable);
        }

        let host_path = self.host_path(path);
        if let Some(parent) = host_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| EnvironmentError::io(path, e))?;
        }
        fs::write(&host_path, contents)
            .await
            .map_err(|e| EnvironmentError::io(path, e))?;

        trace!(
            path = %path.display(),
            host_path = %host_path.display(),
            bytes = contents.len(),
            "Staged file"
        );
        Ok(host_path)
    }

    async fn root_is_dir(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalEnvironment {
    async fn is_reachable(&self) -> bool {
        if !self.root_is_dir().await {
            debug!(root = %self.root.display(), "Environment root is not a directory");
            return false;
        }
        if find_executable(&self.binary).is_none() {
            debug!(binary = %self.binary, "Issuer binary not found");
            return false;
        }
        true
    }

    async fn stage_file(&self, path: &Path, contents: &[u8]) -> Result<(), EnvironmentError> {
        self.write(path, contents).await.map(|_| ())
    }

    async fn stage_private_file(
        &self,
        path: &Path,
        contents: &[u8],
    ) -> Result<(), EnvironmentError> {
        let host_path = self.write(path, contents).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&host_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| EnvironmentError::io(path, e))?;
        }
        #[cfg(not(unix))]
        let _ = host_path;

        Ok(())
    }

    async fn file_exists(&self, path: &Path) -> bool {
        fs::metadata(self.host_path(path))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, EnvironmentError> {
        if !self.root_is_dir().await {
            return Err(EnvironmentError::Unreachable);
        }
        fs::read(self.host_path(path))
            .await
            .map_err(|e| EnvironmentError::io(path, e))
    }

    async fn run_issuer_command(&self, command: &IssuerCommand) -> Result<ProcessOutput, ExecError> {
        if !self.root_is_dir().await {
            return Err(ExecError::Unreachable);
        }
        let program = find_executable(&command.program).ok_or(ExecError::Unreachable)?;
        let command = command.map_paths(|path| self.host_path(path));

        debug!(
            program = %program.display(),
            args = ?command.args,
            timeout_secs = self.timeout.as_secs(),
            "Running issuer"
        );

        let child = Command::new(&program)
            .args(&command.args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ExecError::Spawn {
                program: command.program.clone(),
                source,
            })?,
            Err(_) => {
                warn!(
                    program = %command.program,
                    timeout_secs = self.timeout.as_secs(),
                    "Issuer timed out and was killed"
                );
                return Err(ExecError::Timeout {
                    program: command.program.clone(),
                    timeout: self.timeout,
                });
            }
        };

        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
