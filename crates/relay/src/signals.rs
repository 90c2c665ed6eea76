//! Signal handling for configuration reload and shutdown.
//!
//! SIGHUP re-reads the configuration file and re-installs the credential
//! through a configuration-changed event. SIGTERM and SIGINT stop the
//! orchestrator.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use certrelay_config::Config;

use crate::credentials::configured_credential;
use crate::orchestrator::OrchestratorHandle;

/// Signals the relay reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// Reload configuration (SIGHUP)
    Reload,
    /// Graceful shutdown (SIGTERM/SIGINT)
    Shutdown,
}

/// Async signal listener.
#[cfg(unix)]
pub struct SignalManager {
    hangup: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalManager {
    pub fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next signal.
    pub async fn recv(&mut self) -> SignalType {
        tokio::select! {
            _ = self.hangup.recv() => SignalType::Reload,
            _ = self.terminate.recv() => SignalType::Shutdown,
            _ = self.interrupt.recv() => SignalType::Shutdown,
        }
    }
}

#[cfg(not(unix))]
pub struct SignalManager;

#[cfg(not(unix))]
impl SignalManager {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> SignalType {
        let _ = tokio::signal::ctrl_c().await;
        SignalType::Shutdown
    }
}

/// Load and validate the configuration, falling back to the embedded default.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::default_embedded().context("Failed to load embedded configuration")?,
    };
    config.validate()?;
    Ok(config)
}

/// Re-read the configuration and return the credential it names.
///
/// Only the credential takes effect on reload; other settings need a restart.
pub fn reload_credential(path: Option<&Path>, running: &Config) -> Result<Option<Vec<u8>>> {
    let config = load_config(path)?;

    if config.issuer != running.issuer
        || config.paths != running.paths
        || config.retry != running.retry
        || config.workers != running.workers
    {
        warn!("Configuration changes other than the credential take effect after a restart");
    }

    Ok(configured_credential(&config))
}

/// Translate signals into orchestrator events until shutdown.
pub async fn watch_signals(
    mut signals: SignalManager,
    handle: OrchestratorHandle,
    config_path: Option<PathBuf>,
    running: Config,
) {
    loop {
        match signals.recv().await {
            SignalType::Reload => {
                info!("Received SIGHUP, reloading configuration");
                match reload_credential(config_path.as_deref(), &running) {
                    Ok(credential) => {
                        if handle.configuration_changed(credential).is_err() {
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "Configuration reload failed, keeping current"),
                }
            }
            SignalType::Shutdown => {
                info!("Received shutdown signal");
                let _ = handle.shutdown();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_embedded() {
        let config = load_config(None).unwrap();
        assert_eq!(config.issuer.binary, "certbot");
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certrelay.kdl");
        std::fs::write(&path, "paths {\n    csr \"relative/csr\"\n}\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_reload_returns_new_credential() {
        let dir = tempfile::tempdir().unwrap();
        let creds = dir.path().join("creds.json");
        std::fs::write(&creds, b"{\"rotated\":true}").unwrap();

        let path = dir.path().join("certrelay.kdl");
        std::fs::write(
            &path,
            format!("credential {{\n    file \"{}\"\n}}\n", creds.display()),
        )
        .unwrap();

        let running = Config::default();
        let credential = reload_credential(Some(&path), &running).unwrap();
        assert_eq!(credential, Some(b"{\"rotated\":true}".to_vec()));
    }

    #[test]
    fn test_reload_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certrelay.kdl");
        std::fs::write(&path, "issuer {").unwrap();
        assert!(reload_credential(Some(&path), &Config::default()).is_err());
    }
}
