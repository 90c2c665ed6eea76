//! Shared fakes for orchestrator integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{CertificateParams, DnType, KeyPair};
use tokio::sync::mpsc;

use certrelay::{
    CredentialError, CredentialStore, EnvironmentCredentialStore, EnvironmentError, ExecError,
    ExecutionEnvironment, IssuerCommand, Orchestrator, OutboundMessage, ProcessOutput,
};
use certrelay_common::RetryPolicy;
use certrelay_config::Config;

pub const CREDENTIAL_PATH: &str = "/root/google-creds.json";
pub const CSR_PATH: &str = "/tmp/csr";

/// In-memory execution environment with a scripted issuer.
///
/// A successful run writes the configured chain to the `--fullchain-path`
/// the issuer was given.
#[derive(Default)]
pub struct FakeEnvironment {
    unreachable: AtomicBool,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    chain: Mutex<String>,
    stderr: Mutex<String>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    runs: AtomicUsize,
    stages: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeEnvironment {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn set_chain(&self, chain: String) {
        *self.chain.lock().unwrap() = chain;
    }

    /// Make every issuer run exit non-zero with `stderr`.
    pub fn fail_runs(&self, stderr: &str) {
        self.fail_next_runs(usize::MAX, stderr);
    }

    /// Make the next `count` issuer runs exit non-zero with `stderr`.
    pub fn fail_next_runs(&self, count: usize, stderr: &str) {
        *self.stderr.lock().unwrap() = stderr.to_string();
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn insert_file(&self, path: &str, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), contents.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(Path::new(path)).cloned()
    }

    /// Total calls of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn stages(&self) -> usize {
        self.stages.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionEnvironment for FakeEnvironment {
    async fn is_reachable(&self) -> bool {
        self.touch();
        !self.unreachable.load(Ordering::SeqCst)
    }

    async fn stage_file(&self, path: &Path, contents: &[u8]) -> Result<(), EnvironmentError> {
        self.touch();
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(EnvironmentError::Unreachable);
        }
        self.stages.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn file_exists(&self, path: &Path) -> bool {
        self.touch();
        self.files.lock().unwrap().contains_key(path)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, EnvironmentError> {
        self.touch();
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or(EnvironmentError::Io {
                path: path.to_path_buf(),
                source: std::io::ErrorKind::NotFound.into(),
            })
    }

    async fn run_issuer_command(&self, command: &IssuerCommand) -> Result<ProcessOutput, ExecError> {
        self.touch();
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ExecError::Unreachable);
        }
        self.runs.fetch_add(1, Ordering::SeqCst);

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Ok(ProcessOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: self.stderr.lock().unwrap().clone(),
            });
        }

        let chain = self.chain.lock().unwrap().clone();
        if let Some(fullchain) = command.arg_value("--fullchain-path") {
            self.files
                .lock()
                .unwrap()
                .insert(PathBuf::from(fullchain), chain.into_bytes());
        }
        Ok(ProcessOutput {
            status: Some(0),
            stdout: "Successfully received certificate.".to_string(),
            stderr: String::new(),
        })
    }
}

/// Credential store that counts how often it is consulted.
pub struct RecordingCredentialStore {
    inner: EnvironmentCredentialStore,
    checks: AtomicUsize,
    installs: AtomicUsize,
}

impl RecordingCredentialStore {
    pub fn new(environment: Arc<FakeEnvironment>) -> Arc<Self> {
        Arc::new(Self {
            inner: EnvironmentCredentialStore::new(environment, CREDENTIAL_PATH),
            checks: AtomicUsize::new(0),
            installs: AtomicUsize::new(0),
        })
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for RecordingCredentialStore {
    async fn has_credential(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.inner.has_credential().await
    }

    async fn install_credential(&self, bytes: &[u8]) -> Result<(), CredentialError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.inner.install_credential(bytes).await
    }
}

/// Orchestrator wired to fakes.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub environment: Arc<FakeEnvironment>,
    pub credentials: Arc<RecordingCredentialStore>,
    outbound: mpsc::Receiver<OutboundMessage>,
}

impl Harness {
    pub fn new(config: &Config) -> Self {
        let environment = FakeEnvironment::new();
        let credentials = RecordingCredentialStore::new(environment.clone());
        let (tx, outbound) = mpsc::channel(64);
        let orchestrator =
            Orchestrator::new(config, environment.clone(), credentials.clone(), tx);
        Self {
            orchestrator,
            environment,
            credentials,
            outbound,
        }
    }

    /// Harness with a credential installed and a valid chain to hand out.
    pub fn ready(config: &Config, domain: &str) -> Self {
        let harness = Self::new(config);
        harness
            .environment
            .insert_file(CREDENTIAL_PATH, b"{\"type\":\"service_account\"}");
        harness.environment.set_chain(chain_pem(domain));
        harness
    }

    /// Outbound messages emitted so far.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Process queued events until `done` holds, up to `limit` events.
    pub async fn process_until<F>(&mut self, limit: usize, mut done: F)
    where
        F: FnMut(&Orchestrator) -> bool,
    {
        for _ in 0..limit {
            if done(&self.orchestrator) {
                return;
            }
            assert!(self.orchestrator.process_next().await.unwrap());
        }
        assert!(done(&self.orchestrator), "condition not reached after {limit} events");
    }
}

/// Configuration with deterministic backoff and the given retry cap.
pub fn test_config(max_retries: u32) -> Config {
    let mut config = Config::default();
    config.retry = RetryPolicy {
        max_retries,
        base_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(1800),
        jitter: 0.0,
    };
    config
}

pub fn csr_pem(domain: &str) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, domain);
    params.serialize_request(&key).unwrap().pem().unwrap()
}

pub fn chain_pem(domain: &str) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, "(STAGING) Test CA");
    params.not_after = rcgen::date_time_ymd(2031, 1, 1);
    params.self_signed(&key).unwrap().pem()
}
