//! Certificate issuance orchestrator.
//!
//! A single task owns every request's state and consumes one event at a
//! time from its channel. Inbound requests, backoff timers, and issuer
//! workers all report through that channel, so state changes never race.
//!
//! ```text
//! CsrRequest ──► track ──► parse ──► prerequisites? ──no──► AwaitingPrerequisites
//!                              │            │                  (timer: RetryDue)
//!                          malformed       yes
//!                              │            ▼
//!                     Failed + error   Ready ─► worker: Staged ─► Issuing ─► Finished
//! ```

mod events;
mod retry;
mod worker;

pub use events::{InboundEvent, OutboundMessage};

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use certrelay_common::{ErrorKind, Generation, RequestId, UnitStatus};
use certrelay_config::Config;

use crate::credentials::{CredentialError, CredentialStore};
use crate::environment::ExecutionEnvironment;
use crate::issuer::{CertificateSigningRequest, IssuedCertificate, IssuerClient, IssuerError};
use crate::tracker::{IssuanceState, RequestTracker, TrackerError};

use events::Event;
use retry::Backoff;
use worker::WorkerPool;

const WAITING_FOR_ENVIRONMENT: &str = "waiting for execution environment";
const CREDENTIAL_PENDING: &str = "credential installation pending";
const NO_CREDENTIAL: &str = "no DNS-provider credential configured";

/// Fatal orchestrator errors. Per-request failures never surface here.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("issuance state machine violated: {0}")]
    StateMachine(#[from] TrackerError),

    #[error("orchestrator is not running")]
    ChannelClosed,
}

/// Cloneable sender for inbound events.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl OrchestratorHandle {
    pub fn send(&self, event: InboundEvent) -> Result<(), OrchestratorError> {
        self.tx
            .send(Event::Inbound(event))
            .map_err(|_| OrchestratorError::ChannelClosed)
    }

    pub fn csr_request(
        &self,
        request_id: impl Into<RequestId>,
        csr: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        self.send(InboundEvent::CsrRequest {
            request_id: request_id.into(),
            csr: csr.into(),
        })
    }

    pub fn configuration_changed(
        &self,
        credential: Option<Vec<u8>>,
    ) -> Result<(), OrchestratorError> {
        self.send(InboundEvent::ConfigurationChanged { credential })
    }

    pub fn environment_changed(&self, ready: bool) -> Result<(), OrchestratorError> {
        self.send(InboundEvent::EnvironmentChanged { ready })
    }

    pub fn withdraw(&self, request_id: impl Into<RequestId>) -> Result<(), OrchestratorError> {
        self.send(InboundEvent::Withdraw {
            request_id: request_id.into(),
        })
    }

    pub fn shutdown(&self) -> Result<(), OrchestratorError> {
        self.send(InboundEvent::Shutdown)
    }
}

/// A configuration change waiting for the environment.
#[derive(Debug)]
struct PendingConfiguration {
    credential: Option<Vec<u8>>,
    attempts: u32,
}

/// Sole owner of issuance request state.
pub struct Orchestrator {
    tracker: RequestTracker,
    issuer: Arc<IssuerClient>,
    environment: Arc<dyn ExecutionEnvironment>,
    credentials: Arc<dyn CredentialStore>,
    backoff: Backoff,
    workers: WorkerPool,
    status: Option<UnitStatus>,
    pending_configuration: Option<PendingConfiguration>,
    configuration_epoch: u64,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        environment: Arc<dyn ExecutionEnvironment>,
        credentials: Arc<dyn CredentialStore>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let issuer = Arc::new(IssuerClient::new(environment.clone(), config.clone()));

        info!(
            mode = %config.issuer.mode,
            dns_plugin = %config.issuer.dns_plugin,
            max_retries = config.retry.max_retries,
            max_concurrent = config.workers.max_concurrent,
            "Orchestrator created"
        );

        Self {
            tracker: RequestTracker::new(),
            issuer,
            environment,
            credentials,
            backoff: Backoff::new(config.retry.clone()),
            workers: WorkerPool::new(config.workers.max_concurrent),
            status: None,
            pending_configuration: None,
            configuration_epoch: 0,
            tx,
            rx,
            outbound,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            tx: self.tx.clone(),
        }
    }

    /// Current state of a tracked request.
    pub fn request_state(&self, id: &RequestId) -> Option<IssuanceState> {
        self.tracker.state(id)
    }

    /// Re-queues so far for a tracked request.
    pub fn retry_count(&self, id: &RequestId) -> Option<u32> {
        self.tracker.retry_count(id).ok()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker.len()
    }

    /// Last unit status reported.
    pub fn status(&self) -> Option<&UnitStatus> {
        self.status.as_ref()
    }

    /// Process an inbound event directly, bypassing the channel.
    ///
    /// Returns `false` once the event was a shutdown request.
    pub async fn handle_event(&mut self, event: InboundEvent) -> Result<bool, OrchestratorError> {
        self.dispatch(Event::Inbound(event)).await
    }

    /// Wait for the next queued event and process it.
    ///
    /// Returns `false` on shutdown.
    pub async fn process_next(&mut self) -> Result<bool, OrchestratorError> {
        match self.rx.recv().await {
            Some(event) => self.dispatch(event).await,
            None => Ok(false),
        }
    }

    /// Run until shutdown or a fatal error.
    pub async fn run(mut self) -> Result<(), OrchestratorError> {
        info!("Orchestrator running");
        while self.process_next().await? {}
        info!(
            tracked = self.tracker.len(),
            in_flight = self.workers.in_flight_count(),
            "Orchestrator stopped"
        );
        Ok(())
    }

    async fn dispatch(&mut self, event: Event) -> Result<bool, OrchestratorError> {
        trace!(event = ?event, "Processing event");

        match event {
            Event::Inbound(InboundEvent::CsrRequest { request_id, csr }) => {
                self.on_csr_request(request_id, csr).await?
            }
            Event::Inbound(InboundEvent::ConfigurationChanged { credential }) => {
                self.on_configuration_changed(credential).await
            }
            Event::Inbound(InboundEvent::EnvironmentChanged { ready }) => {
                self.on_environment_changed(ready).await
            }
            Event::Inbound(InboundEvent::Withdraw { request_id }) => self.on_withdraw(&request_id),
            Event::Inbound(InboundEvent::Shutdown) => {
                info!("Shutdown requested");
                return Ok(false);
            }
            Event::RetryDue {
                request_id,
                generation,
            } => self.on_retry_due(request_id, generation).await?,
            Event::ConfigurationRetryDue { epoch } => self.on_configuration_retry_due(epoch).await,
            Event::Staged {
                request_id,
                generation,
            } => self.on_staged(request_id, generation)?,
            Event::Finished {
                request_id,
                generation,
                outcome,
            } => self.on_finished(request_id, generation, outcome).await?,
        }
        Ok(true)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    async fn on_csr_request(
        &mut self,
        request_id: RequestId,
        csr: String,
    ) -> Result<(), OrchestratorError> {
        match self.tracker.track(request_id.clone(), csr) {
            Ok(generation) => {
                info!(request_id = %request_id, generation = %generation, "CSR request received");
            }
            Err(TrackerError::DuplicateRequest { .. }) => {
                debug!(request_id = %request_id, "Request already in progress, ignoring");
                return Ok(());
            }
            Err(TrackerError::AlreadyIssued { .. }) => {
                debug!(request_id = %request_id, "CSR already issued, ignoring re-delivery");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.attempt(&request_id).await
    }

    /// Validate the CSR, check prerequisites, and start an issuer run.
    async fn attempt(&mut self, request_id: &RequestId) -> Result<(), OrchestratorError> {
        let Some(request) = self.tracker.get(request_id) else {
            return Ok(());
        };
        let generation = request.generation;

        let csr = match CertificateSigningRequest::parse(&request.csr) {
            Ok(csr) => csr,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Rejecting malformed CSR");
                return self
                    .fail(request_id, ErrorKind::InvalidRequest, e.to_string())
                    .await;
            }
        };

        if !self.environment.is_reachable().await {
            return self
                .defer(
                    request_id,
                    ErrorKind::EnvironmentUnavailable,
                    "execution environment unreachable",
                )
                .await;
        }
        if !self.credentials.has_credential().await {
            return self
                .defer(
                    request_id,
                    ErrorKind::CredentialMissing,
                    "DNS-provider credential not installed",
                )
                .await;
        }

        self.transition(request_id, IssuanceState::Ready)?;

        let spawned = self.workers.spawn(
            request_id.clone(),
            generation,
            csr,
            self.issuer.clone(),
            self.tx.clone(),
        );
        if spawned {
            debug!(
                request_id = %request_id,
                active_workers = self.workers.active_count(),
                "Issuer run queued"
            );
            Ok(())
        } else {
            self.on_failure(
                request_id,
                ErrorKind::IssuanceFailure,
                "previous issuer run for this request still in progress".to_string(),
            )
            .await
        }
    }

    /// Park a request until its prerequisites may be met.
    async fn defer(
        &mut self,
        request_id: &RequestId,
        kind: ErrorKind,
        reason: &str,
    ) -> Result<(), OrchestratorError> {
        let attempts = self.tracker.retry_count(request_id)?;
        self.tracker.record_failure(request_id, kind, reason)?;

        if !self.backoff.policy().allows_retry(attempts) {
            warn!(
                request_id = %request_id,
                attempts,
                reason,
                "Prerequisites still missing, giving up"
            );
            return self
                .fail(
                    request_id,
                    kind,
                    format!("{} (gave up after {} retries)", reason, attempts),
                )
                .await;
        }

        self.transition(request_id, IssuanceState::AwaitingPrerequisites)?;
        self.schedule_retry(request_id, attempts + 1, reason);
        Ok(())
    }

    /// Handle a failed attempt: re-queue while allowed, otherwise finalize.
    async fn on_failure(
        &mut self,
        request_id: &RequestId,
        kind: ErrorKind,
        detail: String,
    ) -> Result<(), OrchestratorError> {
        let attempts = self.tracker.retry_count(request_id)?;
        self.tracker.record_failure(request_id, kind, detail.clone())?;

        if kind.is_retryable() && self.backoff.policy().allows_retry(attempts) {
            warn!(
                request_id = %request_id,
                error_kind = %kind,
                attempts,
                detail = %detail,
                "Issuance attempt failed, will retry"
            );
            self.transition(request_id, IssuanceState::Failed { retryable: true })?;
            self.transition(request_id, IssuanceState::AwaitingPrerequisites)?;
            self.schedule_retry(request_id, attempts + 1, &detail);
            return Ok(());
        }

        let detail = if kind.is_retryable() {
            format!("{} (gave up after {} retries)", detail, attempts)
        } else {
            detail
        };
        self.fail(request_id, kind, detail).await
    }

    /// Finalize a request as permanently failed and tell the requester.
    async fn fail(
        &mut self,
        request_id: &RequestId,
        kind: ErrorKind,
        detail: String,
    ) -> Result<(), OrchestratorError> {
        self.transition(request_id, IssuanceState::Failed { retryable: false })?;
        self.tracker.remove(request_id);

        error!(
            request_id = %request_id,
            error_kind = %kind,
            detail = %detail,
            "Issuance failed permanently"
        );
        self.emit(OutboundMessage::ErrorStatus {
            request_id: request_id.clone(),
            error_kind: kind,
            detail,
        })
        .await;
        Ok(())
    }

    fn schedule_retry(&self, request_id: &RequestId, attempt: u32, reason: &str) {
        let Some(request) = self.tracker.get(request_id) else {
            return;
        };
        let delay = self.backoff.delay(attempt);

        info!(
            request_id = %request_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            reason,
            "Request deferred"
        );
        Backoff::schedule(
            &self.tx,
            delay,
            Event::RetryDue {
                request_id: request_id.clone(),
                generation: request.generation,
            },
        );
    }

    async fn on_retry_due(
        &mut self,
        request_id: RequestId,
        generation: Generation,
    ) -> Result<(), OrchestratorError> {
        if !self.tracker.is_current(&request_id, generation) {
            trace!(request_id = %request_id, generation = %generation, "Stale retry timer");
            return Ok(());
        }
        if self.tracker.state(&request_id) != Some(IssuanceState::AwaitingPrerequisites) {
            trace!(request_id = %request_id, "Retry timer for request no longer waiting");
            return Ok(());
        }

        debug!(request_id = %request_id, "Retrying request");
        self.attempt(&request_id).await
    }

    fn on_staged(
        &mut self,
        request_id: RequestId,
        generation: Generation,
    ) -> Result<(), OrchestratorError> {
        if !self.tracker.is_current(&request_id, generation) {
            trace!(request_id = %request_id, "Staged event for withdrawn request");
            return Ok(());
        }
        self.transition(&request_id, IssuanceState::Staged)?;
        self.transition(&request_id, IssuanceState::Issuing)
    }

    async fn on_finished(
        &mut self,
        request_id: RequestId,
        generation: Generation,
        outcome: Result<IssuedCertificate, IssuerError>,
    ) -> Result<(), OrchestratorError> {
        self.workers.complete(&request_id);

        if !self.tracker.is_current(&request_id, generation) {
            info!(
                request_id = %request_id,
                generation = %generation,
                "Discarding issuer result for withdrawn request"
            );
            return Ok(());
        }

        match outcome {
            Ok(issued) => {
                self.transition(&request_id, IssuanceState::Issued)?;
                self.tracker.remove(&request_id);

                info!(
                    request_id = %request_id,
                    domain = %issued.domain,
                    expires = %issued.expires,
                    "Sending certificate"
                );
                self.emit(OutboundMessage::certificate(request_id, issued))
                    .await;
                Ok(())
            }
            Err(e) => self.on_failure(&request_id, e.kind(), e.to_string()).await,
        }
    }

    fn on_withdraw(&mut self, request_id: &RequestId) {
        match self.tracker.withdraw(request_id) {
            Some(request) => info!(
                request_id = %request_id,
                state = %request.state,
                in_flight = self.workers.is_in_flight(request_id),
                "Request withdrawn"
            ),
            None => debug!(request_id = %request_id, "Nothing to withdraw"),
        }
    }

    /// Apply a state transition. An illegal one drops the request.
    fn transition(
        &mut self,
        request_id: &RequestId,
        next: IssuanceState,
    ) -> Result<(), OrchestratorError> {
        if let Err(e) = self.tracker.advance(request_id, next) {
            error!(
                request_id = %request_id,
                error = %e,
                "Issuance state machine violated, dropping request"
            );
            self.tracker.remove(request_id);
            return Err(e.into());
        }
        Ok(())
    }

    // =========================================================================
    // Configuration and environment
    // =========================================================================

    async fn on_configuration_changed(&mut self, credential: Option<Vec<u8>>) {
        self.configuration_epoch += 1;
        self.pending_configuration = None;
        debug!(
            epoch = self.configuration_epoch,
            has_credential = credential.is_some(),
            "Configuration changed"
        );
        self.apply_configuration(credential, 0).await;
    }

    async fn on_configuration_retry_due(&mut self, epoch: u64) {
        if epoch != self.configuration_epoch {
            trace!(epoch, "Stale configuration retry");
            return;
        }
        if let Some(pending) = self.pending_configuration.take() {
            self.apply_configuration(pending.credential, pending.attempts)
                .await;
        }
    }

    async fn apply_configuration(&mut self, credential: Option<Vec<u8>>, attempts: u32) {
        if !self.environment.is_reachable().await {
            self.defer_configuration(credential, attempts).await;
            return;
        }

        let Some(bytes) = credential else {
            let status = if self.credentials.has_credential().await {
                UnitStatus::Active
            } else {
                UnitStatus::blocked(NO_CREDENTIAL)
            };
            self.set_status(status).await;
            return;
        };

        match self.credentials.install_credential(&bytes).await {
            Ok(()) => self.set_status(UnitStatus::Active).await,
            Err(CredentialError::EnvironmentUnavailable) => {
                self.defer_configuration(Some(bytes), attempts).await
            }
            Err(e) => {
                error!(error = %e, "Failed to install credential");
                self.set_status(UnitStatus::blocked(format!(
                    "failed to install credential: {}",
                    e
                )))
                .await;
            }
        }
    }

    async fn defer_configuration(&mut self, credential: Option<Vec<u8>>, attempts: u32) {
        let attempt = attempts + 1;
        let delay = self.backoff.delay(attempt);

        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Environment unreachable, deferring configuration"
        );
        self.pending_configuration = Some(PendingConfiguration {
            credential,
            attempts: attempt,
        });
        Backoff::schedule(
            &self.tx,
            delay,
            Event::ConfigurationRetryDue {
                epoch: self.configuration_epoch,
            },
        );
        self.set_status(UnitStatus::waiting(WAITING_FOR_ENVIRONMENT))
            .await;
    }

    async fn on_environment_changed(&mut self, ready: bool) {
        let status = if !ready {
            UnitStatus::waiting(WAITING_FOR_ENVIRONMENT)
        } else if self.pending_configuration.is_some() {
            UnitStatus::waiting(CREDENTIAL_PENDING)
        } else if self.credentials.has_credential().await {
            UnitStatus::Active
        } else {
            UnitStatus::blocked(NO_CREDENTIAL)
        };
        self.set_status(status).await;
    }

    async fn set_status(&mut self, status: UnitStatus) {
        if self.status.as_ref() == Some(&status) {
            return;
        }
        info!(status = %status, "Unit status changed");
        self.status = Some(status.clone());
        self.emit(OutboundMessage::Status { status }).await;
    }

    async fn emit(&self, message: OutboundMessage) {
        if self.outbound.send(message).await.is_err() {
            warn!("Outbound channel closed, dropping message");
        }
    }
}
