//! Bounded pool of issuer runs.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use certrelay_common::{Generation, RequestId};

use super::events::Event;
use crate::issuer::{CertificateSigningRequest, IssuerClient, IssuerError};

/// Runs issuer attempts on spawned tasks.
///
/// At most `max_concurrent` attempts run at once, and at most one per
/// request id. Each attempt reports `Staged` once the CSR is in place and
/// `Finished` when the issuer exits.
pub(crate) struct WorkerPool {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: HashSet<RequestId>,
}

impl WorkerPool {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        debug!(max_concurrent, "Issuer worker pool initialized");
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            in_flight: HashSet::new(),
        }
    }

    pub(crate) fn is_in_flight(&self, id: &RequestId) -> bool {
        self.in_flight.contains(id)
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of attempts currently holding a permit.
    pub(crate) fn active_count(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Start an attempt. Returns `false` if one is already running for `id`.
    pub(crate) fn spawn(
        &mut self,
        request_id: RequestId,
        generation: Generation,
        csr: CertificateSigningRequest,
        issuer: Arc<IssuerClient>,
        tx: UnboundedSender<Event>,
    ) -> bool {
        if !self.in_flight.insert(request_id.clone()) {
            return false;
        }

        let permits = self.permits.clone();
        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => {
                    trace!(request_id = %request_id, "Issuer worker started");
                    match issuer.stage(&csr).await {
                        Ok(staged) => {
                            let _ = tx.send(Event::Staged {
                                request_id: request_id.clone(),
                                generation,
                            });
                            issuer.execute(staged).await
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(_) => Err(IssuerError::EnvironmentUnavailable(
                    "worker pool closed".to_string(),
                )),
            };

            if tx
                .send(Event::Finished {
                    request_id,
                    generation,
                    outcome,
                })
                .is_err()
            {
                trace!("Orchestrator gone, dropping issuer result");
            }
        });
        true
    }

    /// Mark the attempt for `id` as finished.
    pub(crate) fn complete(&mut self, id: &RequestId) {
        self.in_flight.remove(id);
    }
}
