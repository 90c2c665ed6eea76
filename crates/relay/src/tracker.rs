//! Request tracking and the issuance state machine.
//!
//! ```text
//! Created -> AwaitingPrerequisites -> Ready -> Staged -> Issuing -> Issued
//!    |              |  ^                 |        |         |
//!    |              +--+ (defer)         +--------+---------+--> Failed
//!    +--> Ready                                                    |
//!    +--> Failed (non-retryable)        Failed (retryable) --------+
//!                                          -> AwaitingPrerequisites
//! ```
//!
//! Issued and non-retryable Failed are terminal. Entering
//! `AwaitingPrerequisites` counts as one re-queue.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use certrelay_common::{ErrorKind, Generation, RequestId};

use crate::issuer::csr_digest;

/// Default number of issued requests remembered for re-delivery detection.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Processing state of one issuance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssuanceState {
    Created,
    AwaitingPrerequisites,
    Ready,
    Staged,
    Issuing,
    Issued,
    Failed { retryable: bool },
}

impl IssuanceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Issued | Self::Failed { retryable: false })
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use IssuanceState::*;

        matches!(
            (self, next),
            (Created, AwaitingPrerequisites)
                | (Created, Ready)
                | (Created, Failed { retryable: false })
                | (AwaitingPrerequisites, AwaitingPrerequisites)
                | (AwaitingPrerequisites, Ready)
                | (AwaitingPrerequisites, Failed { retryable: false })
                | (Ready, Staged)
                | (Ready, Failed { .. })
                | (Staged, Issuing)
                | (Staged, Failed { .. })
                | (Issuing, Issued)
                | (Issuing, Failed { .. })
                | (Failed { retryable: true }, AwaitingPrerequisites)
        )
    }
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::AwaitingPrerequisites => write!(f, "awaiting-prerequisites"),
            Self::Ready => write!(f, "ready"),
            Self::Staged => write!(f, "staged"),
            Self::Issuing => write!(f, "issuing"),
            Self::Issued => write!(f, "issued"),
            Self::Failed { retryable: true } => write!(f, "failed (retryable)"),
            Self::Failed { retryable: false } => write!(f, "failed"),
        }
    }
}

/// Most recent failure of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub detail: String,
}

/// One tracked CSR.
#[derive(Debug, Clone)]
pub struct IssuanceRequest {
    pub id: RequestId,
    pub csr: String,
    pub state: IssuanceState,
    pub attempts: u32,
    pub last_error: Option<FailureRecord>,
    pub generation: Generation,
    digest: String,
    path: Vec<IssuanceState>,
}

impl IssuanceRequest {
    /// Every state this request has been in, oldest first.
    pub fn path(&self) -> &[IssuanceState] {
        &self.path
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("request {id} is already being processed")]
    DuplicateRequest { id: RequestId },

    #[error("request {id} was already issued for this CSR")]
    AlreadyIssued { id: RequestId },

    #[error("invalid transition for request {id}: {from} -> {to}")]
    InvalidTransition {
        id: RequestId,
        from: IssuanceState,
        to: IssuanceState,
    },

    #[error("unknown request {id}")]
    UnknownRequest { id: RequestId },
}

/// Maps request ids to their issuance state.
#[derive(Debug)]
pub struct RequestTracker {
    requests: HashMap<RequestId, IssuanceRequest>,
    issued: HashMap<RequestId, String>,
    issued_order: VecDeque<RequestId>,
    history_capacity: usize,
    next_generation: Generation,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(history_capacity: usize) -> Self {
        Self {
            requests: HashMap::new(),
            issued: HashMap::new(),
            issued_order: VecDeque::new(),
            history_capacity,
            next_generation: Generation::new(1),
        }
    }

    /// Start tracking a CSR.
    ///
    /// Fails with `DuplicateRequest` while the id is non-terminal, and with
    /// `AlreadyIssued` when the same CSR was issued under this id before. A
    /// different CSR under an issued id is a renewal and is tracked afresh.
    pub fn track(&mut self, id: RequestId, csr: String) -> Result<Generation, TrackerError> {
        if let Some(existing) = self.requests.get(&id) {
            if !existing.state.is_terminal() {
                return Err(TrackerError::DuplicateRequest { id });
            }
        }

        let digest = csr_digest(&csr);
        if self.issued.get(&id) == Some(&digest) {
            return Err(TrackerError::AlreadyIssued { id });
        }

        let generation = self.next_generation;
        self.next_generation = generation.next();

        debug!(request_id = %id, generation = %generation, "Tracking request");
        self.requests.insert(
            id.clone(),
            IssuanceRequest {
                id,
                csr,
                state: IssuanceState::Created,
                attempts: 0,
                last_error: None,
                generation,
                digest,
                path: vec![IssuanceState::Created],
            },
        );
        Ok(generation)
    }

    /// Move a request to `next`, enforcing the state machine.
    pub fn advance(&mut self, id: &RequestId, next: IssuanceState) -> Result<(), TrackerError> {
        let request = self
            .requests
            .get_mut(id)
            .ok_or_else(|| TrackerError::UnknownRequest { id: id.clone() })?;

        if !request.state.can_transition_to(next) {
            return Err(TrackerError::InvalidTransition {
                id: id.clone(),
                from: request.state,
                to: next,
            });
        }

        if next == IssuanceState::AwaitingPrerequisites {
            request.attempts += 1;
        }

        trace!(
            request_id = %id,
            from = %request.state,
            to = %next,
            attempts = request.attempts,
            "State transition"
        );
        request.state = next;
        request.path.push(next);

        if next == IssuanceState::Issued {
            let digest = request.digest.clone();
            self.remember_issued(id.clone(), digest);
        }
        Ok(())
    }

    /// Record the most recent failure.
    pub fn record_failure(
        &mut self,
        id: &RequestId,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Result<(), TrackerError> {
        let request = self
            .requests
            .get_mut(id)
            .ok_or_else(|| TrackerError::UnknownRequest { id: id.clone() })?;
        request.last_error = Some(FailureRecord {
            kind,
            detail: detail.into(),
        });
        Ok(())
    }

    /// Number of re-queues so far.
    pub fn retry_count(&self, id: &RequestId) -> Result<u32, TrackerError> {
        self.requests
            .get(id)
            .map(|r| r.attempts)
            .ok_or_else(|| TrackerError::UnknownRequest { id: id.clone() })
    }

    pub fn state(&self, id: &RequestId) -> Option<IssuanceState> {
        self.requests.get(id).map(|r| r.state)
    }

    pub fn get(&self, id: &RequestId) -> Option<&IssuanceRequest> {
        self.requests.get(id)
    }

    /// Whether `generation` is the live generation of `id`.
    pub fn is_current(&self, id: &RequestId, generation: Generation) -> bool {
        self.requests
            .get(id)
            .is_some_and(|r| r.generation == generation)
    }

    /// Drop a non-terminal request on behalf of the requester.
    pub fn withdraw(&mut self, id: &RequestId) -> Option<IssuanceRequest> {
        match self.requests.get(id) {
            Some(request) if !request.state.is_terminal() => {
                debug!(request_id = %id, state = %request.state, "Request withdrawn");
                self.requests.remove(id)
            }
            _ => None,
        }
    }

    /// Stop tracking a request, whatever its state.
    pub fn remove(&mut self, id: &RequestId) -> Option<IssuanceRequest> {
        self.requests.remove(id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn remember_issued(&mut self, id: RequestId, digest: String) {
        if self.history_capacity == 0 {
            return;
        }
        if self.issued.insert(id.clone(), digest).is_none() {
            self.issued_order.push_back(id);
        }
        while self.issued_order.len() > self.history_capacity {
            if let Some(oldest) = self.issued_order.pop_front() {
                self.issued.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use IssuanceState::*;

    const CSR_A: &str = "-----BEGIN CERTIFICATE REQUEST-----\nAAAA\n-----END CERTIFICATE REQUEST-----\n";
    const CSR_B: &str = "-----BEGIN CERTIFICATE REQUEST-----\nBBBB\n-----END CERTIFICATE REQUEST-----\n";

    fn id(s: &str) -> RequestId {
        RequestId::new(s)
    }

    fn issue(tracker: &mut RequestTracker, request: &RequestId) {
        for state in [Ready, Staged, Issuing, Issued] {
            tracker.advance(request, state).unwrap();
        }
    }

    #[test]
    fn test_duplicate_request_leaves_original_untouched() {
        let mut tracker = RequestTracker::new();
        let first = tracker.track(id("a"), CSR_A.to_string()).unwrap();
        tracker.advance(&id("a"), AwaitingPrerequisites).unwrap();

        let err = tracker.track(id("a"), CSR_B.to_string()).unwrap_err();
        assert_eq!(err, TrackerError::DuplicateRequest { id: id("a") });

        let request = tracker.get(&id("a")).unwrap();
        assert_eq!(request.state, AwaitingPrerequisites);
        assert_eq!(request.csr, CSR_A);
        assert_eq!(request.generation, first);
        assert_eq!(request.attempts, 1);
    }

    #[test]
    fn test_cannot_skip_ready() {
        let mut tracker = RequestTracker::new();
        tracker.track(id("a"), CSR_A.to_string()).unwrap();

        for skipped in [Staged, Issuing, Issued] {
            assert!(matches!(
                tracker.advance(&id("a"), skipped),
                Err(TrackerError::InvalidTransition { from: Created, .. })
            ));
        }
        assert_eq!(tracker.state(&id("a")), Some(Created));
    }

    #[test]
    fn test_retry_cycle_counts_requeues() {
        let mut tracker = RequestTracker::new();
        tracker.track(id("a"), CSR_A.to_string()).unwrap();

        tracker.advance(&id("a"), AwaitingPrerequisites).unwrap();
        tracker.advance(&id("a"), AwaitingPrerequisites).unwrap();
        for state in [Ready, Staged, Issuing, Failed { retryable: true }] {
            tracker.advance(&id("a"), state).unwrap();
        }
        tracker.advance(&id("a"), AwaitingPrerequisites).unwrap();

        assert_eq!(tracker.retry_count(&id("a")).unwrap(), 3);
        assert!(matches!(
            tracker.retry_count(&id("missing")),
            Err(TrackerError::UnknownRequest { .. })
        ));
    }

    #[test]
    fn test_redelivery_after_issue_is_recognised() {
        let mut tracker = RequestTracker::new();
        tracker.track(id("a"), CSR_A.to_string()).unwrap();
        issue(&mut tracker, &id("a"));
        tracker.remove(&id("a"));

        assert_eq!(
            tracker.track(id("a"), format!("{}\n", CSR_A)),
            Err(TrackerError::AlreadyIssued { id: id("a") })
        );

        // A new CSR under the same id is a renewal.
        assert!(tracker.track(id("a"), CSR_B.to_string()).is_ok());
    }

    #[test]
    fn test_terminal_entry_can_be_replaced() {
        let mut tracker = RequestTracker::new();
        let first = tracker.track(id("a"), CSR_A.to_string()).unwrap();
        tracker
            .advance(&id("a"), Failed { retryable: false })
            .unwrap();

        let second = tracker.track(id("a"), CSR_A.to_string()).unwrap();
        assert!(second > first);
        assert!(tracker.is_current(&id("a"), second));
        assert!(!tracker.is_current(&id("a"), first));
    }

    #[test]
    fn test_withdraw_only_non_terminal() {
        let mut tracker = RequestTracker::new();
        tracker.track(id("a"), CSR_A.to_string()).unwrap();
        tracker.track(id("b"), CSR_B.to_string()).unwrap();
        issue(&mut tracker, &id("b"));

        assert!(tracker.withdraw(&id("a")).is_some());
        assert!(tracker.withdraw(&id("b")).is_none());
        assert_eq!(tracker.len(), 1);
        assert!(tracker.withdraw(&id("missing")).is_none());
    }

    #[test]
    fn test_issued_history_is_bounded() {
        let mut tracker = RequestTracker::with_history_capacity(2);
        for name in ["a", "b", "c"] {
            tracker.track(id(name), CSR_A.to_string()).unwrap();
            issue(&mut tracker, &id(name));
            tracker.remove(&id(name));
        }

        // "a" fell out of the history, so its re-delivery is tracked again.
        assert!(tracker.track(id("a"), CSR_A.to_string()).is_ok());
        assert!(tracker.track(id("c"), CSR_A.to_string()).is_err());
    }

    #[test]
    fn test_record_failure() {
        let mut tracker = RequestTracker::new();
        tracker.track(id("a"), CSR_A.to_string()).unwrap();
        tracker
            .record_failure(&id("a"), ErrorKind::CredentialMissing, "no credential")
            .unwrap();
        let failure = tracker.get(&id("a")).unwrap().last_error.clone().unwrap();
        assert_eq!(failure.kind, ErrorKind::CredentialMissing);
        assert_eq!(failure.detail, "no credential");
    }

    fn any_state() -> impl Strategy<Value = IssuanceState> {
        prop_oneof![
            Just(Created),
            Just(AwaitingPrerequisites),
            Just(Ready),
            Just(Staged),
            Just(Issuing),
            Just(Issued),
            any::<bool>().prop_map(|retryable| Failed { retryable }),
        ]
    }

    /// Edges of the issuance state machine, written out independently.
    fn edge_allowed(from: IssuanceState, to: IssuanceState) -> bool {
        match from {
            Created => matches!(to, AwaitingPrerequisites | Ready | Failed { retryable: false }),
            AwaitingPrerequisites => {
                matches!(to, AwaitingPrerequisites | Ready | Failed { retryable: false })
            }
            Ready => matches!(to, Staged | Failed { .. }),
            Staged => matches!(to, Issuing | Failed { .. }),
            Issuing => matches!(to, Issued | Failed { .. }),
            Failed { retryable: true } => to == AwaitingPrerequisites,
            Issued | Failed { retryable: false } => false,
        }
    }

    proptest! {
        #[test]
        fn visited_states_form_a_valid_path(moves in prop::collection::vec(any_state(), 0..40)) {
            let mut tracker = RequestTracker::new();
            let request = id("p");
            tracker.track(request.clone(), CSR_A.to_string()).unwrap();

            for next in moves {
                let before = tracker.state(&request).unwrap();
                match tracker.advance(&request, next) {
                    Ok(()) => {
                        prop_assert_eq!(tracker.state(&request), Some(next));
                    }
                    Err(_) => {
                        prop_assert_eq!(tracker.state(&request), Some(before));
                    }
                }
            }

            let path = tracker.get(&request).unwrap().path().to_vec();
            prop_assert_eq!(path[0], Created);
            for pair in path.windows(2) {
                prop_assert!(edge_allowed(pair[0], pair[1]), "illegal edge {:?}", pair);
            }
            if path.contains(&Issued) {
                prop_assert!(path.contains(&Ready));
            }
        }
    }
}
