//! Events consumed and emitted by the orchestrator.

use chrono::{DateTime, Utc};
use serde::Serialize;

use certrelay_common::{ErrorKind, Generation, RequestId, UnitStatus};

use crate::issuer::{IssuedCertificate, IssuerError};

/// Events arriving from outside the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A requester raised (or re-delivered) a CSR.
    CsrRequest { request_id: RequestId, csr: String },
    /// Configuration changed; `credential` is the new DNS-provider credential.
    ConfigurationChanged { credential: Option<Vec<u8>> },
    /// The execution environment came up or went away.
    EnvironmentChanged { ready: bool },
    /// The requester no longer wants this certificate.
    Withdraw { request_id: RequestId },
    /// Stop the loop.
    Shutdown,
}

/// Everything that flows through the orchestrator's channel.
#[derive(Debug)]
pub(crate) enum Event {
    Inbound(InboundEvent),
    RetryDue {
        request_id: RequestId,
        generation: Generation,
    },
    ConfigurationRetryDue {
        epoch: u64,
    },
    Staged {
        request_id: RequestId,
        generation: Generation,
    },
    Finished {
        request_id: RequestId,
        generation: Generation,
        outcome: Result<IssuedCertificate, IssuerError>,
    },
}

impl From<InboundEvent> for Event {
    fn from(event: InboundEvent) -> Self {
        Self::Inbound(event)
    }
}

/// Messages the orchestrator sends back to the requester and host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    CertificateResponse {
        request_id: RequestId,
        chain: String,
        ca: String,
        expires: DateTime<Utc>,
    },
    ErrorStatus {
        request_id: RequestId,
        error_kind: ErrorKind,
        detail: String,
    },
    Status {
        #[serde(flatten)]
        status: UnitStatus,
    },
}

impl OutboundMessage {
    pub fn certificate(request_id: RequestId, issued: IssuedCertificate) -> Self {
        Self::CertificateResponse {
            request_id,
            chain: issued.chain_pem,
            ca: issued.ca,
            expires: issued.expires,
        }
    }
}
