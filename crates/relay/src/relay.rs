//! JSON-lines transport between the host and the orchestrator.
//!
//! One JSON object per line. Inbound lines carry a `type` of `csr_request`,
//! `configuration_changed`, `environment`, or `withdraw`; outbound lines are
//! [`OutboundMessage`]s.

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use certrelay_common::RequestId;

use crate::orchestrator::{InboundEvent, OrchestratorError, OrchestratorHandle, OutboundMessage};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// An inbound line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    CsrRequest {
        request_id: RequestId,
        csr: String,
    },
    ConfigurationChanged {
        #[serde(default)]
        credential: Option<String>,
    },
    Environment {
        ready: bool,
    },
    Withdraw {
        request_id: RequestId,
    },
}

impl From<InboundMessage> for InboundEvent {
    fn from(message: InboundMessage) -> Self {
        match message {
            InboundMessage::CsrRequest { request_id, csr } => Self::CsrRequest { request_id, csr },
            InboundMessage::ConfigurationChanged { credential } => Self::ConfigurationChanged {
                credential: credential.map(String::into_bytes),
            },
            InboundMessage::Environment { ready } => Self::EnvironmentChanged { ready },
            InboundMessage::Withdraw { request_id } => Self::Withdraw { request_id },
        }
    }
}

/// Forward inbound lines to the orchestrator until the reader is exhausted.
///
/// Malformed lines are logged and skipped. Returns the number of messages
/// forwarded.
pub async fn relay_inbound<R>(reader: R, handle: &OrchestratorHandle) -> Result<usize, RelayError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<InboundMessage>(line) {
            Ok(message) => {
                debug!(message = ?message, "Inbound message");
                handle.send(message.into())?;
                forwarded += 1;
            }
            Err(e) => warn!(error = %e, "Ignoring malformed inbound message"),
        }
    }

    debug!(forwarded, "Inbound stream closed");
    Ok(forwarded)
}

/// Write outbound messages as JSON lines until the channel closes.
pub async fn relay_outbound<W>(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut writer: W,
) -> Result<usize, RelayError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}
