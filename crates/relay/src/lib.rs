//! certrelay library
//!
//! Issues and renews TLS certificates for requesters that hand over a
//! certificate-signing request. Each CSR is staged into an execution
//! environment, run through a DNS-01 capable ACME client (certbot with a
//! DNS plugin), and the signed chain is sent back to the requester.
//!
//! - **Orchestrator**: single-writer state machine driving every request
//! - **Request Tracking**: per-request state, de-duplication, retry counts
//! - **Issuer Client**: argument construction, staging lock, chain parsing
//! - **Environment**: where files are staged and the issuer runs
//! - **Credentials**: presence checks and installation of the DNS credential
//! - **Relay**: JSON-lines transport on stdin/stdout
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certrelay::{EnvironmentCredentialStore, LocalEnvironment, Orchestrator};
//! use certrelay_config::Config;
//!
//! let config = Config::default();
//! let environment = Arc::new(LocalEnvironment::from_config(&config));
//! let credentials = Arc::new(EnvironmentCredentialStore::new(
//!     environment.clone(),
//!     config.paths.credential.clone(),
//! ));
//! let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(64);
//! let orchestrator = Orchestrator::new(&config, environment, credentials, outbound_tx);
//! orchestrator.handle().csr_request("unit-0", csr_pem)?;
//! orchestrator.run().await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod credentials;
pub mod environment;
pub mod issuer;
pub mod orchestrator;
pub mod relay;
pub mod signals;
pub mod tracker;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Collaborators
pub use credentials::{CredentialError, CredentialStore, EnvironmentCredentialStore};
pub use environment::{
    EnvironmentError, ExecError, ExecutionEnvironment, LocalEnvironment, ProcessOutput,
};

// Issuance
pub use issuer::{
    CertificateSigningRequest, CsrError, IssuedCertificate, IssuerClient, IssuerCommand,
    IssuerError,
};
pub use tracker::{IssuanceRequest, IssuanceState, RequestTracker, TrackerError};

// Orchestration
pub use orchestrator::{
    InboundEvent, Orchestrator, OrchestratorError, OrchestratorHandle, OutboundMessage,
};

// Transport
pub use relay::{relay_inbound, relay_outbound, InboundMessage, RelayError};
