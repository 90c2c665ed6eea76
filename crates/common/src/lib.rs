//! Common utilities and shared types for certrelay
//!
//! # Module Organization
//!
//! - [`exec`]: Executable lookup
//! - [`ids`]: Type-safe identifiers (RequestId, Generation)
//! - [`types`]: Issuer mode, error taxonomy, unit status, retry policy
//! - [`observability`]: Logging setup (runtime only)

pub mod exec;
pub mod ids;
#[cfg(feature = "runtime")]
pub mod observability;
pub mod types;

#[cfg(feature = "runtime")]
pub use observability::init_tracing;

pub use exec::find_executable;
pub use ids::{Generation, RequestId};
pub use types::{ErrorKind, IssuerMode, LogFormat, RetryPolicy, UnitStatus};
