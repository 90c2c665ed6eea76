//! KDL configuration parsing.
//!
//! - `helpers`: Common parsing utility functions
//! - `issuer`: Issuer, paths, and credential blocks
//! - `runtime`: Retry, worker, and logging blocks

mod helpers;
mod issuer;
mod runtime;

pub use helpers::{
    get_first_arg_string, get_float_entry, get_int_entry, get_string_entry,
    get_unsigned_entry, offset_to_line_col,
};

pub use issuer::{parse_credential_source, parse_issuer_config, parse_paths_config};
pub use runtime::{parse_logging_config, parse_retry_policy, parse_worker_config};

use anyhow::Result;
use tracing::{trace, warn};

use crate::Config;

// ============================================================================
// Top-Level Document Parser
// ============================================================================

/// Convert a parsed KDL document to Config
pub fn parse_kdl_document(doc: ::kdl::KdlDocument) -> Result<Config> {
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "issuer" => {
                config.issuer = parse_issuer_config(node)?;
            }
            "paths" => {
                config.paths = parse_paths_config(node)?;
            }
            "credential" => {
                config.credential = Some(parse_credential_source(node)?);
            }
            "retry" => {
                config.retry = parse_retry_policy(node)?;
            }
            "workers" => {
                config.workers = parse_worker_config(node)?;
            }
            "logging" => {
                config.logging = parse_logging_config(node)?;
            }
            other => {
                warn!(block = %other, "Ignoring unknown configuration block");
            }
        }
    }

    trace!(
        mode = %config.issuer.mode,
        has_credential = config.credential.is_some(),
        "Parsed KDL configuration"
    );

    Ok(config)
}
