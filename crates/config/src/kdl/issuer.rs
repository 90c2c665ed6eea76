//! Issuer, paths, and credential KDL parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use certrelay_common::types::IssuerMode;

use crate::{
    default_binary, default_command_timeout_secs, default_credential_path, default_csr_path,
    default_dns_plugin, default_environment_root, default_output_root, CredentialSource,
    IssuerConfig, PathsConfig,
};

use super::helpers::{get_first_arg_string, get_string_entry, get_unsigned_entry};

/// Parse issuer configuration block
pub fn parse_issuer_config(node: &kdl::KdlNode) -> Result<IssuerConfig> {
    trace!("Parsing issuer configuration block");

    let mode = match get_string_entry(node, "mode") {
        Some(s) => IssuerMode::parse(&s).ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid issuer mode '{}'. Valid modes: test, production",
                s
            )
        })?,
        None => IssuerMode::default(),
    };

    let config = IssuerConfig {
        binary: get_string_entry(node, "binary").unwrap_or_else(default_binary),
        mode,
        dns_plugin: get_string_entry(node, "dns-plugin").unwrap_or_else(default_dns_plugin),
        email: get_string_entry(node, "email"),
        server: get_string_entry(node, "server"),
        propagation_seconds: get_unsigned_entry(node, "propagation-seconds")?,
        command_timeout_secs: get_unsigned_entry(node, "command-timeout-secs")?
            .unwrap_or_else(default_command_timeout_secs),
    };

    trace!(
        binary = %config.binary,
        mode = %config.mode,
        dns_plugin = %config.dns_plugin,
        "Parsed issuer configuration"
    );

    Ok(config)
}

/// Parse paths configuration block
pub fn parse_paths_config(node: &kdl::KdlNode) -> Result<PathsConfig> {
    trace!("Parsing paths configuration block");

    Ok(PathsConfig {
        environment_root: get_string_entry(node, "environment-root")
            .map(PathBuf::from)
            .unwrap_or_else(default_environment_root),
        csr: get_string_entry(node, "csr")
            .map(PathBuf::from)
            .unwrap_or_else(default_csr_path),
        credential: get_string_entry(node, "credential")
            .map(PathBuf::from)
            .unwrap_or_else(default_credential_path),
        output_root: get_string_entry(node, "output-root")
            .map(PathBuf::from)
            .unwrap_or_else(default_output_root),
    })
}

/// Parse credential source block
///
/// Accepts `credential "/path"`, `credential { file "/path" }`, or
/// `credential { json "..." }`.
pub fn parse_credential_source(node: &kdl::KdlNode) -> Result<CredentialSource> {
    if let Some(path) = get_first_arg_string(node) {
        return Ok(CredentialSource::File(PathBuf::from(path)));
    }

    let file = get_string_entry(node, "file");
    let json = get_string_entry(node, "json");

    match (file, json) {
        (Some(path), None) => Ok(CredentialSource::File(PathBuf::from(path))),
        (None, Some(json)) => Ok(CredentialSource::Json(json)),
        (Some(_), Some(_)) => Err(anyhow::anyhow!(
            "Credential block must set only one of 'file' or 'json'"
        )),
        (None, None) => Err(anyhow::anyhow!(
            "Credential block requires a source, e.g., credential {{ file \"/etc/certrelay/creds.json\" }}"
        )),
    }
}
