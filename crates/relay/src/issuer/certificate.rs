//! Issued certificate chains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("chain is not valid PEM: {0}")]
    Pem(#[from] pem::PemError),

    #[error("chain contains no certificate")]
    Empty,

    #[error("leaf certificate could not be parsed: {0}")]
    X509(String),

    #[error("leaf certificate expiry is out of range")]
    Expiry,
}

/// A signed certificate chain as produced by the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    /// Domain the certificate was issued for
    pub domain: String,
    /// Leaf first, followed by intermediates
    pub chain_pem: String,
    /// Issuing CA, as the leaf's issuer distinguished name
    pub ca: String,
    /// Leaf `notAfter`
    pub expires: DateTime<Utc>,
}

impl IssuedCertificate {
    /// Parse a full chain, taking the CA identity and expiry from the leaf.
    pub fn from_chain_pem(domain: &str, chain_pem: &str) -> Result<Self, CertificateError> {
        let blocks = pem::parse_many(chain_pem)?;
        let leaf = blocks
            .iter()
            .find(|block| block.tag() == "CERTIFICATE")
            .ok_or(CertificateError::Empty)?;

        let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents())
            .map_err(|e| CertificateError::X509(e.to_string()))?;

        let expires = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or(CertificateError::Expiry)?;

        Ok(Self {
            domain: domain.to_string(),
            chain_pem: chain_pem.to_string(),
            ca: cert.issuer().to_string(),
            expires,
        })
    }
}
