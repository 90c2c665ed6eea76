//! Certificate-signing request parsing.

use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

/// PEM tags accepted for a PKCS#10 request.
const CSR_TAGS: &[&str] = &["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

/// Reasons a CSR is rejected.
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("CSR is not valid PEM: {0}")]
    Pem(#[from] pem::PemError),

    #[error("expected a CERTIFICATE REQUEST PEM block, found '{0}'")]
    UnexpectedTag(String),

    #[error("CSR is not a valid PKCS#10 request: {0}")]
    Der(String),

    #[error("CSR names no domain (no subject CN and no DNS subjectAltName)")]
    MissingDomain,

    #[error("CSR domain '{0}' is not a valid DNS hostname")]
    InvalidDomain(String),
}

/// Longest DNS name, in octets, without the trailing dot.
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A parsed, validated certificate-signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSigningRequest {
    pem: String,
    domain: String,
}

impl CertificateSigningRequest {
    /// Parse a PEM-encoded PKCS#10 request.
    ///
    /// The subject domain is the subject common name, or the first DNS
    /// subjectAltName when there is no CN.
    pub fn parse(pem_text: &str) -> Result<Self, CsrError> {
        let block = pem::parse(pem_text)?;
        if !CSR_TAGS.contains(&block.tag()) {
            return Err(CsrError::UnexpectedTag(block.tag().to_string()));
        }

        let (_, request) = X509CertificationRequest::from_der(block.contents())
            .map_err(|e| CsrError::Der(e.to_string()))?;

        let domain = common_name(&request)
            .or_else(|| first_dns_name(&request))
            .ok_or(CsrError::MissingDomain)?;
        if !is_valid_domain(&domain) {
            return Err(CsrError::InvalidDomain(domain));
        }

        Ok(Self {
            pem: pem_text.to_string(),
            domain,
        })
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Domain the certificate is issued for.
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

fn common_name(request: &X509CertificationRequest<'_>) -> Option<String> {
    request
        .certification_request_info
        .subject
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .map(str::trim)
        .find(|cn| !cn.is_empty())
        .map(str::to_string)
}

fn first_dns_name(request: &X509CertificationRequest<'_>) -> Option<String> {
    request.requested_extensions()?.find_map(|ext| match ext {
        ParsedExtension::SubjectAlternativeName(san) => {
            san.general_names.iter().find_map(|name| match name {
                GeneralName::DNSName(dns) if !dns.is_empty() => Some(dns.to_string()),
                _ => None,
            })
        }
        _ => None,
    })
}

/// Whether `domain` is a DNS hostname, optionally a `*.` wildcard.
///
/// The domain names a directory under the output root, so anything other
/// than letter-digit-hyphen labels is refused.
pub fn is_valid_domain(domain: &str) -> bool {
    let name = domain.strip_prefix("*.").unwrap_or(domain);
    if name.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return false;
    }
    name.split('.').all(is_valid_label)
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Stable digest identifying a CSR as delivered.
///
/// Surrounding whitespace is ignored so a re-delivery with a trailing
/// newline is still recognised.
pub fn csr_digest(pem_text: &str) -> String {
    hex::encode(Sha256::digest(pem_text.trim().as_bytes()))
}
