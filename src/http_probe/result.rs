use serde::Serialize;
use thiserror::Error;

/// The diagnostic document printed after a completed round trip.
#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub request: RequestReport,
    pub response: ResponseReport,
}

#[derive(Debug, Serialize)]
pub struct RequestReport {
    /// The outbound header block as transmitted, tunnel negotiation line
    /// included when the request was routed through a proxy.
    pub header: String,
    pub proxy: ProxyNegotiation,
}

/// Which intermediary, if any, the request was routed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProxyNegotiation {
    Direct,
    Proxied {
        url: String,
        credentials_attached: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct ResponseReport {
    pub status_code: u16,
    pub status_message: String,
    /// Strict-validation verdict on the peer's certificate, recorded even
    /// though the connection itself went through. `None` when the chain
    /// verifies or the destination was plain HTTP.
    pub authorization_error: Option<String>,
    pub headers: Vec<HeaderField>,
    pub http_version: String,
    pub body: String,
}

/// One response header field, kept in the order received.
#[derive(Debug, Serialize)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// Why the probe did not obtain a response.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The peer's chain failed validation under the active trust policy.
    #[error("the peer certificate chain could not be verified against the active trust policy")]
    CertificateUntrusted { source: reqwest::Error },

    /// Anything else: connection refused, DNS failure, timeout, malformed
    /// framing.
    #[error("the request did not complete")]
    Transport {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}
