use std::fmt::Write as _;
use std::time::Duration;

use url::Url;

use super::result::{
    HeaderField, ProbeError, ProbeReport, ProxyNegotiation, RequestReport, ResponseReport,
};
use super::tls;
use crate::trust::TrustPolicy;

/// Fixed identifier the probe presents to servers and proxies.
pub const USER_AGENT: &str = "proxyprobe";

/// Forward proxy to route the request through.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn credentials_attached(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }
}

/// Immutable input for one probe. Constructed once, never mutated.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub destination: Url,
    pub proxy: Option<ProxyConfig>,
    pub trust: TrustPolicy,
    pub user_agent: &'static str,
    /// Connect/read timeout. `None` keeps the transport's stock behavior.
    pub timeout: Option<Duration>,
}

/// Perform exactly one GET to the destination, routed through the proxy if
/// one is configured, and normalize the outcome into a single report.
///
/// Every failure comes back as a classified `ProbeError` value; nothing is
/// printed here beyond debug traces.
pub async fn probe(request: &ProbeRequest) -> Result<ProbeReport, ProbeError> {
    let client = build_client(request)?;
    let header = request_header_block(request);
    let negotiation = match &request.proxy {
        Some(proxy) => ProxyNegotiation::Proxied {
            url: proxy.url.to_string(),
            credentials_attached: proxy.credentials_attached(),
        },
        None => ProxyNegotiation::Direct,
    };

    log::debug!("sending GET {}", request.destination);
    let response = client
        .get(request.destination.as_str())
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    let http_version = version_label(response.version());
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| HeaderField {
            name: name.as_str().to_string(),
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
        .collect();
    let body = response.text().await.map_err(classify)?;

    // What a strict validator would have said about the peer, even though
    // the connection went through under the active policy.
    let authorization_error = if request.destination.scheme() == "https" {
        tls::strict_authorization_check(request).await
    } else {
        None
    };

    Ok(ProbeReport {
        request: RequestReport {
            header,
            proxy: negotiation,
        },
        response: ResponseReport {
            status_code: status.as_u16(),
            status_message: status.canonical_reason().unwrap_or_default().to_string(),
            authorization_error,
            headers,
            http_version,
            body,
        },
    })
}

fn build_client(request: &ProbeRequest) -> Result<reqwest::Client, ProbeError> {
    let mut builder = reqwest::Client::builder().user_agent(request.user_agent);

    if request.trust.ignore_self_signed {
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    } else {
        let roots = request
            .trust
            .load_extra_roots()
            .map_err(|source| ProbeError::Transport { source })?;
        log::debug!("extending system trust store with {} root(s)", roots.len());
        for root in roots {
            builder = builder.add_root_certificate(root);
        }
    }

    match &request.proxy {
        Some(proxy) => {
            let mut routed =
                reqwest::Proxy::all(proxy.url.as_str()).map_err(|source| ProbeError::Transport {
                    source: source.into(),
                })?;
            if let Some(username) = &proxy.username {
                routed = routed.basic_auth(username, proxy.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(routed);
        }
        None => {
            // Direct mode is explicit: environment proxy variables are ignored.
            builder = builder.no_proxy();
        }
    }

    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }

    builder.build().map_err(|source| ProbeError::Transport {
        source: source.into(),
    })
}

/// Serialize the header block the transport puts on the wire for this
/// request: a CONNECT negotiation plus the tunneled GET for https via a
/// proxy, an absolute-form GET for plain http via a proxy, and an
/// origin-form GET when no proxy is in play.
fn request_header_block(request: &ProbeRequest) -> String {
    let dest = &request.destination;
    let host = dest.host_str().unwrap_or_default();
    let port = dest.port_or_known_default().unwrap_or(80);
    let host_header = match dest.port() {
        Some(explicit) => format!("{host}:{explicit}"),
        None => host.to_string(),
    };
    let mut origin_form = dest.path().to_string();
    if let Some(query) = dest.query() {
        origin_form.push('?');
        origin_form.push_str(query);
    }

    let mut block = String::new();
    match &request.proxy {
        Some(proxy) if dest.scheme() == "https" => {
            let _ = write!(block, "CONNECT {host}:{port} HTTP/1.1\r\n");
            let _ = write!(block, "Host: {host}:{port}\r\n");
            if proxy.credentials_attached() {
                let _ = write!(
                    block,
                    "Proxy-Authorization: Basic {}\r\n",
                    proxy_basic_auth(proxy)
                );
            }
            block.push_str("\r\n");
            let _ = write!(block, "GET {origin_form} HTTP/1.1\r\n");
            let _ = write!(block, "Host: {host_header}\r\n");
            let _ = write!(block, "User-Agent: {}\r\n", request.user_agent);
            block.push_str("\r\n");
        }
        Some(proxy) => {
            // Plain http is forwarded, not tunneled: absolute-form target.
            let _ = write!(block, "GET {dest} HTTP/1.1\r\n");
            let _ = write!(block, "Host: {host_header}\r\n");
            let _ = write!(block, "User-Agent: {}\r\n", request.user_agent);
            if proxy.credentials_attached() {
                let _ = write!(
                    block,
                    "Proxy-Authorization: Basic {}\r\n",
                    proxy_basic_auth(proxy)
                );
            }
            block.push_str("\r\n");
        }
        None => {
            let _ = write!(block, "GET {origin_form} HTTP/1.1\r\n");
            let _ = write!(block, "Host: {host_header}\r\n");
            let _ = write!(block, "User-Agent: {}\r\n", request.user_agent);
            block.push_str("\r\n");
        }
    }
    block
}

pub(super) fn proxy_basic_auth(proxy: &ProxyConfig) -> String {
    let credentials = format!(
        "{}:{}",
        proxy.username.as_deref().unwrap_or_default(),
        proxy.password.as_deref().unwrap_or_default()
    );
    openssl::base64::encode_block(credentials.as_bytes())
}

/// Sort a transport failure into the two-case taxonomy: certificate trust
/// rejection versus everything else.
fn classify(err: reqwest::Error) -> ProbeError {
    if is_certificate_error(&err) {
        ProbeError::CertificateUntrusted { source: err }
    } else {
        ProbeError::Transport { source: err.into() }
    }
}

fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.downcast_ref::<native_tls::Error>().is_some() {
            return cause.to_string().to_lowercase().contains("certificate");
        }
        let text = cause.to_string().to_lowercase();
        if text.contains("certificate verify failed")
            || text.contains("unable to get local issuer certificate")
            || text.contains("self-signed certificate")
            || text.contains("self signed certificate")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

fn version_label(version: reqwest::Version) -> String {
    match version {
        reqwest::Version::HTTP_09 => "HTTP/0.9".to_string(),
        reqwest::Version::HTTP_10 => "HTTP/1.0".to_string(),
        reqwest::Version::HTTP_11 => "HTTP/1.1".to_string(),
        reqwest::Version::HTTP_2 => "HTTP/2.0".to_string(),
        reqwest::Version::HTTP_3 => "HTTP/3.0".to_string(),
        _ => "UNKNOWN".to_string(),
    }
}
