use std::fmt::Write as _;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector as TokioTlsConnector;
use x509_parser::parse_x509_certificate;

use super::probe::{ProbeRequest, proxy_basic_auth};

/// Re-check the destination's certificate with strict validation, over the
/// same route the probe used, and report what a strict validator would have
/// rejected. `None` means the chain verifies, or the side check could not be
/// completed at all; it never fails the probe.
pub(super) async fn strict_authorization_check(request: &ProbeRequest) -> Option<String> {
    if !request.trust.ignore_self_signed {
        // The round trip was already strictly validated, CA bundle included;
        // a success under that policy reported no anomaly.
        return None;
    }
    let host = request.destination.host_str()?.to_string();
    let port = request.destination.port_or_known_default().unwrap_or(443);

    let stream = open_stream(request, &host, port).await?;
    let strict = native_tls::TlsConnector::builder().build().ok()?;
    match TokioTlsConnector::from(strict).connect(&host, stream).await {
        Ok(_) => None,
        Err(err) => {
            let mut verdict = err.to_string();
            if let Some(hint) = peer_chain_hint(request, &host, port).await {
                let _ = write!(verdict, " ({hint})");
            }
            Some(verdict)
        }
    }
}

/// Open a TCP stream to the destination, negotiating a CONNECT tunnel first
/// when the probe went through a proxy.
async fn open_stream(request: &ProbeRequest, host: &str, port: u16) -> Option<TcpStream> {
    let Some(proxy) = &request.proxy else {
        return TcpStream::connect((host, port)).await.ok();
    };

    if proxy.url.scheme() != "http" {
        log::debug!("skipping strict re-check: proxy scheme {} is not plain http", proxy.url.scheme());
        return None;
    }
    let proxy_host = proxy.url.host_str()?;
    let proxy_port = proxy.url.port_or_known_default().unwrap_or(8080);

    let mut stream = TcpStream::connect((proxy_host, proxy_port)).await.ok()?;
    let mut negotiation = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if proxy.credentials_attached() {
        let _ = write!(
            negotiation,
            "Proxy-Authorization: Basic {}\r\n",
            proxy_basic_auth(proxy)
        );
    }
    negotiation.push_str("\r\n");
    stream.write_all(negotiation.as_bytes()).await.ok()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    if !line.starts_with("HTTP/") || !line.contains(" 200") {
        log::debug!("proxy declined strict re-check tunnel: {}", line.trim());
        return None;
    }
    // Drain the remaining response head; the tunnel is raw after the blank line.
    loop {
        line.clear();
        let read = reader.read_line(&mut line).await.ok()?;
        if read == 0 {
            log::debug!("proxy closed the connection before the response head ended");
            return None;
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
    }
    Some(reader.into_inner())
}

/// Look at the certificate the peer actually presented and flag the one case
/// the strict error text does not spell out, a self-signed peer. Any other
/// cause (hostname mismatch, expiry, unknown issuer) is already named by the
/// strict failure itself. Uses a permissive handshake purely for inspection.
async fn peer_chain_hint(request: &ProbeRequest, host: &str, port: u16) -> Option<&'static str> {
    let stream = open_stream(request, host, port).await?;
    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_certs(true);
    builder.danger_accept_invalid_hostnames(true);
    let permissive = TokioTlsConnector::from(builder.build().ok()?);

    let tls_stream = permissive.connect(host, stream).await.ok()?;
    let cert_der = tls_stream
        .get_ref()
        .peer_certificate()
        .ok()
        .flatten()?
        .to_der()
        .ok()?;
    self_signed_hint(&cert_der)
}

fn self_signed_hint(cert_der: &[u8]) -> Option<&'static str> {
    let (_, parsed) = parse_x509_certificate(cert_der).ok()?;
    if parsed.subject().to_string() == parsed.issuer().to_string() {
        Some("peer certificate is self-signed")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_probe::probe::{ProxyConfig, USER_AGENT};
    use crate::trust::TrustPolicy;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use url::Url;

    fn tunneled_request(proxy_port: u16) -> ProbeRequest {
        ProbeRequest {
            destination: Url::parse("https://internal.example.com/").expect("valid test URL"),
            proxy: Some(ProxyConfig {
                url: Url::parse(&format!("http://127.0.0.1:{proxy_port}/"))
                    .expect("valid proxy URL"),
                username: None,
                password: None,
            }),
            trust: TrustPolicy::resolve(true, None, None),
            user_agent: USER_AGENT,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn tunnel_closed_after_status_line_does_not_hang() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let port = listener.local_addr().expect("local addr").port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 Connection established\r\n")
                .await;
            // Hang up without ever finishing the response head.
        });

        let request = tunneled_request(port);
        let stream = tokio::time::timeout(
            Duration::from_secs(2),
            open_stream(&request, "internal.example.com", 443),
        )
        .await
        .expect("open_stream must return once the proxy hangs up");
        assert!(stream.is_none());
    }

    #[tokio::test]
    async fn strict_round_trips_carry_no_authorization_error() {
        // Under a strict policy the main handshake already validated the
        // chain, CA bundle included; the side check must stay silent and
        // must not touch the network (the destination here refuses).
        let request = ProbeRequest {
            destination: Url::parse("https://127.0.0.1:1/").expect("valid test URL"),
            proxy: None,
            trust: TrustPolicy::resolve(false, Some("/etc/pki/corp-ca.pem".into()), None),
            user_agent: USER_AGENT,
            timeout: None,
        };
        assert_eq!(strict_authorization_check(&request).await, None);
    }

    fn make_cert(subject: &str, issuer: &str) -> Vec<u8> {
        use openssl::asn1::Asn1Time;
        use openssl::hash::MessageDigest;
        use openssl::pkey::PKey;
        use openssl::rsa::Rsa;
        use openssl::x509::{X509Builder, X509NameBuilder};

        let key = PKey::from_rsa(Rsa::generate(2048).expect("generate key")).expect("pkey");
        let mut subject_name = X509NameBuilder::new().expect("name builder");
        subject_name
            .append_entry_by_text("CN", subject)
            .expect("subject CN");
        let subject_name = subject_name.build();
        let mut issuer_name = X509NameBuilder::new().expect("name builder");
        issuer_name
            .append_entry_by_text("CN", issuer)
            .expect("issuer CN");
        let issuer_name = issuer_name.build();

        let mut builder = X509Builder::new().expect("x509 builder");
        builder.set_version(2).expect("version");
        builder.set_subject_name(&subject_name).expect("subject");
        builder.set_issuer_name(&issuer_name).expect("issuer");
        builder.set_pubkey(&key).expect("pubkey");
        builder
            .set_not_before(&Asn1Time::days_from_now(0).expect("now"))
            .expect("not before");
        builder
            .set_not_after(&Asn1Time::days_from_now(1).expect("tomorrow"))
            .expect("not after");
        builder.sign(&key, MessageDigest::sha256()).expect("sign");
        builder.build().to_der().expect("der")
    }

    #[test]
    fn self_signed_peer_gets_the_hint() {
        let der = make_cert("proxy.corp.example.com", "proxy.corp.example.com");
        assert_eq!(self_signed_hint(&der), Some("peer certificate is self-signed"));
    }

    #[test]
    fn ca_issued_peer_gets_no_hint() {
        // A chain that fails for another reason (expiry, hostname, unknown
        // issuer) is already described by the strict error text.
        let der = make_cert("proxy.corp.example.com", "Corp Root CA");
        assert_eq!(self_signed_hint(&der), None);
    }
}
