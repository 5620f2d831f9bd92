use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How the probe treats the peer's certificate chain.
///
/// The policy is all or nothing: with `ignore_self_signed` set the transport
/// accepts any chain and the CA fields are inert. Otherwise the system trust
/// store applies, extended by `ca_file` when one is supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPolicy {
    pub ignore_self_signed: bool,
    pub ca_file: Option<PathBuf>,
    pub ca_passphrase: Option<String>,
}

impl TrustPolicy {
    /// Resolve the raw CLI flags into a concrete policy.
    ///
    /// No I/O happens here. The CA bundle is read when the client is built,
    /// so a missing or malformed file surfaces as a connection-time failure.
    pub fn resolve(
        ignore_self_signed: bool,
        ca_file: Option<PathBuf>,
        ca_passphrase: Option<String>,
    ) -> Self {
        if ignore_self_signed {
            if ca_file.is_some() {
                log::warn!("ignoring CA bundle: self signed certs are being trusted anyway");
            }
            return TrustPolicy {
                ignore_self_signed: true,
                ca_file: None,
                ca_passphrase: None,
            };
        }
        TrustPolicy {
            ignore_self_signed: false,
            ca_file,
            ca_passphrase,
        }
    }

    /// Load the extra root certificates named by the policy.
    ///
    /// A plain file is parsed as a PEM bundle. With a passphrase the file is
    /// treated as an encrypted PKCS#12 archive and the contained certificate
    /// plus its chain become the extra roots.
    pub fn load_extra_roots(&self) -> Result<Vec<reqwest::Certificate>, BoxError> {
        let Some(path) = &self.ca_file else {
            return Ok(Vec::new());
        };
        let bytes = std::fs::read(path)?;

        match &self.ca_passphrase {
            Some(passphrase) => {
                let archive = openssl::pkcs12::Pkcs12::from_der(&bytes)?;
                let parsed = archive.parse2(passphrase)?;
                let mut roots = Vec::new();
                if let Some(cert) = parsed.cert {
                    roots.push(reqwest::Certificate::from_der(&cert.to_der()?)?);
                }
                if let Some(chain) = parsed.ca {
                    for cert in chain {
                        roots.push(reqwest::Certificate::from_der(&cert.to_der()?)?);
                    }
                }
                Ok(roots)
            }
            None => Ok(reqwest::Certificate::from_pem_bundle(&bytes)?),
        }
    }
}
