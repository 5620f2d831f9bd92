use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use url::Url;

pub mod http_probe;
pub mod trust;

use http_probe::{ProbeError, ProbeRequest, ProxyConfig, USER_AGENT, probe, report};
use trust::TrustPolicy;

/// A triage tool for validating your proxy settings. It will attempt to
/// egress traffic through your proxy and will print as many details as
/// possible to assist with debug.
#[derive(Debug, Parser)]
#[command(name = "proxyprobe", version)]
struct Cli {
    /// Destination to fetch, e.g. https://httpbin.org/get
    #[arg(short, long, default_value = "https://httpbin.org/get")]
    dest: Url,

    /// Forward proxy, e.g. http://my.corporate.proxy.example.com/
    /// (omit for a direct request)
    #[arg(short, long)]
    proxy: Option<Url>,

    /// Stop ignoring self signed certs. They are ignored by default because
    /// it is unlikely that your proxy is expressing officially signed certs.
    /// If you set this you probably need --cafile, depending on your chain.
    #[arg(
        short = 'i',
        long = "ignoreselfsigned",
        action = clap::ArgAction::SetFalse
    )]
    ignore_self_signed: bool,

    /// Proxy username, e.g. user@example.com
    #[arg(short, long)]
    user: Option<String>,

    /// Proxy password (IMPORTANT: please clear your shell history if you use
    /// this)
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// CA bundle to trust, /path/to/cafile.cer. Ignored unless
    /// --ignoreselfsigned is set: either you are ignoring certs or you
    /// supply ones that are not self signed.
    #[arg(short, long)]
    cafile: Option<PathBuf>,

    /// Passphrase for an encrypted (PKCS#12) CA bundle
    #[arg(long)]
    ca_passphrase: Option<String>,

    /// Connect/read timeout in seconds (default: the transport's stock
    /// socket timeout)
    #[arg(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let trust = TrustPolicy::resolve(cli.ignore_self_signed, cli.cafile, cli.ca_passphrase);
    let proxy = cli.proxy.map(|url| ProxyConfig {
        url,
        username: cli.user,
        password: cli.password,
    });
    let request = ProbeRequest {
        destination: cli.dest,
        proxy,
        trust,
        user_agent: USER_AGENT,
        timeout: cli.timeout.map(Duration::from_secs),
    };

    log::debug!(
        "probing {} ({})",
        request.destination,
        match &request.proxy {
            Some(proxy) => format!("via {}", proxy.url),
            None => "direct".to_string(),
        }
    );

    match probe(&request).await {
        Ok(outcome) => match serde_json::to_string_pretty(&outcome) {
            Ok(document) => println!("{document}"),
            Err(err) => eprintln!("failed to render the diagnostic document: {err}"),
        },
        Err(err @ ProbeError::CertificateUntrusted { .. }) => {
            eprintln!(
                "ERROR: Your proxy is probably expressing a self signed cert. You either \
                 need to ignore self signed certs (the default) or supply a CA file that \
                 isn't self signed."
            );
            eprintln!("{}", report(&err));
        }
        Err(err) => eprintln!("{}", report(&err)),
    }

    // Any completed probe, success or classified failure, exits zero.
    ExitCode::SUCCESS
}
