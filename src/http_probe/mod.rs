pub mod probe;
pub mod result;
mod tls;

pub use probe::{ProbeRequest, ProxyConfig, USER_AGENT, probe};
pub use result::{ProbeError, ProbeReport};

use std::fmt::Write;

/// Renders an error together with its source chain for the console.
pub fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, "\n\nCaused by: {}", src);
        err = src;
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_walks_the_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ProbeError::Transport {
            source: Box::new(inner),
        };
        let text = report(&err);
        assert!(text.starts_with("the request did not complete"));
        assert!(text.contains("Caused by: refused"));
    }
}
