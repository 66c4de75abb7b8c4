use std::collections::BTreeMap;
use std::{sync::OnceLock, time::Duration};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::{Error, Result};

const USER_AGENT: &str = concat!("moira-notifier/", env!("CARGO_PKG_VERSION"));

/// Install the process-wide rustls crypto provider once.
///
/// reqwest is built without a default provider, so this must run before any
/// client is created.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the `reqwest::Client` used by senders and delivery checks.
///
/// A zero `request_timeout` leaves requests without a client-level deadline.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10));

    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    builder
        .build()
        .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))
}

/// Build a header map from configured name/value pairs.
///
/// Invalid pairs are skipped with a warning.
pub fn build_headers(pairs: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid HTTP header"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_provider_is_idempotent() {
        install_rustls_provider();
        install_rustls_provider();
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(Duration::from_secs(5)).is_ok());
        assert!(build_client(Duration::ZERO).is_ok());
    }

    #[test]
    fn test_build_headers_skips_invalid() {
        let pairs = BTreeMap::from([
            ("X-Token".to_string(), "secret".to_string()),
            ("bad header".to_string(), "x".to_string()),
        ]);
        let headers = build_headers(&pairs);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-token").unwrap(), "secret");
    }
}
