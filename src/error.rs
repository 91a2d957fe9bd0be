//! Error types for the probe.
//!
//! Two families, matching spec.md §7's propagation policy: `ConfigError`
//! is fatal and aborts before any group runs; `ProbeError` is always
//! recovered locally by the probe that raised it and is never propagated
//! past the probe's own task.

use thiserror::Error;

/// Errors that abort the whole run before any test group executes.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("test group {tag} is enabled but its config is malformed: {reason}")]
    MalformedGroup { tag: String, reason: String },
}

/// Errors raised while scheduling test groups.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("prerequisite cycle or missing prerequisite among remaining groups: {remaining:?}")]
    Cycle { remaining: Vec<String> },
}

/// A network error observed by a single probe. These are never propagated;
/// a probe catches its own `ProbeError` and writes the corresponding
/// failure sentinel into its result slot.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("socket create failed: {0}")]
    SocketCreate(#[source] std::io::Error),

    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("resolver failed: {0}")]
    Resolve(#[source] std::io::Error),

    #[error("tls error: {0}")]
    Tls(#[source] rustls::Error),

    #[error("server closed connection mid-handshake")]
    ConnectionClosed,

    #[error("SNI {sni:?} does not literally occur in the first ClientHello record")]
    SniNotInClientHello { sni: String },
}

impl ProbeError {
    /// True for the one TLS error that spec.md §4.6 maps to *success*:
    /// a `handshake_failure` alert received from the far end.
    pub fn is_benign_handshake_failure(&self) -> bool {
        matches!(
            self,
            ProbeError::Tls(rustls::Error::AlertReceived(
                rustls::AlertDescription::HandshakeFailure
            ))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_failure_alert_is_benign() {
        let err = ProbeError::Tls(rustls::Error::AlertReceived(rustls::AlertDescription::HandshakeFailure));
        assert!(err.is_benign_handshake_failure());
    }

    #[test]
    fn other_tls_alerts_are_not_benign() {
        let err = ProbeError::Tls(rustls::Error::AlertReceived(rustls::AlertDescription::BadCertificate));
        assert!(!err.is_benign_handshake_failure());
    }

    #[test]
    fn non_tls_errors_are_not_benign() {
        assert!(!ProbeError::ConnectionClosed.is_benign_handshake_failure());
    }
}
