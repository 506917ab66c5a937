use std::error::Error as StdError;
use std::io;

use thiserror::Error;

use crate::tls::PinMismatch;

/// Coarse classification of a failure, used by callers to decide whether
/// to retry, fall back to another protocol, or surface the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused/reset, DNS failure, timeout, closed client.
    Network,
    /// TLS handshake, certificate verification, pin mismatch, unreadable key material.
    Security,
    /// Missing or rejected credentials.
    Authentication,
    /// Invalid construction input (host, port, path, fingerprint, headers).
    Configuration,
    /// Any other I/O-level failure.
    Transport,
}

/// Top-level error type for the `devlink-api` crate.
///
/// Request-time errors never escape [`DeviceClient::request`](crate::DeviceClient::request);
/// they are carried inside a failed [`TransportResult`](crate::TransportResult).
/// Construction-time errors (config builders, endpoints, pool creation)
/// are returned directly.
#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ───────────────────────────────────────────────
    /// A configuration value was rejected at construction time.
    #[error("Invalid {field}: {reason}")]
    Configuration { field: &'static str, reason: String },

    /// A caller-supplied header name or value is not valid HTTP.
    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, TLS, ...).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The client was closed before or while the request was issued.
    #[error("Client is closed -- no connection pool available")]
    Closed,

    /// The client's I/O runtime could not be started.
    #[error("Failed to start I/O runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The JSON payload could not be encoded.
    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    // ── Security ────────────────────────────────────────────────────
    /// Certificate material could not be loaded or the TLS setup was rejected.
    #[error("TLS error: {message}")]
    Tls {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    // ── Authentication ──────────────────────────────────────────────
    /// The device rejected the credentials (or a Digest answer could not be built).
    #[error("Authentication failed: {message}")]
    Authentication { message: String, status: Option<u16> },

    /// The device demanded authentication but no credentials are configured.
    #[error("Device requires authentication but no credentials are configured")]
    CredentialsRequired,
}

impl Error {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn tls_caused_by(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Tls {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Classify this error.
    ///
    /// Transport errors are inspected through their source chain: a
    /// `rustls::Error` anywhere in the chain makes the failure a security
    /// failure even when reqwest reports it as a connect error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } | Self::InvalidHeader { .. } => ErrorKind::Configuration,
            Self::Transport(e) => classify_transport(e),
            Self::Closed => ErrorKind::Network,
            Self::InvalidUrl(_) | Self::Encode(_) | Self::Runtime(_) => ErrorKind::Transport,
            Self::Tls { .. } => ErrorKind::Security,
            Self::Authentication { .. } | Self::CredentialsRequired => ErrorKind::Authentication,
        }
    }

    /// Stable snake_case code for this error, suitable for logs and scripts.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "invalid_configuration",
            Self::InvalidHeader { .. } => "invalid_header",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Transport(e) => transport_code(e),
            Self::Closed => "client_closed",
            Self::Encode(_) => "invalid_body",
            Self::Runtime(_) => "runtime_unavailable",
            Self::Tls { .. } => "ssl_error",
            Self::Authentication { .. } => "authentication_failed",
            Self::CredentialsRequired => "credentials_required",
        }
    }

    /// HTTP status attached to the failure, if the device answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } => *status,
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` if the request timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// Returns `true` if this is a transient error a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => {
                classify_transport(e) == ErrorKind::Network && (e.is_timeout() || e.is_connect())
            }
            _ => false,
        }
    }

    /// Returns `true` if the failure came from a certificate pin mismatch.
    pub fn is_pin_mismatch(&self) -> bool {
        self.code() == "cert_fingerprint_mismatch"
    }
}

// ── Transport classification ─────────────────────────────────────────

fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Network
    } else if tls_failure(err).is_some() {
        ErrorKind::Security
    } else if err.is_connect() || io_kind(err).is_some() {
        ErrorKind::Network
    } else {
        ErrorKind::Transport
    }
}

fn transport_code(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        return "request_timeout";
    }
    if let Some(failure) = tls_failure(err) {
        return match failure {
            TlsFailure::PinMismatch => "cert_fingerprint_mismatch",
            TlsFailure::Other => "ssl_error",
        };
    }
    match io_kind(err) {
        Some(io::ErrorKind::ConnectionRefused) => "connection_refused",
        Some(io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted) => {
            "connection_reset"
        }
        Some(io::ErrorKind::TimedOut) => "request_timeout",
        _ if err.is_connect() => "connection_error",
        _ => "request_failed",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsFailure {
    PinMismatch,
    Other,
}

/// Walk the source chain looking for a TLS failure.
///
/// `io::Error::source` skips the wrapped error itself, so io errors are
/// opened with `get_ref` before moving on.
fn tls_failure(err: &(dyn StdError + 'static)) -> Option<TlsFailure> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            return Some(rustls_failure(tls));
        }
        if e.downcast_ref::<PinMismatch>().is_some() {
            return Some(TlsFailure::PinMismatch);
        }
        if let Some(inner) = e.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
            if let Some(tls) = inner.downcast_ref::<rustls::Error>() {
                return Some(rustls_failure(tls));
            }
            if inner.downcast_ref::<PinMismatch>().is_some() {
                return Some(TlsFailure::PinMismatch);
            }
        }
        current = e.source();
    }

    // Some connector layers flatten the rustls error into a message.
    let text = chain_text(err);
    if text.contains("certificate fingerprint mismatch") {
        Some(TlsFailure::PinMismatch)
    } else if RUSTLS_WORDING.iter().any(|phrase| text.contains(phrase)) {
        Some(TlsFailure::Other)
    } else {
        None
    }
}

/// Prefixes of `rustls::Error` messages that survive flattening.
const RUSTLS_WORDING: &[&str] = &[
    "invalid peer certificate",
    "received fatal alert",
    "peer is incompatible",
    "peer misbehaved",
    "peer sent no certificates",
];

fn rustls_failure(err: &rustls::Error) -> TlsFailure {
    if let rustls::Error::InvalidCertificate(rustls::CertificateError::Other(other)) = err {
        if other.0.downcast_ref::<PinMismatch>().is_some() {
            return TlsFailure::PinMismatch;
        }
    }
    TlsFailure::Other
}

fn io_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

fn chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = String::new();
    let mut current = Some(err);
    while let Some(e) = current {
        text.push_str(&e.to_string().to_ascii_lowercase());
        text.push('\n');
        current = e.source();
    }
    text
}
