//! CLI error types with miette diagnostics.
//!
//! Maps `devlink_api::Error` kinds into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use devlink_api::ErrorKind;
use devlink_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const SECURITY: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to device at {url}")]
    #[diagnostic(
        code(devlink::connection_failed),
        help("Check that the device is reachable and the host/port/protocol are right.")
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: devlink_api::Error,
    },

    #[error("Request to {url} timed out")]
    #[diagnostic(
        code(devlink::timeout),
        help("Increase the timeout with --timeout or check device responsiveness.")
    )]
    Timeout {
        url: String,
        #[source]
        source: devlink_api::Error,
    },

    #[error("Request to {url} failed")]
    #[diagnostic(code(devlink::request_failed))]
    RequestFailed {
        url: String,
        #[source]
        source: devlink_api::Error,
    },

    // ── Security ─────────────────────────────────────────────────────
    #[error("TLS setup or verification failed for {url}")]
    #[diagnostic(
        code(devlink::tls_error),
        help(
            "Use --insecure (-k) for self-signed devices, --ca-cert to trust a private CA,\n\
             or check that --pin matches the device certificate."
        )
    )]
    Tls {
        url: String,
        #[source]
        source: devlink_api::Error,
    },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed for {url}")]
    #[diagnostic(
        code(devlink::auth_failed),
        help(
            "Verify --username/--password (or DEVLINK_PASSWORD).\n\
             If the device only speaks one scheme, force it with --auth basic|digest."
        )
    )]
    AuthFailed {
        url: String,
        #[source]
        source: devlink_api::Error,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No device host configured for profile '{profile}'")]
    #[diagnostic(
        code(devlink::no_host),
        help(
            "Pass --host, set DEVLINK_HOST, or add [profiles.{profile}] to\n\
             {path}"
        )
    )]
    NoHost { profile: String, path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(devlink::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(devlink::config))]
    Config(#[from] ConfigError),

    // ── Response ─────────────────────────────────────────────────────
    #[error("Device answered with HTTP {status}")]
    #[diagnostic(code(devlink::http_status))]
    HttpStatus { status: u16 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(devlink::json), help("Check the --json argument and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Wrap a device error, choosing the variant from its kind.
    pub fn device(url: &str, source: devlink_api::Error) -> Self {
        let url = url.to_owned();
        match source.kind() {
            ErrorKind::Authentication => Self::AuthFailed { url, source },
            ErrorKind::Security => Self::Tls { url, source },
            ErrorKind::Network if source.code() == "request_timeout" => {
                Self::Timeout { url, source }
            }
            ErrorKind::Network => Self::ConnectionFailed { url, source },
            ErrorKind::Configuration => Self::Validation {
                field: "request".into(),
                reason: source.to_string(),
            },
            ErrorKind::Transport => Self::RequestFailed { url, source },
        }
    }

    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Tls { .. } => exit_code::SECURITY,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NoHost { .. } | Self::Validation { .. } | Self::Json(_) => exit_code::USAGE,
            Self::Config(ConfigError::Device(source)) if source.kind() == ErrorKind::Security => {
                exit_code::SECURITY
            }
            Self::Config(_) => exit_code::USAGE,
            Self::RequestFailed { .. } | Self::HttpStatus { .. } | Self::Io(_) => {
                exit_code::GENERAL
            }
        }
    }
}
