//! Clap derive structures for the `devlink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use devlink_api::{AuthMode, Method, Protocol};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// devlink -- talk to HTTP/HTTPS network devices
#[derive(Debug, Parser)]
#[command(
    name = "devlink",
    version,
    about = "Send authenticated requests to network device APIs",
    long_about = "Send authenticated requests to network device CGI/REST APIs.\n\n\
        Handles Basic/Digest negotiation, certificate pinning and mutual TLS,\n\
        reading device profiles from the devlink config file.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "DEVLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Device profile to use
    #[arg(long, short = 'p', env = "DEVLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Device host name or IP (overrides profile)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Device port (defaults to 80/443 by protocol)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Wire protocol
    #[arg(long, global = true)]
    pub protocol: Option<ProtocolArg>,

    /// Username for device authentication
    #[arg(long, short = 'u', global = true)]
    pub username: Option<String>,

    /// Password for device authentication
    #[arg(long, env = "DEVLINK_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Authentication scheme
    #[arg(long, global = true)]
    pub auth: Option<AuthArg>,

    /// Skip certificate chain verification (pins still apply)
    #[arg(long, short = 'k', global = true, conflicts_with = "ca_cert")]
    pub insecure: bool,

    /// Trust only the CA certificates in this PEM file
    #[arg(long, global = true)]
    pub ca_cert: Option<PathBuf>,

    /// Required SHA-256 certificate fingerprint (hex, optional SHA256: prefix)
    #[arg(long, global = true)]
    pub pin: Option<String>,

    /// Client certificate (PEM) for mutual TLS
    #[arg(long, global = true, requires = "client_key")]
    pub client_cert: Option<PathBuf>,

    /// Client private key (PEM) for mutual TLS
    #[arg(long, global = true, requires = "client_cert")]
    pub client_key: Option<PathBuf>,

    /// Connect and read timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<f64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProtocolArg {
    Http,
    Https,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Http => Self::Http,
            ProtocolArg::Https => Self::Https,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AuthArg {
    /// Probe with Basic, switch to Digest when challenged
    Auto,
    Basic,
    Digest,
}

impl From<AuthArg> for AuthMode {
    fn from(arg: AuthArg) -> Self {
        match arg {
            AuthArg::Auto => Self::Auto,
            AuthArg::Basic => Self::Basic,
            AuthArg::Digest => Self::Digest,
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one request and print the response
    #[command(alias = "req", alias = "r")]
    Request(RequestArgs),

    /// GET a path and report status and detected auth scheme
    Probe(ProbeArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS)
    pub method: Method,

    /// Path relative to the device root, e.g. /axis-cgi/param.cgi
    pub path: String,

    /// Query parameter (repeatable)
    #[arg(long = "query", short = 'q', value_name = "KEY=VALUE", value_parser = parse_query)]
    pub query: Vec<(String, String)>,

    /// Extra header (repeatable)
    #[arg(long = "header", short = 'H', value_name = "NAME: VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// JSON request body
    #[arg(long, conflicts_with = "data")]
    pub json: Option<String>,

    /// Raw request body
    #[arg(long, short = 'd')]
    pub data: Option<String>,

    /// Content type for --data
    #[arg(long, default_value = "text/plain", requires = "data")]
    pub content_type: String,

    /// Bypass the shared session and auth cache
    #[arg(long)]
    pub isolated: bool,

    /// Print the status line and response headers before the body
    #[arg(long, short = 'i')]
    pub include: bool,

    /// Exit non-zero when the device answers with status >= 400
    #[arg(long, short = 'f')]
    pub fail: bool,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Path to GET
    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

// ── Value parsers ────────────────────────────────────────────────────

fn parse_query(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected 'Name: value', got '{raw}'"))
}
