// ── Runtime connection configuration ──
//
// These types describe *how* to reach one device. They carry credential
// data and connection tuning, but never touch disk. Config loading lives
// in `devlink-config`; the CLI or a feature facade builds a `DeviceConfig`
// and hands it to `DeviceClient::new`.

use std::fmt;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::tls::Fingerprint;

/// Default connect and read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pool sizing (number of pools, idle connections kept per pool).
pub const DEFAULT_POOL_SIZE: usize = 10;

// ── Enumerations ─────────────────────────────────────────────────────

/// Wire protocol used to reach the device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// URL scheme for this protocol.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Port used when none is configured.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    pub fn is_secure(self) -> bool {
        self == Self::Https
    }
}

/// Which authentication scheme to use.
///
/// `Auto` probes the device once (Basic first, Digest on challenge) and
/// caches the answer per target.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AuthMode {
    #[default]
    Auto,
    Basic,
    Digest,
}

/// Certificate verification strategy (`verify_ssl` = true / false / CA path).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Verify {
    /// Accept any certificate. Pins, when configured, are still enforced.
    Disabled,
    /// Use the bundled web PKI roots.
    #[default]
    System,
    /// Trust only the CA certificates in this PEM bundle.
    CaBundle(PathBuf),
}

impl From<bool> for Verify {
    fn from(verify: bool) -> Self {
        if verify { Self::System } else { Self::Disabled }
    }
}

// ── Credentials & target ─────────────────────────────────────────────

/// Username/password pair. The password is never printed.
#[derive(Debug, Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<SecretString>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }
}

/// A (host, port) pair identifying one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ── SSL configuration ────────────────────────────────────────────────

/// Client certificate and key (PEM files) for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// TLS settings. Only consulted when the protocol is HTTPS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslConfig {
    verify: Verify,
    pinned_fingerprint: Option<Fingerprint>,
    client_identity: Option<ClientIdentity>,
}

impl SslConfig {
    pub fn verify(&self) -> &Verify {
        &self.verify
    }

    pub fn pinned_fingerprint(&self) -> Option<&Fingerprint> {
        self.pinned_fingerprint.as_ref()
    }

    pub fn client_identity(&self) -> Option<&ClientIdentity> {
        self.client_identity.as_ref()
    }
}

// ── Tuning ───────────────────────────────────────────────────────────

/// Connect and read timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Idle limit while waiting on the device: first for the response
    /// head, then between body reads. A device that keeps trickling
    /// bytes is not cut off; use a per-request timeout for a hard deadline.
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_TIMEOUT,
            read: DEFAULT_TIMEOUT,
        }
    }
}

/// Connection pool sizing.
///
/// `max_size` is the number of idle keep-alive sockets the client holds.
/// `connections` is validated but otherwise unused: a client only ever
/// talks to one host, so it always needs exactly one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub connections: usize,
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connections: DEFAULT_POOL_SIZE,
            max_size: DEFAULT_POOL_SIZE,
        }
    }
}

// ── DeviceConfig ─────────────────────────────────────────────────────

/// Everything needed to talk to a single device.
///
/// Immutable once built. Start from [`DeviceConfig::http`] or
/// [`DeviceConfig::https`]:
///
/// ```
/// use devlink_api::{AuthMode, DeviceConfig, Verify};
///
/// let config = DeviceConfig::https("192.168.0.90")
///     .credentials("root", "pass".to_string())
///     .verify(Verify::Disabled)
///     .auth_mode(AuthMode::Digest)
///     .build()
///     .unwrap();
/// assert_eq!(config.base_url().as_str(), "https://192.168.0.90/");
/// ```
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    host: String,
    port: u16,
    protocol: Protocol,
    credentials: Option<Credentials>,
    auth_mode: AuthMode,
    ssl: SslConfig,
    timeouts: Timeouts,
    pool: PoolConfig,
    base_url: Url,
}

impl DeviceConfig {
    /// Builder for a plain-HTTP device. SSL settings given to this builder
    /// are accepted but never consulted.
    pub fn http(host: impl Into<String>) -> DeviceConfigBuilder {
        DeviceConfigBuilder::new(host.into(), Protocol::Http)
    }

    /// Builder for an HTTPS device (system roots, no pin by default).
    pub fn https(host: impl Into<String>) -> DeviceConfigBuilder {
        DeviceConfigBuilder::new(host.into(), Protocol::Https)
    }

    /// Builder for either protocol.
    pub fn builder(host: impl Into<String>, protocol: Protocol) -> DeviceConfigBuilder {
        DeviceConfigBuilder::new(host.into(), protocol)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn ssl(&self) -> &SslConfig {
        &self.ssl
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn pool(&self) -> PoolConfig {
        self.pool
    }

    /// Device root URL, e.g. `https://camera.local/` (default ports omitted).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The (host, port) pair auth state is cached under.
    pub fn target(&self) -> Target {
        Target::new(self.host.clone(), self.port)
    }
}

/// Builder for [`DeviceConfig`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
#[must_use]
pub struct DeviceConfigBuilder {
    host: String,
    protocol: Protocol,
    port: Option<u16>,
    credentials: Option<Credentials>,
    auth_mode: AuthMode,
    verify: Verify,
    pinned_fingerprint: Option<String>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    timeouts: Timeouts,
    pool: PoolConfig,
}

impl DeviceConfigBuilder {
    fn new(host: String, protocol: Protocol) -> Self {
        Self {
            host,
            protocol,
            port: None,
            credentials: None,
            auth_mode: AuthMode::default(),
            verify: Verify::default(),
            pinned_fingerprint: None,
            client_cert: None,
            client_key: None,
            timeouts: Timeouts::default(),
            pool: PoolConfig::default(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<SecretString>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    pub fn verify(mut self, verify: impl Into<Verify>) -> Self {
        self.verify = verify.into();
        self
    }

    /// Trust only the CA certificates in this PEM bundle.
    pub fn ca_bundle(self, path: impl Into<PathBuf>) -> Self {
        self.verify(Verify::CaBundle(path.into()))
    }

    /// Pin the device certificate's SHA-256 fingerprint.
    pub fn pinned_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.pinned_fingerprint = Some(fingerprint.into());
        self
    }

    /// Present this certificate/key pair for mutual TLS.
    pub fn client_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    pub fn client_cert_path(mut self, cert: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self
    }

    pub fn client_key_path(mut self, key: impl Into<PathBuf>) -> Self {
        self.client_key = Some(key.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    /// See [`Timeouts::read`]. This is not a total request deadline.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.read = timeout;
        self
    }

    /// Must be at least 1. Has no effect on the pool, which is always a
    /// single per-host pool sized by [`pool_maxsize`](Self::pool_maxsize).
    pub fn pool_connections(mut self, count: usize) -> Self {
        self.pool.connections = count;
        self
    }

    pub fn pool_maxsize(mut self, size: usize) -> Self {
        self.pool.max_size = size;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<DeviceConfig, Error> {
        let host = normalize_host(&self.host)?;
        let port = self.port.unwrap_or_else(|| self.protocol.default_port());
        if port == 0 {
            return Err(Error::config("port", "must be between 1 and 65535"));
        }

        if let Some(credentials) = &self.credentials {
            if credentials.username().is_empty() {
                return Err(Error::config("username", "must not be empty"));
            }
        }

        if self.timeouts.connect.is_zero() {
            return Err(Error::config("connect_timeout", "must be greater than zero"));
        }
        if self.timeouts.read.is_zero() {
            return Err(Error::config("read_timeout", "must be greater than zero"));
        }
        if self.pool.connections == 0 {
            return Err(Error::config("pool_connections", "must be at least 1"));
        }
        if self.pool.max_size == 0 {
            return Err(Error::config("pool_maxsize", "must be at least 1"));
        }

        // Plain HTTP never reads TLS material, so it is neither checked
        // nor kept.
        let ssl = if self.protocol.is_secure() {
            ssl_config(
                self.verify,
                self.pinned_fingerprint.as_deref(),
                self.client_cert,
                self.client_key,
            )?
        } else {
            SslConfig::default()
        };

        let authority = if host.contains(':') {
            format!("[{host}]")
        } else {
            host.clone()
        };
        let base_url = Url::parse(&format!(
            "{}://{authority}:{port}/",
            self.protocol.scheme()
        ))
        .map_err(|e| Error::config("host", format!("'{host}' is not a valid host: {e}")))?;

        Ok(DeviceConfig {
            host,
            port,
            protocol: self.protocol,
            credentials: self.credentials,
            auth_mode: self.auth_mode,
            ssl,
            timeouts: self.timeouts,
            pool: self.pool,
            base_url,
        })
    }
}

fn ssl_config(
    verify: Verify,
    pinned_fingerprint: Option<&str>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
) -> Result<SslConfig, Error> {
    let pinned_fingerprint = pinned_fingerprint
        .map(str::parse::<Fingerprint>)
        .transpose()
        .map_err(|e| Error::config("pinned_fingerprint", e.to_string()))?;

    let client_identity = match (client_cert, client_key) {
        (Some(cert_path), Some(key_path)) => Some(ClientIdentity {
            cert_path,
            key_path,
        }),
        (None, None) => None,
        (Some(_), None) => {
            return Err(Error::config(
                "client_key_path",
                "required when client_cert_path is set",
            ));
        }
        (None, Some(_)) => {
            return Err(Error::config(
                "client_cert_path",
                "required when client_key_path is set",
            ));
        }
    };

    Ok(SslConfig {
        verify,
        pinned_fingerprint,
        client_identity,
    })
}

/// Trim the host and reject schemes, paths, and embedded ports.
/// IPv6 literals may be given with or without brackets.
fn normalize_host(raw: &str) -> Result<String, Error> {
    let host = raw.trim();
    if host.is_empty() {
        return Err(Error::config("host", "must not be empty"));
    }
    if host.contains("://") {
        return Err(Error::config(
            "host",
            format!("'{host}' must be a bare host name, not a URL"),
        ));
    }
    if host.contains('/') || host.chars().any(char::is_whitespace) {
        return Err(Error::config("host", format!("'{host}' is not a valid host")));
    }

    let unbracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if unbracketed.contains(':') {
        return match unbracketed.parse::<Ipv6Addr>() {
            Ok(addr) => Ok(addr.to_string()),
            Err(_) => Err(Error::config(
                "host",
                format!("'{host}' must not include a port; use the port setting"),
            )),
        };
    }
    Ok(unbracketed.to_owned())
}
