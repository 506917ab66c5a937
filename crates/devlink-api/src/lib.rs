// devlink-api: Blocking communications layer for HTTP/HTTPS network devices
//
// Feature code describes *what* to call with an `Endpoint` and
// `RequestOptions`; `DeviceClient` owns *how*: TLS, pinning, auth
// negotiation, pooling, and turning every failure into a `TransportResult`.

pub mod auth;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod request;
pub mod result;
pub mod tls;

mod transport;

pub use auth::AuthScheme;
pub use client::DeviceClient;
pub use config::{
    AuthMode, ClientIdentity, Credentials, DeviceConfig, DeviceConfigBuilder, PoolConfig,
    Protocol, SslConfig, Target, Timeouts, Verify,
};
pub use endpoint::{Endpoint, Method};
pub use error::{Error, ErrorKind};
pub use protocol::{ProtocolHandler, TlsPlan};
pub use request::{Payload, RequestOptions};
pub use result::{RawResponse, TransportResult};
pub use tls::{Fingerprint, FingerprintError, PinMismatch};

/// `User-Agent` sent unless a request overrides it.
pub const USER_AGENT: &str = transport::USER_AGENT;
