// Connection pool construction.
//
// The shared pool and the throwaway pools used for isolated requests are
// built by the same function so they can never drift apart in TLS,
// timeout, or header settings.

use std::sync::Arc;

use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::Error;
use crate::protocol::ProtocolHandler;

pub(crate) const USER_AGENT: &str = concat!("devlink/", env!("CARGO_PKG_VERSION"));

/// Whether a pool participates in the client's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionMode {
    /// Keep-alive reuse plus a cookie jar.
    Shared,
    /// No idle reuse and no cookies.
    Isolated,
}

/// Build a reqwest client for `config`.
///
/// Redirects are never followed and reqwest performs no retries of its own.
/// The read timeout is an idle limit, not a total deadline: it bounds the
/// wait for the response head, then restarts on every body read. Call
/// inside the owning runtime's context.
pub(crate) fn build_http_client(
    config: &DeviceConfig,
    protocol: &ProtocolHandler,
    mode: SessionMode,
) -> Result<Client, Error> {
    let mut defaults = HeaderMap::new();
    defaults.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let timeouts = config.timeouts();
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(defaults)
        .connect_timeout(timeouts.connect)
        .read_timeout(timeouts.read)
        .redirect(Policy::none())
        .http1_only();

    builder = match mode {
        SessionMode::Shared => builder
            .pool_max_idle_per_host(config.pool().max_size)
            .cookie_provider(Arc::new(Jar::default())),
        SessionMode::Isolated => builder.pool_max_idle_per_host(0),
    };

    if let Some(tls) = protocol.tls_config()? {
        builder = builder.use_preconfigured_tls(tls);
    }

    let client = builder
        .build()
        .map_err(|e| Error::tls_caused_by("failed to build HTTP client", e))?;
    debug!(
        base_url = %config.base_url(),
        ?mode,
        max_idle = config.pool().max_size,
        "connection pool ready"
    );
    Ok(client)
}
