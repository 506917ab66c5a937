// ── Device client ──
//
// `DeviceClient` owns the connection pool and the auth cache for one
// device. Every failure a request can hit is turned into a failed
// `TransportResult` in `dispatch`; nothing escapes `request()`.
//
// The public API is blocking. Each send runs on a small runtime owned by
// the client and races the shutdown token, so `close()` can drop requests
// that are still waiting on the device along with their sockets.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{AuthCache, AuthHandler, AuthScheme, Authorization, DigestInput};
use crate::config::{DeviceConfig, Target};
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::protocol::ProtocolHandler;
use crate::request::{Payload, RequestOptions};
use crate::result::{RawResponse, TransportResult};
use crate::transport::{SessionMode, build_http_client};

/// Blocking client for one device.
///
/// `Send + Sync`: share it behind an `Arc` and call [`request`](Self::request)
/// from as many threads as needed. Like any blocking client it must not be
/// used, or dropped, from inside an async runtime.
///
/// ```no_run
/// use devlink_api::{DeviceClient, DeviceConfig, Endpoint, RequestOptions};
///
/// let config = DeviceConfig::https("192.168.0.90")
///     .credentials("root", "pass".to_string())
///     .verify(false)
///     .build()?;
/// let client = DeviceClient::new(config)?;
///
/// let info = Endpoint::get("/axis-cgi/basicdeviceinfo.cgi")?;
/// let result = client.request(&info, RequestOptions::new());
/// if let Some(response) = result.raw_response() {
///     println!("{} {}", response.status(), response.text());
/// }
/// client.close();
/// # Ok::<(), devlink_api::Error>(())
/// ```
pub struct DeviceClient {
    config: DeviceConfig,
    protocol: ProtocolHandler,
    auth: AuthHandler,
    cache: AuthCache,
    http: ArcSwapOption<Client>,
    shutdown: CancellationToken,
    runtime: Runtime,
}

impl DeviceClient {
    /// Build the connection pool for `config`.
    ///
    /// Fails with a security error when certificate material cannot be
    /// loaded, or `runtime_unavailable` when the I/O runtime cannot start.
    /// No network traffic happens here.
    pub fn new(config: DeviceConfig) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("devlink-io")
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        let protocol = ProtocolHandler::new(&config);
        let http = {
            let _guard = runtime.enter();
            build_http_client(&config, &protocol, SessionMode::Shared)?
        };
        let auth = AuthHandler::new(
            config.auth_mode(),
            config.credentials().cloned(),
            config.target(),
        );
        debug!(
            base_url = %config.base_url(),
            auth_mode = %config.auth_mode(),
            "device client created"
        );
        Ok(Self {
            config,
            protocol,
            auth,
            cache: AuthCache::default(),
            http: ArcSwapOption::from_pointee(http),
            shutdown: CancellationToken::new(),
            runtime,
        })
    }

    /// Issue one request through the shared pool.
    pub fn request(&self, endpoint: &Endpoint, options: RequestOptions) -> TransportResult {
        let outcome = match self.http.load_full() {
            Some(http) => self.execute(&http, &self.cache, endpoint, &options),
            None => Err(Error::Closed),
        };
        self.dispatch(endpoint, outcome)
    }

    /// Issue one request on a throwaway pool with no cookies, no idle
    /// reuse, and a scratch auth cache.
    pub fn request_isolated(
        &self,
        endpoint: &Endpoint,
        options: RequestOptions,
    ) -> TransportResult {
        let outcome = if self.is_closed() {
            Err(Error::Closed)
        } else {
            self.build_pool(SessionMode::Isolated)
                .and_then(|http| self.execute(&http, &AuthCache::default(), endpoint, &options))
        };
        self.dispatch(endpoint, outcome)
    }

    /// Replace the pool and cookie jar with fresh ones. Auth state is kept.
    pub fn clear_session(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let fresh = Arc::new(self.build_pool(SessionMode::Shared)?);
        let previous = self
            .http
            .rcu(|current| current.as_ref().map(|_| Arc::clone(&fresh)));
        if previous.is_none() {
            return Err(Error::Closed);
        }
        debug!(base_url = %self.config.base_url(), "session cleared");
        Ok(())
    }

    /// Forget every detected auth scheme and cached Digest challenge.
    pub fn clear_auth_cache(&self) {
        self.cache.clear();
        debug!(device = %self.auth.target(), "auth cache cleared");
    }

    /// The scheme the next request will start with.
    pub fn auth_scheme(&self) -> AuthScheme {
        self.auth.scheme(&self.cache)
    }

    pub fn target(&self) -> &Target {
        self.auth.target()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Release the connection pool. Safe to call more than once.
    ///
    /// Requests still in flight are abandoned: their sockets are closed and
    /// they return a `client_closed` network error.
    pub fn close(&self) {
        self.shutdown.cancel();
        if self.http.swap(None).is_some() {
            debug!(base_url = %self.config.base_url(), "connection pool released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.http.load().is_none()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn build_pool(&self, mode: SessionMode) -> Result<Client, Error> {
        let _guard = self.runtime.enter();
        build_http_client(&self.config, &self.protocol, mode)
    }

    /// Drive one send to completion unless the client is closed first.
    fn send(&self, request: RequestBuilder) -> Result<RawResponse, Error> {
        self.runtime.block_on(async {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => Err(Error::Closed),
                outcome = exchange(request) => outcome,
            }
        })
    }

    fn dispatch(&self, endpoint: &Endpoint, outcome: Result<RawResponse, Error>) -> TransportResult {
        match outcome {
            Ok(response) => {
                debug!(%endpoint, status = response.status(), "request complete");
                TransportResult::from_response(response)
            }
            Err(error) => {
                warn!(
                    %endpoint,
                    device = %self.auth.target(),
                    kind = %error.kind(),
                    code = error.code(),
                    "request failed: {error}"
                );
                TransportResult::from_error(error)
            }
        }
    }

    fn execute(
        &self,
        http: &Client,
        cache: &AuthCache,
        endpoint: &Endpoint,
        options: &RequestOptions,
    ) -> Result<RawResponse, Error> {
        let url = endpoint.build_url(self.config.base_url(), options.query())?;
        let headers = header_map(options.headers())?;
        let (body, content_type) = encode_payload(options.payload())?;

        let request_uri = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        };
        let method: &'static str = endpoint.method().into();
        let input = DigestInput {
            method,
            uri: &request_uri,
            body: body.as_deref(),
        };

        debug!("{method} {url}");
        self.auth.execute(cache, &input, |authorization| {
            let mut request = http.request(endpoint.method().into(), url.clone());
            if let Some(content_type) = &content_type {
                request = request.header(CONTENT_TYPE, content_type.clone());
            }
            request = request.headers(headers.clone());
            if let Some(body) = &body {
                request = request.body(body.to_vec());
            }
            if let Some(timeout) = options.request_timeout() {
                request = request.timeout(timeout);
            }
            request = match authorization {
                Authorization::Anonymous => request,
                Authorization::Basic(credentials) => request.basic_auth(
                    credentials.username(),
                    Some(credentials.password().expose_secret()),
                ),
                Authorization::Digest(value) => request.header(AUTHORIZATION, value),
            };
            self.send(request)
        })
    }
}

async fn exchange(request: RequestBuilder) -> Result<RawResponse, Error> {
    let response = request.send().await?;
    RawResponse::read(response).await
}

impl fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClient")
            .field("base_url", &self.config.base_url().as_str())
            .field("auth_scheme", &self.auth_scheme())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn header_map(pairs: &[(String, String)]) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

fn encode_payload(payload: Option<&Payload>) -> Result<(Option<Bytes>, Option<HeaderValue>), Error> {
    match payload {
        None => Ok((None, None)),
        Some(Payload::Json(value)) => Ok((
            Some(Bytes::from(serde_json::to_vec(value)?)),
            Some(HeaderValue::from_static("application/json")),
        )),
        Some(Payload::Bytes { content_type, data }) => {
            let content_type =
                HeaderValue::from_str(content_type).map_err(|e| Error::InvalidHeader {
                    name: CONTENT_TYPE.to_string(),
                    reason: e.to_string(),
                })?;
            Ok((Some(data.clone()), Some(content_type)))
        }
    }
}
