use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Serialized as JSON with `Content-Type: application/json`.
    Json(Value),
    /// Sent verbatim with the given content type.
    Bytes { content_type: String, data: Bytes },
}

/// Per-call options for [`DeviceClient::request`](crate::DeviceClient::request).
///
/// ```
/// use devlink_api::RequestOptions;
/// use serde_json::json;
///
/// let options = RequestOptions::new()
///     .param("action", "list")
///     .header("X-Request-Id", "42")
///     .json(json!({"apiVersion": "1.0", "method": "getProperties"}));
/// assert_eq!(options.query().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct RequestOptions {
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    payload: Option<Payload>,
    timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a query parameter. Repeated keys are sent repeatedly.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add a header. Overrides the transport defaults (`Accept`,
    /// `User-Agent`) when the name matches.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.payload = Some(Payload::Json(value));
        self
    }

    pub fn body(mut self, data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.payload = Some(Payload::Bytes {
            content_type: content_type.into(),
            data: data.into(),
        });
        self
    }

    /// Override the read timeout for this call only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
