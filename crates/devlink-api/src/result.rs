use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, ErrorKind};

/// An HTTP response exactly as the device sent it.
///
/// Any status except an unanswered 401 lands here, including 4xx and 5xx;
/// interpreting the status is the caller's job.
#[derive(Debug, Clone)]
pub struct RawResponse {
    status: u16,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, headers: HeaderMap, url: Url, body: Bytes) -> Self {
        Self {
            status,
            headers,
            url,
            body,
        }
    }

    /// Drain a response into memory.
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self, Error> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;
        Ok(Self::new(status, headers, url, body))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Value of a header as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The URL that was requested (redirects are not followed).
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// Outcome of one [`DeviceClient::request`](crate::DeviceClient::request).
///
/// Holds either the raw response or the classified error, never both.
#[derive(Debug)]
#[must_use]
pub struct TransportResult {
    outcome: Result<RawResponse, Error>,
}

impl TransportResult {
    pub fn from_response(response: RawResponse) -> Self {
        Self {
            outcome: Ok(response),
        }
    }

    pub fn from_error(error: Error) -> Self {
        Self {
            outcome: Err(error),
        }
    }

    /// `true` when the device answered (whatever the status).
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn raw_response(&self) -> Option<&RawResponse> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }

    /// Error classification of a failed transport.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.error().map(Error::kind)
    }

    /// HTTP status of the response, or of the rejection for auth failures.
    pub fn status(&self) -> Option<u16> {
        match &self.outcome {
            Ok(response) => Some(response.status()),
            Err(error) => error.status(),
        }
    }

    pub fn into_result(self) -> Result<RawResponse, Error> {
        self.outcome
    }
}

impl From<TransportResult> for Result<RawResponse, Error> {
    fn from(result: TransportResult) -> Self {
        result.outcome
    }
}
