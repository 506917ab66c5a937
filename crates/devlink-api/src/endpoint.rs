// ── Endpoint descriptors ──
//
// An `Endpoint` is an immutable (method, path) pair. Feature modules keep
// them as constants-by-construction and hand them to `DeviceClient::request`.

use std::fmt;

use url::Url;

use crate::error::Error;

/// HTTP method of an endpoint.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Patch => Self::PATCH,
            Method::Delete => Self::DELETE,
            Method::Head => Self::HEAD,
            Method::Options => Self::OPTIONS,
        }
    }
}

/// A device API endpoint: method plus a path relative to the device root.
///
/// The path is normalized to exactly one leading slash, so `"axis-cgi/x"`
/// and `"//axis-cgi/x"` describe the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    method: Method,
    path: String,
}

impl Endpoint {
    pub fn new(method: Method, path: &str) -> Result<Self, Error> {
        Ok(Self {
            method,
            path: normalize_path(path)?,
        })
    }

    pub fn get(path: &str) -> Result<Self, Error> {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str) -> Result<Self, Error> {
        Self::new(Method::Post, path)
    }

    pub fn put(path: &str) -> Result<Self, Error> {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: &str) -> Result<Self, Error> {
        Self::new(Method::Delete, path)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Normalized path, always starting with a single `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Join this endpoint onto `base` and append `params` percent-encoded.
    ///
    /// Any path already present on `base` is kept as a prefix.
    pub fn build_url(&self, base: &Url, params: &[(String, String)]) -> Result<Url, Error> {
        let root = base.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{root}{}", self.path))?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

fn normalize_path(raw: &str) -> Result<String, Error> {
    let trimmed = raw.trim();
    if trimmed.contains("://") {
        return Err(Error::config(
            "path",
            format!("'{trimmed}' is an absolute URL; endpoints take a path"),
        ));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| matches!(c, '?' | '#') || c.is_whitespace() || c.is_control())
    {
        return Err(Error::config(
            "path",
            format!("'{trimmed}' contains {bad:?}; pass query parameters separately"),
        ));
    }

    let relative = trimmed.trim_start_matches('/');
    if relative.is_empty() {
        return Err(Error::config("path", "must not be empty"));
    }
    Ok(format!("/{relative}"))
}
