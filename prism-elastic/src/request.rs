//! Request descriptor and buffered response

use crate::error::{Error, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

enum Body {
    /// Encoded when the request is built; errors surface at execution
    Json(std::result::Result<Bytes, serde_json::Error>),
    Raw(Bytes),
}

/// A logical call against the cluster, independent of the node that serves it.
///
/// ```ignore
/// let request = Request::get("/_cluster/health")
///     .param("wait_for_status", "yellow")
///     .ignore(&[408]);
/// ```
pub struct Request {
    method: Method,
    path: String,
    params: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Body>,
    ignore: Vec<u16>,
    max_response_size: Option<u64>,
    node_url: Option<String>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            method,
            path,
            params: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            ignore: Vec::new(),
            max_response_size: None,
            node_url: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    /// Append a query parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add a header for this request only.
    ///
    /// Repeating a name sends every value; any name set here replaces the
    /// client default of the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Serialize `body` as the JSON payload
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.body = Some(Body::Json(serde_json::to_vec(body).map(Bytes::from)));
        self
    }

    /// Send pre-encoded bytes as the payload (e.g. NDJSON for bulk calls)
    pub fn raw_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(Body::Raw(body.into()));
        self
    }

    /// Treat these statuses as success and hand the response back unchanged
    pub fn ignore(mut self, statuses: &[u16]) -> Self {
        self.ignore.extend_from_slice(statuses);
        self
    }

    /// Fail with [`Error::ResponseTooLarge`] once the body grows past `limit` bytes
    pub fn max_response_size(mut self, limit: u64) -> Self {
        self.max_response_size = Some(limit);
        self
    }

    /// Send to this node, bypassing selection
    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.node_url = Some(url.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn ignored_statuses(&self) -> &[u16] {
        &self.ignore
    }

    pub fn is_ignored(&self, status: StatusCode) -> bool {
        self.ignore.contains(&status.as_u16())
    }

    pub fn response_limit(&self) -> Option<u64> {
        self.max_response_size
    }

    pub fn explicit_node(&self) -> Option<&str> {
        self.node_url.as_deref()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// The encoded payload, or the serialization failure recorded at build time.
    pub(crate) fn take_body(&mut self) -> Result<Option<Bytes>> {
        match self.body.take() {
            None => Ok(None),
            Some(Body::Raw(bytes)) => Ok(Some(bytes)),
            Some(Body::Json(Ok(bytes))) => Ok(Some(bytes)),
            Some(Body::Json(Err(err))) => Err(Error::Serialization(err)),
        }
    }

    /// Absolute URL of this request on the node at `base`.
    pub fn url_for(&self, base: &str) -> Result<Url> {
        let joined = format!("{}{}", base.trim_end_matches('/'), self.path);
        let mut url = Url::parse(&joined).map_err(|e| Error::invalid_url(&joined, e))?;
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        Ok(url)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("has_body", &self.body.is_some())
            .field("ignore", &self.ignore)
            .field("max_response_size", &self.max_response_size)
            .field("node_url", &self.node_url)
            .finish()
    }
}

/// Fully buffered reply from one node
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    url: String,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, url: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body,
            url: url.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Request URL that produced this response
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::Decode)
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
