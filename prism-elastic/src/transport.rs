//! HTTP transport seam and request dispatch
//!
//! [`Transport`] is the single point where bytes leave the process. The
//! default implementation is a shared `reqwest::Client`; tests and callers can
//! wrap it to inject latency or failures.

use crate::config::BasicAuth;
use crate::context::RequestContext;
use crate::error::{BoxError, Error, Result};
use crate::request::{Request, Response};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use std::sync::Arc;

/// Sends one fully built HTTP request and returns the response head.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn round_trip(&self, request: reqwest::Request) -> std::result::Result<reqwest::Response, BoxError>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn round_trip(&self, request: reqwest::Request) -> std::result::Result<reqwest::Response, BoxError> {
        Ok(self.execute(request).await?)
    }
}

/// Builds wire requests for a node and pushes them through the transport.
///
/// Shared by the executor, discovery and health probes so that auth and
/// default headers apply uniformly.
pub(crate) struct Dispatcher {
    builder: reqwest::Client,
    transport: Arc<dyn Transport>,
    basic_auth: Option<BasicAuth>,
    headers: HeaderMap,
    send_get_body_as: Method,
}

/// A request ready to send, with what is needed for logging
pub(crate) struct Outgoing {
    pub request: reqwest::Request,
    pub url: String,
}

impl Dispatcher {
    pub(crate) fn new(
        builder: reqwest::Client,
        transport: Arc<dyn Transport>,
        basic_auth: Option<BasicAuth>,
        headers: HeaderMap,
        send_get_body_as: Method,
    ) -> Self {
        Self {
            builder,
            transport,
            basic_auth,
            headers,
            send_get_body_as,
        }
    }

    /// Build the wire request for `request` against the node at `base`.
    pub(crate) fn build(&self, base: &str, request: &Request, body: Option<Bytes>) -> Result<Outgoing> {
        let url = request.url_for(base)?;
        let method = if body.is_some() && *request.method() == Method::GET {
            self.send_get_body_as.clone()
        } else {
            request.method().clone()
        };

        let mut headers = self.headers.clone();
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        for name in request.headers().keys() {
            headers.remove(name);
        }
        for (name, value) in request.headers() {
            headers.append(name.clone(), value.clone());
        }

        let mut builder = self.builder.request(method, url.clone()).headers(headers);
        if let Some(auth) = &self.basic_auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let http_request = builder
            .build()
            .map_err(|e| Error::invalid_url(url.as_str(), e))?;
        Ok(Outgoing {
            request: http_request,
            url: url.to_string(),
        })
    }

    /// Send and read the full response under `ctx`.
    ///
    /// Status codes are not interpreted here. Context expiry wins over any
    /// transport outcome and aborts the in-flight call.
    pub(crate) async fn send(
        &self,
        ctx: &RequestContext,
        outgoing: Outgoing,
        limit: Option<u64>,
    ) -> Result<Response> {
        let url = outgoing.url.clone();
        let response = self.round_trip(ctx, outgoing).await?;
        read_response(ctx, response, url, limit).await
    }

    /// Send the request and wait for the response head.
    pub(crate) async fn round_trip(
        &self,
        ctx: &RequestContext,
        outgoing: Outgoing,
    ) -> Result<reqwest::Response> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let Outgoing { request, url } = outgoing;
        ctx.run(self.transport.round_trip(request))
            .await?
            .map_err(|source| Error::Transport { url, source })
    }

    /// Build and send in one step, for probes.
    pub(crate) async fn perform(
        &self,
        ctx: &RequestContext,
        base: &str,
        request: &Request,
    ) -> Result<Response> {
        let outgoing = self.build(base, request, None)?;
        self.send(ctx, outgoing, request.response_limit()).await
    }
}

/// Buffer a response body under `ctx`.
pub(crate) async fn read_response(
    ctx: &RequestContext,
    response: reqwest::Response,
    url: String,
    limit: Option<u64>,
) -> Result<Response> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = ctx.run(read_body(response, &url, limit)).await??;
    Ok(Response::new(status, headers, body, url))
}

/// Buffer the body, failing as soon as it would exceed `limit`.
async fn read_body(mut response: reqwest::Response, url: &str, limit: Option<u64>) -> Result<Bytes> {
    if let (Some(limit), Some(length)) = (limit, response.content_length()) {
        if length > limit {
            return Err(Error::ResponseTooLarge { limit });
        }
    }

    let mut buf = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| Error::Transport {
        url: url.to_string(),
        source: e.into(),
    })? {
        if let Some(limit) = limit {
            if (buf.len() + chunk.len()) as u64 > limit {
                return Err(Error::ResponseTooLarge { limit });
            }
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
