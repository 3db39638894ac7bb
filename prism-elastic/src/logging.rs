//! Per-attempt request logging sinks
//!
//! Sinks are optional and fire-and-forget: they receive one preformatted
//! line (or dump) per event and can never fail the request path.

use crate::request::Response;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

/// Receives one formatted entry per event
pub trait RequestLogger: Send + Sync {
    fn log(&self, line: &str);
}

impl<F> RequestLogger for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        self(line)
    }
}

/// Forwards entries to `tracing` at a fixed level
#[derive(Debug, Clone, Copy)]
pub struct TracingLogger {
    level: Level,
}

impl TracingLogger {
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl RequestLogger for TracingLogger {
    fn log(&self, line: &str) {
        if self.level == Level::ERROR {
            tracing::error!(target: "prism_elastic::request", "{}", line)
        } else if self.level == Level::WARN {
            tracing::warn!(target: "prism_elastic::request", "{}", line)
        } else if self.level == Level::INFO {
            tracing::info!(target: "prism_elastic::request", "{}", line)
        } else if self.level == Level::DEBUG {
            tracing::debug!(target: "prism_elastic::request", "{}", line)
        } else {
            tracing::trace!(target: "prism_elastic::request", "{}", line)
        }
    }
}

/// The three optional sink slots
#[derive(Clone, Default)]
pub struct Loggers {
    pub info: Option<Arc<dyn RequestLogger>>,
    pub error: Option<Arc<dyn RequestLogger>>,
    pub trace: Option<Arc<dyn RequestLogger>>,
}

impl Loggers {
    pub fn tracing() -> Self {
        Self {
            info: Some(Arc::new(TracingLogger::new(Level::INFO))),
            error: Some(Arc::new(TracingLogger::new(Level::ERROR))),
            trace: Some(Arc::new(TracingLogger::new(Level::TRACE))),
        }
    }

    pub fn tracing_enabled(&self) -> bool {
        self.trace.is_some()
    }

    /// `GET http://host:9200/_search [status:200, request:0.003s]`
    pub(crate) fn request_done(&self, method: &str, url: &str, status: u16, took: Duration) {
        if let Some(sink) = &self.info {
            sink.log(&format_info_line(method, url, status, took));
        }
    }

    pub(crate) fn error(&self, line: &str) {
        if let Some(sink) = &self.error {
            sink.log(line);
        }
    }

    pub(crate) fn trace_request(&self, request: &reqwest::Request) {
        if let Some(sink) = &self.trace {
            sink.log(&dump_request(request));
        }
    }

    pub(crate) fn trace_response(&self, response: &Response) {
        if let Some(sink) = &self.trace {
            sink.log(&dump_response(response));
        }
    }
}

impl std::fmt::Debug for Loggers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loggers")
            .field("info", &self.info.is_some())
            .field("error", &self.error.is_some())
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

pub(crate) fn format_info_line(method: &str, url: &str, status: u16, took: Duration) -> String {
    format!(
        "{} {} [status:{}, request:{:.3}s]",
        method,
        url,
        status,
        took.as_secs_f64()
    )
}

fn write_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers {
        let value = if *name == AUTHORIZATION {
            "<redacted>"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        let _ = writeln!(out, "{}: {}", name, value);
    }
}

fn dump_request(request: &reqwest::Request) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {} HTTP/1.1", request.method(), request.url());
    write_headers(&mut out, request.headers());
    out.push('\n');
    if let Some(body) = request.body().and_then(|body| body.as_bytes()) {
        out.push_str(&String::from_utf8_lossy(body));
    }
    out
}

fn dump_response(response: &Response) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "HTTP/1.1 {}", response.status());
    write_headers(&mut out, response.headers());
    out.push('\n');
    out.push_str(&response.text());
    out
}
