//! Blocking HTTP client interface.
//!
//! Requests block the calling thread for up to the configured timeout. The
//! streaming variant hands out the body in caller-sized chunks so firmware
//! images never have to be held in memory.

use std::io::Read;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::TransportError;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

/// Outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Vec<u8>,
    /// Per-request timeout; the client default applies when unset
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// GET request without a body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
            timeout: None,
        }
    }

    /// POST request with `body`.
    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
            timeout: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add an `Authorization` header carrying a prepared bearer value.
    pub fn authorization(self, value: impl Into<String>) -> Self {
        self.header("Authorization", value)
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Look up a header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Body bytes
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Build a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the decoder error when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Chunked response body.
pub trait BodyStream: Send {
    /// Response status code.
    fn status(&self) -> u16;

    /// Fill `buf` as far as the body allows. Returns the number of bytes
    /// written; zero means the body is exhausted.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the connection fails mid-body.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Whether the whole body announced by the server has been received.
    fn is_complete(&self) -> bool;
}

/// Blocking HTTP client.
pub trait HttpClient: Send + Sync {
    /// Perform a request and buffer the whole response.
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    ///
    /// # Errors
    ///
    /// Returns a transport error on timeout or connection failure.
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Perform a request and return the body as a stream.
    ///
    /// # Errors
    ///
    /// Returns a transport error on timeout, connection failure or a non-2xx
    /// status.
    fn open_stream(&self, request: &HttpRequest) -> Result<Box<dyn BodyStream>, TransportError>;
}

/// [`HttpClient`] backed by the blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Build a client with a default timeout.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::connection("", e))?;
        Ok(Self { client })
    }

    fn send(&self, request: &HttpRequest) -> Result<reqwest::blocking::Response, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).body(request.body.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        debug!(url = %request.url, method = ?request.method, "http request");
        builder.send().map_err(|e| map_reqwest(&request.url, &e))
    }
}

fn map_reqwest(url: &str, e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout { url: url.to_string() }
    } else {
        TransportError::connection(url, e)
    }
}

impl HttpClient for ReqwestClient {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self.send(request)?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }

    fn open_stream(&self, request: &HttpRequest) -> Result<Box<dyn BodyStream>, TransportError> {
        let response = self.send(request)?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: request.url.clone(),
                status,
            });
        }
        Ok(Box::new(ReqwestStream {
            expected: response.content_length(),
            response,
            status,
            received: 0,
            eof: false,
        }))
    }
}

struct ReqwestStream {
    response: reqwest::blocking::Response,
    status: u16,
    expected: Option<u64>,
    received: u64,
    eof: bool,
}

impl BodyStream for ReqwestStream {
    fn status(&self) -> u16 {
        self.status
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut filled = 0;
        while filled < buf.len() && !self.eof {
            let Some(rest) = buf.get_mut(filled..) else {
                break;
            };
            match self.response.read(rest) {
                Ok(0) => self.eof = true,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Body(e.to_string())),
            }
        }
        self.received = self.received.saturating_add(filled as u64);
        Ok(filled)
    }

    fn is_complete(&self) -> bool {
        self.eof && self.expected.is_none_or(|n| n == self.received)
    }
}
