//! Scripted HTTP client.
//!
//! Replies are queued per URL (query string ignored) and consumed in order.
//! The last queued reply for a URL is sticky, so "fail twice then succeed"
//! is three pushes and every later call keeps succeeding.

use std::collections::{HashMap, VecDeque};

use mdm_platform::{BodyStream, HttpClient, HttpRequest, HttpResponse, TransportError};
use parking_lot::Mutex;

/// A scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Buffered response
    Response(HttpResponse),
    /// Transport failure
    Error(TransportError),
    /// Streamed body
    Stream {
        /// Body bytes handed out
        body: Vec<u8>,
        /// Whether the server reports the body as fully received
        complete: bool,
        /// Fail the read that would cross this offset
        fail_at: Option<usize>,
    },
}

impl Reply {
    /// 200 with a JSON body.
    pub fn json(body: &str) -> Self {
        Reply::Response(HttpResponse::new(200, body.as_bytes().to_vec()))
    }

    /// Bare status.
    pub fn status(status: u16) -> Self {
        Reply::Response(HttpResponse::new(status, Vec::new()))
    }

    /// Complete streamed body.
    pub fn stream(body: Vec<u8>) -> Self {
        Reply::Stream {
            body,
            complete: true,
            fail_at: None,
        }
    }

    /// Timeout against `url`.
    pub fn timeout(url: &str) -> Self {
        Reply::Error(TransportError::Timeout {
            url: url.to_string(),
        })
    }
}

/// [`HttpClient`] answering from a script and recording every request.
#[derive(Debug, Default)]
pub struct ScriptedHttp {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn route(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

impl ScriptedHttp {
    /// Empty script; unscripted URLs answer 404.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `url`.
    pub fn push(&self, url: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every request seen, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Requests seen for `url`.
    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| route(&r.url) == url)
            .cloned()
            .collect()
    }

    /// Number of requests seen for `url`.
    pub fn count(&self, url: &str) -> usize {
        self.requests_to(url).len()
    }

    fn next_reply(&self, request: &HttpRequest) -> Reply {
        self.requests.lock().push(request.clone());
        let mut replies = self.replies.lock();
        match replies.get_mut(route(&request.url)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::status(404)),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::status(404)),
            None => Reply::status(404),
        }
    }
}

impl HttpClient for ScriptedHttp {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        match self.next_reply(request) {
            Reply::Response(r) => Ok(r),
            Reply::Error(e) => Err(e),
            Reply::Stream { body, .. } => Ok(HttpResponse::new(200, body)),
        }
    }

    fn open_stream(&self, request: &HttpRequest) -> Result<Box<dyn BodyStream>, TransportError> {
        match self.next_reply(request) {
            Reply::Response(r) if r.is_success() => Ok(Box::new(ScriptedStream {
                body: r.body,
                pos: 0,
                complete: true,
                fail_at: None,
            })),
            Reply::Response(r) => Err(TransportError::Status {
                url: request.url.clone(),
                status: r.status,
            }),
            Reply::Error(e) => Err(e),
            Reply::Stream {
                body,
                complete,
                fail_at,
            } => Ok(Box::new(ScriptedStream {
                body,
                pos: 0,
                complete,
                fail_at,
            })),
        }
    }
}

struct ScriptedStream {
    body: Vec<u8>,
    pos: usize,
    complete: bool,
    fail_at: Option<usize>,
}

impl BodyStream for ScriptedStream {
    fn status(&self) -> u16 {
        200
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let end = (self.pos + buf.len()).min(self.body.len());
        if let Some(fail_at) = self.fail_at {
            if end > fail_at {
                return Err(TransportError::Body("connection reset".into()));
            }
        }
        let chunk = &self.body[self.pos..end];
        buf[..chunk.len()].copy_from_slice(chunk);
        self.pos = end;
        Ok(chunk.len())
    }

    fn is_complete(&self) -> bool {
        self.complete && self.pos == self.body.len()
    }
}
