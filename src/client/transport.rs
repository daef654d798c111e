//! Transport Layer for the Repository Client
//!
//! Abstracts the HTTP connection for testability. Provides:
//! - Transport trait: interface for issuing one HTTP exchange
//! - MockTransport: in-process mock repository for tests
//! - HttpTransport: blocking HTTP client for production

use std::fmt;
use std::io::{self, Cursor, Read};
use std::time::Duration;

use base64::Engine;
use repo_protocol::Headers;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::mock::MockRepository;

/// Transport trait for HTTP exchanges with the repository
pub trait Transport: Send + Sync {
    /// Send a request and return the response, whatever its status.
    ///
    /// Only failures to complete the exchange are errors; a 404 or 500 is
    /// a normal response.
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// Request body
pub enum RequestBody {
    Empty,
    Bytes(Vec<u8>),
    Stream(Box<dyn Read + Send>),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "Empty"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Stream(_) => write!(f, "Stream"),
        }
    }
}

/// One HTTP request, addressed relative to the repository base URL
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    /// Unencoded path segments below the base URL.
    pub path: Vec<String>,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, path: &[&str]) -> Self {
        Self {
            method,
            path: path.iter().map(|s| s.to_string()).collect(),
            query: Vec::new(),
            headers: Headers::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: &[&str]) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn query_opt(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.query(name, v),
            None => self,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn body(mut self, content_type: &str, body: RequestBody) -> Self {
        self.headers.set("Content-Type", content_type);
        self.body = body;
        self
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Read the whole body into memory.
    pub fn read_body(&mut self) -> io::Result<Vec<u8>> {
        match std::mem::replace(&mut self.body, RequestBody::Empty) {
            RequestBody::Empty => Ok(Vec::new()),
            RequestBody::Bytes(bytes) => Ok(bytes),
            RequestBody::Stream(mut reader) => {
                let mut out = Vec::new();
                reader.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

/// One HTTP response with a streaming body
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    body: Box<dyn Read + Send>,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub fn new(status: u16, headers: Headers, body: impl Read + Send + 'static) -> Self {
        Self {
            status,
            headers,
            body: Box::new(body),
        }
    }

    pub fn from_bytes(status: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self::new(status, headers, Cursor::new(body))
    }

    pub fn empty(status: u16) -> Self {
        Self::from_bytes(status, Headers::new(), Vec::new())
    }

    /// A JSON response; serialization of plain data types cannot fail.
    pub fn json(status: u16, body: &impl Serialize) -> Self {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        let headers = Headers::new().with("Content-Type", "application/json");
        Self::from_bytes(status, headers, bytes)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }

    pub fn into_body(self) -> Box<dyn Read + Send> {
        self.body
    }

    pub fn read_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.body.read_to_end(&mut out)?;
        Ok(out)
    }

    pub fn read_json<T: DeserializeOwned>(self) -> io::Result<Result<T, serde_json::Error>> {
        let bytes = self.read_bytes()?;
        Ok(serde_json::from_slice(&bytes))
    }

    /// Best-effort error description from a non-2xx body.
    ///
    /// Uses the `message` field of a JSON body when present, otherwise the
    /// body text, otherwise the bare status.
    pub fn error_message(self) -> String {
        let status = self.status;
        let bytes = self.read_bytes().unwrap_or_default();
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
            if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
                return message.to_string();
            }
        }
        let text = String::from_utf8_lossy(&bytes).trim().to_string();
        if text.is_empty() {
            format!("HTTP {status}")
        } else {
            text
        }
    }
}

/// Mock transport for testing - connects directly to MockRepository in-process
pub struct MockTransport {
    repository: MockRepository,
}

impl MockTransport {
    /// Create a new mock transport with a fresh mock repository
    pub fn new() -> Self {
        Self {
            repository: MockRepository::new(),
        }
    }

    /// Create a mock transport over a pre-configured repository
    pub fn with_repository(repository: MockRepository) -> Self {
        Self { repository }
    }

    /// Get the underlying repository for test configuration
    pub fn repository(&self) -> &MockRepository {
        &self.repository
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.repository.handle(request)
    }
}

/// HTTP transport configuration
#[derive(Clone)]
pub struct HttpConfig {
    /// Base URL of the repository REST service
    pub base_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfig")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:24610".to_string(),
            user: None,
            password: None,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
        }
    }
}

/// Blocking HTTP transport for production use
pub struct HttpTransport {
    base: Url,
    agent: ureq::Agent,
    authorization: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(config.base_url.clone()));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();

        let authorization = config.user.as_ref().map(|user| {
            let password = config.password.as_deref().unwrap_or("");
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
            format!("Basic {token}")
        });

        Ok(Self {
            base,
            agent,
            authorization,
        })
    }

    /// Build the absolute URL, percent-encoding each path segment.
    fn url_for(&self, request: &HttpRequest) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| TransportError::InvalidUrl(self.base.to_string()))?;
            segments.pop_if_empty();
            segments.extend(request.path.iter());
        }
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.url_for(&request)?;
        tracing::debug!(method = request.method.as_str(), %url, "repository request");

        let mut call = self.agent.request(request.method.as_str(), url.as_str());
        if let Some(auth) = &self.authorization {
            call = call.set("Authorization", auth);
        }
        for (name, value) in request.headers.iter() {
            call = call.set(name, value);
        }

        let result = match request.body {
            RequestBody::Empty => call.call(),
            RequestBody::Bytes(bytes) => call.send_bytes(&bytes),
            RequestBody::Stream(reader) => call.send(reader),
        };

        let response = match result {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(match transport.kind() {
                    ureq::ErrorKind::Io if is_timeout(&transport) => {
                        TransportError::ConnectionTimeout
                    }
                    _ => TransportError::ConnectionFailed(transport.to_string()),
                });
            }
        };

        let status = response.status();
        let mut headers = Headers::new();
        for name in response.headers_names() {
            for value in response.all(&name) {
                headers.append(name.as_str(), value);
            }
        }
        Ok(HttpResponse::new(status, headers, response.into_reader()))
    }
}

/// Whether an I/O timeout is anywhere in `error`'s source chain.
fn is_timeout(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(e) = current {
        if let Some(io_error) = e.downcast_ref::<io::Error>() {
            if matches!(io_error.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        current = e.source();
    }
    false
}
