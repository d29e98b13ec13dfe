//! Blocking HTTP transport to an embedded controller.
//!
//! Controllers speak plain HTTP/1.x on the local network. Requests are
//! HTTP/1.0 with `Connection: close` so the response body is simply
//! everything until EOF. Every socket operation carries a bounded timeout;
//! a request can never wedge an interactive edit for longer than that.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use derive_more::{Display, Error, From};
use log::{debug, trace};

use crate::DeviceTransport;

/// Default per-request socket timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Transient transport failure. Recoverable; live edits are never retried
/// automatically, the next interaction resends current state.
#[derive(Debug, Display, Error, From)]
pub enum TransportError {
    #[display("request timed out")]
    Timeout,
    #[display("device unreachable: {_0}")]
    #[from]
    Io(#[error(source)] std::io::Error),
    #[display("device returned HTTP {status}")]
    Status { status: u16 },
    #[display("malformed HTTP response")]
    MalformedResponse,
}

impl TransportError {
    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(err),
        }
    }
}

/// HTTP transport for one controller address.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    host: String,
    port: u16,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(TransportError::from_io)?
            .next()
            .ok_or_else(|| {
                TransportError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    "address resolved to nothing",
                ))
            })
    }

    fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<String, TransportError> {
        let addr = self.resolve()?;
        let mut stream =
            TcpStream::connect_timeout(&addr, self.timeout).map_err(TransportError::from_io)?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(TransportError::from_io)?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(TransportError::from_io)?;

        let body = body.unwrap_or("");
        let request = format!(
            "{method} {path} HTTP/1.0\r\n\
             Host: {host}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {len}\r\n\
             Connection: close\r\n\
             \r\n\
             {body}",
            host = self.host,
            len = body.len(),
        );
        trace!("[{}] {method} {path} ({} bytes)", self.host, body.len());
        stream
            .write_all(request.as_bytes())
            .map_err(TransportError::from_io)?;

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .map_err(TransportError::from_io)?;

        parse_response(&raw)
    }
}

impl DeviceTransport for HttpTransport {
    fn get(&self, path: &str) -> Result<String, TransportError> {
        self.request("GET", path, None)
    }

    fn post(&self, path: &str, body: &str) -> Result<String, TransportError> {
        self.request("POST", path, Some(body))
    }
}

/// Split a raw HTTP response into status + body, returning the body of a
/// 2xx response.
fn parse_response(raw: &[u8]) -> Result<String, TransportError> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or(TransportError::MalformedResponse)?;
    let status_line = head.lines().next().ok_or(TransportError::MalformedResponse)?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or(TransportError::MalformedResponse)?;
    debug!("response status {status}, {} body bytes", body.len());

    if (200..300).contains(&status) {
        Ok(body.to_string())
    } else {
        Err(TransportError::Status { status })
    }
}
