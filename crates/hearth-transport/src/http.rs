//! The HTTP subset spoken before a WebSocket upgrade.
//!
//! Only what a game client needs: one request per connection, headers up
//! to a size limit, an optional `Content-Length` body. Upgrade requests
//! are answered with `101 Switching Protocols`; everything else goes to an
//! [`HttpRouter`] and the connection closes after the response.

use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::TransportError;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The client's `Sec-WebSocket-Key` if this is a WebSocket upgrade.
    pub fn websocket_key(&self) -> Option<&str> {
        let upgrade = self.header("upgrade")?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return None;
        }
        self.header("sec-websocket-key").filter(|k| !k.is_empty())
    }
}

/// A response written back before the connection closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.with_header("Content-Type", content_type)
    }

    /// `200 OK` carrying a JSON document.
    pub fn ok_json(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, "OK").with_body("application/json", body)
    }

    pub fn not_found() -> Self {
        Self::new(404, "Not Found").with_body("text/plain", "not found")
    }

    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request").with_body("text/plain", "bad request")
    }

    /// Serializes the response, adding `Content-Length` and
    /// `Connection: close`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// Answers HTTP requests that are not WebSocket upgrades.
pub trait HttpRouter: Send + Sync + 'static {
    fn route(&self, request: &HttpRequest) -> HttpResponse;
}

/// Answers every request with 404.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundRouter;

impl HttpRouter for NotFoundRouter {
    fn route(&self, _request: &HttpRequest) -> HttpResponse {
        HttpResponse::not_found()
    }
}

/// Parses one request from the front of `buf`.
///
/// Returns `Ok(None)` while the request is incomplete, and the request plus
/// the number of bytes it occupied once it is.
///
/// # Errors
/// [`TransportError::Http`] if the header block outgrows `max_header_len`,
/// the body outgrows `max_body_len`, or the request line is malformed.
pub fn parse_request(
    buf: &[u8],
    max_header_len: usize,
    max_body_len: usize,
) -> Result<Option<(HttpRequest, usize)>, TransportError> {
    let Some(end) = buf.windows(HEADER_END.len()).position(|w| w == HEADER_END) else {
        if buf.len() > max_header_len {
            return Err(TransportError::Http("header block too large".into()));
        }
        return Ok(None);
    };
    if end > max_header_len {
        return Err(TransportError::Http("header block too large".into()));
    }

    let head = String::from_utf8_lossy(&buf[..end]);
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(TransportError::Http(format!("bad request line: {request_line:?}")));
    };
    if !version.starts_with("HTTP/") {
        return Err(TransportError::Http(format!("bad version: {version:?}")));
    }

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect();

    let body_len = match headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
    {
        Some((_, v)) => v
            .parse::<usize>()
            .map_err(|_| TransportError::Http(format!("bad content-length: {v:?}")))?,
        None => 0,
    };
    if body_len > max_body_len {
        return Err(TransportError::Http("body too large".into()));
    }

    let body_start = end + HEADER_END.len();
    let total = body_start + body_len;
    if buf.len() < total {
        return Ok(None);
    }

    let request = HttpRequest {
        method: method.to_owned(),
        path: path.to_owned(),
        version: version.to_owned(),
        headers,
        body: buf[body_start..total].to_vec(),
    };
    Ok(Some((request, total)))
}

/// The `101 Switching Protocols` answer to a WebSocket upgrade.
pub fn upgrade_response(key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    )
    .into_bytes()
}
