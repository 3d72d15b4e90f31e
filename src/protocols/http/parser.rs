//! Request line parser.
//!
//! Only the first line of the accumulated bytes is inspected. Header lines
//! and any body that follow it are ignored.

/// Request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    /// Any other method token, kept for logging.
    Unsupported(String),
}

/// Parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Target with the leading `/` and any query string removed. Never empty.
    pub path: String,
    pub query: Option<String>,
}

/// Result of decoding a complete message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Request(Request),
    /// The first line is not `METHOD /target HTTP/1.1`.
    Unparseable,
}

/// Decode the request line of a complete message.
pub fn decode(raw: &[u8]) -> Decoded {
    let line_end = raw.iter().position(|&b| b == b'\n').unwrap_or(raw.len());
    let line = &raw[..line_end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let line = match std::str::from_utf8(line) {
        Ok(s) => s,
        Err(_) => return Decoded::Unparseable,
    };

    let mut parts = line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) if parts.next().is_none() => (m, t, v),
        _ => return Decoded::Unparseable,
    };

    if method.is_empty() || version != "HTTP/1.1" {
        return Decoded::Unparseable;
    }

    let target = match target.strip_prefix('/') {
        Some(t) if !t.is_empty() => t,
        _ => return Decoded::Unparseable,
    };

    let request = if method == "GET" {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        if path.is_empty() {
            return Decoded::Unparseable;
        }
        Request {
            method: Method::Get,
            path: path.to_string(),
            query,
        }
    } else {
        Request {
            method: Method::Unsupported(method.to_string()),
            path: target.to_string(),
            query: None,
        }
    };

    Decoded::Request(request)
}
