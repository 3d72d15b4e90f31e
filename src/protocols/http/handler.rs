//! Request routing.
//!
//! Maps a decoded request to an `Outcome`:
//!
//! | path            | result                                         |
//! |-----------------|------------------------------------------------|
//! | `close`         | stop the server (loopback peers only)          |
//! | contains `.`    | serve the file under the root, or 404          |
//! | anything else   | 200 with a placeholder body                    |

use super::parser::{Decoded, Method, Request};
use bytes::Bytes;
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Path that stops the whole server.
pub const SHUTDOWN_PATH: &str = "close";

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    MethodNotAllowed,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
        }
    }

    /// Fixed HTML body sent with error statuses.
    fn error_page(&self) -> Bytes {
        Bytes::from(format!(
            "<html><body><h1>{} {}</h1></body></html>",
            self.code(),
            self.reason()
        ))
    }
}

/// Where the response body comes from.
#[derive(Debug)]
pub enum Body {
    Bytes(Bytes),
    File { file: File, len: u64 },
}

impl Body {
    /// Exact number of body bytes.
    pub fn len(&self) -> u64 {
        match self {
            Body::Bytes(b) => b.len() as u64,
            Body::File { len, .. } => *len,
        }
    }
}

/// A response ready to be written.
#[derive(Debug)]
pub struct Response {
    pub status: Status,
    pub content_type: &'static str,
    pub body: Body,
}

impl Response {
    fn text(status: Status, body: &'static str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: Body::Bytes(Bytes::from_static(body.as_bytes())),
        }
    }

    fn error(status: Status) -> Self {
        Self {
            status,
            content_type: "text/html",
            body: Body::Bytes(status.error_page()),
        }
    }
}

/// What the server does with a request.
#[derive(Debug)]
pub enum Outcome {
    /// Send the response and close the connection.
    Respond(Response),
    /// Send the response, close the connection, then stop the server.
    Terminate(Response),
}

/// Produces responses for decoded requests.
#[derive(Debug, Clone)]
pub struct Handler {
    root: PathBuf,
    allow_remote_shutdown: bool,
}

impl Handler {
    pub fn new(root: impl Into<PathBuf>, allow_remote_shutdown: bool) -> Self {
        Self {
            root: root.into(),
            allow_remote_shutdown,
        }
    }

    pub fn produce(&self, decoded: &Decoded, peer: SocketAddr) -> Outcome {
        let request = match decoded {
            Decoded::Request(request) => request,
            Decoded::Unparseable => {
                debug!(peer = %peer, "Unparseable request line");
                return Outcome::Respond(Response::error(Status::BadRequest));
            }
        };

        if let Method::Unsupported(ref method) = request.method {
            debug!(peer = %peer, method, "Unsupported method");
            return Outcome::Respond(Response::error(Status::MethodNotAllowed));
        }

        if request.path == SHUTDOWN_PATH {
            return self.shutdown(peer);
        }

        if request.path.contains('.') {
            Outcome::Respond(self.serve_file(request))
        } else {
            // Actions have no behavior yet; acknowledge them.
            debug!(path = %request.path, query = ?request.query, "Action request");
            Outcome::Respond(Response::text(Status::Ok, "OK"))
        }
    }

    fn shutdown(&self, peer: SocketAddr) -> Outcome {
        // IPv4 clients of a dual-stack listener appear as `::ffff:a.b.c.d`.
        if peer.ip().to_canonical().is_loopback() || self.allow_remote_shutdown {
            info!(peer = %peer, "Shutdown requested");
            Outcome::Terminate(Response::text(Status::Ok, "shutting down"))
        } else {
            warn!(peer = %peer, "Rejected shutdown from remote peer");
            Outcome::Respond(Response::error(Status::Forbidden))
        }
    }

    fn serve_file(&self, request: &Request) -> Response {
        let path = match resolve(&self.root, &request.path) {
            Some(path) => path,
            None => {
                warn!(path = %request.path, "Path escapes served root");
                return Response::error(Status::Forbidden);
            }
        };

        match open_file(&self.root, &path) {
            Ok(Some((file, len))) => Response {
                status: Status::Ok,
                content_type: content_type(&path),
                body: Body::File { file, len },
            },
            Ok(None) => Response::error(Status::NotFound),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(path = %path.display(), "Path resolves outside served root");
                Response::error(Status::Forbidden)
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "File not served");
                Response::error(Status::NotFound)
            }
        }
    }
}

/// Join a request path onto the root, rejecting anything that could leave it.
fn resolve(root: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe || path.contains('\\') {
        return None;
    }
    Some(root.join(relative))
}

/// Open a regular file, returning `None` when there is nothing to serve.
///
/// Symlinks that lead outside the root yield `PermissionDenied`.
fn open_file(root: &Path, path: &Path) -> io::Result<Option<(File, u64)>> {
    if !path.is_file() {
        return Ok(None);
    }

    let canonical_root = root.canonicalize()?;
    if !path.canonicalize()?.starts_with(&canonical_root) {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "outside served root",
        ));
    }

    let file = File::open(path)?;
    let len = file.metadata()?.len();
    Ok(Some((file, len)))
}

/// Content type by file extension.
pub fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("html") => "text/html",
        Some(ext) if ext.eq_ignore_ascii_case("png") => "image/png",
        _ => "application/octet-stream",
    }
}
