//! HTTP-like request/response protocol.
//!
//! One request per connection:
//! - Client sends: `GET /<path>[?<query>] HTTP/1.1` followed by any headers
//! - Server sends: a header block and body, then closes the connection
//!
//! ## Routing
//!
//! - `/close` stops the server (loopback peers only unless configured)
//! - `/<name>.<ext>` serves a file below the configured root
//! - any other path is acknowledged with a placeholder body
//!
//! ## Client Errors
//!
//! - 400 for a request line that does not parse
//! - 403 for paths leaving the root or an unauthorized `close`
//! - 404 for missing files
//! - 405 for methods other than GET

pub mod handler;
pub mod parser;
pub mod writer;

pub use handler::{Handler, Outcome};
pub use parser::decode;
pub use writer::{Outgoing, WriteProgress};
