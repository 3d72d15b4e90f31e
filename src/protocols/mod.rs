//! Protocol implementations.
//!
//! Each protocol turns one complete message into the bytes written back
//! before the connection closes.
//!
//! - `http`: request line routing with file serving
//! - `echo`: returns the message verbatim

pub mod echo;
pub mod http;

use serde::Deserialize;

/// Protocol served on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Echo,
}
