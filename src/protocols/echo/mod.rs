//! Echo protocol.
//!
//! The complete message, as framed by the connection buffer, is written
//! back byte-for-byte and the connection is closed. Useful for exercising
//! the reactor's framing without touching the filesystem.

use crate::protocols::http::Outgoing;
use bytes::Bytes;

/// Build the reply for one complete message.
pub fn respond(message: Bytes) -> Outgoing {
    Outgoing::raw(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::http::WriteProgress;

    #[test]
    fn test_echo_round_trip() {
        let message = Bytes::from_static(b"GET /whatever HTTP/1.1\r\n\r\n\x00\xff");
        let mut out = Vec::new();

        let progress = respond(message.clone()).write_to(&mut out, 7).unwrap();
        assert_eq!(progress, WriteProgress::Done);
        assert_eq!(out, message.to_vec());
    }
}
