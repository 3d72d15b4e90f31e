//! Protocol processing for the runtime.
//!
//! Turns one complete message into the bytes to send back, synchronously
//! and without touching the socket.

use crate::protocols::http::{self, Handler, Outcome, Outgoing};
use crate::protocols::{echo, Protocol};
use bytes::Bytes;
use std::net::SocketAddr;
use tracing::debug;

/// Result of processing a complete message.
#[derive(Debug)]
pub enum ProcessResult {
    /// Write the reply, then close the connection.
    Reply(Outgoing),
    /// Write the reply, close the connection, then stop the server.
    Shutdown(Outgoing),
}

/// Everything needed to answer a request, shared by all connections.
#[derive(Debug, Clone)]
pub struct Responder {
    protocol: Protocol,
    handler: Handler,
    server_name: String,
}

impl Responder {
    pub fn new(protocol: Protocol, handler: Handler, server_name: impl Into<String>) -> Self {
        Self {
            protocol,
            handler,
            server_name: server_name.into(),
        }
    }

    pub fn process(&self, message: Bytes, peer: SocketAddr) -> ProcessResult {
        match self.protocol {
            Protocol::Echo => ProcessResult::Reply(echo::respond(message)),
            Protocol::Http => {
                let decoded = http::decode(&message);
                match self.handler.produce(&decoded, peer) {
                    Outcome::Respond(response) => {
                        debug!(peer = %peer, status = response.status.code(), "Responding");
                        ProcessResult::Reply(Outgoing::response(response, &self.server_name))
                    }
                    Outcome::Terminate(response) => {
                        ProcessResult::Shutdown(Outgoing::response(response, &self.server_name))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn render(outgoing: Outgoing) -> Vec<u8> {
        let mut out = Vec::new();
        let mut outgoing = outgoing;
        outgoing.write_to(&mut out, 64).unwrap();
        out
    }

    #[test]
    fn test_http_reply() {
        let responder = Responder::new(Protocol::Http, Handler::new(".", false), "srv");
        match responder.process(Bytes::from_static(b"GET /ping HTTP/1.1\r\n\r\n"), peer()) {
            ProcessResult::Reply(outgoing) => {
                let out = render(outgoing);
                assert!(out.starts_with(b"HTTP/1.1 200 OK\r\nServer : srv\r\n"));
                assert!(out.ends_with(b"\r\n\r\nOK"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_http_shutdown() {
        let responder = Responder::new(Protocol::Http, Handler::new(".", false), "srv");
        let result = responder.process(Bytes::from_static(b"GET /close HTTP/1.1\r\n\r\n"), peer());
        assert!(matches!(result, ProcessResult::Shutdown(_)));
    }

    #[test]
    fn test_echo_ignores_http_routing() {
        let responder = Responder::new(Protocol::Echo, Handler::new(".", false), "srv");
        let message = Bytes::from_static(b"GET /close HTTP/1.1\r\n\r\n");
        match responder.process(message.clone(), peer()) {
            ProcessResult::Reply(outgoing) => assert_eq!(render(outgoing), message.to_vec()),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
