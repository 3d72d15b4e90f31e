//! Connection state machine for managing TCP connections.
//!
//! ```text
//! Accepted -> Reading -> Responding -> Draining -> Closed
//!                 \-----> Failed ------------------> Closed
//! ```
//!
//! After the response, the write half is shut down and input is read and
//! discarded until the peer closes. Closing with unread input makes the
//! kernel send a reset, and the peer may lose the response.
//!
//! Each connection owns its socket, its request buffer and, once a request
//! is complete, the response still being written.

use crate::protocols::http::Outgoing;
use crate::runtime::buffer::ConnectionBuffer;
use mio::net::TcpStream;
use slab::Slab;
use std::net::SocketAddr;

/// Current phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registered for read interest, nothing read yet.
    Accepted,
    /// At least one chunk appended.
    Reading,
    /// Request complete, response being written.
    Responding,
    /// Response sent and write half shut down; input is discarded.
    Draining,
    /// An I/O fault occurred; about to be closed.
    Failed,
    /// Deregistered and closed.
    Closed,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub buffer: ConnectionBuffer,
    pub phase: Phase,
    /// Response in flight; set while `Responding`.
    pub outgoing: Option<Outgoing>,
    /// Bytes thrown away while `Draining`.
    pub discarded: usize,
}

impl Connection {
    /// Create a new connection in the accepted state.
    pub fn new(stream: TcpStream, peer: SocketAddr, buffer: ConnectionBuffer) -> Self {
        Self {
            stream,
            peer,
            buffer,
            phase: Phase::Accepted,
            outgoing: None,
            discarded: 0,
        }
    }

    /// Whether readable events should still be serviced.
    pub fn wants_read(&self) -> bool {
        matches!(self.phase, Phase::Accepted | Phase::Reading)
    }

    pub fn start_reading(&mut self) {
        if self.phase == Phase::Accepted {
            self.phase = Phase::Reading;
        }
    }

    /// Transition to responding; no further reads are serviced.
    pub fn start_responding(&mut self, outgoing: Outgoing) {
        self.phase = Phase::Responding;
        self.outgoing = Some(outgoing);
    }

    pub fn start_draining(&mut self) {
        self.phase = Phase::Draining;
        self.outgoing = None;
    }

    pub fn fail(&mut self) {
        self.phase = Phase::Failed;
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.outgoing = None;
    }
}

/// Registry of active connections using slab allocation.
///
/// Slab keys double as poll tokens.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Remove every connection.
    pub fn drain(&mut self) -> impl Iterator<Item = Connection> + '_ {
        self.connections.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::buffer::Framing;
    use bytes::Bytes;

    fn connection() -> Connection {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();
        Connection::new(
            TcpStream::from_std(stream),
            peer,
            ConnectionBuffer::new(16, 64, Framing::BlankLine),
        )
    }

    #[test]
    fn test_connection_state_transitions() {
        let mut conn = connection();
        assert_eq!(conn.phase, Phase::Accepted);
        assert!(conn.wants_read());

        conn.start_reading();
        assert_eq!(conn.phase, Phase::Reading);
        assert!(conn.wants_read());

        conn.start_responding(Outgoing::raw(Bytes::from_static(b"bye")));
        assert_eq!(conn.phase, Phase::Responding);
        assert!(!conn.wants_read());
        assert!(conn.outgoing.is_some());

        // Responding never goes back to reading.
        conn.start_reading();
        assert_eq!(conn.phase, Phase::Responding);

        conn.start_draining();
        assert_eq!(conn.phase, Phase::Draining);
        assert!(!conn.wants_read());
        assert!(conn.outgoing.is_none());

        conn.close();
        assert_eq!(conn.phase, Phase::Closed);
        assert!(conn.outgoing.is_none());
    }

    #[test]
    fn test_failed_connection_stops_reading() {
        let mut conn = connection();
        conn.start_reading();
        conn.fail();
        assert!(!conn.wants_read());
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);

        let id1 = registry.insert(connection()).unwrap();
        let id2 = registry.insert(connection()).unwrap();

        // At capacity
        assert!(registry.insert(connection()).is_none());
        assert_eq!(registry.len(), 2);

        assert!(registry.get_mut(id2).is_some());
        assert!(registry.remove(id1).is_some());
        assert!(!registry.contains(id1));
        assert!(registry.remove(id1).is_none());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.drain().count(), 1);
        assert_eq!(registry.len(), 0);
    }
}
