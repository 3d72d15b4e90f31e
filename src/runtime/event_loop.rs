//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! One thread runs the loop and owns every connection. The poll timeout
//! bounds how long the loop sleeps between batches; a timeout of zero turns
//! it into a busy poll that keeps one core fully occupied.
//!
//! ## Shutdown
//!
//! Shutdown is a command, either returned by request processing or sent
//! through a `ShutdownHandle`. It is acted on once the current batch of
//! ready events has been dispatched.

use crate::config::Config;
use crate::protocols::http::{Handler, WriteProgress};
use crate::runtime::buffer::{Completion, ConnectionBuffer, Framing};
use crate::runtime::connection::{Connection, ConnectionRegistry, Phase};
use crate::runtime::protocol::{ProcessResult, Responder};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Commands delivered to the loop from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Shutdown,
}

/// Whether the loop keeps running after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// Stops a running reactor from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Sender<Control>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the reactor to stop after its current batch of events.
    pub fn shutdown(&self) -> io::Result<()> {
        // A closed channel means the reactor is already gone.
        if self.tx.send(Control::Shutdown).is_ok() {
            self.waker.wake()?;
        }
        Ok(())
    }
}

/// Single-threaded event loop serving one request per connection.
pub struct Reactor {
    poll: Poll,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    connections: ConnectionRegistry,
    responder: Responder,
    framing: Framing,
    chunk_size: usize,
    max_request_size: usize,
    batch_size: usize,
    poll_timeout: Duration,
    /// Scratch space for one read call, reused across connections.
    read_buf: Vec<u8>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    waker: Arc<Waker>,
}

impl Reactor {
    /// Bind the listening socket and register it with a new poll instance.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let poll = Poll::new()?;

        let mut listener = TcpListener::from_std(create_listener(config.listen)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (control_tx, control_rx) = mpsc::channel();

        let responder = Responder::new(
            config.protocol,
            Handler::new(config.root.clone(), config.allow_remote_shutdown),
            config.server_name.clone(),
        );

        info!(
            addr = %local_addr,
            protocol = ?config.protocol,
            framing = ?config.framing,
            chunk_size = config.chunk_size,
            poll_timeout_ms = config.poll_timeout_ms,
            "Reactor bound"
        );

        Ok(Self {
            poll,
            listener: Some(listener),
            local_addr,
            connections: ConnectionRegistry::new(config.max_connections),
            responder,
            framing: config.framing,
            chunk_size: config.chunk_size,
            max_request_size: config.max_request_size,
            batch_size: config.batch_size,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            read_buf: vec![0u8; config.chunk_size],
            control_tx,
            control_rx,
            waker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.control_tx.clone(),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Run until shutdown is requested or the poll itself fails.
    ///
    /// Per-connection faults never end the loop. A poll failure stops the
    /// reactor and is returned.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.batch_size);

        while self.listener.is_some() {
            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Poll failed, stopping reactor");
                self.stop();
                return Err(e);
            }

            let mut flow = Flow::Continue;

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    WAKER_TOKEN => trace!("Woken"),
                    Token(conn_id) => match self.handle_connection_event(conn_id, event) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Shutdown) => flow = Flow::Shutdown,
                        Err(e) => {
                            debug!(conn_id, error = %e, "Connection error");
                            if let Some(conn) = self.connections.get_mut(conn_id) {
                                conn.fail();
                            }
                            self.close_connection(conn_id);
                        }
                    },
                }
            }

            if flow == Flow::Shutdown || self.control_rx.try_recv() == Ok(Control::Shutdown) {
                self.stop();
            }
        }

        Ok(())
    }

    /// Deregister and close every connection and the listening socket.
    ///
    /// After this returns, new connection attempts are refused.
    pub fn stop(&mut self) {
        let registry = self.poll.registry();
        for mut conn in self.connections.drain() {
            let _ = registry.deregister(&mut conn.stream);
            conn.close();
        }

        if let Some(mut listener) = self.listener.take() {
            let _ = registry.deregister(&mut listener);
            info!(addr = %self.local_addr, "Reactor stopped");
        }
    }

    fn accept_connections(&mut self) {
        let listener = match self.listener.as_ref() {
            Some(listener) => listener,
            None => return,
        };

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let buffer =
                        ConnectionBuffer::new(self.chunk_size, self.max_request_size, self.framing);

                    let conn = Connection::new(stream, peer, buffer);
                    let conn_id = match self.connections.insert(conn) {
                        Some(id) => id,
                        None => {
                            warn!(peer = %peer, "Connection limit reached");
                            continue;
                        }
                    };

                    // Re-borrow after insert
                    let registered = match self.connections.get_mut(conn_id) {
                        Some(conn) => self.poll.registry().register(
                            &mut conn.stream,
                            Token(conn_id),
                            Interest::READABLE,
                        ),
                        None => continue,
                    };

                    match registered {
                        Ok(()) => debug!(
                            conn_id,
                            peer = %peer,
                            active = self.connections.len(),
                            "Accepted connection"
                        ),
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "Failed to register connection");
                            self.connections.remove(conn_id);
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn handle_connection_event(
        &mut self,
        conn_id: usize,
        event: &mio::event::Event,
    ) -> io::Result<Flow> {
        if !self.connections.contains(conn_id) {
            return Ok(Flow::Continue);
        }

        let mut flow = Flow::Continue;

        if event.is_readable() || event.is_read_closed() || event.is_error() {
            flow = self.handle_readable(conn_id)?;
        }

        // Re-check connection exists (may have been removed)
        if !self.connections.contains(conn_id) {
            return Ok(flow);
        }

        if event.is_writable() || event.is_write_closed() {
            self.handle_writable(conn_id)?;
        }

        Ok(flow)
    }

    /// Drain the socket into the connection buffer until it would block or
    /// the request is complete.
    fn handle_readable(&mut self, conn_id: usize) -> io::Result<Flow> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        if conn.phase == Phase::Draining {
            self.discard_input(conn_id)?;
            return Ok(Flow::Continue);
        }

        if !conn.wants_read() {
            return Ok(Flow::Continue);
        }

        loop {
            let completion = match conn.stream.read(&mut self.read_buf) {
                Ok(0) => conn.buffer.end_of_stream(),
                Ok(n) => {
                    conn.start_reading();
                    let completion = conn.buffer.append(&self.read_buf, n)?;
                    trace!(conn_id, bytes = n, total = conn.buffer.len(), "Read chunk");
                    completion
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Flow::Continue)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            match completion {
                Completion::Pending => {}
                Completion::Complete => break,
                Completion::Empty => {
                    trace!(conn_id, "Peer closed without sending a request");
                    self.close_connection(conn_id);
                    return Ok(Flow::Continue);
                }
            }
        }

        let message = conn.buffer.take();
        let peer = conn.peer;
        debug!(conn_id, peer = %peer, bytes = message.len(), "Request complete");

        let (outgoing, flow) = match self.responder.process(message, peer) {
            ProcessResult::Reply(outgoing) => (outgoing, Flow::Continue),
            ProcessResult::Shutdown(outgoing) => (outgoing, Flow::Shutdown),
        };
        conn.start_responding(outgoing);

        // Most responses fit in the socket buffer; try right away.
        self.handle_writable(conn_id)?;
        Ok(flow)
    }

    fn handle_writable(&mut self, conn_id: usize) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        let outgoing = match conn.outgoing.as_mut() {
            Some(outgoing) => outgoing,
            None => return Ok(()), // Not in responding state
        };

        match outgoing.write_to(&mut conn.stream, self.chunk_size)? {
            WriteProgress::Done => {
                trace!(conn_id, bytes = outgoing.written(), "Response written");
                if let Err(e) = conn.stream.shutdown(Shutdown::Write) {
                    trace!(conn_id, error = %e, "Write shutdown failed");
                    self.close_connection(conn_id);
                    return Ok(());
                }
                conn.start_draining();
                self.poll.registry().reregister(
                    &mut conn.stream,
                    Token(conn_id),
                    Interest::READABLE,
                )?;
                self.discard_input(conn_id)?;
            }
            WriteProgress::Blocked => {
                self.poll.registry().reregister(
                    &mut conn.stream,
                    Token(conn_id),
                    Interest::WRITABLE,
                )?;
            }
        }

        Ok(())
    }

    /// Read and drop whatever the peer still sends, closing once it
    /// half-closes or sends more than a request's worth of bytes.
    fn discard_input(&mut self, conn_id: usize) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        loop {
            match conn.stream.read(&mut self.read_buf) {
                Ok(0) => break,
                Ok(n) => {
                    conn.discarded += n;
                    if conn.discarded > self.max_request_size {
                        debug!(conn_id, bytes = conn.discarded, "Too much input after response");
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        self.close_connection(conn_id);
        Ok(())
    }

    /// Deregister, then close.
    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            let phase = conn.phase;
            conn.close();
            debug!(conn_id, peer = %conn.peer, last_phase = ?phase, "Connection closed");
        }
    }
}

/// Create a non-blocking TCP listener.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
