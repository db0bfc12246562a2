//! Per-socket state shared by a worker's reader and writer.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::{Buf, Bytes, BytesMut};
use hearth_protocol::Protocol;
use hearth_session::PlayerSession;
use parking_lot::Mutex;
use rustls::ServerConnection;
use tokio::net::TcpStream;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How far a connection has got with authentication.
pub(crate) enum AuthState {
    /// No message decoded yet.
    Unauthenticated,
    /// The first message is with the authenticator; later messages wait.
    Authenticating { queued: Vec<Bytes> },
    Authenticated(Arc<PlayerSession>),
    /// The reader released the connection. An authentication finishing
    /// after this must detach the player it bound.
    Closed,
}

/// Outcome of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flush {
    Done,
    Blocked,
}

/// One accepted socket.
///
/// The codec and negotiation buffers belong to the reader alone and live in
/// the reader task. What is here is touched by both paths, or by the
/// authentication task.
pub(crate) struct ConnectionState {
    id: ConnectionId,
    peer: SocketAddr,
    socket: TcpStream,
    protocol: OnceLock<Protocol>,
    tls: OnceLock<Mutex<ServerConnection>>,
    pub(crate) auth: Mutex<AuthState>,
    pending: Mutex<BytesMut>,
    close_notified: AtomicBool,
    disconnect_requested: AtomicBool,
    reader_ack: AtomicBool,
    writer_ack: AtomicBool,
}

impl ConnectionState {
    pub(crate) fn new(id: ConnectionId, peer: SocketAddr, socket: TcpStream) -> Self {
        Self {
            id,
            peer,
            socket,
            protocol: OnceLock::new(),
            tls: OnceLock::new(),
            auth: Mutex::new(AuthState::Unauthenticated),
            pending: Mutex::new(BytesMut::new()),
            close_notified: AtomicBool::new(false),
            disconnect_requested: AtomicBool::new(false),
            reader_ack: AtomicBool::new(false),
            writer_ack: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn socket(&self) -> &TcpStream {
        &self.socket
    }

    pub(crate) fn protocol(&self) -> Option<Protocol> {
        self.protocol.get().copied()
    }

    pub(crate) fn set_protocol(&self, protocol: Protocol) {
        let _ = self.protocol.set(protocol);
    }

    pub(crate) fn tls(&self) -> Option<&Mutex<ServerConnection>> {
        self.tls.get()
    }

    pub(crate) fn set_tls(&self, session: ServerConnection) {
        let _ = self.tls.set(Mutex::new(session));
    }

    // -- Teardown flags -----------------------------------------------------

    /// Marks the connection for teardown. Returns `true` for the first
    /// caller.
    pub(crate) fn request_disconnect(&self) -> bool {
        !self.disconnect_requested.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_disconnect_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::Acquire)
    }

    pub(crate) fn ack_reader(&self) -> bool {
        !self.reader_ack.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn ack_writer(&self) -> bool {
        !self.writer_ack.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_writer_acked(&self) -> bool {
        self.writer_ack.load(Ordering::Acquire)
    }

    /// Both paths have stopped touching the socket.
    pub(crate) fn is_releasable(&self) -> bool {
        self.reader_ack.load(Ordering::Acquire) && self.writer_ack.load(Ordering::Acquire)
    }

    // -- Outbound bytes (writer path) ---------------------------------------

    /// Appends already-framed bytes to the connection's output, encrypting
    /// them first on TLS connections.
    pub(crate) fn queue_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        match self.tls() {
            Some(tls) => io::Write::write_all(&mut tls.lock().writer(), bytes),
            None => {
                self.pending.lock().extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    /// Queues a TLS `close_notify` once. A no-op on plain connections.
    pub(crate) fn notify_close(&self) {
        if let Some(tls) = self.tls() {
            if !self.close_notified.swap(true, Ordering::AcqRel) {
                tls.lock().send_close_notify();
            }
        }
    }

    /// Whether output is buffered that the socket has not taken yet.
    pub(crate) fn has_unflushed(&self) -> bool {
        match self.tls() {
            Some(tls) => tls.lock().wants_write(),
            None => !self.pending.lock().is_empty(),
        }
    }

    /// Writes as much buffered output as the socket accepts without
    /// blocking.
    pub(crate) fn flush(&self) -> io::Result<Flush> {
        match self.tls() {
            Some(tls) => {
                let mut tls = tls.lock();
                while tls.wants_write() {
                    match tls.write_tls(&mut SocketIo(&self.socket)) {
                        Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                        Ok(_) => {}
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Flush::Blocked);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Flush::Done)
            }
            None => {
                let mut pending = self.pending.lock();
                while !pending.is_empty() {
                    match self.socket.try_write(&pending) {
                        Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                        Ok(n) => pending.advance(n),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Flush::Blocked);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Flush::Done)
            }
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("protocol", &self.protocol.get())
            .field("tls", &self.tls.get().is_some())
            .field("disconnect_requested", &self.is_disconnect_requested())
            .finish()
    }
}

/// Blocking-style `Read`/`Write` over a non-blocking socket, for rustls.
///
/// Both directions surface `WouldBlock` instead of waiting.
pub(crate) struct SocketIo<'a>(pub(crate) &'a TcpStream);

impl io::Read for SocketIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl io::Write for SocketIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
