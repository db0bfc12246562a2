//! Worker pairs: one reader task and one writer task sharing a set of
//! connections.
//!
//! Teardown is two-sided. Anything may request a disconnect; the reader and
//! the writer each acknowledge it once they stop touching the socket, and
//! only the reader, after seeing both acknowledgements, drops the
//! connection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use hearth_protocol::{Frame, Protocol, ProtocolCodec, RAW_MARKER};
use hearth_session::{Authenticator, ConnectionBinding};
use parking_lot::Mutex;
use rustls::ServerConnection;

use crate::connection::{AuthState, ConnectionId, ConnectionState, Flush, SocketIo};
use crate::http::{self, HttpResponse};
use crate::pool::PoolShared;

/// First byte of a TLS handshake record.
const TLS_HANDSHAKE: u8 = 0x16;

/// Reads taken from one socket before the reader moves on to the next.
const MAX_READS_PER_PASS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorkerId(pub(crate) u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Something the writer must put on a socket.
pub(crate) enum Outbound {
    /// A room payload, framed with the connection's protocol.
    Payload(Bytes),
    /// Bytes written as they are (handshake and HTTP responses).
    Raw(Bytes),
    /// Push out whatever the TLS session has buffered.
    Flush,
    /// Disconnect once everything queued before this is on the wire.
    CloseAfterFlush,
}

struct Queued {
    conn: Arc<ConnectionState>,
    item: Outbound,
}

/// State shared by a reader/writer pair and the pool.
pub(crate) struct Worker {
    id: WorkerId,
    connections: Mutex<HashMap<ConnectionId, Arc<ConnectionState>>>,
    outbound: Mutex<VecDeque<Queued>>,
    reader_waiting: AtomicBool,
    retired: AtomicBool,
    wake_reader: tokio::sync::Notify,
    wake_writer: tokio::sync::Notify,
}

impl Worker {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            connections: Mutex::new(HashMap::new()),
            outbound: Mutex::new(VecDeque::new()),
            reader_waiting: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            wake_reader: tokio::sync::Notify::new(),
            wake_writer: tokio::sync::Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn load(&self) -> usize {
        self.connections.lock().len()
    }

    pub(crate) fn is_reader_waiting(&self) -> bool {
        self.reader_waiting.load(Ordering::Acquire)
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.wake_writer.notify_one();
    }

    pub(crate) fn insert(&self, conn: Arc<ConnectionState>) {
        self.connections.lock().insert(conn.id(), conn);
        self.wake_reader.notify_one();
    }

    fn snapshot(&self) -> Vec<Arc<ConnectionState>> {
        let mut conns: Vec<_> = self.connections.lock().values().cloned().collect();
        conns.sort_by_key(|c| c.id());
        conns
    }

    pub(crate) fn wake(&self) {
        self.wake_reader.notify_one();
        self.wake_writer.notify_one();
    }

    pub(crate) fn push(&self, conn: Arc<ConnectionState>, item: Outbound) {
        self.outbound.lock().push_back(Queued { conn, item });
        self.wake_writer.notify_one();
    }

    /// Requests teardown of `conn` and wakes both paths to acknowledge it.
    pub(crate) fn request_disconnect(&self, conn: &ConnectionState) {
        if conn.request_disconnect() {
            tracing::debug!(worker = %self.id, conn_id = %conn.id(), "disconnect requested");
        }
        self.wake();
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

enum Stage {
    /// Protocol not known yet; bytes collect in `inbound`.
    Sniffing,
    /// Collecting an HTTP request (possibly decrypted from TLS).
    Http,
    Framed(ProtocolCodec),
    /// An HTTP response is on its way out; nothing more is read.
    Closing,
}

/// Reader-owned negotiation state for one connection.
struct ReadState {
    stage: Stage,
    inbound: Vec<u8>,
    saw_first_message: bool,
}

impl ReadState {
    fn new() -> Self {
        Self {
            stage: Stage::Sniffing,
            inbound: Vec::new(),
            saw_first_message: false,
        }
    }

    fn wants_read(&self) -> bool {
        !matches!(self.stage, Stage::Closing)
    }
}

enum Fill {
    Data,
    Idle,
    Eof,
}

pub(crate) struct Reader<A: Authenticator> {
    pool: Arc<PoolShared<A>>,
    worker: Arc<Worker>,
    states: HashMap<ConnectionId, ReadState>,
    scratch: Vec<u8>,
}

impl<A: Authenticator> Reader<A> {
    pub(crate) fn new(pool: Arc<PoolShared<A>>, worker: Arc<Worker>) -> Self {
        let scratch = vec![0; pool.config.read_chunk];
        Self {
            pool,
            worker,
            states: HashMap::new(),
            scratch,
        }
    }

    pub(crate) async fn run(mut self) {
        let worker_id = self.worker.id();
        tracing::debug!(worker = %worker_id, "reader started");

        loop {
            if self.pool.is_stopping() {
                self.release_all();
                break;
            }

            // Bookkeeping: release what both paths are done with.
            for conn in self.worker.snapshot() {
                if conn.is_releasable() {
                    self.worker.connections.lock().remove(&conn.id());
                    self.states.remove(&conn.id());
                    tracing::debug!(worker = %worker_id, conn_id = %conn.id(), "connection released");
                } else if conn.is_disconnect_requested() {
                    self.release(&conn);
                }
            }

            if self.pool.try_retire(&self.worker) {
                tracing::debug!(worker = %worker_id, "reader retired");
                return;
            }

            self.wait_readable().await;

            for conn in self.worker.snapshot() {
                if conn.is_disconnect_requested() {
                    continue;
                }
                let state = self.states.entry(conn.id()).or_insert_with(ReadState::new);
                if !state.wants_read() {
                    continue;
                }
                if let Err(reason) = self.service(&conn) {
                    tracing::debug!(
                        worker = %worker_id,
                        conn_id = %conn.id(),
                        peer = %conn.peer(),
                        %reason,
                        "closing connection"
                    );
                    self.worker.request_disconnect(&conn);
                }
            }
        }
        tracing::debug!(worker = %worker_id, "reader stopped");
    }

    /// Waits until a live socket is readable, the worker is woken, or the
    /// poll interval passes.
    async fn wait_readable(&self) {
        let live: Vec<Arc<ConnectionState>> = self
            .worker
            .snapshot()
            .into_iter()
            .filter(|c| {
                !c.is_disconnect_requested()
                    && self.states.get(&c.id()).is_none_or(ReadState::wants_read)
            })
            .collect();
        let mut ready: FuturesUnordered<_> = live.iter().map(|c| c.socket().readable()).collect();

        self.worker.reader_waiting.store(true, Ordering::Release);
        tokio::select! {
            _ = ready.next(), if !ready.is_empty() => {}
            _ = self.worker.wake_reader.notified() => {}
            _ = tokio::time::sleep(self.pool.config.poll_interval) => {}
        }
        self.worker.reader_waiting.store(false, Ordering::Release);
    }

    /// Stops reading `conn` and hands the bound player back to the session
    /// layer as a non-disbanding disconnect.
    fn release(&mut self, conn: &Arc<ConnectionState>) {
        if !conn.ack_reader() {
            return;
        }
        self.states.remove(&conn.id());
        let player = match std::mem::replace(&mut *conn.auth.lock(), AuthState::Closed) {
            AuthState::Authenticated(player) => Some(player),
            _ => None,
        };
        if let Some(player) = player {
            if player.detach(conn.id().into_inner(), false) {
                tracing::info!(conn_id = %conn.id(), player_id = %player.id(), "player connection lost");
            }
        }
        self.worker.wake_writer.notify_one();
    }

    fn release_all(&mut self) {
        for conn in self.worker.snapshot() {
            conn.request_disconnect();
            self.release(&conn);
        }
        self.worker.connections.lock().clear();
        self.states.clear();
        self.worker.wake_writer.notify_one();
    }

    /// Reads what `conn` has and feeds it through negotiation or its codec.
    fn service(&mut self, conn: &Arc<ConnectionState>) -> Result<(), String> {
        let mut incoming = Vec::new();
        let mut eof = false;
        for _ in 0..MAX_READS_PER_PASS {
            match self.fill(conn, &mut incoming) {
                Ok(Fill::Data) => continue,
                Ok(Fill::Idle) => break,
                Ok(Fill::Eof) => {
                    eof = true;
                    break;
                }
                Err(e) => return Err(format!("read failed: {e}")),
            }
        }
        if !incoming.is_empty() {
            self.consume(conn, &incoming)?;
        }
        if eof {
            return Err("peer closed".into());
        }
        Ok(())
    }

    /// One read from the socket. Plaintext (decrypted, on TLS connections)
    /// is appended to `out`.
    fn fill(&mut self, conn: &Arc<ConnectionState>, out: &mut Vec<u8>) -> io::Result<Fill> {
        let Some(tls) = conn.tls() else {
            return match conn.socket().try_read(&mut self.scratch) {
                Ok(0) => Ok(Fill::Eof),
                Ok(n) => {
                    out.extend_from_slice(&self.scratch[..n]);
                    Ok(Fill::Data)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Fill::Idle),
                Err(e) => Err(e),
            };
        };

        let (eof, wants_write) = {
            let mut tls = tls.lock();
            match tls.read_tls(&mut SocketIo(conn.socket())) {
                Ok(0) => return Ok(Fill::Eof),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Fill::Idle),
                Err(e) => return Err(e),
            }
            tls.process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let eof = drain_plaintext(&mut tls, &mut self.scratch, out)?;
            (eof, tls.wants_write())
        };
        if wants_write {
            self.worker.push(Arc::clone(conn), Outbound::Flush);
        }
        Ok(if eof { Fill::Eof } else { Fill::Data })
    }

    fn consume(&mut self, conn: &Arc<ConnectionState>, bytes: &[u8]) -> Result<(), String> {
        let Some(state) = self.states.get_mut(&conn.id()) else {
            return Ok(());
        };
        match state.stage {
            Stage::Sniffing => {
                state.inbound.extend_from_slice(bytes);
                self.sniff(conn)
            }
            Stage::Http => {
                state.inbound.extend_from_slice(bytes);
                self.negotiate_http(conn)
            }
            Stage::Framed(_) => self.decode(conn, bytes),
            Stage::Closing => Ok(()),
        }
    }

    /// Picks the protocol from the first bytes of the stream.
    fn sniff(&mut self, conn: &Arc<ConnectionState>) -> Result<(), String> {
        let config = &self.pool.config;
        let Some(state) = self.states.get_mut(&conn.id()) else {
            return Ok(());
        };
        let Some(&first) = state.inbound.first() else {
            return Ok(());
        };

        if first == TLS_HANDSHAKE {
            let Some(tls_config) = self.pool.tls.clone() else {
                return Err("TLS record but TLS is not configured".into());
            };
            let mut session = ServerConnection::new(tls_config)
                .map_err(|e| format!("TLS session setup failed: {e}"))?;
            session.set_buffer_limit(None);

            let ciphertext = std::mem::take(&mut state.inbound);
            let mut rd: &[u8] = &ciphertext;
            let mut plaintext = Vec::new();
            while !rd.is_empty() {
                session
                    .read_tls(&mut rd)
                    .map_err(|e| format!("TLS read failed: {e}"))?;
                session
                    .process_new_packets()
                    .map_err(|e| format!("TLS handshake failed: {e}"))?;
            }
            drain_plaintext(&mut session, &mut self.scratch, &mut plaintext)
                .map_err(|e| format!("TLS read failed: {e}"))?;
            let wants_write = session.wants_write();

            state.stage = Stage::Http;
            conn.set_tls(session);
            tracing::debug!(conn_id = %conn.id(), "TLS session started");
            if wants_write {
                self.worker.push(Arc::clone(conn), Outbound::Flush);
            }
            if plaintext.is_empty() {
                return Ok(());
            }
            return self.consume(conn, &plaintext);
        }

        if state.inbound.len() < RAW_MARKER.len() && RAW_MARKER.starts_with(&state.inbound) {
            return Ok(());
        }

        if state.inbound.starts_with(RAW_MARKER) {
            let rest = state.inbound.split_off(RAW_MARKER.len());
            state.inbound.clear();
            state.stage = Stage::Framed(Protocol::RawFramed.codec(config.max_auth_message_len));
            conn.set_protocol(Protocol::RawFramed);
            tracing::debug!(conn_id = %conn.id(), "raw framed protocol detected");
            if rest.is_empty() {
                return Ok(());
            }
            return self.decode(conn, &rest);
        }

        if !config.allow_plain_http {
            return Err("plain HTTP is not allowed".into());
        }
        state.stage = Stage::Http;
        self.negotiate_http(conn)
    }

    /// Handles the HTTP request, upgrading to WebSocket or answering it
    /// through the router.
    fn negotiate_http(&mut self, conn: &Arc<ConnectionState>) -> Result<(), String> {
        let config = &self.pool.config;
        let Some(state) = self.states.get_mut(&conn.id()) else {
            return Ok(());
        };
        let parsed = http::parse_request(
            &state.inbound,
            config.max_http_header_len,
            config.max_http_body_len,
        );
        let (request, used) = match parsed {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::debug!(conn_id = %conn.id(), error = %e, "rejecting HTTP request");
                state.stage = Stage::Closing;
                self.worker.push(
                    Arc::clone(conn),
                    Outbound::Raw(Bytes::from(HttpResponse::bad_request().to_bytes())),
                );
                self.worker.push(Arc::clone(conn), Outbound::CloseAfterFlush);
                return Ok(());
            }
        };
        let rest = state.inbound.split_off(used);
        state.inbound.clear();

        match request.websocket_key() {
            Some(key) => {
                self.worker.push(
                    Arc::clone(conn),
                    Outbound::Raw(Bytes::from(http::upgrade_response(key))),
                );
                state.stage = Stage::Framed(Protocol::WebSocket.codec(config.max_auth_message_len));
                conn.set_protocol(Protocol::WebSocket);
                tracing::debug!(conn_id = %conn.id(), path = %request.path, "websocket upgrade");
                if rest.is_empty() {
                    return Ok(());
                }
                self.decode(conn, &rest)
            }
            None => {
                let response = self.pool.router.route(&request);
                tracing::debug!(
                    conn_id = %conn.id(),
                    method = %request.method,
                    path = %request.path,
                    status = response.status,
                    "http request"
                );
                state.stage = Stage::Closing;
                self.worker
                    .push(Arc::clone(conn), Outbound::Raw(Bytes::from(response.to_bytes())));
                self.worker.push(Arc::clone(conn), Outbound::CloseAfterFlush);
                Ok(())
            }
        }
    }

    fn decode(&mut self, conn: &Arc<ConnectionState>, bytes: &[u8]) -> Result<(), String> {
        let max_message_len = self.pool.config.max_message_len;
        let Some(state) = self.states.get_mut(&conn.id()) else {
            return Ok(());
        };
        let Stage::Framed(codec) = &mut state.stage else {
            return Ok(());
        };
        let frames = codec.decode(bytes).map_err(|e| e.to_string())?;
        for frame in frames {
            match frame {
                Frame::Message(message) => {
                    if !state.saw_first_message {
                        state.saw_first_message = true;
                        codec.set_max_len(max_message_len);
                    }
                    dispatch(&self.pool, &self.worker, conn, message);
                }
                Frame::Close => return Err("close frame".into()),
            }
        }
        Ok(())
    }
}

/// Moves every decrypted byte out of `tls`. Returns `true` on a clean
/// `close_notify`.
fn drain_plaintext(
    tls: &mut ServerConnection,
    scratch: &mut [u8],
    out: &mut Vec<u8>,
) -> io::Result<bool> {
    loop {
        match tls.reader().read(scratch) {
            Ok(0) => return Ok(true),
            Ok(n) => out.extend_from_slice(&scratch[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch and authentication
// ---------------------------------------------------------------------------

/// Routes one decoded message by the connection's authentication state.
fn dispatch<A: Authenticator>(
    pool: &Arc<PoolShared<A>>,
    worker: &Arc<Worker>,
    conn: &Arc<ConnectionState>,
    message: Bytes,
) {
    let player = {
        let mut auth = conn.auth.lock();
        let player = match &mut *auth {
            AuthState::Authenticated(player) => Some(Arc::clone(player)),
            AuthState::Authenticating { queued } => {
                queued.push(message);
                return;
            }
            AuthState::Closed => return,
            AuthState::Unauthenticated => None,
        };
        if player.is_none() {
            *auth = AuthState::Authenticating { queued: Vec::new() };
        }
        player
    };

    match player {
        Some(player) => pool.registry.dispatch_message(&player, message),
        None => {
            tokio::spawn(authenticate(
                Arc::clone(pool),
                Arc::clone(worker),
                Arc::clone(conn),
                message,
            ));
        }
    }
}

/// Runs the authenticator on the first message, then binds and routes the
/// player and replays anything that arrived in the meantime.
async fn authenticate<A: Authenticator>(
    pool: Arc<PoolShared<A>>,
    worker: Arc<Worker>,
    conn: Arc<ConnectionState>,
    payload: Bytes,
) {
    let conn_id = conn.id();
    let identity = match pool.auth.authenticate(&payload).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(%conn_id, peer = %conn.peer(), error = %e, "authentication failed");
            worker.request_disconnect(&conn);
            return;
        }
    };
    if conn.is_disconnect_requested() {
        return;
    }

    let binding = binding_for(&worker, &conn);
    let player = match pool.sessions.attach(identity, binding) {
        Ok((player, _)) => player,
        Err(e) => {
            tracing::warn!(%conn_id, error = %e, "session rejected");
            worker.request_disconnect(&conn);
            return;
        }
    };
    tracing::info!(%conn_id, player_id = %player.id(), uid = %player.uid(), "player authenticated");

    if !pool.registry.route_player(&player) {
        tracing::warn!(%conn_id, player_id = %player.id(), "no room would take the player");
        player.detach(conn_id.into_inner(), true);
        return;
    }

    let released = {
        let mut auth = conn.auth.lock();
        match std::mem::replace(&mut *auth, AuthState::Authenticated(Arc::clone(&player))) {
            AuthState::Authenticating { queued } => {
                for message in queued {
                    pool.registry.dispatch_message(&player, message);
                }
                false
            }
            AuthState::Closed => {
                *auth = AuthState::Closed;
                true
            }
            other => {
                *auth = other;
                false
            }
        }
    };
    if released {
        player.detach(conn_id.into_inner(), false);
    }
}

/// Send and close callbacks that target `conn` through the worker's queue.
fn binding_for(worker: &Arc<Worker>, conn: &Arc<ConnectionState>) -> ConnectionBinding {
    let (send_worker, send_conn) = (Arc::downgrade(worker), Arc::downgrade(conn));
    let (close_worker, close_conn) = (Arc::downgrade(worker), Arc::downgrade(conn));
    ConnectionBinding::new(
        conn.id().into_inner(),
        move |bytes| {
            if let Some((worker, conn)) = upgrade(&send_worker, &send_conn) {
                if !conn.is_disconnect_requested() {
                    worker.push(conn, Outbound::Payload(bytes));
                }
            }
        },
        move || {
            if let Some((worker, conn)) = upgrade(&close_worker, &close_conn) {
                worker.push(conn, Outbound::CloseAfterFlush);
            }
        },
    )
}

fn upgrade(
    worker: &Weak<Worker>,
    conn: &Weak<ConnectionState>,
) -> Option<(Arc<Worker>, Arc<ConnectionState>)> {
    Some((worker.upgrade()?, conn.upgrade()?))
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

pub(crate) struct Writer<A: Authenticator> {
    pool: Arc<PoolShared<A>>,
    worker: Arc<Worker>,
}

impl<A: Authenticator> Writer<A> {
    pub(crate) fn new(pool: Arc<PoolShared<A>>, worker: Arc<Worker>) -> Self {
        Self { pool, worker }
    }

    pub(crate) async fn run(self) {
        let worker_id = self.worker.id();
        tracing::debug!(worker = %worker_id, "writer started");
        let mut stalled: Vec<Arc<ConnectionState>> = Vec::new();

        loop {
            self.acknowledge();
            if self.worker.is_retired() || self.pool.is_stopping() {
                break;
            }

            self.wait_writable(&stalled).await;

            let mut blocked: HashSet<ConnectionId> = HashSet::new();
            for conn in std::mem::take(&mut stalled) {
                if conn.is_disconnect_requested() {
                    continue;
                }
                match conn.flush() {
                    Ok(Flush::Done) => {}
                    Ok(Flush::Blocked) => {
                        blocked.insert(conn.id());
                        stalled.push(conn);
                    }
                    Err(e) => {
                        tracing::debug!(conn_id = %conn.id(), error = %e, "write failed");
                        self.worker.request_disconnect(&conn);
                    }
                }
            }
            let mut requeue: VecDeque<Queued> = VecDeque::new();
            let batch: VecDeque<Queued> = std::mem::take(&mut *self.worker.outbound.lock());

            for queued in batch {
                let conn = &queued.conn;
                if conn.is_disconnect_requested() {
                    continue;
                }
                if blocked.contains(&conn.id()) {
                    requeue.push_back(queued);
                    continue;
                }
                match self.write(conn, &queued.item) {
                    Ok(Flush::Done) => {
                        if matches!(queued.item, Outbound::CloseAfterFlush) {
                            tracing::debug!(conn_id = %conn.id(), "closing after flush");
                            self.worker.request_disconnect(conn);
                        }
                    }
                    Ok(Flush::Blocked) => {
                        blocked.insert(conn.id());
                        stalled.push(Arc::clone(conn));
                        if matches!(queued.item, Outbound::CloseAfterFlush) {
                            requeue.push_back(queued);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(conn_id = %conn.id(), error = %e, "write failed");
                        self.worker.request_disconnect(conn);
                    }
                }
            }

            if !requeue.is_empty() {
                let mut outbound = self.worker.outbound.lock();
                while let Some(queued) = requeue.pop_back() {
                    outbound.push_front(queued);
                }
            }
        }

        self.acknowledge();
        self.worker.outbound.lock().clear();
        tracing::debug!(worker = %worker_id, "writer stopped");
    }

    /// Acknowledges every requested disconnect and wakes the reader to
    /// release them.
    fn acknowledge(&self) {
        let mut acked = false;
        for conn in self.worker.snapshot() {
            if conn.is_disconnect_requested() && !conn.is_writer_acked() {
                acked |= conn.ack_writer();
            }
        }
        if acked {
            self.worker.wake_reader.notify_one();
        }
    }

    async fn wait_writable(&self, stalled: &[Arc<ConnectionState>]) {
        if !self.worker.outbound.lock().is_empty() && stalled.is_empty() {
            return;
        }
        let mut ready: FuturesUnordered<_> = stalled
            .iter()
            .filter(|c| !c.is_disconnect_requested())
            .map(|c| c.socket().writable())
            .collect();
        tokio::select! {
            _ = ready.next(), if !ready.is_empty() => {}
            _ = self.worker.wake_writer.notified() => {}
            _ = tokio::time::sleep(self.pool.config.poll_interval) => {}
        }
    }

    /// Queues `item`'s bytes on the connection and flushes.
    fn write(&self, conn: &Arc<ConnectionState>, item: &Outbound) -> io::Result<Flush> {
        match item {
            Outbound::Payload(bytes) => {
                let Some(protocol) = conn.protocol() else {
                    tracing::debug!(conn_id = %conn.id(), "payload before negotiation dropped");
                    return Ok(Flush::Done);
                };
                let framed = protocol
                    .encode(bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                conn.queue_bytes(&framed)?;
            }
            Outbound::Raw(bytes) => conn.queue_bytes(bytes)?,
            Outbound::Flush => {}
            Outbound::CloseAfterFlush => conn.notify_close(),
        }
        conn.flush()
    }
}
