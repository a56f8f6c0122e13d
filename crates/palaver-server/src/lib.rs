//! Palaver chat server.
//!
//! A persistent-connection chat service over line-delimited JSON: clients
//! authenticate, join named rooms, and exchange commands that trigger
//! broadcasts, whispers, and membership changes.
//!
//! # Architecture
//!
//! Each accepted connection becomes a pair of tasks sharing one
//! [`Session`]: a read task that splits the byte stream into lines,
//! decodes them, and runs them through the [`Dispatcher`]; and a writer
//! task that alone drains the session's outbound queue onto the socket.
//! Sessions therefore progress fully in parallel, while each connection's
//! writes stay serialized and in queue order.
//!
//! Shared state is limited to the two registries: [`SessionRegistry`]
//! (username to live session) and [`RoomRegistry`] (room name to room).
//! Rooms hold only weak back-references to their members, so a session's
//! lifetime is governed solely by its connection; stale members are pruned
//! lazily during broadcast passes.
//!
//! # Components
//!
//! - [`Session`]: per-connection state and outbound queue
//! - [`SessionRegistry`] / [`RoomRegistry`]: the single source of truth
//!   for session and room existence
//! - [`Room`]: membership, bounded history, fan-out
//! - [`Dispatcher`]: command routing and the auth state machine
//! - [`CredentialStore`]: external credential lookup boundary
//! - [`Server`]: TCP runtime tying the above together

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod credentials;
mod dispatcher;
mod error;
mod registry;
mod rooms;
mod session;

use std::{
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

pub use credentials::{CredentialStore, MemoryCredentials};
pub use dispatcher::Dispatcher;
pub use error::ServerError;
use palaver_proto::{Command, MAX_LINE_BYTES, ProtocolError, Response};
pub use registry::SessionRegistry;
pub use rooms::{Room, RoomRegistry};
pub use session::{Session, SessionId};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::mpsc,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g. "0.0.0.0:12345").
    pub bind_address: String,
    /// Maximum concurrent connections; further accepts are refused.
    pub max_connections: usize,
    /// Messages of history each room retains.
    pub history_limit: usize,
    /// Outbound queue depth per session. A session whose queue fills is
    /// treated as a dead peer and disconnected.
    pub outbound_queue: usize,
    /// Usernames allowed to issue KICK and DELETE_ROOM.
    pub admin_users: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:12345".to_string(),
            max_connections: 10_000,
            history_limit: 10,
            outbound_queue: 256,
            admin_users: vec!["admin".to_string()],
        }
    }
}

/// State shared by every connection task.
struct ServerState {
    config: ServerConfig,
    dispatcher: Dispatcher,
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomRegistry>,
    /// Live connection count, for the max-connections gate.
    active: AtomicUsize,
    /// Next session identity to hand out.
    next_session_id: AtomicU64,
}

/// Palaver TCP server.
///
/// Binds a listener, then [`Server::run`] accepts connections forever and
/// spawns a task pair per connection.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind a server with the default in-memory credential store.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_with(config, Arc::new(MemoryCredentials::new())).await
    }

    /// Bind a server consulting the given credential store.
    pub async fn bind_with(
        config: ServerConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ServerError::Config(format!("invalid bind address '{}': {e}", config.bind_address))
        })?;
        let listener = TcpListener::bind(addr).await?;

        let sessions = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomRegistry::new(config.history_limit));
        let dispatcher = Dispatcher::new(
            Arc::clone(&sessions),
            Arc::clone(&rooms),
            credentials,
            config.admin_users.iter().cloned(),
        );

        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                config,
                dispatcher,
                sessions,
                rooms,
                active: AtomicUsize::new(0),
                next_session_id: AtomicU64::new(1),
            }),
        })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until the process is stopped.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("accept error: {e}");
                    continue;
                }
            };

            if self.state.active.load(Ordering::Acquire) >= self.state.config.max_connections {
                tracing::warn!(%peer, "connection refused: max connections reached");
                drop(socket);
                continue;
            }
            self.state.active.fetch_add(1, Ordering::AcqRel);

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                handle_connection(socket, peer, &state).await;
                state.active.fetch_sub(1, Ordering::AcqRel);
            });
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("active", &self.state.active.load(Ordering::Relaxed))
            .finish()
    }
}

/// Serve one connection: spawn its writer, run its read loop, then clean
/// up. Cleanup runs exactly once here, no matter which side failed first.
async fn handle_connection(socket: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let id = SessionId::new(state.next_session_id.fetch_add(1, Ordering::Relaxed));
    let (session, outbound_rx) = Session::new(id, state.config.outbound_queue);

    tracing::info!(session = %id, %peer, "connection accepted");

    let (read_half, write_half) = socket.into_split();

    // The writer holds only a weak handle: once cleanup drops the last
    // strong reference, the queue closes and the writer drains out.
    tokio::spawn(write_loop(outbound_rx, write_half, Arc::downgrade(&session), id));

    read_loop(read_half, &session, state).await;
    disconnect(&session, state).await;

    tracing::info!(session = %id, "connection closed");
}

/// What one bounded line read produced.
enum LineRead {
    /// Stream ended cleanly.
    Eof,
    /// One line (or a final unterminated fragment) is in the buffer.
    Line,
    /// The peer exceeded the line limit.
    TooLong(usize),
}

/// Read one newline-terminated line into `buf`, refusing to buffer more
/// than [`MAX_LINE_BYTES`] for a single line.
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = reader.take(MAX_LINE_BYTES as u64 + 1);
    let n = limited.read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if n > MAX_LINE_BYTES {
        return Ok(LineRead::TooLong(n));
    }
    Ok(LineRead::Line)
}

/// Per-connection read loop: split lines, decode, dispatch, reply.
async fn read_loop(
    read_half: tokio::net::tcp::OwnedReadHalf,
    session: &Arc<Session>,
    state: &Arc<ServerState>,
) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        let read = tokio::select! {
            () = session.closed() => break,
            read = read_line_bounded(&mut reader, &mut buf) => read,
        };

        match read {
            Ok(LineRead::Eof) => break,
            Ok(LineRead::Line) => {}
            Ok(LineRead::TooLong(n)) => {
                // Oversized frames are the one protocol violation that is
                // connection-fatal; anything buffered without bound would
                // let a peer exhaust memory.
                tracing::warn!(session = %session.id(), bytes = n, "oversized frame");
                session.submit(Response::error(ProtocolError::OversizedFrame(n).to_string()));
                break;
            }
            Err(e) => {
                tracing::debug!(session = %session.id(), "read error: {e}");
                break;
            }
        }

        // Strip the line terminator (LF, optionally preceded by CR).
        let mut end = buf.len();
        if end > 0 && buf[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && buf[end - 1] == b'\r' {
            end -= 1;
        }

        let Ok(line) = std::str::from_utf8(&buf[..end]) else {
            session.submit(Response::error(ProtocolError::InvalidUtf8.to_string()));
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match Command::decode(line) {
            Ok(command) => state.dispatcher.dispatch(session, command).await,
            Err(e) => Response::error(e.to_string()),
        };

        if !session.submit(reply) {
            break;
        }
    }
}

/// Per-connection writer: the only task that touches the socket's write
/// half, draining the outbound queue in order.
async fn write_loop(
    mut outbound_rx: mpsc::Receiver<Response>,
    write_half: OwnedWriteHalf,
    session: Weak<Session>,
    id: SessionId,
) {
    let mut writer = BufWriter::new(write_half);

    while let Some(response) = outbound_rx.recv().await {
        let line = match response.encode() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(session = %id, "failed to encode response: {e}");
                continue;
            }
        };

        if let Err(e) = write_line(&mut writer, &line).await {
            tracing::debug!(session = %id, "write error: {e}");
            // A dead write side is terminal for the whole session.
            if let Some(session) = session.upgrade() {
                session.begin_close();
            }
            return;
        }
    }

    if let Err(e) = writer.flush().await {
        tracing::debug!(session = %id, "final flush failed: {e}");
    }
}

async fn write_line(writer: &mut BufWriter<OwnedWriteHalf>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Disconnect cleanup: mark the session closing, remove it from every room
/// it joined and from the session registry, and let its queued messages
/// drop with the queue. Safe when a kick already did part of the work.
async fn disconnect(session: &Arc<Session>, state: &Arc<ServerState>) {
    session.begin_close();

    for room_name in session.take_rooms().await {
        if let Some(room) = state.rooms.get(&room_name).await {
            room.remove_member(session.id()).await;
        }
    }

    if let Some(username) = session.username() {
        state.sessions.remove(username, session).await;
        tracing::debug!(session = %session.id(), user = %username, "session unregistered");
    }
}
