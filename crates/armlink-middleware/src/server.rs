//! [`RelayServer`] – the sending side of the relay.
//!
//! Accepts robot clients on a blocking [`TcpListener`], checks each peer
//! against the [`PeerAllowList`] before writing anything, and serves every
//! admitted connection on its own OS thread.  Each connection pulls
//! [`Turn`]s from its own [`ActionSource`] and writes one frame per turn.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! use armlink_middleware::{EventBus, RelayServer, ScriptSource, ServerOptions};
//! use armlink_types::{RawAction, Turn};
//!
//! let server = RelayServer::bind("0.0.0.0:8000", ServerOptions::default(), EventBus::default())
//!     .expect("bind");
//! let shutdown = Arc::new(AtomicBool::new(false));
//! server
//!     .run_until(
//!         |_peer| {
//!             let turn = Turn::new(vec![RawAction::named("reset_pose").with_gripper(30)]);
//!             Box::new(ScriptSource::from(vec![turn]))
//!         },
//!         &shutdown,
//!     )
//!     .expect("accept loop");
//! ```

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use armlink_kernel::PeerAllowList;
use armlink_types::{LinkError, RawAction, RelayEvent, Turn};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::framing::encode_frame;

const SOURCE: &str = "armlink-middleware::server";

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// Turn sources
// ---------------------------------------------------------------------------

/// Supplies the turns sent on one connection.  `None` ends the connection.
pub trait ActionSource: Send {
    fn next_turn(&mut self) -> Option<Turn>;
}

/// A fixed list of turns, sent in order.
#[derive(Debug, Default)]
pub struct ScriptSource {
    turns: VecDeque<Turn>,
}

impl From<Vec<Turn>> for ScriptSource {
    fn from(turns: Vec<Turn>) -> Self {
        Self {
            turns: turns.into(),
        }
    }
}

impl ActionSource for ScriptSource {
    fn next_turn(&mut self) -> Option<Turn> {
        self.turns.pop_front()
    }
}

/// Fan-out of operator turns to every connected client.
///
/// Each connection subscribes when it is accepted and sees the turns
/// published after that point.  Dropping every `TurnFeed` handle ends all
/// subscribed connections.
#[derive(Debug, Clone)]
pub struct TurnFeed {
    sender: broadcast::Sender<Turn>,
}

impl TurnFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Queue `turn` for every current subscriber.  Returns how many
    /// connections will receive it.
    pub fn publish(&self, turn: Turn) -> usize {
        self.sender.send(turn).unwrap_or(0)
    }

    pub fn subscribe(&self) -> FeedSource {
        FeedSource {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for TurnFeed {
    fn default() -> Self {
        Self::new(64)
    }
}

/// One connection's view of a [`TurnFeed`].
pub struct FeedSource {
    receiver: broadcast::Receiver<Turn>,
}

impl ActionSource for FeedSource {
    fn next_turn(&mut self) -> Option<Turn> {
        loop {
            match self.receiver.blocking_recv() {
                Ok(turn) => return Some(turn),
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "connection fell behind the turn feed");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-server behaviour switches, shared read-only by every connection.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub allow_list: PeerAllowList,
    /// Pose pushed as the first frame of every connection.
    pub initial_pose: Option<Vec<f64>>,
    /// Push `initial_pose` again after each turn.
    pub return_home_after_turn: bool,
    /// Stamp `action_id`, `step` and `user_command` onto each action.
    pub attach_metadata: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            allow_list: PeerAllowList::new(),
            initial_pose: None,
            return_home_after_turn: false,
            attach_metadata: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

pub struct RelayServer {
    listener: TcpListener,
    options: Arc<ServerOptions>,
    bus: EventBus,
}

impl RelayServer {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Transport`] if the address cannot be bound.
    pub fn bind(
        addr: impl ToSocketAddrs,
        options: ServerOptions,
        bus: EventBus,
    ) -> Result<Self, LinkError> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| LinkError::Transport(format!("bind failed: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| LinkError::Transport(format!("listener setup failed: {e}")))?;
        Ok(Self {
            listener,
            options: Arc::new(options),
            bus,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        self.listener
            .local_addr()
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    /// Accept connections until `shutdown` is set.
    ///
    /// `make_source` is called once per admitted peer; the returned source
    /// is owned by that connection's thread.  Connection threads are not
    /// joined on return.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Transport`] if the listener fails; per-connection
    /// failures only end that connection.
    pub fn run_until<F>(&self, make_source: F, shutdown: &AtomicBool) -> Result<(), LinkError>
    where
        F: Fn(SocketAddr) -> Box<dyn ActionSource>,
    {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "relay server listening");
        }

        while !shutdown.load(Ordering::SeqCst) {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(LinkError::Transport(format!("accept failed: {e}")));
                }
            };

            if let Err(e) = self.options.allow_list.check(&peer) {
                warn!(%peer, "{e}");
                let _ = stream.shutdown(Shutdown::Both);
                self.bus.emit(
                    SOURCE,
                    RelayEvent::Rejected {
                        peer: peer.to_string(),
                    },
                );
                continue;
            }

            info!(%peer, "client connected");
            self.bus.emit(
                SOURCE,
                RelayEvent::Connected {
                    peer: peer.to_string(),
                },
            );

            let source = make_source(peer);
            let options = Arc::clone(&self.options);
            let bus = self.bus.clone();
            let spawned = thread::Builder::new()
                .name(format!("relay-{peer}"))
                .spawn(move || handle_connection(stream, peer, source, options, bus));
            if let Err(e) = spawned {
                error!(%peer, error = %e, "could not spawn connection thread");
            }
        }

        info!("relay server stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

#[instrument(name = "relay_connection", skip_all, fields(peer = %peer))]
fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    mut source: Box<dyn ActionSource>,
    options: Arc<ServerOptions>,
    bus: EventBus,
) {
    let reason = match serve(&stream, peer, source.as_mut(), &options, &bus) {
        Ok(turns) => {
            info!(turns, "source exhausted, closing connection");
            "source exhausted".to_string()
        }
        Err(e) => {
            warn!(error = %e, "write failed, dropping connection");
            e.to_string()
        }
    };
    let _ = stream.shutdown(Shutdown::Both);
    bus.emit(
        SOURCE,
        RelayEvent::Disconnected {
            peer: peer.to_string(),
            reason,
        },
    );
}

fn serve(
    mut stream: &TcpStream,
    peer: SocketAddr,
    source: &mut dyn ActionSource,
    options: &ServerOptions,
    bus: &EventBus,
) -> io::Result<usize> {
    // Accepted sockets inherit non-blocking mode on some platforms.
    stream.set_nonblocking(false)?;

    let home = options.initial_pose.as_deref().map(RawAction::pose);
    if let Some(home) = &home {
        write_frame(&mut stream, home)?;
    }

    let mut turns = 0;
    while let Some(turn) = source.next_turn() {
        let actions = prepare_turn(turn, options.attach_metadata);
        write_frame(&mut stream, &actions)?;
        turns += 1;
        info!(actions = actions.len(), "turn sent");
        bus.emit(
            SOURCE,
            RelayEvent::TurnSent {
                peer: peer.to_string(),
                actions: actions.len(),
            },
        );

        if options.return_home_after_turn
            && let Some(home) = &home
        {
            write_frame(&mut stream, home)?;
        }
    }
    Ok(turns)
}

/// Flatten a turn into the action batch written on the wire.
fn prepare_turn(turn: Turn, attach_metadata: bool) -> Vec<RawAction> {
    let Turn {
        user_command,
        mut actions,
    } = turn;
    if !attach_metadata {
        return actions;
    }

    let action_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    for (idx, action) in actions.iter_mut().enumerate() {
        action
            .metadata
            .insert("action_id".into(), Value::from(action_id.clone()));
        action.metadata.insert("step".into(), Value::from(idx + 1));
        if let Some(command) = &user_command {
            action
                .metadata
                .insert("user_command".into(), Value::from(command.clone()));
        }
    }
    actions
}

fn write_frame<T: serde::Serialize + ?Sized>(stream: &mut &TcpStream, value: &T) -> io::Result<()> {
    let bytes = encode_frame(value).map_err(io::Error::other)?;
    stream.write_all(&bytes)?;
    stream.flush()
}
