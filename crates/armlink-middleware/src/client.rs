//! [`RelayClient`] – the receiving side of the relay.
//!
//! Connects to the server, reads the byte stream in fixed-size chunks, and
//! hands every decoded action batch to a [`FrameHandler`] in wire order.
//! Frames are processed strictly one after another on the calling thread.
//!
//! There is no reconnect and no read timeout: a silent server blocks the
//! client until it closes the connection.

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use armlink_types::{LinkError, RawAction, RelayEvent};
use tracing::{debug, error, info, instrument, warn};

use crate::bus::EventBus;
use crate::framing::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_READ_CHUNK, FrameDecoder, FrameError};

const SOURCE: &str = "armlink-middleware::client";

/// Consumer of decoded frames.
pub trait FrameHandler {
    /// Called once per decoded frame.  An error ends the read loop and is
    /// returned from [`RelayClient::run`].
    fn on_actions(&mut self, actions: Vec<RawAction>) -> Result<(), LinkError>;

    /// Called for every discarded frame, after it has been logged.
    fn on_decode_error(&mut self, _error: &FrameError) {}
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub read_chunk: usize,
    pub max_frame_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            read_chunk: DEFAULT_READ_CHUNK,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

pub struct RelayClient {
    stream: TcpStream,
    peer: SocketAddr,
    options: ClientOptions,
    bus: EventBus,
}

impl RelayClient {
    /// Open the connection.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Transport`] if the server cannot be reached.
    pub fn connect(
        addr: impl ToSocketAddrs,
        options: ClientOptions,
        bus: EventBus,
    ) -> Result<Self, LinkError> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| LinkError::Transport(format!("connect failed: {e}")))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| LinkError::Transport(e.to_string()))?;
        info!(%peer, "connected to relay server");
        bus.emit(
            SOURCE,
            RelayEvent::Connected {
                peer: peer.to_string(),
            },
        );
        Ok(Self {
            stream,
            peer,
            options,
            bus,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read until the server closes the connection.
    ///
    /// Malformed frames are logged, published as `DecodeFailed` and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Transport`] on a socket error, or whatever the
    /// handler returned.
    #[instrument(name = "relay_client", skip_all, fields(peer = %self.peer))]
    pub fn run<H: FrameHandler>(mut self, handler: &mut H) -> Result<(), LinkError> {
        let mut decoder = FrameDecoder::new(self.options.max_frame_bytes);
        let mut chunk = vec![0u8; self.options.read_chunk.max(1)];

        let outcome = loop {
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "read failed");
                    break Err(LinkError::Transport(format!("read failed: {e}")));
                }
            };
            debug!(bytes = n, "chunk received");

            let mut failed = None;
            for result in decoder.push(&chunk[..n]) {
                match result {
                    Ok(actions) => {
                        if let Err(e) = handler.on_actions(actions) {
                            failed = Some(e);
                            break;
                        }
                    }
                    Err(e) => self.report_decode_error(handler, &e),
                }
            }
            if let Some(e) = failed {
                error!(error = %e, "frame handler failed");
                break Err(e);
            }
        };

        if outcome.is_ok()
            && let Some(e) = decoder.finish()
        {
            self.report_decode_error(handler, &e);
        }

        let reason = match &outcome {
            Ok(()) => "closed by server".to_string(),
            Err(e) => e.to_string(),
        };
        info!(reason = %reason, "connection ended");
        self.bus.emit(
            SOURCE,
            RelayEvent::Disconnected {
                peer: self.peer.to_string(),
                reason,
            },
        );
        outcome
    }

    fn report_decode_error<H: FrameHandler>(&self, handler: &mut H, e: &FrameError) {
        warn!(error = %e, "discarding frame");
        self.bus.emit(
            SOURCE,
            RelayEvent::DecodeFailed {
                details: e.to_string(),
            },
        );
        handler.on_decode_error(e);
    }
}
