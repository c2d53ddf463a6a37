//! `armlink-middleware` – The Wire
//!
//! Moves actions between the server and client roles without caring what
//! they mean.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based telemetry bus built on Tokio broadcast
//!   channels, used synchronously.
//! - [`framing`] – newline-delimited JSON framing and the incremental
//!   [`FrameDecoder`][framing::FrameDecoder].
//! - [`server`] – [`RelayServer`][server::RelayServer]: accepts robot
//!   clients, applies the allow-list, and streams [`Turn`][armlink_types::Turn]s
//!   from an [`ActionSource`][server::ActionSource], one thread per connection.
//! - [`client`] – [`RelayClient`][client::RelayClient]: connects to the
//!   server, decodes frames, and hands action batches to a
//!   [`FrameHandler`][client::FrameHandler].

pub mod bus;
pub mod client;
pub mod framing;
pub mod server;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use client::{ClientOptions, FrameHandler, RelayClient};
pub use framing::{FrameDecoder, FrameError};
pub use server::{ActionSource, RelayServer, ScriptSource, ServerOptions, TurnFeed};
