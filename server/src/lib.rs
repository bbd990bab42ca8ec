//! # Game Data Relay Server Library
//!
//! This library implements the game data relay path of a multiplayer session
//! server. Each player's input frames arrive as numbered protocol messages,
//! are forwarded into the shared session, and are relayed to every other
//! participant. Payloads a participant has already been sent are replaced by
//! a one-byte reference into a cache both sides keep in lockstep.
//!
//! ## Core Responsibilities
//!
//! ### Deduplication
//! Every connection keeps two bounded caches of recently seen data blocks:
//! one for blocks received from the client and one for blocks sent to it.
//! When a block the client already holds is relayed again, only its cache
//! index travels over the wire.
//!
//! ### Ordering
//! Outbound messages carry a 16-bit wrapping message number assigned per
//! connection. A number is only consumed when its message is actually
//! queued, so the client can detect loss and reordering.
//!
//! ### Fault Containment
//! Errors raised while ingesting game data are either recoverable protocol
//! faults, answered with an optional corrective payload, or fatal faults
//! that stop all further processing for the connection.
//!
//! ## Architecture Design
//!
//! ### Dispatcher
//! A single [`dispatch::Dispatcher`] owns one instance of each handler and
//! shares it across all connections. Inbound messages and session events
//! are tagged enums matched exhaustively.
//!
//! ### Connection Context
//! All mutable per-connection state lives in a [`connection::Connection`]
//! behind one async mutex. The inbound path (socket reader) and the outbound
//! path (session event pump task) both go through it, so cache slot
//! assignment, message numbering and sending form one atomic step.
//!
//! ### Event Pump
//! A connection that joins the game subscribes to the session and gets its
//! own task that feeds session events through the dispatcher. Connected
//! clients outside the game have their game data reflected back as blank
//! frames instead of relayed.
//!
//! ### Retransmission
//! Each connection keeps its last few encoded messages. When the session
//! reports a member as stalled, those are sent again with their original
//! numbers, and the client drops the ones it already has.
//!
//! ## Module Organization
//!
//! - `action`: inbound handlers for `GameData` and `CachedGameData`
//! - `event`: outbound handlers for game data and game timeout events
//! - `dispatch`: routing in both directions and fatal fault enforcement
//! - `connection`: per-connection caches, numbering and send primitive
//! - `game`: the session collaborator trait and the in-memory session
//! - `client_manager`: address to connection mapping, limits and timeouts
//! - `network`: UDP transport and the main server loop
//! - `stats`: per-handler counters and lag spike tallies
//! - `error`: protocol and fatal fault types
//! - `config`: server settings
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default()).await?;
//!
//!     // Runs until the socket tasks stop or a shutdown message arrives
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod client_manager;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod game;
pub mod network;
pub mod stats;
