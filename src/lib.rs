//! A real-time signaling relay.
//!
//! Connections are grouped into named rooms. Chat messages are broadcast to
//! every room member, WebRTC negotiation messages (offers, answers, ICE
//! candidates) are fanned out to specific members, and the relay keeps rooms
//! and connections alive under concurrent load.
//!
//! The building blocks are three kinds of actors, each a tokio task talking
//! over channels:
//!
//! * [`Hub`] — the top-level registry mapping room IDs to rooms. It creates
//!   rooms lazily on first registration and reclaims them once empty.
//! * [`room`] — one command loop per room, the single owner of that room's
//!   member set and of all broadcast/fan-out decisions.
//! * [`client`] — a reader/writer task pair per connection, bridging the
//!   abstract socket capability in [`connection`] to the room.
//!
//! Authentication happens before a connection reaches this crate: the
//! `UserID` and `RoomID` handed to [`client::Client::spawn`] are assumed
//! verified. The crate never touches wire framing or TLS; it consumes a
//! duplex socket through the [`connection::FrameReader`] and
//! [`connection::FrameWriter`] traits.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod model;
pub mod room;

pub use client::{Client, ClientHandle, ConnId};
pub use config::Config;
pub use connection::{Frame, FrameReader, FrameWriter};
pub use hub::{Hub, HubHandle};
pub use model::message::{MessageType, WsMessage};
pub use room::RoomHandle;
