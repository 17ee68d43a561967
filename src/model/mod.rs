//! Wire data models for the signaling relay
//!
//! This module contains the message envelope exchanged over a connection and
//! the typed payloads it can carry for chat, WebRTC negotiation, and
//! server-generated notifications.

pub mod message;
pub mod payload;
