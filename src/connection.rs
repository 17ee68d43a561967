//! The abstract duplex-socket capability consumed by the client pumps.
//!
//! The relay never implements wire framing or TLS itself. Whatever transport
//! carries the connection (a WebSocket, a unix socket speaking a line
//! protocol, a test double) is adapted to [`FrameReader`] and [`FrameWriter`]
//! and handed to [`crate::client::Client::spawn`].

use std::io;

use async_trait::async_trait;

/// One unit of transfer on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete text payload, JSON on this protocol.
    Text(String),
    /// Liveness probe.
    Ping,
    /// Response to a liveness probe.
    Pong,
    /// Orderly close notification.
    Close,
}

/// Read half of a connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Reads the next frame, blocking until one arrives.
    ///
    /// Returns an error when the transport is gone; the relay treats any
    /// error here as fatal to the connection.
    async fn read_frame(&mut self) -> io::Result<Frame>;
}

/// Write half of a connection.
///
/// Contract: after [`close`](FrameWriter::close) returns, a pending or
/// subsequent [`FrameReader::read_frame`] on the same connection must fail.
/// The relay relies on this to unblock the reader pump when the writer tears
/// the connection down.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Writes one frame.
    async fn write_frame(&mut self, frame: Frame) -> io::Result<()>;

    /// Tears down the transport in both directions.
    async fn close(&mut self);
}
