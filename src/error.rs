//! Library error types.

use thiserror::Error;

/// A query or hand-off failed because the target actor already stopped.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The room command loop is no longer running.
    #[error("room {0} is no longer running")]
    RoomClosed(String),
}
