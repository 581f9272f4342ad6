use std::time::Duration;

use crate::error::TransportError;

/// Transport-agnostic request/response channel. A `Transport` serializes
/// at most one in-flight `send_frame` call; a second concurrent caller
/// blocks behind the first.
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<(), TransportError>;

    /// Idempotent: calling `disconnect` on an already-disconnected
    /// transport is not an error.
    fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Send one raw frame and wait for exactly one response, or fail with
    /// `TransportError` if the broker rejects the publish, does not
    /// acknowledge within `timeout`, no response arrives within `timeout`,
    /// or the connection drops while waiting.
    fn send_frame(&self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError>;
}
