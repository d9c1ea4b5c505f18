//! Transport channel abstraction.
//!
//! The router does not own wire framing. Whatever carries control traffic
//! to the controller, or client traffic into the router, is handed to the
//! synchronizer as a [`Channel`]: something with a stable identity, a
//! closed flag, and a way to send an encoded message.

mod mock;

pub use mock::MockChannel;

use crate::error::ChannelError;
use async_trait::async_trait;
use sync_types::{ChannelId, ControlMessage};

/// A transport channel attached to the router.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable identity of this channel.
    fn id(&self) -> ChannelId;

    /// Whether the underlying connection has closed.
    fn is_closed(&self) -> bool;

    /// Send an encoded message.
    async fn send(&self, payload: Vec<u8>) -> Result<(), ChannelError>;
}

/// Encode a control message and send it over `channel`.
pub async fn send_control(
    channel: &dyn Channel,
    message: &ControlMessage,
) -> Result<(), ChannelError> {
    if channel.is_closed() {
        return Err(ChannelError::Closed);
    }
    let bytes = message.to_bytes()?;
    channel.send(bytes).await
}
