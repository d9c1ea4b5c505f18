//! Mock channel for testing.
//!
//! Captures sent messages and allows queueing send failures.

use super::Channel;
use crate::error::ChannelError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use sync_types::{ChannelId, ControlMessage};

/// Mock channel for testing.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug)]
pub struct MockChannel {
    id: ChannelId,
    inner: Arc<Mutex<MockChannelInner>>,
}

#[derive(Debug, Default)]
struct MockChannelInner {
    closed: bool,
    sent_messages: Vec<Vec<u8>>,
    send_failures: VecDeque<String>,
}

impl MockChannel {
    /// Create a new open mock channel with a random id.
    pub fn new() -> Self {
        Self {
            id: ChannelId::new(),
            inner: Arc::default(),
        }
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.sent_messages.clone()
    }

    /// Decode every sent message as a control message, skipping anything
    /// that does not decode.
    pub fn sent_control_messages(&self) -> Vec<ControlMessage> {
        self.sent_messages()
            .iter()
            .filter_map(|bytes| ControlMessage::from_bytes(bytes).ok())
            .collect()
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.send_failures.push_back(error.to_string());
    }

    /// Mark the channel closed.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockChannel {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_closed(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.closed
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed {
            return Err(ChannelError::Closed);
        }

        // Check for forced failure
        if let Some(error) = inner.send_failures.pop_front() {
            return Err(ChannelError::SendFailed(error));
        }

        inner.sent_messages.push(payload);
        Ok(())
    }
}
