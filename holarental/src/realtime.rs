//! In-process fan-out of chat messages.
//!
//! Every sent message is published once to a [`tokio::sync::broadcast`] channel. Subscribers
//! receive only events for conversations they take part in. A subscriber that falls behind the
//! channel capacity skips the messages it missed; clients catch up through the messages
//! endpoint.

use std::{pin::Pin, sync::Arc};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream, wrappers::errors::BroadcastStreamRecvError};
use tracing::debug;

use crate::{api::models::chat::MessageResponse, types::UserId};

const DEFAULT_CAPACITY: usize = 256;

/// A message delivered to both participants of its conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEvent {
    #[serde(skip)]
    pub participants: (UserId, UserId),
    #[serde(flatten)]
    pub message: MessageResponse,
}

impl ChatEvent {
    pub fn is_for(&self, user_id: UserId) -> bool {
        self.participants.0 == user_id || self.participants.1 == user_id
    }
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Arc<ChatEvent>> + Send>>;

#[derive(Clone)]
pub struct ChatHub {
    tx: broadcast::Sender<Arc<ChatEvent>>,
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChatHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns how many subscribers were listening.
    pub fn publish(&self, event: ChatEvent) -> usize {
        // No subscribers is the common case, not an error
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    /// Events for conversations `user_id` takes part in.
    pub fn subscribe(&self, user_id: UserId) -> ChatStream {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |result| match result {
            Ok(event) if event.is_for(user_id) => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                debug!(%user_id, missed, "Chat subscriber lagged");
                None
            }
        });
        Box::pin(stream)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
