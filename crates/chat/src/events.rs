use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::message::{Message, MessageId};

/// Observable transcript mutation, delivered to subscribers in mutation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Appended(Message),
    FragmentAppended { id: MessageId, fragment: String },
    /// Emitted once per message, on the `true -> false` flip of `is_streaming`.
    StreamingCompleted(MessageId),
}

/// Passive receiving end of a transcript subscription.
pub struct TranscriptSubscription {
    events: mpsc::UnboundedReceiver<TranscriptEvent>,
}

impl TranscriptSubscription {
    pub(crate) fn new(events: mpsc::UnboundedReceiver<TranscriptEvent>) -> Self {
        Self { events }
    }

    pub async fn recv(&mut self) -> Option<TranscriptEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TranscriptEvent> {
        self.events.try_recv().ok()
    }

    /// Drains every event already delivered without waiting.
    pub fn drain(&mut self) -> Vec<TranscriptEvent> {
        let mut drained = Vec::new();
        while let Some(event) = self.try_recv() {
            drained.push(event);
        }
        drained
    }
}

impl Stream for TranscriptSubscription {
    type Item = TranscriptEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}
