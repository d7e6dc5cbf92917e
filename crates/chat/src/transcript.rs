use autoscript_llm::HistoryTurn;
use tokio::sync::mpsc;

use crate::events::{TranscriptEvent, TranscriptSubscription};
use crate::message::{Message, MessageId, Role};

/// Ordered, append-only conversation record.
///
/// Insertion order is display order. The mutators below are the only way to change a
/// message, and each one is reported to every live subscriber.
#[derive(Debug)]
pub struct Transcript {
    messages: Vec<Message>,
    next_message_id: u64,
    subscribers: Vec<mpsc::UnboundedSender<TranscriptEvent>>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_message_id: 1,
            subscribers: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages still flagged as streaming, stuck placeholders included.
    pub fn streaming_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_streaming)
            .count()
    }

    /// Provider-facing projection of every message, oldest first.
    pub fn history(&self) -> Vec<HistoryTurn> {
        self.messages.iter().map(Message::to_history_turn).collect()
    }

    pub fn subscribe(&mut self) -> TranscriptSubscription {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.subscribers.push(event_tx);
        TranscriptSubscription::new(event_rx)
    }

    pub fn append_user(&mut self, text: impl Into<String>) -> Message {
        let message = Message::new(self.alloc_message_id(), Role::User, text, false);
        self.push(message)
    }

    /// Appends the in-progress model record for a new exchange.
    ///
    /// Callers must hold the single-flight gate; the transcript does not check it.
    pub fn append_model_placeholder(&mut self) -> Message {
        let message = Message::new(self.alloc_message_id(), Role::Model, String::new(), true);
        self.push(message)
    }

    pub fn append_error(&mut self, text: impl Into<String>) -> Message {
        let message = Message::new(self.alloc_message_id(), Role::Model, text, false);
        self.push(message)
    }

    /// Concatenates `fragment` onto a streaming message.
    ///
    /// Returns `false` without touching anything when `id` is unknown or no longer
    /// streaming.
    pub fn append_fragment(&mut self, id: MessageId, fragment: &str) -> bool {
        let Some(message) = self.messages.iter_mut().find(|message| message.id == id) else {
            tracing::debug!(message_id = id.0, "dropping fragment for unknown message");
            return false;
        };

        if !message.is_streaming {
            tracing::debug!(message_id = id.0, "dropping fragment for settled message");
            return false;
        }

        message.text.push_str(fragment);
        self.notify(TranscriptEvent::FragmentAppended {
            id,
            fragment: fragment.to_string(),
        });
        true
    }

    /// Marks a message as no longer streaming. Idempotent.
    pub fn complete_streaming(&mut self, id: MessageId) {
        let Some(message) = self.messages.iter_mut().find(|message| message.id == id) else {
            tracing::debug!(message_id = id.0, "cannot complete unknown message");
            return;
        };

        if !message.is_streaming {
            return;
        }

        message.is_streaming = false;
        self.notify(TranscriptEvent::StreamingCompleted(id));
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }

    fn push(&mut self, message: Message) -> Message {
        self.messages.push(message.clone());
        self.notify(TranscriptEvent::Appended(message.clone()));
        message
    }

    fn notify(&mut self, event: TranscriptEvent) {
        // Closed receivers are pruned on the next mutation.
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_keep_insertion_order_and_unique_ids() {
        let mut transcript = Transcript::new();
        let user = transcript.append_user("https://example.com");
        let placeholder = transcript.append_model_placeholder();
        let error = transcript.append_error("failed");

        let ids = transcript
            .messages()
            .iter()
            .map(|message| message.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![user.id, placeholder.id, error.id]);
        assert_ne!(user.id, placeholder.id);
        assert_ne!(placeholder.id, error.id);

        assert_eq!(user.role, Role::User);
        assert!(!user.is_streaming);
        assert_eq!(placeholder.role, Role::Model);
        assert!(placeholder.is_streaming);
        assert!(placeholder.text.is_empty());
        assert_eq!(error.role, Role::Model);
        assert!(!error.is_streaming);
        assert_eq!(error.text, "failed");
    }

    #[test]
    fn fragments_concatenate_without_normalization() {
        let mut transcript = Transcript::new();
        let placeholder = transcript.append_model_placeholder();

        for fragment in ["Analyzing ", "", "the  page.", "\n"] {
            assert!(transcript.append_fragment(placeholder.id, fragment));
        }

        let message = transcript.get(placeholder.id).expect("placeholder exists");
        assert_eq!(message.text, "Analyzing the  page.\n");
    }

    #[test]
    fn fragment_for_unknown_or_settled_message_is_ignored() {
        let mut transcript = Transcript::new();
        let user = transcript.append_user("hello");
        let placeholder = transcript.append_model_placeholder();
        transcript.complete_streaming(placeholder.id);

        assert!(!transcript.append_fragment(MessageId::new(999), "x"));
        assert!(!transcript.append_fragment(user.id, "x"));
        assert!(!transcript.append_fragment(placeholder.id, "x"));
        assert_eq!(transcript.get(user.id).map(|m| m.text.as_str()), Some("hello"));
        assert_eq!(transcript.get(placeholder.id).map(|m| m.text.as_str()), Some(""));
    }

    #[test]
    fn complete_streaming_is_idempotent_and_reported_once() {
        let mut transcript = Transcript::new();
        let mut subscription = transcript.subscribe();
        let placeholder = transcript.append_model_placeholder();

        transcript.complete_streaming(placeholder.id);
        transcript.complete_streaming(placeholder.id);
        transcript.complete_streaming(MessageId::new(42));

        assert_eq!(transcript.streaming_count(), 0);
        let completions = subscription
            .drain()
            .into_iter()
            .filter(|event| matches!(event, TranscriptEvent::StreamingCompleted(_)))
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn subscribers_observe_mutations_in_order() {
        let mut transcript = Transcript::new();
        let mut subscription = transcript.subscribe();

        let user = transcript.append_user("hi");
        let placeholder = transcript.append_model_placeholder();
        transcript.append_fragment(placeholder.id, "he");
        transcript.append_fragment(placeholder.id, "llo");
        transcript.complete_streaming(placeholder.id);

        let events = subscription.drain();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], TranscriptEvent::Appended(user));
        assert!(matches!(&events[1], TranscriptEvent::Appended(message) if message.id == placeholder.id));
        assert_eq!(
            events[2],
            TranscriptEvent::FragmentAppended {
                id: placeholder.id,
                fragment: "he".to_string()
            }
        );
        assert_eq!(
            events[3],
            TranscriptEvent::FragmentAppended {
                id: placeholder.id,
                fragment: "llo".to_string()
            }
        );
        assert_eq!(events[4], TranscriptEvent::StreamingCompleted(placeholder.id));
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let mut transcript = Transcript::new();
        let subscription = transcript.subscribe();
        drop(subscription);

        transcript.append_user("hi");
        assert!(transcript.subscribers.is_empty());
    }

    #[test]
    fn history_maps_every_message_in_order() {
        let mut transcript = Transcript::new();
        transcript.append_user("first");
        let placeholder = transcript.append_model_placeholder();
        transcript.append_fragment(placeholder.id, "reply");

        assert_eq!(
            transcript.history(),
            vec![HistoryTurn::user("first"), HistoryTurn::model("reply")]
        );
    }
}
