#![deny(unsafe_code)]

//! Streaming message accumulator.
//!
//! A [`ChatSession`] owns the [`Transcript`] and the single-flight gate; a
//! [`StreamConsumer`] opens one provider stream per accepted submission and folds its
//! fragments into the session's placeholder record.

pub mod consumer;
/// Transcript mutation events for passive renderers.
pub mod events;
pub mod message;
pub mod session;
pub mod transcript;

pub use consumer::{ActiveExchange, ExchangeOptions, ExchangeStart, StreamConsumer};
pub use events::{TranscriptEvent, TranscriptSubscription};
pub use message::{Message, MessageId, Role};
pub use session::{
    ChatSession, ExchangeOutcome, ExchangeRequest, LiveExchange, REMOTE_FAILURE_TEXT,
};
pub use transcript::Transcript;
