use std::time::{SystemTime, UNIX_EPOCH};

use autoscript_llm::{HistoryRole, HistoryTurn};

/// Stable identifier for one message, unique within its transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Model,
}

impl From<Role> for HistoryRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => HistoryRole::User,
            Role::Model => HistoryRole::Model,
        }
    }
}

/// One transcript record.
///
/// Only `text` and `is_streaming` change after creation, and only through the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub is_streaming: bool,
    /// Creation time in unix milliseconds.
    pub timestamp: u64,
}

impl Message {
    pub(crate) fn new(id: MessageId, role: Role, text: impl Into<String>, is_streaming: bool) -> Self {
        Self {
            id,
            role,
            text: text.into(),
            is_streaming,
            timestamp: current_unix_timestamp_millis(),
        }
    }

    pub fn to_history_turn(&self) -> HistoryTurn {
        HistoryTurn::new(self.role.into(), self.text.clone())
    }
}

fn current_unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}
