//! Row-change notifications.
//!
//! The engine publishes a [`ChangeEvent`] after every story/segment write;
//! subscribers (the client sync layer, or a gateway forwarding to
//! websockets) filter by story id and reconcile their caches. Delivery is
//! best-effort: a lagging subscriber misses events and catches up through
//! the authoritative read path.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::storage::{Story, StorySegment};

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// Table a change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    Stories,
    StorySegments,
}

/// One row-change notification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: EventType,
    pub table: TableName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl ChangeEvent {
    /// Notification for a freshly inserted segment
    pub fn segment_insert(segment: &StorySegment) -> Self {
        Self {
            event_type: EventType::Insert,
            table: TableName::StorySegments,
            new: serde_json::to_value(segment).ok(),
            old: None,
        }
    }

    /// Notification for an updated segment row
    pub fn segment_update(segment: &StorySegment) -> Self {
        Self {
            event_type: EventType::Update,
            table: TableName::StorySegments,
            new: serde_json::to_value(segment).ok(),
            old: None,
        }
    }

    /// Notification for an updated story row
    pub fn story_update(story: &Story) -> Self {
        Self {
            event_type: EventType::Update,
            table: TableName::Stories,
            new: serde_json::to_value(story).ok(),
            old: None,
        }
    }

    /// Notification for a deleted story row
    pub fn story_delete(story: &Story) -> Self {
        Self {
            event_type: EventType::Delete,
            table: TableName::Stories,
            new: None,
            old: serde_json::to_value(story).ok(),
        }
    }

    /// Story id this event belongs to, for server-side filtering.
    pub fn story_id(&self) -> Option<&str> {
        let record = self.new.as_ref().or(self.old.as_ref())?;
        let field = match self.table {
            TableName::Stories => "id",
            TableName::StorySegments => "story_id",
        };
        record.get(field).and_then(Value::as_str)
    }
}

/// Broadcast channel carrying row-change notifications.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    /// Create a feed with the given buffer capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; dropped silently when nobody listens.
    pub fn publish(&self, event: ChangeEvent) {
        debug!(
            table = ?event.table,
            event_type = ?event.event_type,
            story_id = event.story_id().unwrap_or("?"),
            "Publishing change event"
        );
        let _ = self.sender.send(event);
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
