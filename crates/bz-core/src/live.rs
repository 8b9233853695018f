//! Change events and the client-side merge of those events into list state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Table;
use crate::{now_timestamp, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    Close,
}

/// One notification on the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub action: ChangeAction,
    pub table: Table,
    pub id: String,
    /// Document after the change; the last stored document for deletes and
    /// `null` for a close.
    pub record: Value,
    pub timestamp: String,
}

impl LiveEvent {
    pub fn new(action: ChangeAction, table: Table, record: Document) -> Self {
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            action,
            table,
            id,
            record: Value::Object(record),
            timestamp: now_timestamp(),
        }
    }

    pub fn close(table: Table) -> Self {
        Self {
            action: ChangeAction::Close,
            table,
            id: String::new(),
            record: Value::Null,
            timestamp: now_timestamp(),
        }
    }

    pub fn document(&self) -> Option<&Document> {
        self.record.as_object()
    }
}

// ---------------------------------------------------------------------------
// LiveList
// ---------------------------------------------------------------------------

/// Anything a [`LiveList`] can hold: it must expose a stable id and be
/// rebuildable from an event's record.
pub trait LiveRecord: Clone {
    fn live_id(&self) -> &str;
    fn from_event(event: &LiveEvent) -> Option<Self>;
}

impl LiveRecord for Document {
    fn live_id(&self) -> &str {
        self.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    fn from_event(event: &LiveEvent) -> Option<Self> {
        event.document().cloned()
    }
}

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Local list state kept in sync with one table's change feed.
///
/// Pinned items stay at the front and are never touched by events.
pub struct LiveList<T: LiveRecord> {
    table: Table,
    pinned: Vec<T>,
    items: Vec<T>,
    filter: Option<Predicate<T>>,
}

impl<T: LiveRecord> LiveList<T> {
    pub fn new(table: Table, snapshot: Vec<T>) -> Self {
        Self {
            table,
            pinned: Vec::new(),
            items: snapshot,
            filter: None,
        }
    }

    pub fn with_pinned(mut self, pinned: Vec<T>) -> Self {
        self.pinned = pinned;
        self
    }

    pub fn with_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Fold one event into the list. Returns whether the visible state changed.
    pub fn apply(&mut self, event: &LiveEvent) -> bool {
        if event.table != self.table || event.action == ChangeAction::Close {
            return false;
        }
        if self.pinned.iter().any(|p| p.live_id() == event.id) {
            return false;
        }

        let position = self.items.iter().position(|item| item.live_id() == event.id);

        if event.action == ChangeAction::Delete {
            return match position {
                Some(index) => {
                    self.items.remove(index);
                    true
                }
                None => false,
            };
        }

        let Some(item) = T::from_event(event) else {
            return false;
        };
        if let Some(filter) = &self.filter {
            if !filter(&item) {
                return false;
            }
        }

        match position {
            Some(index) => self.items[index] = item,
            None => self.items.push(item),
        }
        true
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pinned.iter().chain(self.items.iter())
    }

    pub fn len(&self) -> usize {
        self.pinned.len() + self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items().cloned().collect()
    }
}
