/// file: src/listeners.rs
/// description: ordered per-kind listener registry with handle-based removal
use crate::types::{EventKind, Payload};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

pub type Listener = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Handle returned on registration; removal is by handle, never by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_kind.entry(kind).or_default().push((id, listener));
        id
    }

    /// Returns whether anything was removed. Unknown handles are a no-op.
    pub fn remove(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(entries) = self.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.by_kind.remove(&kind);
        }
        removed
    }

    pub fn contains(&self, kind: EventKind, id: ListenerId) -> bool {
        self.by_kind
            .get(&kind)
            .is_some_and(|entries| entries.iter().any(|(entry_id, _)| *entry_id == id))
    }

    /// Listeners for `kind` in registration order.
    pub fn snapshot(&self, kind: EventKind) -> Vec<(ListenerId, Listener)> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_kind.clear();
    }
}

/// Invoke one listener, containing any panic it raises.
/// Returns `false` if the listener panicked.
pub fn invoke_isolated(listener: &Listener, payload: &Payload) -> bool {
    catch_unwind(AssertUnwindSafe(|| listener(payload))).is_ok()
}
