//! Recording observer.
//!
//! Captures every callback in order and folds message events into the list a
//! UI would display, so tests and invariants can compare what the host saw
//! against the engine's cache.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatsync_client::{RoomObserver, RoomUpdate};
use chatsync_core::{
    ChatMember, ChatMessage, RoomEvent, RoomEventKind, SyncError, TypingUser,
};

/// Observer that records everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    updates: Mutex<Vec<RoomUpdate>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RoomUpdate>> {
        self.updates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, update: RoomUpdate) {
        self.lock().push(update);
    }

    /// Every callback so far.
    pub fn updates(&self) -> Vec<RoomUpdate> {
        self.lock().clone()
    }

    /// Message events so far.
    pub fn message_events(&self) -> Vec<RoomEvent> {
        self.lock()
            .iter()
            .filter_map(|u| match u {
                RoomUpdate::Message(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Errors reported so far.
    pub fn errors(&self) -> Vec<SyncError> {
        self.lock()
            .iter()
            .filter_map(|u| match u {
                RoomUpdate::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    /// Latest member list, if any presence sync was delivered.
    pub fn last_presence(&self) -> Option<Vec<ChatMember>> {
        self.lock().iter().rev().find_map(|u| match u {
            RoomUpdate::Presence(members) => Some(members.clone()),
            _ => None,
        })
    }

    /// Latest typing list, if any typing change was delivered.
    pub fn last_typing(&self) -> Option<Vec<TypingUser>> {
        self.lock().iter().rev().find_map(|u| match u {
            RoomUpdate::Typing(users) => Some(users.clone()),
            _ => None,
        })
    }

    /// Number of typing callbacks so far.
    pub fn typing_updates(&self) -> usize {
        self.lock().iter().filter(|u| matches!(u, RoomUpdate::Typing(_))).count()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Messages as a UI applying every event in order would display them.
    pub fn visible_messages(&self) -> Vec<ChatMessage> {
        fold_events(&self.message_events())
    }
}

/// Apply message events the way a list view would.
pub fn fold_events(events: &[RoomEvent]) -> Vec<ChatMessage> {
    let mut view: Vec<ChatMessage> = Vec::new();
    for event in events {
        match &event.kind {
            RoomEventKind::Initial => {
                let initial_ids: Vec<&str> = event.items.iter().map(|m| m.id.as_str()).collect();
                view.retain(|m| !initial_ids.contains(&m.id.as_str()));
                view.extend(event.items.iter().cloned());
            },
            RoomEventKind::New => view.extend(event.items.iter().cloned()),
            RoomEventKind::Update => {
                for item in &event.items {
                    match view.iter_mut().find(|m| m.id == item.id) {
                        Some(existing) => *existing = item.clone(),
                        None => view.push(item.clone()),
                    }
                }
            },
            RoomEventKind::Replace { temp_id } => {
                view.retain(|m| m.id != *temp_id);
                view.extend(event.items.iter().cloned());
            },
            RoomEventKind::Delete => {
                view.retain(|m| !event.items.iter().any(|item| item.id == m.id));
            },
        }
    }
    view.sort_by_key(|m| m.timestamp);
    view
}

impl RoomObserver for RecordingObserver {
    fn on_message(&self, event: &RoomEvent) {
        self.push(RoomUpdate::Message(event.clone()));
    }

    fn on_presence(&self, members: &[ChatMember]) {
        self.push(RoomUpdate::Presence(members.to_vec()));
    }

    fn on_typing(&self, users: &[TypingUser]) {
        self.push(RoomUpdate::Typing(users.to_vec()));
    }

    fn on_error(&self, error: &SyncError) {
        self.push(RoomUpdate::Error(error.clone()));
    }
}
