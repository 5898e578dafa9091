//! In-memory realtime hub.
//!
//! [`MemoryHub`] plays the hosted service: a message table with a change
//! feed, per-room pub/sub channels with presence and broadcast, and an
//! identity per client. Each engine under test gets its own [`HubClient`],
//! which implements all three collaborator traits and carries fault knobs
//! (unreachable, slow connects, refused or hanging subscribes, failed
//! inserts and presence writes).
//!
//! Delivery is synchronous: an insert reaches every bound channel before the
//! insert call returns.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chatsync_client::{
    AuthError, AuthProvider, BackendError, Binding, ChannelId, ChannelSpec, Identity,
    MessageBackend, Subscribed, Transport, TransportError,
};
use chatsync_proto::{MessageRow, NewMessageRow, PageQuery, PresenceMeta, RawChannelEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Client handle id within a hub.
pub type ClientId = u64;

struct ChannelEntry {
    client: ClientId,
    room_id: String,
    presence_key: String,
    bindings: Vec<Binding>,
    tx: mpsc::UnboundedSender<RawChannelEvent>,
    presence: Option<PresenceMeta>,
}

impl ChannelEntry {
    fn binds(&self, binding: &Binding) -> bool {
        self.bindings.contains(binding)
    }
}

#[derive(Default)]
struct Faults {
    unreachable: bool,
    connected: bool,
    refuse_subscribes: u32,
    hang_subscribes: bool,
    fail_inserts: u32,
    fail_tracks: u32,
    connect_delay: Option<Duration>,
    identity: Option<Identity>,
}

#[derive(Default)]
struct HubState {
    rows: BTreeMap<String, Vec<MessageRow>>,
    next_row: u64,
    channels: BTreeMap<ChannelId, ChannelEntry>,
    next_channel: u64,
    clients: HashMap<ClientId, Faults>,
    next_client: ClientId,
    subscribe_calls: u64,
    track_calls: u64,
}

impl HubState {
    fn faults(&mut self, client: ClientId) -> &mut Faults {
        self.clients.entry(client).or_default()
    }

    fn deliver(&self, room_id: &str, binding: &Binding, event: &RawChannelEvent, skip: Option<ChannelId>) {
        for (id, entry) in &self.channels {
            if entry.room_id == room_id && entry.binds(binding) && Some(*id) != skip {
                // A dropped receiver means the engine abandoned the channel.
                let _ = entry.tx.send(event.clone());
            }
        }
    }

    fn presence_snapshot(&self, room_id: &str) -> Value {
        let mut state: BTreeMap<&str, Vec<&PresenceMeta>> = BTreeMap::new();
        for entry in self.channels.values().filter(|e| e.room_id == room_id) {
            if let Some(meta) = &entry.presence {
                state.entry(entry.presence_key.as_str()).or_default().push(meta);
            }
        }
        serde_json::json!(state)
    }

    fn publish_presence(&self, room_id: &str) {
        let event = RawChannelEvent::PresenceSync(self.presence_snapshot(room_id));
        self.deliver(room_id, &Binding::PresenceSync, &event, None);
    }

    fn drop_channel(&mut self, channel: ChannelId) -> Option<ChannelEntry> {
        let entry = self.channels.remove(&channel)?;
        if entry.presence.is_some() {
            self.publish_presence(&entry.room_id);
        }
        Some(entry)
    }
}

/// Shared in-memory service. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a client signed in as `user_id`.
    pub fn client(&self, user_id: &str, display_name: &str) -> Arc<HubClient> {
        let mut state = self.lock();
        state.next_client += 1;
        let id = state.next_client;
        state.faults(id).identity =
            Some(Identity { user_id: user_id.to_string(), display_name: display_name.to_string() });
        Arc::new(HubClient { id, hub: self.clone() })
    }

    /// Store rows directly, bypassing the change feed.
    pub fn seed_rows(&self, rows: impl IntoIterator<Item = MessageRow>) {
        let mut state = self.lock();
        for row in rows {
            state.rows.entry(row.room_id.clone()).or_default().push(row);
        }
    }

    /// Every stored row of `room_id`, deleted ones included, in insert order.
    pub fn rows(&self, room_id: &str) -> Vec<MessageRow> {
        self.lock().rows.get(room_id).cloned().unwrap_or_default()
    }

    /// Soft-delete a row and publish the update.
    ///
    /// Returns false if no such row exists.
    pub fn soft_delete(&self, room_id: &str, id: &str, deleted_at: i64) -> bool {
        self.update_row(room_id, id, |row| row.deleted_at = Some(deleted_at))
    }

    /// Change a row's content and publish the update.
    pub fn edit(&self, room_id: &str, id: &str, content: &str) -> bool {
        self.update_row(room_id, id, |row| row.content = content.to_string())
    }

    fn update_row(&self, room_id: &str, id: &str, apply: impl FnOnce(&mut MessageRow)) -> bool {
        let mut state = self.lock();
        let Some(row) = state.rows.get_mut(room_id).and_then(|rows| rows.iter_mut().find(|r| r.id == id))
        else {
            return false;
        };
        apply(row);
        let event = RawChannelEvent::Update(serde_json::json!(row));
        state.deliver(room_id, &Binding::MessageUpdate, &event, None);
        true
    }

    /// Push a raw event to every channel of `room_id`, regardless of binding.
    pub fn inject(&self, room_id: &str, event: &RawChannelEvent) {
        let state = self.lock();
        for entry in state.channels.values().filter(|e| e.room_id == room_id) {
            let _ = entry.tx.send(event.clone());
        }
    }

    /// Close every channel of `room_id` from the service side.
    pub fn close_room_channels(&self, room_id: &str, reason: &str) {
        let mut state = self.lock();
        let ids: Vec<ChannelId> =
            state.channels.iter().filter(|(_, e)| e.room_id == room_id).map(|(id, _)| *id).collect();
        for id in ids {
            if let Some(entry) = state.drop_channel(id) {
                let _ = entry.tx.send(RawChannelEvent::Closed { reason: reason.to_string() });
            }
        }
    }

    /// Open channels on `room_id`.
    pub fn channel_count(&self, room_id: &str) -> usize {
        self.lock().channels.values().filter(|e| e.room_id == room_id).count()
    }

    /// Open channels held by `client` on `room_id`.
    pub fn client_channel_count(&self, client: &HubClient, room_id: &str) -> usize {
        self.lock().channels.values().filter(|e| e.client == client.id && e.room_id == room_id).count()
    }

    /// Total subscribe calls received, failed ones included.
    pub fn subscribe_calls(&self) -> u64 {
        self.lock().subscribe_calls
    }

    /// Total presence track calls received, failed ones included.
    pub fn track_calls(&self) -> u64 {
        self.lock().track_calls
    }
}

/// One engine's view of the hub.
pub struct HubClient {
    id: ClientId,
    hub: MemoryHub,
}

impl HubClient {
    /// Hub-wide id of this client.
    pub fn id(&self) -> ClientId {
        self.id
    }

    fn with_faults<T>(&self, f: impl FnOnce(&mut Faults) -> T) -> T {
        f(self.hub.lock().faults(self.id))
    }

    /// Make every transport and backend call from this client fail as if the
    /// network were down. Identity lookups keep working.
    ///
    /// Going unreachable also drops the client's channels.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.hub.lock();
        let faults = state.faults(self.id);
        faults.unreachable = !reachable;
        if !reachable {
            faults.connected = false;
            let ids: Vec<ChannelId> =
                state.channels.iter().filter(|(_, e)| e.client == self.id).map(|(id, _)| *id).collect();
            for id in ids {
                state.drop_channel(id);
            }
        }
    }

    /// Refuse the next `count` subscribe calls.
    pub fn refuse_next_subscribes(&self, count: u32) {
        self.with_faults(|f| f.refuse_subscribes = count);
    }

    /// Leave subscribe calls unanswered forever.
    pub fn hang_subscribes(&self, hang: bool) {
        self.with_faults(|f| f.hang_subscribes = hang);
    }

    /// Reject the next `count` inserts.
    pub fn fail_next_inserts(&self, count: u32) {
        self.with_faults(|f| f.fail_inserts = count);
    }

    /// Reject the next `count` presence track calls.
    pub fn fail_next_tracks(&self, count: u32) {
        self.with_faults(|f| f.fail_tracks = count);
    }

    /// Make each connect take `delay` before it completes.
    pub fn delay_connects(&self, delay: Option<Duration>) {
        self.with_faults(|f| f.connect_delay = delay);
    }

    /// Whether the transport side of this client is currently connected.
    pub fn is_linked(&self) -> bool {
        self.require_connected().is_ok()
    }

    /// Replace the signed-in identity; `None` signs out.
    pub fn set_identity(&self, identity: Option<Identity>) {
        self.with_faults(|f| f.identity = identity);
    }

    fn reachable(&self) -> bool {
        self.with_faults(|f| !f.unreachable)
    }

    fn require_connected(&self) -> Result<(), TransportError> {
        self.with_faults(|f| {
            if f.unreachable {
                Err(TransportError::Unreachable("network down".to_string()))
            } else if !f.connected {
                Err(TransportError::Unreachable("not connected".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

#[async_trait]
impl Transport for HubClient {
    async fn connect(&self) -> Result<(), TransportError> {
        if let Some(delay) = self.with_faults(|f| f.connect_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with_faults(|f| {
            if f.unreachable {
                return Err(TransportError::Unreachable("network down".to_string()));
            }
            f.connected = true;
            Ok(())
        })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.hub.lock();
        state.faults(self.id).connected = false;
        let ids: Vec<ChannelId> =
            state.channels.iter().filter(|(_, e)| e.client == self.id).map(|(id, _)| *id).collect();
        for id in ids {
            state.drop_channel(id);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.require_connected().is_ok()
    }

    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscribed, TransportError> {
        let hang = {
            let mut state = self.hub.lock();
            state.subscribe_calls += 1;
            let faults = state.faults(self.id);
            if faults.unreachable || !faults.connected {
                return Err(TransportError::Unreachable("not connected".to_string()));
            }
            if faults.refuse_subscribes > 0 {
                faults.refuse_subscribes -= 1;
                return Err(TransportError::Subscribe("refused".to_string()));
            }
            faults.hang_subscribes
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.hub.lock();
        state.next_channel += 1;
        let channel = ChannelId(state.next_channel);
        let (tx, events) = mpsc::unbounded_channel();
        debug!(client = self.id, %channel, topic = %spec.topic, "channel subscribed");
        state.channels.insert(
            channel,
            ChannelEntry {
                client: self.id,
                room_id: spec.room_id,
                presence_key: spec.presence_key,
                bindings: spec.bindings,
                tx,
                presence: None,
            },
        );
        Ok(Subscribed { channel, events })
    }

    async fn unsubscribe(&self, channel: ChannelId) -> Result<(), TransportError> {
        let mut state = self.hub.lock();
        match state.channels.get(&channel) {
            Some(entry) if entry.client == self.id => {
                state.drop_channel(channel);
                Ok(())
            },
            _ => Err(TransportError::UnknownChannel(channel)),
        }
    }

    async fn track(&self, channel: ChannelId, meta: PresenceMeta) -> Result<(), TransportError> {
        self.require_connected()?;
        let mut state = self.hub.lock();
        state.track_calls += 1;
        let faults = state.faults(self.id);
        if faults.fail_tracks > 0 {
            faults.fail_tracks -= 1;
            return Err(TransportError::Send("presence write rejected".to_string()));
        }
        let Some(entry) = state.channels.get_mut(&channel).filter(|e| e.client == self.id) else {
            return Err(TransportError::UnknownChannel(channel));
        };
        entry.presence = Some(meta);
        let room_id = entry.room_id.clone();
        state.publish_presence(&room_id);
        Ok(())
    }

    async fn untrack(&self, channel: ChannelId) -> Result<(), TransportError> {
        let mut state = self.hub.lock();
        let Some(entry) = state.channels.get_mut(&channel).filter(|e| e.client == self.id) else {
            return Err(TransportError::UnknownChannel(channel));
        };
        if entry.presence.take().is_some() {
            let room_id = entry.room_id.clone();
            state.publish_presence(&room_id);
        }
        Ok(())
    }

    async fn broadcast(&self, channel: ChannelId, event: &str, payload: Value) -> Result<(), TransportError> {
        self.require_connected()?;
        let state = self.hub.lock();
        let Some(entry) = state.channels.get(&channel).filter(|e| e.client == self.id) else {
            return Err(TransportError::UnknownChannel(channel));
        };
        trace!(client = self.id, %channel, event, "broadcast");
        let raw = RawChannelEvent::Broadcast { event: event.to_string(), payload };
        state.deliver(&entry.room_id, &Binding::Broadcast(event.to_string()), &raw, Some(channel));
        Ok(())
    }
}

#[async_trait]
impl MessageBackend for HubClient {
    async fn insert_message(&self, row: NewMessageRow) -> Result<MessageRow, BackendError> {
        let mut state = self.hub.lock();
        let faults = state.faults(self.id);
        if faults.unreachable {
            return Err(BackendError::Unavailable("network down".to_string()));
        }
        if faults.fail_inserts > 0 {
            faults.fail_inserts -= 1;
            return Err(BackendError::Rejected("insert refused".to_string()));
        }

        state.next_row += 1;
        let stored = MessageRow {
            id: format!("msg_{:06}", state.next_row),
            room_id: row.room_id,
            sender_id: row.sender_id,
            sender_name: row.sender_name,
            content: row.content,
            message_type: row.message_type,
            created_at: row.created_at,
            is_read: row.is_read,
            status: row.status,
            reply_to: row.reply_to,
            reactions: Vec::new(),
            deleted_at: None,
        };
        state.rows.entry(stored.room_id.clone()).or_default().push(stored.clone());

        let event = RawChannelEvent::Insert(serde_json::json!(stored));
        state.deliver(&stored.room_id, &Binding::MessageInsert, &event, None);
        Ok(stored)
    }

    async fn fetch_messages(&self, query: PageQuery) -> Result<Vec<MessageRow>, BackendError> {
        if !self.reachable() {
            return Err(BackendError::Unavailable("network down".to_string()));
        }
        let state = self.hub.lock();
        let mut rows: Vec<MessageRow> = state
            .rows
            .get(&query.room_id)
            .into_iter()
            .flatten()
            .filter(|row| !row.is_deleted() && query.before.is_none_or(|before| row.created_at < before))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(query.limit);
        Ok(rows)
    }
}

#[async_trait]
impl AuthProvider for HubClient {
    async fn current_identity(&self) -> Result<Identity, AuthError> {
        self.with_faults(|f| f.identity.clone().ok_or(AuthError::NoIdentity))
    }
}
