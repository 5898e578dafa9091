//! State guarded by the engine lock.
//!
//! Everything here is synchronous. Methods apply one transition and invoke
//! the affected room's observer before returning, so callers holding the lock
//! get per-room ordering for free.

use std::{collections::HashMap, sync::Arc};

use chatsync_core::{
    ChatMessage, ConnectionManager, RoomEvent, RoomId, SyncConfig, UserId,
    cache::MessageCache,
    config::DedupConfig,
    dedup::Deduplicator,
    env::Instant,
    health::HealthMonitor,
    ledger::OptimisticLedger,
    message::DeliveryStatus,
    presence::PresenceTracker,
    typing::{TypingAction, TypingCoordinator},
};
use chatsync_proto::{MessageRow, PresenceMeta, TypingPayload};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::{auth::Identity, observer::RoomObserver, transport::ChannelId};

/// A room the host wants joined. Survives pauses and reconnections.
pub(crate) struct RoomIntent {
    pub observer: Arc<dyn RoomObserver>,
    pub user_id: UserId,
    pub display_name: String,
    /// Bumped on every (re)join; stale joins and pumps compare against it
    pub generation: u64,
    pub paused: bool,
}

/// A subscribed transport channel and the task pumping its events.
pub(crate) struct LiveChannel {
    pub channel: ChannelId,
    pub generation: u64,
    pub pump: AbortHandle,
}

/// Room-scoped message state.
pub(crate) struct RoomData<I> {
    pub cache: MessageCache,
    pub dedup: Deduplicator<I>,
}

/// Typing broadcast ready to go out on a channel.
pub(crate) struct OutboundTyping {
    pub room_id: RoomId,
    pub channel: ChannelId,
    pub payload: TypingPayload,
}

pub(crate) struct EngineState<I> {
    pub connection: ConnectionManager<I>,
    pub intents: HashMap<RoomId, RoomIntent>,
    pub channels: HashMap<RoomId, LiveChannel>,
    pub data: HashMap<RoomId, RoomData<I>>,
    pub ledger: OptimisticLedger,
    pub typing: TypingCoordinator<I>,
    pub presence: PresenceTracker,
    pub health: HealthMonitor<I>,
    pub identity: Option<Identity>,
    pub driver: Option<AbortHandle>,
    /// Reconnection attempt running on its own task
    pub reconnect_task: Option<AbortHandle>,
    dedup_config: DedupConfig,
    next_generation: u64,
}

impl<I: Instant> EngineState<I> {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            connection: ConnectionManager::new(config),
            intents: HashMap::new(),
            channels: HashMap::new(),
            data: HashMap::new(),
            ledger: OptimisticLedger::new(config.ledger.clone()),
            typing: TypingCoordinator::new(config.typing.clone()),
            presence: PresenceTracker::new(),
            health: HealthMonitor::new(config.health.clone()),
            identity: None,
            driver: None,
            reconnect_task: None,
            dedup_config: config.dedup.clone(),
            next_generation: 0,
        }
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Observer of a joined or paused room.
    pub fn observer(&self, room_id: &str) -> Option<Arc<dyn RoomObserver>> {
        self.intents.get(room_id).map(|intent| Arc::clone(&intent.observer))
    }

    /// Whether a join started at `generation` is still wanted.
    pub fn is_current(&self, room_id: &str, generation: u64) -> bool {
        self.intents.get(room_id).is_some_and(|i| i.generation == generation && !i.paused)
    }

    /// Whether `room_id` is joined and not paused.
    pub fn is_wanted(&self, room_id: &str) -> bool {
        self.intents.get(room_id).is_some_and(|i| !i.paused)
    }

    /// Whether the live channel of `room_id` belongs to `generation`.
    pub fn owns_channel(&self, room_id: &str, generation: u64) -> bool {
        self.is_current(room_id, generation)
            && self.channels.get(room_id).is_some_and(|live| live.generation == generation)
    }

    /// Register a join. Returns its generation and the channel it replaces.
    pub fn begin_join(
        &mut self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        observer: Arc<dyn RoomObserver>,
    ) -> (u64, Option<LiveChannel>) {
        let generation = self.bump_generation();
        self.intents.insert(
            room_id.to_string(),
            RoomIntent {
                observer,
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                generation,
                paused: false,
            },
        );
        self.data_mut(room_id);
        (generation, self.channels.remove(room_id))
    }

    /// Restart the join of an unpaused room. `None` if the room is not
    /// wanted or is paused.
    pub fn begin_rejoin(&mut self, room_id: &str) -> Option<(u64, Option<LiveChannel>)> {
        if !self.is_wanted(room_id) {
            return None;
        }
        let generation = self.bump_generation();
        if let Some(intent) = self.intents.get_mut(room_id) {
            intent.generation = generation;
        }
        Some((generation, self.channels.remove(room_id)))
    }

    /// Unpaused rooms, for a rejoin after reconnection.
    pub fn active_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> =
            self.intents.iter().filter(|(_, i)| !i.paused).map(|(room, _)| room.clone()).collect();
        rooms.sort();
        rooms
    }

    /// Presence metadata this client publishes in `room_id`.
    pub fn presence_meta(&self, room_id: &str, online_at: i64) -> Option<PresenceMeta> {
        self.intents.get(room_id).map(|intent| PresenceMeta {
            user_id: intent.user_id.clone(),
            user_name: intent.display_name.clone(),
            online_at,
        })
    }

    /// Drop every piece of state for `room_id`. Returns its channel, if live.
    pub fn clear_room(&mut self, room_id: &str) -> Option<LiveChannel> {
        self.intents.remove(room_id);
        self.data.remove(room_id);
        self.ledger.clear_room(room_id);
        self.typing.clear_room(room_id);
        self.presence.clear_room(room_id);
        self.health.remove(room_id);
        self.channels.remove(room_id)
    }

    /// Pause every room: keep intents, drop channels and timers.
    pub fn pause_all(&mut self) -> Vec<(RoomId, LiveChannel)> {
        let rooms: Vec<RoomId> = self.intents.keys().cloned().collect();
        for room_id in &rooms {
            let generation = self.bump_generation();
            if let Some(intent) = self.intents.get_mut(room_id) {
                intent.paused = true;
                intent.generation = generation;
            }
            self.typing.clear_room(room_id);
            self.health.remove(room_id);
        }
        self.channels.drain().collect()
    }

    /// Unpause every paused room under the given identity. Returns each room
    /// with the generation its rejoin must use.
    pub fn resume_all(&mut self, user_id: &str, display_name: &str) -> Vec<(RoomId, u64)> {
        let mut paused: Vec<RoomId> =
            self.intents.iter().filter(|(_, i)| i.paused).map(|(room, _)| room.clone()).collect();
        paused.sort();

        let mut resumed = Vec::with_capacity(paused.len());
        for room_id in paused {
            let generation = self.bump_generation();
            if let Some(intent) = self.intents.get_mut(&room_id) {
                intent.paused = false;
                intent.generation = generation;
                intent.user_id = user_id.to_string();
                intent.display_name = display_name.to_string();
            }
            resumed.push((room_id, generation));
        }
        resumed
    }

    pub fn paused_count(&self) -> usize {
        self.intents.values().filter(|i| i.paused).count()
    }

    pub fn data_mut(&mut self, room_id: &str) -> &mut RoomData<I> {
        let config = &self.dedup_config;
        self.data.entry(room_id.to_string()).or_insert_with(|| RoomData {
            cache: MessageCache::new(),
            dedup: Deduplicator::new(config.clone()),
        })
    }

    /// Apply a change-feed insert.
    ///
    /// A pending optimistic send it confirms is replaced in place. Messages
    /// already cached or seen by the deduplicator are dropped. Anything else
    /// is new.
    pub fn apply_insert(&mut self, room_id: &str, message: ChatMessage, now: I) {
        let Some(observer) = self.observer(room_id) else { return };

        // An echo of something already confirmed must not claim another
        // pending send with the same content.
        if self.data.get(room_id).is_some_and(|data| data.cache.contains(&message.id)) {
            trace!(room_id, id = %message.id, "insert already cached");
            return;
        }

        if let Some(pending) = self.ledger.match_confirmation(&message) {
            debug!(room_id, temp_id = %pending.temp_id, id = %message.id, "optimistic send confirmed by change feed");
            let data = self.data_mut(room_id);
            if !data.cache.replace(&pending.temp_id, message.clone()) {
                data.cache.insert(message.clone());
            }
            data.dedup.add_message(&message, now);
            observer.on_message(&RoomEvent::replace(pending.temp_id, message));
            return;
        }

        let data = self.data_mut(room_id);
        if data.dedup.is_duplicate(&message) {
            trace!(room_id, id = %message.id, "duplicate insert dropped");
            return;
        }
        data.dedup.add_message(&message, now);
        data.cache.insert(message.clone());
        observer.on_message(&RoomEvent::new_message(message));
    }

    /// Apply a change-feed update. Soft-deleted rows leave the cache.
    pub fn apply_update(&mut self, room_id: &str, row: MessageRow, now: I) {
        let Some(observer) = self.observer(room_id) else { return };
        let deleted = row.is_deleted();
        let message = ChatMessage::from(row);
        let data = self.data_mut(room_id);

        if deleted {
            if data.cache.remove(&message.id).is_some() {
                observer.on_message(&RoomEvent::delete(message));
            }
            return;
        }

        data.dedup.add_message(&message, now);
        data.cache.upsert(message.clone());
        observer.on_message(&RoomEvent::update(message));
    }

    /// Rebuild the member list and deliver it.
    pub fn apply_presence(&mut self, room_id: &str, snapshot: Vec<PresenceMeta>) {
        let Some(observer) = self.observer(room_id) else { return };
        let members = self.presence.sync(room_id, snapshot);
        observer.on_presence(&members);
    }

    /// Seed a room with its initial history.
    pub fn seed_history(&mut self, room_id: &str, history: &[ChatMessage], now: I) {
        let data = self.data_mut(room_id);
        for message in history {
            data.dedup.add_message(message, now);
        }
        data.cache.seed(history.to_vec());
    }

    /// Merge an older page. Returns the messages that were not cached yet.
    pub fn merge_older(&mut self, room_id: &str, page: Vec<ChatMessage>, now: I) -> Vec<ChatMessage> {
        let data = self.data_mut(room_id);
        let added = data.cache.merge_older(page);
        for message in &added {
            data.dedup.add_message(message, now);
        }
        added
    }

    /// Show an optimistic message and start tracking it.
    pub fn stage_send(&mut self, message: &ChatMessage, now: I) {
        self.ledger.register(message);
        self.data_mut(&message.room_id).cache.insert(message.clone());
        self.health.touch(&message.room_id, now);
    }

    /// Backend confirmed a send. No-op if the change feed got there first.
    pub fn confirm_send(&mut self, room_id: &str, temp_id: &str, confirmed: ChatMessage, now: I) {
        if self.ledger.take(room_id, temp_id).is_none() {
            trace!(room_id, temp_id, "send already reconciled");
            return;
        }
        let Some(observer) = self.observer(room_id) else { return };

        let data = self.data_mut(room_id);
        if !data.cache.replace(temp_id, confirmed.clone()) {
            data.cache.insert(confirmed.clone());
        }
        data.dedup.add_message(&confirmed, now);
        observer.on_message(&RoomEvent::replace(temp_id.to_string(), confirmed));
    }

    /// Backend rejected a send: remove the optimistic copy.
    ///
    /// Returns false if the send had already been confirmed through the
    /// change feed, in which case nothing is emitted.
    pub fn roll_back_send(&mut self, optimistic: &ChatMessage) -> bool {
        let room_id = optimistic.room_id.as_str();
        if self.ledger.take(room_id, &optimistic.id).is_none() {
            return false;
        }
        if let Some(data) = self.data.get_mut(room_id) {
            data.cache.remove(&optimistic.id);
        }
        if let Some(observer) = self.observer(room_id) {
            let mut failed = optimistic.clone();
            failed.status = DeliveryStatus::Failed;
            observer.on_message(&RoomEvent::delete(failed));
        }
        true
    }

    /// Deliver typing emits to observers and return broadcasts to send.
    pub fn dispatch_typing(&mut self, actions: Vec<TypingAction>) -> Vec<OutboundTyping> {
        let mut outbound = Vec::new();
        for action in actions {
            match action {
                TypingAction::Emit { room_id, users } => {
                    if let Some(observer) = self.observer(&room_id) {
                        observer.on_typing(&users);
                    }
                },
                TypingAction::Broadcast { room_id, payload } => match self.channels.get(&room_id) {
                    Some(live) => outbound.push(OutboundTyping { channel: live.channel, room_id, payload }),
                    None => debug!(room_id = %room_id, "typing broadcast dropped: no live channel"),
                },
            }
        }
        outbound
    }
}
