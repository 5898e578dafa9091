//! Chat synchronization engine.
//!
//! [`ChatEngine`] is the composition root: it owns every room's subscription,
//! cache, deduplicator, typing and presence state, and the connection state
//! machine, and exposes the operations the UI layer calls. It is a cheap,
//! cloneable handle; clones share one engine.
//!
//! Background work (event pumps, the timer tick, heartbeats, reconnection,
//! idle probes) runs on tokio tasks spawned by the engine. They hold weak
//! references and stop once every handle is dropped, or on
//! [`ChatEngine::cleanup`].

mod driver;
mod state;

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use chatsync_core::{
    ChatMember, ChatMessage, ConnectionAction, ConnectionSnapshot, ConnectionStatus, Environment,
    MessageId, MessagePage, RoomEvent, SyncConfig, SyncError, TypingUser,
    connection::ListenerId,
    message::{MessageKind, OutgoingMessage, temp_id},
};
use chatsync_proto::{MessageRow, PageQuery};
use tokio::sync::Mutex;
use tracing::{info, warn};

use self::state::EngineState;
use crate::{
    auth::{AuthProvider, Identity},
    backend::MessageBackend,
    observer::RoomObserver,
    transport::Transport,
};

/// Everything behind a [`ChatEngine`] handle.
pub(crate) struct Shared<E: Environment> {
    env: E,
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    backend: Arc<dyn MessageBackend>,
    auth: Arc<dyn AuthProvider>,
    state: Mutex<EngineState<E::Instant>>,
}

/// Point-in-time view of connection and room health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHealth {
    /// Connection status
    pub status: ConnectionStatus,
    /// Error message while in [`ConnectionStatus::Error`]
    pub error: Option<String>,
    /// Reconnection attempts since the last success
    pub reconnect_attempts: u32,
    /// Rooms with a live channel
    pub active_rooms: usize,
    /// Rooms retained by [`ChatEngine::pause_all`]
    pub paused_rooms: usize,
    /// Time since the last successful connect or heartbeat. `None` if never
    /// connected.
    pub since_last_heartbeat: Option<Duration>,
}

/// Registration of a status listener.
///
/// Dropping it removes the listener; [`StatusSubscription::unsubscribe`]
/// does the same and waits for the removal to complete.
pub struct StatusSubscription<E: Environment> {
    id: Option<ListenerId>,
    shared: Weak<Shared<E>>,
}

impl<E: Environment> StatusSubscription<E> {
    /// Remove the listener.
    pub async fn unsubscribe(mut self) {
        if let (Some(id), Some(shared)) = (self.id.take(), self.shared.upgrade()) {
            shared.state.lock().await.connection.remove_listener(id);
        }
    }
}

impl<E: Environment> Drop for StatusSubscription<E> {
    fn drop(&mut self) {
        let (Some(id), Some(shared)) = (self.id.take(), self.shared.upgrade()) else {
            return;
        };
        if let Ok(mut state) = shared.state.try_lock() {
            state.connection.remove_listener(id);
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                shared.state.lock().await.connection.remove_listener(id);
            });
        }
    }
}

/// Real-time chat synchronization engine.
pub struct ChatEngine<E: Environment> {
    shared: Arc<Shared<E>>,
}

impl<E: Environment> Clone for ChatEngine<E> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<E: Environment> ChatEngine<E> {
    /// Create an engine over the given collaborators. Nothing connects until
    /// [`ChatEngine::initialize`].
    ///
    /// # Errors
    ///
    /// `SyncError::Config` if `config` fails validation.
    pub fn new(
        env: E,
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        backend: Arc<dyn MessageBackend>,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let state = Mutex::new(EngineState::new(&config));
        Ok(Self { shared: Arc::new(Shared { env, config, transport, backend, auth, state }) })
    }

    /// Verify the identity, connect the transport and start the driver.
    ///
    /// # Errors
    ///
    /// - `SyncError::Auth` if no identity is available
    /// - `SyncError::Network` if the transport cannot be reached
    pub async fn initialize(&self) -> Result<Identity, SyncError> {
        let shared = &self.shared;
        shared.state.lock().await.connection.begin_connect();

        let identity = match shared.auth.current_identity().await {
            Ok(identity) => identity,
            Err(err) => {
                shared.state.lock().await.connection.connect_failed(err.to_string());
                return Err(err.into());
            },
        };

        if let Err(err) = shared.transport.connect().await {
            shared.state.lock().await.connection.connect_failed(err.to_string());
            return Err(err.into());
        }

        let mut state = shared.state.lock().await;
        state.identity = Some(identity.clone());
        state.connection.connected(shared.env.now());
        shared.ensure_driver(&mut state);
        info!(user_id = %identity.user_id, "engine initialized");
        Ok(identity)
    }

    /// Join `room_id`, replacing any existing subscription for it.
    ///
    /// Retries the subscription with linear backoff; a subscribe call that
    /// neither confirms nor fails within the subscribe timeout counts as a
    /// failed attempt. Cached messages survive a re-join.
    ///
    /// # Errors
    ///
    /// `SyncError::Network` once every attempt failed. The observer's
    /// `on_error` is called as well.
    pub async fn join_room(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        observer: Arc<dyn RoomObserver>,
    ) -> Result<(), SyncError> {
        let shared = &self.shared;
        let room_id = room_id.to_string();

        let (generation, old) = shared.state.lock().await.begin_join(&room_id, user_id, display_name, observer);
        if let Some(old) = old {
            info!(room_id = %room_id, "tearing down existing subscription");
            old.pump.abort();
            shared.close_channel(&room_id, old.channel).await;
        }

        let result = shared.establish(&room_id, generation).await;
        if result.is_err() {
            let mut state = shared.state.lock().await;
            if state.intents.get(&room_id).is_some_and(|i| i.generation == generation) {
                state.clear_room(&room_id);
            }
        }
        result
    }

    /// Leave `room_id`: drop its channel, caches, typing state and timers.
    ///
    /// Transport failures are logged, not returned. Leaving a room that is
    /// not joined does nothing.
    pub async fn leave_room(&self, room_id: &str) {
        let shared = &self.shared;
        let Some(live) = shared.state.lock().await.clear_room(room_id) else {
            return;
        };
        live.pump.abort();
        shared.close_channel(room_id, live.channel).await;
        info!(room_id, "room left");
    }

    /// Load the newest `limit` messages, seed the room with them and deliver
    /// them as an `Initial` event. Returns them oldest first.
    ///
    /// # Errors
    ///
    /// - `SyncError::RoomNotJoined` if the room is not joined
    /// - `SyncError::Network` if the backend fails
    pub async fn load_initial_messages(&self, room_id: &str, limit: usize) -> Result<Vec<ChatMessage>, SyncError> {
        let shared = &self.shared;
        self.require_room(room_id).await?;

        let query = PageQuery { room_id: room_id.to_string(), before: None, limit };
        let rows = shared.backend.fetch_messages(query).await?;
        let history = oldest_first(rows, None);

        let mut state = shared.state.lock().await;
        if let Some(observer) = state.observer(room_id) {
            state.seed_history(room_id, &history, shared.env.now());
            observer.on_message(&RoomEvent::initial(history.clone()));
        }
        Ok(history)
    }

    /// Load up to `limit` messages strictly older than `before`.
    ///
    /// Messages already cached are left out of the page; `has_more` reflects
    /// whether the backend holds older rows.
    ///
    /// # Errors
    ///
    /// - `SyncError::RoomNotJoined` if the room is not joined
    /// - `SyncError::Network` if the backend fails
    pub async fn load_older_messages(
        &self,
        room_id: &str,
        before: i64,
        limit: usize,
    ) -> Result<MessagePage, SyncError> {
        let shared = &self.shared;
        self.require_room(room_id).await?;

        let query = PageQuery { room_id: room_id.to_string(), before: Some(before), limit: limit.saturating_add(1) };
        let rows = shared.backend.fetch_messages(query).await?;
        let mut page = oldest_first(rows, Some(before));

        let has_more = page.len() > limit;
        if has_more {
            page = page.split_off(page.len() - limit);
        }

        let mut state = shared.state.lock().await;
        let messages = if state.intents.contains_key(room_id) {
            state.merge_older(room_id, page, shared.env.now())
        } else {
            page
        };
        Ok(MessagePage { messages, has_more })
    }

    /// Send a message optimistically.
    ///
    /// The observer receives `New` with a temporary id before the backend is
    /// called, then `Replace` on confirmation or `Delete` on failure.
    /// Returns the confirmed message.
    ///
    /// # Errors
    ///
    /// - `SyncError::RoomNotJoined` if the room is neither joined nor paused
    /// - `SyncError::Network` if the backend insert fails
    pub async fn send_message(
        &self,
        room_id: &str,
        content: &str,
        sender_id: &str,
        sender_name: &str,
        kind: MessageKind,
        reply_to: Option<MessageId>,
    ) -> Result<ChatMessage, SyncError> {
        let shared = &self.shared;
        let wall = shared.env.wall_clock_millis();
        let id = temp_id(wall, shared.env.random_u64());

        let optimistic = {
            let mut state = shared.state.lock().await;
            let Some(observer) = state.observer(room_id) else {
                return Err(SyncError::RoomNotJoined(room_id.to_string()));
            };
            let outgoing = OutgoingMessage {
                room_id: room_id.to_string(),
                sender_id: sender_id.to_string(),
                sender_name: sender_name.to_string(),
                content: content.to_string(),
                kind,
                reply_to,
            };
            let message = ChatMessage::optimistic(id, outgoing, wall);
            state.stage_send(&message, shared.env.now());
            observer.on_message(&RoomEvent::new_message(message.clone()));
            message
        };

        match shared.backend.insert_message(optimistic.to_new_row()).await {
            Ok(row) => {
                let confirmed = ChatMessage::from(row);
                shared.state.lock().await.confirm_send(room_id, &optimistic.id, confirmed.clone(), shared.env.now());
                Ok(confirmed)
            },
            Err(err) => {
                warn!(room_id, temp_id = %optimistic.id, error = %err, "send failed");
                shared.state.lock().await.roll_back_send(&optimistic);
                Err(SyncError::Network(format!("send failed: {err}")))
            },
        }
    }

    /// Signal that the local user started or stopped typing.
    ///
    /// Starts are debounced; stops are broadcast immediately.
    ///
    /// # Errors
    ///
    /// `SyncError::RoomNotJoined` if the room is not joined.
    pub async fn send_typing_indicator(
        &self,
        room_id: &str,
        user_id: &str,
        user_name: &str,
        is_typing: bool,
    ) -> Result<(), SyncError> {
        let shared = &self.shared;
        let outbound = {
            let mut state = shared.state.lock().await;
            if !state.intents.contains_key(room_id) {
                return Err(SyncError::RoomNotJoined(room_id.to_string()));
            }
            if is_typing {
                state.typing.local_start(room_id, user_id, user_name, shared.env.now());
                Vec::new()
            } else {
                let actions = state.typing.local_stop(room_id, user_id, user_name, shared.env.wall_clock_millis());
                state.dispatch_typing(actions)
            }
        };

        for typing in outbound {
            shared.send_typing(typing).await;
        }
        Ok(())
    }

    /// Unsubscribe every room while keeping room → observer bindings.
    pub async fn pause_all(&self) {
        let shared = &self.shared;
        let closed = shared.state.lock().await.pause_all();
        info!(rooms = closed.len(), "pausing all rooms");
        for (room_id, live) in closed {
            live.pump.abort();
            shared.close_channel(&room_id, live.channel).await;
        }
    }

    /// Rejoin every paused room with its original observer.
    ///
    /// Every room is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// The first room's join error, if any failed.
    pub async fn resume_all(&self, user_id: &str, display_name: &str) -> Result<(), SyncError> {
        let shared = &self.shared;
        let rooms = shared.state.lock().await.resume_all(user_id, display_name);
        info!(rooms = rooms.len(), "resuming rooms");

        let mut first_error = None;
        for (room_id, generation) in rooms {
            if let Err(err) = shared.establish(&room_id, generation).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Current connection status.
    pub async fn status(&self) -> ConnectionSnapshot {
        self.shared.state.lock().await.connection.snapshot().clone()
    }

    /// Connection and room health snapshot.
    pub async fn connection_health(&self) -> ConnectionHealth {
        let shared = &self.shared;
        let now = shared.env.now();
        let state = shared.state.lock().await;
        let snapshot = state.connection.snapshot();

        ConnectionHealth {
            status: snapshot.status,
            error: snapshot.error.clone(),
            reconnect_attempts: snapshot.reconnect_attempts,
            active_rooms: state.channels.len(),
            paused_rooms: state.paused_count(),
            since_last_heartbeat: state.connection.last_heartbeat_ok().map(|at| now - at),
        }
    }

    /// Register a listener for status changes.
    ///
    /// Listeners run synchronously, in registration order, while the engine
    /// lock is held.
    pub async fn on_status_change<F>(&self, listener: F) -> StatusSubscription<E>
    where
        F: Fn(&ConnectionSnapshot) + Send + Sync + 'static,
    {
        let id = self.shared.state.lock().await.connection.add_listener(Arc::new(listener));
        StatusSubscription { id: Some(id), shared: Arc::downgrade(&self.shared) }
    }

    /// Reset the reconnection counter and attempt to reconnect now.
    ///
    /// # Errors
    ///
    /// The attempt's failure; automatic retries continue per policy.
    pub async fn force_reconnect(&self) -> Result<(), SyncError> {
        let action = self.shared.state.lock().await.connection.force_reconnect();
        if let Some(ConnectionAction::Reconnect { attempt }) = action {
            self.shared.reconnect(attempt).await
        } else {
            Ok(())
        }
    }

    /// Stop the driver and any running reconnection attempt, leave every room
    /// and disconnect.
    pub async fn cleanup(&self) {
        let shared = &self.shared;
        let (tasks, rooms) = {
            let mut state = shared.state.lock().await;
            state.connection.disconnect();
            let rooms: Vec<String> = state.intents.keys().cloned().collect();
            ([state.driver.take(), state.reconnect_task.take()], rooms)
        };
        for task in tasks.into_iter().flatten() {
            task.abort();
        }

        for room_id in rooms {
            self.leave_room(&room_id).await;
        }
        if let Err(err) = shared.transport.disconnect().await {
            warn!(error = %err, "transport disconnect failed");
        }
        info!("engine cleaned up");
    }

    /// Cached messages of `room_id`, oldest first, optimistic ones included.
    pub async fn cached_messages(&self, room_id: &str) -> Vec<ChatMessage> {
        let state = self.shared.state.lock().await;
        state.data.get(room_id).map(|data| data.cache.messages().to_vec()).unwrap_or_default()
    }

    /// Members of `room_id` from the latest presence sync.
    pub async fn members(&self, room_id: &str) -> Vec<ChatMember> {
        self.shared.state.lock().await.presence.members(room_id).to_vec()
    }

    /// Remote users typing in `room_id`.
    pub async fn typing_users(&self, room_id: &str) -> Vec<TypingUser> {
        self.shared.state.lock().await.typing.typing_users(room_id)
    }

    /// Whether `room_id` has a live subscription.
    pub async fn is_subscribed(&self, room_id: &str) -> bool {
        self.shared.state.lock().await.channels.contains_key(room_id)
    }

    /// Identity verified by the latest connect or heartbeat.
    pub async fn identity(&self) -> Option<Identity> {
        self.shared.state.lock().await.identity.clone()
    }

    async fn require_room(&self, room_id: &str) -> Result<(), SyncError> {
        if self.shared.state.lock().await.intents.contains_key(room_id) {
            Ok(())
        } else {
            Err(SyncError::RoomNotJoined(room_id.to_string()))
        }
    }
}

/// Live rows as messages, oldest first. With a cursor, rows at or after it
/// are dropped even if the backend returned them.
fn oldest_first(rows: Vec<MessageRow>, before: Option<i64>) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = rows
        .into_iter()
        .filter(|row| !row.is_deleted() && before.is_none_or(|cursor| row.created_at < cursor))
        .map(ChatMessage::from)
        .collect();
    messages.reverse();
    messages.sort_by_key(|m| m.timestamp);
    messages
}
