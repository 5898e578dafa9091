//! Background work: joins, event pumps, the timer tick and the tasks it
//! spawns for heartbeats, reconnection and idle probes.
//!
//! Tasks hold a `Weak` reference to the engine so that dropping every
//! `ChatEngine` handle lets them wind down. Spawning always goes through a
//! plain `fn`, never directly from one of these async bodies into another.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use chatsync_core::{ChatMessage, ConnectionAction, ConnectionStatus, Environment, RoomId, SyncError};
use chatsync_proto::{InboundEvent, RawChannelEvent, TYPING_EVENT};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::{
    Shared,
    state::{EngineState, LiveChannel, OutboundTyping},
};
use crate::{
    auth::Identity,
    error::TransportError,
    transport::{ChannelId, ChannelSpec, Subscribed},
};

impl<E: Environment> Shared<E> {
    /// Subscribe `room_id` for the join started at `generation`, retrying with
    /// linear backoff. Returns `Ok` without subscribing if a newer join or a
    /// leave superseded this one.
    pub(super) async fn establish(self: &Arc<Self>, room_id: &RoomId, generation: u64) -> Result<(), SyncError> {
        let user_id = {
            let state = self.state.lock().await;
            match state.intents.get(room_id) {
                Some(intent) if intent.generation == generation && !intent.paused => intent.user_id.clone(),
                _ => return Ok(()),
            }
        };

        let spec = ChannelSpec::room(room_id, &user_id, &[TYPING_EVENT]);
        let policy = &self.config.join;
        let mut last_error = TransportError::Subscribe("no attempt made".to_string());

        for attempt in 1..=policy.max_attempts {
            match self.subscribe_once(spec.clone()).await {
                Ok(subscribed) => return self.install(room_id, generation, subscribed).await,
                Err(err) => {
                    warn!(room_id = %room_id, attempt, error = %err, "subscribe attempt failed");
                    last_error = err;
                },
            }

            if attempt < policy.max_attempts {
                self.env.sleep(policy.delay_after(attempt)).await;
                if !self.state.lock().await.is_current(room_id, generation) {
                    debug!(room_id = %room_id, "join superseded during backoff");
                    return Ok(());
                }
            }
        }

        let err = SyncError::Network(format!(
            "failed to join room {room_id} after {} attempts: {last_error}",
            policy.max_attempts
        ));
        let state = self.state.lock().await;
        if state.is_current(room_id, generation) {
            error!(room_id = %room_id, "join failed");
            if let Some(observer) = state.observer(room_id) {
                observer.on_error(&err);
            }
        }
        Err(err)
    }

    async fn subscribe_once(&self, spec: ChannelSpec) -> Result<Subscribed, TransportError> {
        let timeout = self.config.join.subscribe_timeout;
        tokio::select! {
            result = self.transport.subscribe(spec) => result,
            () = self.env.sleep(timeout) => Err(TransportError::Timeout(timeout)),
        }
    }

    /// Make a confirmed subscription the room's live channel and publish
    /// presence on it.
    async fn install(self: &Arc<Self>, room_id: &RoomId, generation: u64, subscribed: Subscribed) -> Result<(), SyncError> {
        let Subscribed { channel, events } = subscribed;
        let now = self.env.now();

        let (meta, replaced) = {
            let mut state = self.state.lock().await;
            if !state.is_current(room_id, generation) {
                drop(state);
                debug!(room_id = %room_id, %channel, "join superseded, dropping channel");
                self.close_channel(room_id, channel).await;
                return Ok(());
            }

            let pump = self.spawn_pump(room_id.clone(), generation, events);
            let replaced = state.channels.insert(room_id.clone(), LiveChannel { channel, generation, pump });
            state.data_mut(room_id);
            state.health.touch(room_id, now);
            (state.presence_meta(room_id, self.env.wall_clock_millis()), replaced)
        };

        if let Some(old) = replaced {
            old.pump.abort();
            self.close_channel(room_id, old.channel).await;
        }
        if let Some(meta) = meta
            && let Err(err) = self.transport.track(channel, meta).await
        {
            warn!(room_id = %room_id, error = %err, "presence track failed");
        }

        info!(room_id = %room_id, %channel, "room joined");
        Ok(())
    }

    /// Re-subscribe an unpaused room, replacing its current channel.
    pub(super) async fn rejoin(self: &Arc<Self>, room_id: &RoomId) -> Result<(), SyncError> {
        let (generation, old) = {
            let mut state = self.state.lock().await;
            match state.begin_rejoin(room_id) {
                Some(started) => started,
                None => return Ok(()),
            }
        };

        info!(room_id = %room_id, "rejoining room");
        if let Some(old) = old {
            old.pump.abort();
            self.close_channel(room_id, old.channel).await;
        }
        self.establish(room_id, generation).await
    }

    /// Best-effort untrack and unsubscribe.
    pub(super) async fn close_channel(&self, room_id: &str, channel: ChannelId) {
        for result in [self.transport.untrack(channel).await, self.transport.unsubscribe(channel).await] {
            match result {
                Ok(()) => {},
                Err(TransportError::UnknownChannel(_)) => {
                    trace!(room_id, %channel, "channel already gone");
                },
                Err(err) => warn!(room_id, %channel, error = %err, "channel teardown failed"),
            }
        }
    }

    /// Apply one raw event from the channel owned by `generation`.
    async fn handle_event(self: &Arc<Self>, room_id: &RoomId, generation: u64, raw: RawChannelEvent) {
        let parsed = InboundEvent::parse(raw);
        let now = self.env.now();

        let mut state = self.state.lock().await;
        if !state.owns_channel(room_id, generation) {
            trace!(room_id = %room_id, "event from stale channel dropped");
            return;
        }
        state.health.touch(room_id, now);

        let event = match parsed {
            Ok(event) => event,
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "malformed inbound event");
                if let Some(observer) = state.observer(room_id) {
                    observer.on_error(&err.into());
                }
                return;
            },
        };
        trace!(room_id = %room_id, kind = event.kind(), "inbound event");

        match event {
            InboundEvent::MessageInserted(row) => state.apply_insert(room_id, ChatMessage::from(row), now),
            InboundEvent::MessageUpdated(row) => state.apply_update(room_id, row, now),
            InboundEvent::PresenceSynced(snapshot) => state.apply_presence(room_id, snapshot),
            InboundEvent::Typing(payload) => {
                let own = state.intents.get(room_id).map(|intent| intent.user_id.clone());
                let actions = state.typing.remote(room_id, payload, own.as_deref(), now);
                state.dispatch_typing(actions);
            },
            InboundEvent::ChannelClosed { reason } => {
                drop(state);
                warn!(room_id = %room_id, %reason, "channel closed by transport");
                self.spawn_rejoin(room_id.clone());
            },
            InboundEvent::Ignored { event } => debug!(room_id = %room_id, %event, "unbound broadcast ignored"),
        }
    }

    /// One driver tick: typing timers, connection schedule, idle probes.
    async fn tick(self: &Arc<Self>) {
        let now = self.env.now();
        let wall = self.env.wall_clock_millis();

        let (connection_actions, outbound, probes) = {
            let mut state = self.state.lock().await;
            let connection_actions = state.connection.tick(now);
            let typing_actions = state.typing.tick(now, wall);
            let outbound = state.dispatch_typing(typing_actions);
            let probes = state.health.due(now);
            (connection_actions, outbound, probes)
        };

        for typing in outbound {
            self.send_typing(typing).await;
        }

        for action in connection_actions {
            match action {
                ConnectionAction::CheckHeartbeat => self.spawn_heartbeat(),
                ConnectionAction::Reconnect { attempt } => {
                    let task = self.spawn_reconnect(attempt);
                    self.state.lock().await.reconnect_task = Some(task);
                },
            }
        }

        for room_id in probes {
            self.spawn_probe(room_id);
        }
    }

    pub(super) async fn send_typing(&self, typing: OutboundTyping) {
        let OutboundTyping { room_id, channel, payload } = typing;
        match self.transport.broadcast(channel, TYPING_EVENT, payload.to_value()).await {
            Ok(()) => self.state.lock().await.health.touch(&room_id, self.env.now()),
            Err(err) => warn!(room_id = %room_id, error = %err, "typing broadcast failed"),
        }
    }

    /// Transport liveness plus identity validity.
    async fn check_heartbeat(&self) {
        let alive = self.transport.is_connected().await;
        let identity = self.auth.current_identity().await;
        let now = self.env.now();

        let mut state = self.state.lock().await;
        match (alive, identity) {
            (true, Ok(identity)) => {
                trace!("heartbeat ok");
                state.identity = Some(identity);
                state.connection.heartbeat_ok(now);
            },
            (false, _) => state.connection.heartbeat_failed("transport not connected", now),
            (true, Err(err)) => state.connection.heartbeat_failed(format!("identity check failed: {err}"), now),
        }
    }

    /// Run reconnection attempt `attempt`. On success every unpaused room is
    /// rejoined with its original observer.
    pub(super) async fn reconnect(self: &Arc<Self>, attempt: u32) -> Result<(), SyncError> {
        info!(attempt, "reconnecting");
        let result = self.reestablish().await;
        let now = self.env.now();

        let rooms = {
            let mut state = self.state.lock().await;
            if !state.connection.is_reconnecting() {
                let cancelled = result.is_ok() && state.connection.status() == ConnectionStatus::Disconnected;
                drop(state);
                debug!(attempt, "reconnection outcome discarded");
                if cancelled
                    && let Err(err) = self.transport.disconnect().await
                {
                    warn!(error = %err, "disconnect after cancelled reconnect failed");
                }
                return Ok(());
            }

            match result {
                Ok(identity) => {
                    state.identity = Some(identity);
                    state.connection.connected(now);
                    self.ensure_driver(&mut state);
                    state.active_rooms()
                },
                Err(err) => {
                    state.connection.reconnect_failed(err.to_string(), now);
                    if state.connection.is_exhausted() {
                        let terminal = SyncError::Network(
                            state.connection.snapshot().error.clone().unwrap_or_else(|| err.to_string()),
                        );
                        for intent in state.intents.values() {
                            intent.observer.on_error(&terminal);
                        }
                    }
                    return Err(err);
                },
            }
        };

        info!(rooms = rooms.len(), "reconnected, rejoining rooms");
        for room_id in rooms {
            self.spawn_rejoin(room_id);
        }
        Ok(())
    }

    async fn reestablish(&self) -> Result<Identity, SyncError> {
        if let Err(err) = self.transport.disconnect().await {
            debug!(error = %err, "disconnect before reconnect failed");
        }
        self.transport.connect().await?;
        Ok(self.auth.current_identity().await?)
    }

    /// No-op presence write on an idle room. A failed write, or a room left
    /// without a channel by an earlier failed rejoin, rejoins that room.
    async fn probe(self: &Arc<Self>, room_id: RoomId) {
        let (channel, meta) = {
            let state = self.state.lock().await;
            if !state.is_wanted(&room_id) {
                return;
            }
            let channel = state.channels.get(&room_id).map(|live| live.channel);
            (channel, state.presence_meta(&room_id, self.env.wall_clock_millis()))
        };
        let Some(meta) = meta else { return };

        let outcome = match channel {
            Some(channel) => {
                debug!(room_id = %room_id, "probing idle room");
                self.transport.track(channel, meta).await
            },
            None => Err(TransportError::Subscribe("no live channel".to_string())),
        };

        match outcome {
            Ok(()) => self.state.lock().await.health.probe_succeeded(&room_id, self.env.now()),
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "health probe failed");
                self.state.lock().await.health.probe_failed(&room_id);
                if let Err(err) = self.rejoin(&room_id).await {
                    warn!(room_id = %room_id, error = %err, "rejoin after failed probe failed");
                    let mut state = self.state.lock().await;
                    if state.is_wanted(&room_id) {
                        state.health.touch(&room_id, self.env.now());
                    }
                }
            },
        }
    }

    /// Start the tick loop if it is not running.
    pub(super) fn ensure_driver(self: &Arc<Self>, state: &mut EngineState<E::Instant>) {
        if state.driver.is_some() {
            return;
        }
        let handle = tokio::spawn(drive(Arc::downgrade(self), self.env.clone(), self.config.tick_interval));
        state.driver = Some(handle.abort_handle());
    }

    fn spawn_pump(
        self: &Arc<Self>,
        room_id: RoomId,
        generation: u64,
        events: mpsc::UnboundedReceiver<RawChannelEvent>,
    ) -> tokio::task::AbortHandle {
        tokio::spawn(pump(Arc::downgrade(self), room_id, generation, events)).abort_handle()
    }

    fn spawn_rejoin(self: &Arc<Self>, room_id: RoomId) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = shared.rejoin(&room_id).await {
                warn!(room_id = %room_id, error = %err, "rejoin failed");
            }
        });
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.check_heartbeat().await });
    }

    fn spawn_reconnect(self: &Arc<Self>, attempt: u32) -> tokio::task::AbortHandle {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            // Failures are already reflected in the connection status.
            let _ = shared.reconnect(attempt).await;
        })
        .abort_handle()
    }

    fn spawn_probe(self: &Arc<Self>, room_id: RoomId) {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.probe(room_id).await });
    }
}

/// Forward a channel's events into the engine until the channel ends or the
/// engine is dropped.
async fn pump<E: Environment>(
    shared: Weak<Shared<E>>,
    room_id: RoomId,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<RawChannelEvent>,
) {
    while let Some(raw) = events.recv().await {
        let Some(shared) = shared.upgrade() else { return };
        shared.handle_event(&room_id, generation, raw).await;
    }
    debug!(room_id = %room_id, generation, "channel stream ended");
}

/// Tick loop. Exits once the engine is dropped.
async fn drive<E: Environment>(shared: Weak<Shared<E>>, env: E, interval: Duration) {
    loop {
        env.sleep(interval).await;
        let Some(shared) = shared.upgrade() else { return };
        shared.tick().await;
    }
}
