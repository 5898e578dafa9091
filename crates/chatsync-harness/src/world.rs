//! Engine wiring for simulations.

use std::sync::Arc;

use chatsync_client::{ChatEngine, Identity};
use chatsync_core::{ChatMessage, SyncConfig, SyncError, message::MessageKind};

use crate::{
    hub::{HubClient, MemoryHub},
    recorder::RecordingObserver,
    sim_env::SimEnv,
};

/// An engine connected to a hub, with the hub handle that injects its faults.
pub struct SimClient {
    /// Engine under test
    pub engine: ChatEngine<SimEnv>,
    /// Fault knobs for this engine's collaborators
    pub link: Arc<HubClient>,
    /// Signed-in identity
    pub identity: Identity,
}

impl SimClient {
    /// Build an engine for `user_id` on `hub`. Does not initialize it.
    pub fn new(
        hub: &MemoryHub,
        env: SimEnv,
        config: SyncConfig,
        user_id: &str,
        display_name: &str,
    ) -> Result<Self, SyncError> {
        let link = hub.client(user_id, display_name);
        let engine = ChatEngine::new(env, config, link.clone(), link.clone(), link.clone())?;
        let identity = Identity { user_id: user_id.to_string(), display_name: display_name.to_string() };
        Ok(Self { engine, link, identity })
    }

    /// Build, initialize and join `room_id` with a fresh recorder.
    pub async fn joined(
        hub: &MemoryHub,
        env: SimEnv,
        user_id: &str,
        display_name: &str,
        room_id: &str,
    ) -> Result<(Self, Arc<RecordingObserver>), SyncError> {
        let client = Self::new(hub, env, SyncConfig::default(), user_id, display_name)?;
        client.engine.initialize().await?;
        let recorder = RecordingObserver::new();
        client.join(room_id, recorder.clone()).await?;
        Ok((client, recorder))
    }

    /// Join `room_id` as this client's identity.
    pub async fn join(&self, room_id: &str, recorder: Arc<RecordingObserver>) -> Result<(), SyncError> {
        self.engine.join_room(room_id, &self.identity.user_id, &self.identity.display_name, recorder).await
    }

    /// Send a text message as this client's identity.
    pub async fn say(&self, room_id: &str, content: &str) -> Result<ChatMessage, SyncError> {
        self.engine
            .send_message(
                room_id,
                content,
                &self.identity.user_id,
                &self.identity.display_name,
                MessageKind::Text,
                None,
            )
            .await
    }
}
