//! Presence payloads.
//!
//! Each subscriber tracks one [`PresenceMeta`] on its channel. The transport
//! publishes the full snapshot on every change, keyed by presence key, each key
//! holding the metas of one or more connections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Metadata tracked for a connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    /// Participant user id
    pub user_id: String,
    /// Participant display name
    pub user_name: String,
    /// When the participant came online (unix millis)
    pub online_at: i64,
}

impl PresenceMeta {
    /// Decode a full presence snapshot into a flat list of metas.
    ///
    /// Keys are visited in sorted order so the result is deterministic.
    pub fn snapshot_from_value(value: serde_json::Value) -> Result<Vec<Self>> {
        let state: BTreeMap<String, Vec<Self>> =
            serde_json::from_value(value).map_err(|e| ProtocolError::malformed("presence", &e))?;

        let metas: Vec<Self> = state.into_values().flatten().collect();
        if metas.iter().any(|m| m.user_id.is_empty()) {
            return Err(ProtocolError::EmptyField { kind: "presence", field: "user_id" });
        }

        Ok(metas)
    }
}
