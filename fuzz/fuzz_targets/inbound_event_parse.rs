//! Fuzz target for InboundEvent::parse
//!
//! Feeds arbitrary bytes, decoded as JSON where possible, through every raw
//! event kind:
//! - Malformed or truncated JSON
//! - Type confusion (a typing payload where a row is expected)
//! - Missing, empty or temporary ids
//!
//! The parser should NEVER panic, and every row it accepts must validate.

#![no_main]

use chatsync_proto::{InboundEvent, RawChannelEvent, TEMP_ID_PREFIX};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    let raws = [
        RawChannelEvent::Insert(value.clone()),
        RawChannelEvent::Update(value.clone()),
        RawChannelEvent::PresenceSync(value.clone()),
        RawChannelEvent::Broadcast { event: "typing".to_string(), payload: value.clone() },
        RawChannelEvent::Broadcast { event: "reaction".to_string(), payload: value },
    ];

    for raw in raws {
        match InboundEvent::parse(raw) {
            Ok(InboundEvent::MessageInserted(row) | InboundEvent::MessageUpdated(row)) => {
                assert!(!row.id.is_empty());
                assert!(!row.id.starts_with(TEMP_ID_PREFIX));
                assert!(row.validate().is_ok());
            },
            Ok(InboundEvent::PresenceSynced(metas)) => {
                assert!(metas.iter().all(|m| !m.user_id.is_empty()));
            },
            Ok(InboundEvent::Typing(payload)) => assert!(!payload.user_id.is_empty()),
            Ok(_) | Err(_) => {},
        }
    }
});
