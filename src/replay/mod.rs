use std::sync::Mutex;

/// Bounded ring of recent inbound event envelopes kept for replay.
pub const RECENT_EVENT_ENVELOPE_LIMIT: usize = 8;

/// Point-in-time copy of the cache, replayed to a freshly-ready UI page in a
/// fixed order: pipe status, hello_ack, pong, status_snapshot, the event
/// ring, scene snapshot, current scene, scene-switch-completed, action result.
#[derive(Debug, Clone, Default)]
pub struct ReplaySnapshot {
    pub pipe_status: Option<(String, String)>,
    pub hello_ack_envelope_json: Option<String>,
    pub pong_envelope_json: Option<String>,
    pub status_snapshot_envelope_json: Option<String>,
    pub recent_event_envelope_jsons: Vec<String>,
    pub scene_snapshot_json: Option<String>,
    pub current_scene: Option<String>,
    pub scene_switch_completed_json: Option<String>,
    pub dock_action_result_json: Option<String>,
}

/// Last-known value of every UI-visible signal. Each kind keeps only its
/// newest value; stop clears everything.
#[derive(Debug, Default)]
pub struct ReplayCache {
    state: Mutex<ReplaySnapshot>,
}

fn envelope_type(envelope_json: &str) -> Option<String> {
    let envelope: serde_json::Value = serde_json::from_str(envelope_json).ok()?;
    envelope
        .get("type")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files an inbound envelope JSON under its type: latest-value slots for
    /// `hello_ack`/`pong`/`status_snapshot`, the bounded ring for event
    /// envelopes, nothing for anything else.
    pub fn cache_envelope_json(&self, envelope_json: &str) {
        if envelope_json.is_empty() {
            return;
        }
        let Some(message_type) = envelope_type(envelope_json) else {
            return;
        };
        let mut state = self.state.lock().unwrap();
        match message_type.as_str() {
            "hello_ack" => state.hello_ack_envelope_json = Some(envelope_json.to_string()),
            "pong" => state.pong_envelope_json = Some(envelope_json.to_string()),
            "status_snapshot" => {
                state.status_snapshot_envelope_json = Some(envelope_json.to_string())
            }
            "user_notice" | "protocol_error" | "switch_scene" => {
                state
                    .recent_event_envelope_jsons
                    .push(envelope_json.to_string());
                let len = state.recent_event_envelope_jsons.len();
                if len > RECENT_EVENT_ENVELOPE_LIMIT {
                    state
                        .recent_event_envelope_jsons
                        .drain(..len - RECENT_EVENT_ENVELOPE_LIMIT);
                }
            }
            _ => {}
        }
    }

    pub fn cache_pipe_status(&self, status: &str, reason: &str) {
        if status.is_empty() {
            return;
        }
        self.state.lock().unwrap().pipe_status = Some((status.to_string(), reason.to_string()));
    }

    pub fn cache_scene_snapshot(&self, payload_json: &str) {
        self.state.lock().unwrap().scene_snapshot_json = if payload_json.is_empty() {
            None
        } else {
            Some(payload_json.to_string())
        };
    }

    pub fn cache_current_scene(&self, scene_name: &str) {
        self.state.lock().unwrap().current_scene = Some(scene_name.to_string());
    }

    pub fn cache_scene_switch_completed(&self, payload_json: &str) {
        self.state.lock().unwrap().scene_switch_completed_json = if payload_json.is_empty() {
            None
        } else {
            Some(payload_json.to_string())
        };
    }

    pub fn cache_dock_action_result(&self, payload_json: &str) {
        self.state.lock().unwrap().dock_action_result_json = if payload_json.is_empty() {
            None
        } else {
            Some(payload_json.to_string())
        };
    }

    pub fn cached_status_snapshot_json(&self) -> Option<String> {
        self.state.lock().unwrap().status_snapshot_envelope_json.clone()
    }

    pub fn snapshot(&self) -> ReplaySnapshot {
        self.state.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        *self.state.lock().unwrap() = ReplaySnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(message_type: &str, marker: u64) -> String {
        serde_json::json!({
            "v": 1,
            "id": format!("{message_type}-{marker}"),
            "ts_unix_ms": marker,
            "type": message_type,
            "payload": {},
        })
        .to_string()
    }

    #[test]
    fn latest_value_slots_replace_older_entries() {
        let cache = ReplayCache::new();
        cache.cache_envelope_json(&envelope("hello_ack", 1));
        cache.cache_envelope_json(&envelope("hello_ack", 2));
        cache.cache_envelope_json(&envelope("pong", 3));
        cache.cache_envelope_json(&envelope("status_snapshot", 4));
        cache.cache_envelope_json(&envelope("status_snapshot", 5));

        let snapshot = cache.snapshot();
        assert!(snapshot
            .hello_ack_envelope_json
            .unwrap()
            .contains("hello_ack-2"));
        assert!(snapshot.pong_envelope_json.unwrap().contains("pong-3"));
        assert!(snapshot
            .status_snapshot_envelope_json
            .unwrap()
            .contains("status_snapshot-5"));
    }

    #[test]
    fn event_ring_is_bounded_and_ordered() {
        let cache = ReplayCache::new();
        for i in 0..12 {
            cache.cache_envelope_json(&envelope("user_notice", i));
        }
        let snapshot = cache.snapshot();
        assert_eq!(
            snapshot.recent_event_envelope_jsons.len(),
            RECENT_EVENT_ENVELOPE_LIMIT
        );
        assert!(snapshot.recent_event_envelope_jsons[0].contains("user_notice-4"));
        assert!(snapshot.recent_event_envelope_jsons[7].contains("user_notice-11"));
    }

    #[test]
    fn event_ring_mixes_event_kinds_in_arrival_order() {
        let cache = ReplayCache::new();
        cache.cache_envelope_json(&envelope("user_notice", 1));
        cache.cache_envelope_json(&envelope("switch_scene", 2));
        cache.cache_envelope_json(&envelope("protocol_error", 3));
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.recent_event_envelope_jsons.len(), 3);
        assert!(snapshot.recent_event_envelope_jsons[1].contains("switch_scene-2"));
    }

    #[test]
    fn unknown_and_invalid_envelopes_are_ignored() {
        let cache = ReplayCache::new();
        cache.cache_envelope_json("");
        cache.cache_envelope_json("not json");
        cache.cache_envelope_json(&envelope("some_future_type", 1));
        let snapshot = cache.snapshot();
        assert!(snapshot.hello_ack_envelope_json.is_none());
        assert!(snapshot.recent_event_envelope_jsons.is_empty());
    }

    #[test]
    fn scalar_slots_cache_latest_values() {
        let cache = ReplayCache::new();
        cache.cache_pipe_status("down", "IPC disconnected");
        cache.cache_pipe_status("ok", "IPC connected");
        cache.cache_scene_snapshot(r#"{"sceneNames":[]}"#);
        cache.cache_current_scene("Main");
        cache.cache_scene_switch_completed(r#"{"ok":true}"#);
        cache.cache_dock_action_result(r#"{"status":"queued"}"#);

        let snapshot = cache.snapshot();
        assert_eq!(
            snapshot.pipe_status,
            Some(("ok".to_string(), "IPC connected".to_string()))
        );
        assert_eq!(snapshot.current_scene.as_deref(), Some("Main"));
        assert!(snapshot.scene_switch_completed_json.is_some());
        assert!(snapshot.dock_action_result_json.is_some());
    }

    #[test]
    fn clear_empties_every_slot() {
        let cache = ReplayCache::new();
        cache.cache_pipe_status("ok", "");
        cache.cache_envelope_json(&envelope("status_snapshot", 1));
        cache.cache_envelope_json(&envelope("user_notice", 2));
        cache.clear();
        let snapshot = cache.snapshot();
        assert!(snapshot.pipe_status.is_none());
        assert!(snapshot.status_snapshot_envelope_json.is_none());
        assert!(snapshot.recent_event_envelope_jsons.is_empty());
    }
}
