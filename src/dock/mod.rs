use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::protocol::now_unix_ms;

#[cfg(not(test))]
pub const ACTION_COMPLETION_TIMEOUT: Duration = Duration::from_millis(3000);
#[cfg(test)]
pub const ACTION_COMPLETION_TIMEOUT: Duration = Duration::from_millis(300);

#[cfg(not(test))]
pub const ACTION_DEDUPE_WINDOW: Duration = Duration::from_millis(1500);
#[cfg(test)]
pub const ACTION_DEDUPE_WINDOW: Duration = Duration::from_millis(150);

pub const RECOGNIZED_MODES: [&str; 2] = ["studio", "irl"];
pub const RECOGNIZED_SETTING_KEYS: [&str; 5] = [
    "auto_scene_switch",
    "low_quality_fallback",
    "manual_override",
    "chat_bot",
    "alerts",
];

pub fn is_recognized_mode(mode: &str) -> bool {
    RECOGNIZED_MODES.contains(&mode)
}

pub fn is_recognized_setting_key(key: &str) -> bool {
    RECOGNIZED_SETTING_KEYS.contains(&key)
}

/// Lifecycle report for one dock action, delivered to the UI as JSON via
/// `receiveDockActionResultJson`.
#[derive(Debug, Clone, Serialize)]
pub struct DockActionResult {
    #[serde(rename = "actionType")]
    pub action_type: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    pub status: String,
    pub ok: bool,
    pub error: Option<String>,
    pub detail: Option<String>,
}

fn nonempty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

impl DockActionResult {
    pub fn new(
        action_type: &str,
        request_id: &str,
        status: &str,
        ok: bool,
        error: &str,
        detail: &str,
    ) -> Self {
        Self {
            action_type: nonempty(action_type),
            request_id: nonempty(request_id),
            status: if status.is_empty() {
                "unknown".to_string()
            } else {
                status.to_string()
            },
            ok,
            error: nonempty(error),
            detail: nonempty(detail),
        }
    }

    pub fn rejected(action_type: &str, request_id: &str, error: &str, detail: &str) -> Self {
        Self::new(action_type, request_id, "rejected", false, error, detail)
    }

    pub fn queued(action_type: &str, request_id: &str, detail: &str) -> Self {
        Self::new(action_type, request_id, "queued", true, "", detail)
    }

    pub fn completed(action_type: &str, request_id: &str, detail: &str) -> Self {
        Self::new(action_type, request_id, "completed", true, "", detail)
    }

    pub fn failed(action_type: &str, request_id: &str, error: &str, detail: &str) -> Self {
        Self::new(action_type, request_id, "failed", false, error, detail)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Side effect the caller must apply for an accepted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockActionEffect {
    QueueSwitchScene { request_id: String, scene_name: String },
    QueueRequestStatus,
    QueueSetMode { mode: String },
    QueueSetSetting { key: String, value: bool },
}

#[derive(Debug)]
pub struct DockActionSubmission {
    pub accepted: bool,
    /// Absent for deduplicated submissions, which are silently accepted.
    pub result: Option<DockActionResult>,
    pub effect: Option<DockActionEffect>,
}

impl DockActionSubmission {
    fn rejected(result: DockActionResult) -> Self {
        Self {
            accepted: false,
            result: Some(result),
            effect: None,
        }
    }

    fn deduplicated() -> Self {
        Self {
            accepted: true,
            result: None,
            effect: None,
        }
    }

    fn queued(result: DockActionResult, effect: DockActionEffect) -> Self {
        Self {
            accepted: true,
            result: Some(result),
            effect: Some(effect),
        }
    }
}

/// Recognized keys of the UI action object; everything else is ignored.
#[derive(Debug, Default, Deserialize)]
struct RawDockAction {
    #[serde(rename = "type")]
    action_type: Option<String>,
    #[serde(rename = "requestId", alias = "request_id")]
    request_id: Option<String>,
    #[serde(rename = "sceneName", alias = "scene_name")]
    scene_name: Option<String>,
    mode: Option<String>,
    key: Option<String>,
    value: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct PendingSetModeAction {
    request_id: String,
    mode: String,
    queued_at: Instant,
}

#[derive(Debug, Clone)]
struct PendingSetSettingAction {
    request_id: String,
    key: String,
    value: bool,
    queued_at: Instant,
}

/// View of an inbound `status_snapshot` envelope, used to corroborate pending
/// mode/setting actions.
#[derive(Debug, Default, Deserialize)]
pub struct StatusSnapshotProjection {
    pub mode: Option<String>,
    #[serde(default)]
    pub settings: Option<StatusSnapshotSettings>,
}

impl StatusSnapshotProjection {
    pub fn setting(&self, key: &str) -> Option<bool> {
        self.settings.as_ref().and_then(|s| s.get(key))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusSnapshotSettings {
    pub auto_scene_switch: Option<bool>,
    pub low_quality_fallback: Option<bool>,
    pub manual_override: Option<bool>,
    pub chat_bot: Option<bool>,
    pub alerts: Option<bool>,
}

impl StatusSnapshotSettings {
    fn get(&self, key: &str) -> Option<bool> {
        match key {
            "auto_scene_switch" => self.auto_scene_switch,
            "low_quality_fallback" => self.low_quality_fallback,
            "manual_override" => self.manual_override,
            "chat_bot" => self.chat_bot,
            "alerts" => self.alerts,
            _ => None,
        }
    }
}

/// Parses the JSON view of an envelope into a snapshot projection. Returns
/// `None` unless the envelope is a `status_snapshot` with a non-empty payload.
pub fn project_status_snapshot(envelope_json: &str) -> Option<StatusSnapshotProjection> {
    let envelope: serde_json::Value = serde_json::from_str(envelope_json).ok()?;
    if envelope.get("type").and_then(|t| t.as_str()) != Some("status_snapshot") {
        return None;
    }
    let payload = envelope.get("payload")?.as_object()?;
    if payload.is_empty() {
        return None;
    }
    serde_json::from_value(serde_json::Value::Object(payload.clone())).ok()
}

/// Dock action intake: parses and validates UI action JSON, deduplicates
/// repeats, and tracks the bookkeeping used to resolve completions from
/// later status snapshots.
#[derive(Debug, Default)]
pub struct DockActionIntake {
    recent_actions: Mutex<HashMap<String, Instant>>,
    local_action_seq: AtomicU64,
    pending_request_status_ids: Mutex<Vec<String>>,
    pending_set_modes: Mutex<Vec<PendingSetModeAction>>,
    pending_set_settings: Mutex<Vec<PendingSetSettingAction>>,
}

impl DockActionIntake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, action_json: &str) -> DockActionSubmission {
        self.submit_at(action_json, Instant::now())
    }

    fn submit_at(&self, action_json: &str, now: Instant) -> DockActionSubmission {
        if action_json.is_empty() {
            return DockActionSubmission::rejected(DockActionResult::rejected(
                "",
                "",
                "empty_action_json",
                "",
            ));
        }

        let raw: RawDockAction = match serde_json::from_str(action_json) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "dock action parse rejected");
                return DockActionSubmission::rejected(DockActionResult::rejected(
                    "",
                    "",
                    "missing_action_type",
                    "",
                ));
            }
        };

        let action_type = raw.action_type.unwrap_or_default();
        if action_type.is_empty() {
            tracing::warn!("dock action rejected: missing type");
            return DockActionSubmission::rejected(DockActionResult::rejected(
                "",
                "",
                "missing_action_type",
                "",
            ));
        }

        let request_id = match raw.request_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => self.next_local_request_id(),
        };
        tracing::info!(
            action_type = %action_type,
            request_id = %request_id,
            bytes = action_json.len(),
            "dock action parsed"
        );

        if self.should_deduplicate_at(&action_type, &request_id, now) {
            tracing::debug!(
                action_type = %action_type,
                request_id = %request_id,
                "dock action deduplicated"
            );
            return DockActionSubmission::deduplicated();
        }

        match action_type.as_str() {
            "switch_scene" => {
                let scene_name = raw.scene_name.unwrap_or_default();
                if scene_name.is_empty() {
                    tracing::warn!(request_id = %request_id, "dock switch_scene missing scene name");
                    return DockActionSubmission::rejected(DockActionResult::rejected(
                        &action_type,
                        &request_id,
                        "missing_scene_name",
                        "",
                    ));
                }
                DockActionSubmission::queued(
                    DockActionResult::queued(&action_type, &request_id, "queued_for_obs_thread"),
                    DockActionEffect::QueueSwitchScene {
                        request_id,
                        scene_name,
                    },
                )
            }
            "request_status" => {
                self.pending_request_status_ids
                    .lock()
                    .unwrap()
                    .push(request_id.clone());
                DockActionSubmission::queued(
                    DockActionResult::queued(&action_type, &request_id, "queued_request_status"),
                    DockActionEffect::QueueRequestStatus,
                )
            }
            "set_mode" => {
                let mode = raw.mode.unwrap_or_default();
                if !is_recognized_mode(&mode) {
                    tracing::warn!(request_id = %request_id, mode = %mode, "dock set_mode rejected");
                    return DockActionSubmission::rejected(DockActionResult::rejected(
                        &action_type,
                        &request_id,
                        "invalid_mode",
                        "",
                    ));
                }
                self.pending_set_modes
                    .lock()
                    .unwrap()
                    .push(PendingSetModeAction {
                        request_id: request_id.clone(),
                        mode: mode.clone(),
                        queued_at: now,
                    });
                DockActionSubmission::queued(
                    DockActionResult::queued(&action_type, &request_id, "queued_core_ipc"),
                    DockActionEffect::QueueSetMode { mode },
                )
            }
            "set_setting" => {
                let key = raw.key.unwrap_or_default();
                if key.is_empty() {
                    return DockActionSubmission::rejected(DockActionResult::rejected(
                        &action_type,
                        &request_id,
                        "missing_setting_key",
                        "",
                    ));
                }
                let Some(value) = raw.value.as_ref().and_then(|v| v.as_bool()) else {
                    return DockActionSubmission::rejected(DockActionResult::rejected(
                        &action_type,
                        &request_id,
                        "missing_setting_value",
                        "",
                    ));
                };
                if !is_recognized_setting_key(&key) {
                    tracing::warn!(request_id = %request_id, key = %key, "dock set_setting rejected");
                    return DockActionSubmission::rejected(DockActionResult::rejected(
                        &action_type,
                        &request_id,
                        "unsupported_setting_key",
                        &key,
                    ));
                }
                self.pending_set_settings
                    .lock()
                    .unwrap()
                    .push(PendingSetSettingAction {
                        request_id: request_id.clone(),
                        key: key.clone(),
                        value,
                        queued_at: now,
                    });
                DockActionSubmission::queued(
                    DockActionResult::queued(&action_type, &request_id, "queued_core_ipc"),
                    DockActionEffect::QueueSetSetting { key, value },
                )
            }
            _ => {
                tracing::info!(
                    action_type = %action_type,
                    request_id = %request_id,
                    "dock action rejected: unsupported type"
                );
                DockActionSubmission::rejected(DockActionResult::rejected(
                    &action_type,
                    &request_id,
                    "unsupported_action_type",
                    "",
                ))
            }
        }
    }

    fn next_local_request_id(&self) -> String {
        let seq = self.local_action_seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("dock_{}_{}", now_unix_ms(), seq)
    }

    fn should_deduplicate_at(&self, action_type: &str, request_id: &str, now: Instant) -> bool {
        let dedupe_key = format!("{action_type}|{request_id}");
        let mut recent = self.recent_actions.lock().unwrap();
        recent.retain(|_, seen_at| now.duration_since(*seen_at) <= ACTION_DEDUPE_WINDOW);
        if recent.contains_key(&dedupe_key) {
            return true;
        }
        recent.insert(dedupe_key, now);
        false
    }

    /// Removes every pending mode/setting entry the snapshot corroborates and
    /// returns their `completed` results.
    pub fn resolve_completions(&self, snapshot: &StatusSnapshotProjection) -> Vec<DockActionResult> {
        let mut results = Vec::new();
        {
            let mut pending = self.pending_set_modes.lock().unwrap();
            pending.retain(|entry| {
                let done = snapshot.mode.as_deref() == Some(entry.mode.as_str());
                if done {
                    results.push(DockActionResult::completed(
                        "set_mode",
                        &entry.request_id,
                        "status_snapshot_applied",
                    ));
                }
                !done
            });
        }
        {
            let mut pending = self.pending_set_settings.lock().unwrap();
            pending.retain(|entry| {
                let done = snapshot.setting(&entry.key) == Some(entry.value);
                if done {
                    results.push(DockActionResult::completed(
                        "set_setting",
                        &entry.request_id,
                        "status_snapshot_applied",
                    ));
                }
                !done
            });
        }
        results
    }

    /// Pops the oldest pending `request_status` action id, completed by the
    /// arrival of any status snapshot.
    pub fn take_request_status_completion(&self) -> Option<DockActionResult> {
        let mut pending = self.pending_request_status_ids.lock().unwrap();
        if pending.is_empty() {
            return None;
        }
        let request_id = pending.remove(0);
        Some(DockActionResult::completed(
            "request_status",
            &request_id,
            "status_snapshot_received",
        ))
    }

    /// Removes pending mode/setting entries older than the completion timeout
    /// and returns their `failed` results. Runs once per UI tick.
    pub fn drain_expired(&self, now: Instant) -> Vec<DockActionResult> {
        let mut results = Vec::new();
        {
            let mut pending = self.pending_set_modes.lock().unwrap();
            pending.retain(|entry| {
                let expired = now.duration_since(entry.queued_at) >= ACTION_COMPLETION_TIMEOUT;
                if expired {
                    results.push(DockActionResult::failed(
                        "set_mode",
                        &entry.request_id,
                        "completion_timeout",
                        "status_snapshot_not_observed",
                    ));
                }
                !expired
            });
        }
        {
            let mut pending = self.pending_set_settings.lock().unwrap();
            pending.retain(|entry| {
                let expired = now.duration_since(entry.queued_at) >= ACTION_COMPLETION_TIMEOUT;
                if expired {
                    results.push(DockActionResult::failed(
                        "set_setting",
                        &entry.request_id,
                        "completion_timeout",
                        "status_snapshot_not_observed",
                    ));
                }
                !expired
            });
        }
        results
    }

    /// Drops every pending record and the dedupe window; used on stop.
    pub fn clear(&self) {
        self.recent_actions.lock().unwrap().clear();
        self.pending_request_status_ids.lock().unwrap().clear();
        self.pending_set_modes.lock().unwrap().clear();
        self.pending_set_settings.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_json(mode: &str, settings: serde_json::Value) -> String {
        serde_json::json!({
            "v": 1,
            "id": "t1",
            "ts_unix_ms": 1,
            "type": "status_snapshot",
            "priority": "normal",
            "payload": { "mode": mode, "settings": settings },
        })
        .to_string()
    }

    #[test]
    fn empty_and_typeless_actions_are_rejected() {
        let intake = DockActionIntake::new();

        let sub = intake.submit("");
        assert!(!sub.accepted);
        assert_eq!(sub.result.unwrap().error.as_deref(), Some("empty_action_json"));

        let sub = intake.submit("not json at all");
        assert!(!sub.accepted);
        assert_eq!(
            sub.result.unwrap().error.as_deref(),
            Some("missing_action_type")
        );

        let sub = intake.submit(r#"{"requestId":"a1"}"#);
        assert!(!sub.accepted);
        assert_eq!(
            sub.result.unwrap().error.as_deref(),
            Some("missing_action_type")
        );
    }

    #[test]
    fn switch_scene_requires_scene_name() {
        let intake = DockActionIntake::new();
        let sub = intake.submit(r#"{"type":"switch_scene","requestId":"a1"}"#);
        assert!(!sub.accepted);
        let result = sub.result.unwrap();
        assert_eq!(result.status, "rejected");
        assert_eq!(result.error.as_deref(), Some("missing_scene_name"));
    }

    #[test]
    fn switch_scene_accepts_both_scene_name_spellings() {
        let intake = DockActionIntake::new();
        let sub = intake.submit(r#"{"type":"switch_scene","requestId":"a1","sceneName":"BRB"}"#);
        assert_eq!(
            sub.effect,
            Some(DockActionEffect::QueueSwitchScene {
                request_id: "a1".to_string(),
                scene_name: "BRB".to_string(),
            })
        );
        let result = sub.result.unwrap();
        assert_eq!(result.status, "queued");
        assert!(result.ok);
        assert_eq!(result.detail.as_deref(), Some("queued_for_obs_thread"));

        let sub =
            intake.submit(r#"{"type":"switch_scene","request_id":"a2","scene_name":"Main"}"#);
        assert_eq!(
            sub.effect,
            Some(DockActionEffect::QueueSwitchScene {
                request_id: "a2".to_string(),
                scene_name: "Main".to_string(),
            })
        );
    }

    #[test]
    fn missing_request_id_synthesizes_local_id() {
        let intake = DockActionIntake::new();
        let sub = intake.submit(r#"{"type":"request_status"}"#);
        let result = sub.result.unwrap();
        let id = result.request_id.unwrap();
        assert!(id.starts_with("dock_"), "unexpected id {id}");

        let sub = intake.submit(r#"{"type":"request_status"}"#);
        let second = sub.result.unwrap().request_id.unwrap();
        assert_ne!(id, second);
    }

    #[test]
    fn set_mode_validates_mode() {
        let intake = DockActionIntake::new();
        let sub = intake.submit(r#"{"type":"set_mode","requestId":"a1","mode":"irl"}"#);
        assert_eq!(
            sub.effect,
            Some(DockActionEffect::QueueSetMode {
                mode: "irl".to_string()
            })
        );
        assert_eq!(sub.result.unwrap().detail.as_deref(), Some("queued_core_ipc"));

        let sub = intake.submit(r#"{"type":"set_mode","requestId":"a2","mode":"party"}"#);
        assert!(!sub.accepted);
        assert_eq!(sub.result.unwrap().error.as_deref(), Some("invalid_mode"));
    }

    #[test]
    fn set_setting_validates_key_and_value() {
        let intake = DockActionIntake::new();

        let sub = intake.submit(r#"{"type":"set_setting","requestId":"a1","value":true}"#);
        assert_eq!(
            sub.result.unwrap().error.as_deref(),
            Some("missing_setting_key")
        );

        let sub = intake.submit(r#"{"type":"set_setting","requestId":"a2","key":"alerts"}"#);
        assert_eq!(
            sub.result.unwrap().error.as_deref(),
            Some("missing_setting_value")
        );

        let sub =
            intake.submit(r#"{"type":"set_setting","requestId":"a3","key":"alerts","value":1}"#);
        assert_eq!(
            sub.result.unwrap().error.as_deref(),
            Some("missing_setting_value")
        );

        let sub = intake
            .submit(r#"{"type":"set_setting","requestId":"a4","key":"volume","value":true}"#);
        let result = sub.result.unwrap();
        assert_eq!(result.error.as_deref(), Some("unsupported_setting_key"));
        assert_eq!(result.detail.as_deref(), Some("volume"));

        let sub = intake
            .submit(r#"{"type":"set_setting","requestId":"a5","key":"alerts","value":true}"#);
        assert_eq!(
            sub.effect,
            Some(DockActionEffect::QueueSetSetting {
                key: "alerts".to_string(),
                value: true,
            })
        );
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        let intake = DockActionIntake::new();
        let sub = intake.submit(r#"{"type":"reboot","requestId":"a1"}"#);
        assert!(!sub.accepted);
        assert_eq!(
            sub.result.unwrap().error.as_deref(),
            Some("unsupported_action_type")
        );
    }

    #[test]
    fn duplicate_within_window_is_silently_accepted() {
        let intake = DockActionIntake::new();
        let action = r#"{"type":"set_mode","requestId":"a1","mode":"irl"}"#;
        let now = Instant::now();

        let sub = intake.submit_at(action, now);
        assert!(sub.accepted);
        assert!(sub.effect.is_some());

        let dup = intake.submit_at(action, now + Duration::from_millis(10));
        assert!(dup.accepted);
        assert!(dup.result.is_none());
        assert!(dup.effect.is_none());

        // Outside the window the same id dispatches again.
        let later = intake.submit_at(action, now + ACTION_DEDUPE_WINDOW + Duration::from_millis(10));
        assert!(later.effect.is_some());
    }

    #[test]
    fn same_request_id_different_type_is_not_a_duplicate() {
        let intake = DockActionIntake::new();
        let now = Instant::now();
        let first = intake.submit_at(r#"{"type":"request_status","requestId":"a1"}"#, now);
        assert!(first.effect.is_some());
        let second = intake.submit_at(
            r#"{"type":"set_mode","requestId":"a1","mode":"irl"}"#,
            now + Duration::from_millis(5),
        );
        assert!(second.effect.is_some());
    }

    #[test]
    fn snapshot_resolves_matching_mode_and_setting() {
        let intake = DockActionIntake::new();
        intake.submit(r#"{"type":"set_mode","requestId":"m1","mode":"irl"}"#);
        intake.submit(r#"{"type":"set_setting","requestId":"s1","key":"alerts","value":true}"#);
        intake.submit(
            r#"{"type":"set_setting","requestId":"s2","key":"chat_bot","value":true}"#,
        );

        let json = snapshot_json("irl", serde_json::json!({ "alerts": true }));
        let projection = project_status_snapshot(&json).unwrap();
        let mut results = intake.resolve_completions(&projection);
        results.sort_by(|a, b| a.request_id.cmp(&b.request_id));

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].request_id.as_deref(), Some("m1"));
        assert_eq!(results[0].status, "completed");
        assert_eq!(results[0].detail.as_deref(), Some("status_snapshot_applied"));
        assert_eq!(results[1].request_id.as_deref(), Some("s1"));

        // chat_bot stays pending: the snapshot said nothing about it.
        let json = snapshot_json("irl", serde_json::json!({ "chat_bot": false }));
        let projection = project_status_snapshot(&json).unwrap();
        assert!(intake.resolve_completions(&projection).is_empty());

        let json = snapshot_json("irl", serde_json::json!({ "chat_bot": true }));
        let projection = project_status_snapshot(&json).unwrap();
        let results = intake.resolve_completions(&projection);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].request_id.as_deref(), Some("s2"));
    }

    #[test]
    fn request_status_completions_pop_fifo() {
        let intake = DockActionIntake::new();
        intake.submit(r#"{"type":"request_status","requestId":"q1"}"#);
        intake.submit(r#"{"type":"request_status","requestId":"q2"}"#);

        let first = intake.take_request_status_completion().unwrap();
        assert_eq!(first.request_id.as_deref(), Some("q1"));
        assert_eq!(first.detail.as_deref(), Some("status_snapshot_received"));
        let second = intake.take_request_status_completion().unwrap();
        assert_eq!(second.request_id.as_deref(), Some("q2"));
        assert!(intake.take_request_status_completion().is_none());
    }

    #[test]
    fn expired_pending_actions_fail_with_completion_timeout() {
        let intake = DockActionIntake::new();
        let now = Instant::now();
        intake.submit_at(r#"{"type":"set_mode","requestId":"m1","mode":"studio"}"#, now);
        intake.submit_at(
            r#"{"type":"set_setting","requestId":"s1","key":"alerts","value":true}"#,
            now,
        );

        assert!(intake
            .drain_expired(now + ACTION_COMPLETION_TIMEOUT - Duration::from_millis(10))
            .is_empty());

        let mut results = intake.drain_expired(now + ACTION_COMPLETION_TIMEOUT);
        results.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.status, "failed");
            assert!(!result.ok);
            assert_eq!(result.error.as_deref(), Some("completion_timeout"));
            assert_eq!(
                result.detail.as_deref(),
                Some("status_snapshot_not_observed")
            );
        }

        // Nothing left to expire or resolve.
        assert!(intake
            .drain_expired(now + ACTION_COMPLETION_TIMEOUT * 2)
            .is_empty());
    }

    #[test]
    fn projection_requires_status_snapshot_with_payload() {
        assert!(project_status_snapshot("not json").is_none());
        assert!(project_status_snapshot(r#"{"type":"pong","payload":{}}"#).is_none());
        assert!(
            project_status_snapshot(r#"{"type":"status_snapshot","payload":{}}"#).is_none()
        );
        let projection =
            project_status_snapshot(r#"{"type":"status_snapshot","payload":{"mode":"irl"}}"#)
                .unwrap();
        assert_eq!(projection.mode.as_deref(), Some("irl"));
    }

    #[test]
    fn action_result_json_uses_nulls_for_absent_fields() {
        let result = DockActionResult::rejected("", "", "missing_action_type", "");
        let parsed: serde_json::Value = serde_json::from_str(&result.to_json()).unwrap();
        assert!(parsed["actionType"].is_null());
        assert!(parsed["requestId"].is_null());
        assert_eq!(parsed["status"], "rejected");
        assert_eq!(parsed["ok"], false);
        assert_eq!(parsed["error"], "missing_action_type");
        assert!(parsed["detail"].is_null());
    }

    #[test]
    fn clear_drops_pending_state() {
        let intake = DockActionIntake::new();
        intake.submit(r#"{"type":"request_status","requestId":"q1"}"#);
        intake.submit(r#"{"type":"set_mode","requestId":"m1","mode":"irl"}"#);
        intake.clear();
        assert!(intake.take_request_status_completion().is_none());
        assert!(intake
            .drain_expired(Instant::now() + ACTION_COMPLETION_TIMEOUT * 2)
            .is_empty());
    }
}
