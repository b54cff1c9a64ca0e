use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// One queued `scene_switch_result`, kept in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSwitchResultEntry {
    pub request_id: String,
    pub ok: bool,
    pub error: String,
}

/// Outbound send queues. Enqueue is safe from any thread; drains happen only
/// on the IPC worker, which swaps a queue out under its lock and re-prepends
/// the unsent tail if a send fails mid-batch.
#[derive(Debug, Default)]
pub struct OutboundQueues {
    set_modes: Mutex<Vec<String>>,
    set_settings: Mutex<Vec<(String, bool)>>,
    scene_results: Mutex<Vec<SceneSwitchResultEntry>>,
    shutdown_notices: Mutex<Vec<String>>,
    pending_request_status: AtomicBool,
}

impl OutboundQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_request_status(&self) {
        let was_pending = self.pending_request_status.swap(true, Ordering::SeqCst);
        if !was_pending {
            tracing::debug!("queued request_status");
        }
    }

    /// Consumes the pending-refresh flag, returning whether it was set.
    pub fn take_request_status(&self) -> bool {
        self.pending_request_status.swap(false, Ordering::SeqCst)
    }

    pub fn clear_request_status(&self) {
        self.pending_request_status.store(false, Ordering::SeqCst);
    }

    /// Latest-wins: a newer mode replaces anything still queued.
    pub fn queue_set_mode(&self, mode: &str) {
        if mode.is_empty() {
            tracing::warn!("queue_set_mode ignored empty mode");
            return;
        }
        let replaced = {
            let mut pending = self.set_modes.lock().unwrap();
            let replaced = !pending.is_empty();
            pending.clear();
            pending.push(mode.to_string());
            replaced
        };
        tracing::debug!(mode, coalesced = replaced, "queued set_mode_request");
    }

    /// Per-key latest-wins: an existing entry for the key is updated in place.
    pub fn queue_set_setting(&self, key: &str, value: bool) {
        if key.is_empty() {
            tracing::warn!("queue_set_setting ignored empty key");
            return;
        }
        let replaced = {
            let mut pending = self.set_settings.lock().unwrap();
            match pending.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => {
                    entry.1 = value;
                    true
                }
                None => {
                    pending.push((key.to_string(), value));
                    false
                }
            }
        };
        tracing::debug!(key, value, coalesced = replaced, "queued set_setting_request");
    }

    pub fn queue_scene_switch_result(&self, request_id: &str, ok: bool, error: &str) {
        if request_id.is_empty() {
            tracing::warn!("queue_scene_switch_result ignored empty request_id");
            return;
        }
        self.scene_results
            .lock()
            .unwrap()
            .push(SceneSwitchResultEntry {
                request_id: request_id.to_string(),
                ok,
                error: error.to_string(),
            });
        tracing::debug!(request_id, ok, error, "queued scene_switch_result");
    }

    pub fn queue_shutdown_notice(&self, reason: &str) {
        let reason = if reason.is_empty() {
            "obs_module_unload"
        } else {
            reason
        };
        self.shutdown_notices.lock().unwrap().push(reason.to_string());
        tracing::debug!(reason, "queued obs_shutdown_notice");
    }

    pub fn take_set_modes(&self) -> Vec<String> {
        std::mem::take(&mut *self.set_modes.lock().unwrap())
    }

    pub fn take_set_settings(&self) -> Vec<(String, bool)> {
        std::mem::take(&mut *self.set_settings.lock().unwrap())
    }

    pub fn take_scene_results(&self) -> Vec<SceneSwitchResultEntry> {
        std::mem::take(&mut *self.scene_results.lock().unwrap())
    }

    pub fn take_shutdown_notices(&self) -> Vec<String> {
        std::mem::take(&mut *self.shutdown_notices.lock().unwrap())
    }

    /// Re-prepends the unsent tail of a failed drain, preserving order ahead
    /// of anything enqueued while the drain was in flight.
    pub fn requeue_set_modes(&self, unsent: Vec<String>) {
        if !unsent.is_empty() {
            let mut pending = self.set_modes.lock().unwrap();
            pending.splice(0..0, unsent);
        }
    }

    pub fn requeue_set_settings(&self, unsent: Vec<(String, bool)>) {
        if !unsent.is_empty() {
            let mut pending = self.set_settings.lock().unwrap();
            pending.splice(0..0, unsent);
        }
    }

    pub fn requeue_scene_results(&self, unsent: Vec<SceneSwitchResultEntry>) {
        if !unsent.is_empty() {
            let mut pending = self.scene_results.lock().unwrap();
            pending.splice(0..0, unsent);
        }
    }

    pub fn requeue_shutdown_notices(&self, unsent: Vec<String>) {
        if !unsent.is_empty() {
            let mut pending = self.shutdown_notices.lock().unwrap();
            pending.splice(0..0, unsent);
        }
    }

    /// Drops everything; used on stop.
    pub fn clear(&self) {
        self.set_modes.lock().unwrap().clear();
        self.set_settings.lock().unwrap().clear();
        self.scene_results.lock().unwrap().clear();
        self.shutdown_notices.lock().unwrap().clear();
        self.clear_request_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_mode_is_latest_wins() {
        let queues = OutboundQueues::new();
        queues.queue_set_mode("studio");
        queues.queue_set_mode("irl");
        assert_eq!(queues.take_set_modes(), vec!["irl".to_string()]);
        assert!(queues.take_set_modes().is_empty());
    }

    #[test]
    fn set_setting_coalesces_per_key() {
        let queues = OutboundQueues::new();
        queues.queue_set_setting("alerts", false);
        queues.queue_set_setting("chat_bot", true);
        queues.queue_set_setting("alerts", true);
        assert_eq!(
            queues.take_set_settings(),
            vec![("alerts".to_string(), true), ("chat_bot".to_string(), true)]
        );
    }

    #[test]
    fn scene_results_preserve_order_without_coalescing() {
        let queues = OutboundQueues::new();
        queues.queue_scene_switch_result("r1", true, "");
        queues.queue_scene_switch_result("r1", false, "scene_not_found");
        queues.queue_scene_switch_result("r2", true, "");
        let drained = queues.take_scene_results();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].request_id, "r1");
        assert!(drained[0].ok);
        assert_eq!(drained[1].error, "scene_not_found");
        assert_eq!(drained[2].request_id, "r2");
    }

    #[test]
    fn failed_tail_is_reinserted_ahead_of_new_entries() {
        let queues = OutboundQueues::new();
        queues.queue_scene_switch_result("r1", true, "");
        queues.queue_scene_switch_result("r2", true, "");
        queues.queue_scene_switch_result("r3", true, "");

        let mut batch = queues.take_scene_results();
        // Position 1 was sent; the session died before position 2.
        let unsent = batch.split_off(1);
        queues.queue_scene_switch_result("r4", true, "");
        queues.requeue_scene_results(unsent);

        let next: Vec<String> = queues
            .take_scene_results()
            .into_iter()
            .map(|e| e.request_id)
            .collect();
        assert_eq!(next, vec!["r2", "r3", "r4"]);
    }

    #[test]
    fn request_status_flag_is_idempotent() {
        let queues = OutboundQueues::new();
        queues.queue_request_status();
        queues.queue_request_status();
        assert!(queues.take_request_status());
        assert!(!queues.take_request_status());
    }

    #[test]
    fn empty_inputs_are_ignored() {
        let queues = OutboundQueues::new();
        queues.queue_set_mode("");
        queues.queue_set_setting("", true);
        queues.queue_scene_switch_result("", true, "");
        assert!(queues.take_set_modes().is_empty());
        assert!(queues.take_set_settings().is_empty());
        assert!(queues.take_scene_results().is_empty());
    }

    #[test]
    fn shutdown_notice_defaults_reason_and_clears() {
        let queues = OutboundQueues::new();
        queues.queue_shutdown_notice("");
        assert_eq!(
            queues.take_shutdown_notices(),
            vec!["obs_module_unload".to_string()]
        );

        queues.queue_shutdown_notice("exit");
        queues.queue_request_status();
        queues.clear();
        assert!(queues.take_shutdown_notices().is_empty());
        assert!(!queues.take_request_status());
    }
}
