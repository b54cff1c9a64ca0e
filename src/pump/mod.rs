use std::sync::Mutex;

/// Deferred scene switches drain when at least this much tick time passed.
pub const SWITCH_DRAIN_INTERVAL_SECONDS: f32 = 0.05;
/// The host theme is polled on this cadence.
pub const THEME_POLL_INTERVAL_SECONDS: f32 = 0.5;

/// A scene switch deferred onto the host UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSwitchRequest {
    pub request_id: String,
    pub scene_name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
struct TickAccumulators {
    switch_seconds: f32,
    theme_seconds: f32,
}

/// Work the current tick is due to perform.
#[derive(Debug, Default)]
pub struct TickWork {
    pub switches: Vec<PendingSwitchRequest>,
    pub theme_poll_due: bool,
}

/// Accumulates per-frame tick time and hands out due work. Enqueue is safe
/// from any thread; `advance` runs only on the host UI thread.
#[derive(Debug, Default)]
pub struct ScenePump {
    pending: Mutex<Vec<PendingSwitchRequest>>,
    accumulators: Mutex<TickAccumulators>,
}

impl ScenePump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, request_id: &str, scene_name: &str, reason: &str) {
        self.pending.lock().unwrap().push(PendingSwitchRequest {
            request_id: request_id.to_string(),
            scene_name: scene_name.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Advances both accumulators and returns the work now due. The switch
    /// FIFO is swapped out whole, so requests enqueued mid-drain surface on
    /// the next due tick.
    pub fn advance(&self, elapsed_seconds: f32) -> TickWork {
        let mut work = TickWork::default();
        let mut accumulators = self.accumulators.lock().unwrap();
        if elapsed_seconds > 0.0 {
            accumulators.switch_seconds += elapsed_seconds;
            accumulators.theme_seconds += elapsed_seconds;
        }
        if accumulators.theme_seconds >= THEME_POLL_INTERVAL_SECONDS {
            accumulators.theme_seconds = 0.0;
            work.theme_poll_due = true;
        }
        if accumulators.switch_seconds >= SWITCH_DRAIN_INTERVAL_SECONDS {
            accumulators.switch_seconds = 0.0;
            work.switches = std::mem::take(&mut *self.pending.lock().unwrap());
        }
        work
    }

    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
        *self.accumulators.lock().unwrap() = TickAccumulators::default();
    }
}
