use crate::channel::{Connector, CMD_CHANNEL_NAME, EVT_CHANNEL_NAME};
use crate::codec;
use crate::protocol;
use crate::queues::OutboundQueues;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

#[cfg(not(test))]
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(250);
#[cfg(test)]
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(25);

#[cfg(not(test))]
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);
#[cfg(test)]
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(not(test))]
const RECONNECT_BACKOFF: Duration = Duration::from_millis(250);
#[cfg(test)]
const RECONNECT_BACKOFF: Duration = Duration::from_millis(25);

// Backoff sleeps are sliced so stop() stays responsive.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

// A stopping worker normally exits within the poll grain; past this the
// channel is considered wedged mid-frame and the task is cancelled outright.
const STOP_JOIN_GRACE: Duration = Duration::from_secs(1);

pub type PipeStateFn = Arc<dyn Fn(bool) + Send + Sync>;
pub type MessageTypeFn = Arc<dyn Fn(&str) + Send + Sync>;
pub type IncomingEnvelopeJsonFn = Arc<dyn Fn(&str) + Send + Sync>;
pub type SwitchSceneRequestFn = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Observers invoked by the IPC worker. All callbacks run on the worker task;
/// one frame's callbacks complete before the next frame is read.
#[derive(Default, Clone)]
pub struct IpcCallbacks {
    pub on_pipe_state: Option<PipeStateFn>,
    pub on_message_type: Option<MessageTypeFn>,
    pub on_incoming_envelope_json: Option<IncomingEnvelopeJsonFn>,
    pub on_switch_scene_request: Option<SwitchSceneRequestFn>,
}

pub(crate) struct SessionShared {
    running: AtomicBool,
    auto_ack_switch_scene: AtomicBool,
    queues: OutboundQueues,
    callbacks: Mutex<IpcCallbacks>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            auto_ack_switch_scene: AtomicBool::new(true),
            queues: OutboundQueues::new(),
            callbacks: Mutex::new(IpcCallbacks::default()),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn auto_ack(&self) -> bool {
        self.auto_ack_switch_scene.load(Ordering::SeqCst)
    }

    fn callbacks(&self) -> IpcCallbacks {
        self.callbacks.lock().unwrap().clone()
    }

    fn notify_pipe_state(&self, connected: bool) {
        if let Some(cb) = &self.callbacks().on_pipe_state {
            cb(connected);
        }
    }
}

/// Session supervisor: owns the single IPC worker that connects the channel
/// pair, performs the handshake, drains send queues, heartbeats and
/// dispatches inbound envelopes, reconnecting on any failure.
pub struct IpcClient {
    shared: Arc<SessionShared>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SessionShared::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Enables or disables the dispatcher's direct `scene_switch_result`
    /// reply to inbound `switch_scene`. On by default; a host bridge that
    /// verifies the switch effect itself turns it off.
    pub fn set_auto_ack_switch_scene(&self, enabled: bool) {
        self.shared
            .auto_ack_switch_scene
            .store(enabled, Ordering::SeqCst);
    }

    pub fn auto_ack_switch_scene(&self) -> bool {
        self.shared.auto_ack()
    }

    pub fn set_callbacks(&self, callbacks: IpcCallbacks) {
        *self.shared.callbacks.lock().unwrap() = callbacks;
    }

    pub fn queue_request_status(&self) {
        self.shared.queues.queue_request_status();
    }

    pub fn queue_set_mode_request(&self, mode: &str) {
        self.shared.queues.queue_set_mode(mode);
    }

    pub fn queue_set_setting_request(&self, key: &str, value: bool) {
        self.shared.queues.queue_set_setting(key, value);
    }

    pub fn queue_scene_switch_result(&self, request_id: &str, ok: bool, error: &str) {
        self.shared.queues.queue_scene_switch_result(request_id, ok, error);
    }

    pub fn queue_obs_shutdown_notice(&self, reason: &str) {
        self.shared.queues.queue_shutdown_notice(reason);
    }

    pub(crate) fn outbound(&self) -> &OutboundQueues {
        &self.shared.queues
    }

    /// Spawns the worker on the current tokio runtime. No-op while running.
    pub fn start<C: Connector>(&self, connector: C) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        let handle = tokio::spawn(worker_loop(shared, connector));
        *self.worker.lock().unwrap() = handle.into();
    }

    /// Requests shutdown. Idempotent; the worker notices within the poll
    /// grain. Queued entries and callbacks are dropped with the worker.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Requests shutdown and waits for the worker to finish. The join is
    /// bounded: a worker stuck in a mid-frame read is aborted, which closes
    /// its channel handles.
    pub async fn stop_and_join(&self) {
        self.stop();
        let handle = self.worker.lock().unwrap().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_JOIN_GRACE, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
        }
        self.shared.queues.clear();
    }
}

async fn sleep_interruptible(shared: &SessionShared, total: Duration) {
    let mut remaining = total;
    while shared.is_running() && remaining > Duration::ZERO {
        let step = remaining.min(SLEEP_SLICE);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
}

async fn worker_loop<C: Connector>(shared: Arc<SessionShared>, connector: C) {
    tracing::info!("ipc worker started");
    while shared.is_running() {
        let (mut cmd_writer, mut evt_reader) = match connector.connect().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::debug!(error = %err, "channel connect retry");
                sleep_interruptible(&shared, RECONNECT_BACKOFF).await;
                continue;
            }
        };
        tracing::info!(
            cmd = CMD_CHANNEL_NAME,
            evt = EVT_CHANNEL_NAME,
            "channels opened"
        );
        shared.notify_pipe_state(true);

        let session_result = session_io(&shared, &mut evt_reader, &mut cmd_writer).await;
        drop(cmd_writer);
        drop(evt_reader);
        shared.notify_pipe_state(false);

        match session_result {
            Ok(()) => tracing::info!("ipc session closed"),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::info!("ipc peer disconnected")
            }
            Err(err) => tracing::warn!(error = %err, "ipc session error"),
        }
        if shared.is_running() {
            sleep_interruptible(&shared, RECONNECT_BACKOFF).await;
        }
    }
    tracing::info!("ipc worker stopped");
}

/// One connected session: handshake, prime, then the steady loop. Returns
/// `Ok` only on a stop request; any I/O or framing fault is an error that
/// tears the session down for reconnect.
pub(crate) async fn session_io<R, W>(
    shared: &SessionShared,
    evt_reader: &mut R,
    cmd_writer: &mut W,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    codec::write_envelope(cmd_writer, &protocol::hello_envelope()).await?;
    tracing::debug!("sent hello");

    codec::write_envelope(cmd_writer, &protocol::request_status_envelope()).await?;
    tracing::debug!("sent request_status (prime)");
    // The prime snapshot satisfies any refresh queued before the handshake,
    // e.g. a dock page that became ready while we were connecting.
    shared.queues.clear_request_status();

    let mut last_ping_at = Instant::now();
    while shared.is_running() {
        drain_outbound(shared, cmd_writer).await?;

        if shared.queues.take_request_status() {
            codec::write_envelope(cmd_writer, &protocol::request_status_envelope()).await?;
            tracing::debug!("sent queued request_status");
        }

        if last_ping_at.elapsed() >= HEARTBEAT_INTERVAL {
            codec::write_envelope(cmd_writer, &protocol::ping_envelope()).await?;
            last_ping_at = Instant::now();
        }

        // Readiness is a bounded poll; once a frame starts arriving it is
        // read to completion so a slow peer cannot desync the framing.
        if let Some(frame) = codec::read_frame_poll(evt_reader, READ_POLL_TIMEOUT).await? {
            dispatch_frame(shared, cmd_writer, &frame).await?;
        }
    }
    Ok(())
}

/// Drains the queues in their fixed order. On a send failure the remainder
/// of the failing batch is re-prepended and the session aborts.
async fn drain_outbound<W>(shared: &SessionShared, cmd_writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let modes = shared.queues.take_set_modes();
    for (index, mode) in modes.iter().enumerate() {
        let envelope = protocol::set_mode_request_envelope(mode);
        if let Err(err) = codec::write_envelope(cmd_writer, &envelope).await {
            tracing::warn!(mode = %mode, "set_mode_request send failed");
            shared.queues.requeue_set_modes(modes[index..].to_vec());
            return Err(err);
        }
        tracing::debug!(mode = %mode, "sent set_mode_request");
    }

    let settings = shared.queues.take_set_settings();
    for (index, (key, value)) in settings.iter().enumerate() {
        let envelope = protocol::set_setting_request_envelope(key, *value);
        if let Err(err) = codec::write_envelope(cmd_writer, &envelope).await {
            tracing::warn!(key = %key, "set_setting_request send failed");
            shared.queues.requeue_set_settings(settings[index..].to_vec());
            return Err(err);
        }
        tracing::debug!(key = %key, value = *value, "sent set_setting_request");
    }

    let results = shared.queues.take_scene_results();
    for (index, entry) in results.iter().enumerate() {
        let envelope =
            protocol::scene_switch_result_envelope(&entry.request_id, entry.ok, &entry.error);
        if let Err(err) = codec::write_envelope(cmd_writer, &envelope).await {
            tracing::warn!(request_id = %entry.request_id, "scene_switch_result send failed");
            shared.queues.requeue_scene_results(results[index..].to_vec());
            return Err(err);
        }
        tracing::debug!(request_id = %entry.request_id, ok = entry.ok, "sent scene_switch_result");
    }

    let notices = shared.queues.take_shutdown_notices();
    for (index, reason) in notices.iter().enumerate() {
        let envelope = protocol::obs_shutdown_notice_envelope(reason);
        if let Err(err) = codec::write_envelope(cmd_writer, &envelope).await {
            tracing::warn!(reason = %reason, "obs_shutdown_notice send failed");
            shared.queues.requeue_shutdown_notices(notices[index..].to_vec());
            return Err(err);
        }
        tracing::debug!(reason = %reason, "sent obs_shutdown_notice");
    }

    Ok(())
}

/// Routes one inbound frame. An undecodable body is logged and skipped; the
/// peer may simply be newer than this shim.
async fn dispatch_frame<W>(
    shared: &SessionShared,
    cmd_writer: &mut W,
    frame: &[u8],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let meta = match codec::extract_envelope_meta(frame) {
        Ok(meta) => meta,
        Err(err) => {
            tracing::warn!(error = %err, bytes = frame.len(), "received undecodable frame");
            return Ok(());
        }
    };
    tracing::debug!(message_type = %meta.message_type, "received frame");

    let callbacks = shared.callbacks();
    if let Some(cb) = &callbacks.on_message_type {
        cb(&meta.message_type);
    }
    if let Some(cb) = &callbacks.on_incoming_envelope_json {
        match codec::decode_to_json(frame) {
            Ok(json) => cb(&json),
            Err(_) => cb(&codec::meta_fallback_envelope_json(&meta)),
        }
    }

    if meta.message_type == "switch_scene" {
        if let Some(cb) = &callbacks.on_switch_scene_request {
            cb(&meta.request_id, &meta.scene_name, &meta.reason);
        }
        if meta.request_id.is_empty() {
            tracing::warn!("switch_scene received without request_id");
        } else if shared.auto_ack() {
            let envelope = if meta.scene_name.is_empty() {
                tracing::warn!(
                    request_id = %meta.request_id,
                    "switch_scene auto-ack error (missing_scene_name)"
                );
                protocol::scene_switch_result_envelope(&meta.request_id, false, "missing_scene_name")
            } else {
                protocol::scene_switch_result_envelope(&meta.request_id, true, "")
            };
            codec::write_envelope(cmd_writer, &envelope).await?;
        } else {
            tracing::debug!(
                request_id = %meta.request_id,
                "switch_scene deferred to host bridge (auto-ack off)"
            );
        }
    }
    Ok(())
}
