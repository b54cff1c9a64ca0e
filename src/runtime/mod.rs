use crate::channel::{Connector, DefaultConnector};
use crate::config::ShimConfig;
use crate::dock::{self, DockActionEffect, DockActionIntake, DockActionResult};
use crate::pump::{PendingSwitchRequest, ScenePump};
use crate::replay::ReplayCache;
use crate::session::{IpcCallbacks, IpcClient};
use crate::theme::{augment_status_snapshot_envelope, derive_theme, HostPalette, ThemeCache};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Executes a UTF-8 JS string in the dock page, returning whether the page
/// accepted it.
pub type JsExecuteFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// The small window onto the host application the shim consumes: scene
/// enumeration, the current scene, scene activation and the palette used for
/// theme derivation. Implemented by the OBS wrapper, mocked by the harness.
pub trait HostFrontend: Send + Sync {
    fn scene_names(&self) -> Vec<String>;
    fn current_scene_name(&self) -> Option<String>;
    fn scene_exists(&self, scene_name: &str) -> bool;
    fn set_current_scene(&self, scene_name: &str);
    fn palette(&self) -> Option<HostPalette>;
}

/// Host lifecycle notifications forwarded into the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendEvent {
    SceneChanged,
    SceneListChanged,
    SceneCollectionChanged,
    FinishedLoading,
    ThemeChanged,
    Exit,
}

impl FrontendEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FrontendEvent::SceneChanged => "SCENE_CHANGED",
            FrontendEvent::SceneListChanged => "SCENE_LIST_CHANGED",
            FrontendEvent::SceneCollectionChanged => "SCENE_COLLECTION_CHANGED",
            FrontendEvent::FinishedLoading => "FINISHED_LOADING",
            FrontendEvent::ThemeChanged => "THEME_CHANGED",
            FrontendEvent::Exit => "EXIT",
        }
    }
}

/// The dock-page JS executor plus page readiness. Callers snapshot the
/// executor under the lock and invoke it outside.
#[derive(Default)]
struct JsSink {
    executor: Mutex<Option<JsExecuteFn>>,
    page_ready: AtomicBool,
}

impl JsSink {
    fn set_executor(&self, executor: Option<JsExecuteFn>) {
        let has_sink = executor.is_some();
        *self.executor.lock().unwrap() = executor;
        if !has_sink {
            self.page_ready.store(false, Ordering::SeqCst);
        }
    }

    fn set_page_ready(&self, ready: bool) {
        self.page_ready.store(ready, Ordering::SeqCst);
    }

    fn is_page_ready(&self) -> bool {
        self.page_ready.load(Ordering::SeqCst)
    }

    fn execute(&self, js_code: &str) -> bool {
        let executor = self.executor.lock().unwrap().clone();
        match executor {
            Some(execute) => execute(js_code),
            None => false,
        }
    }
}

fn js_string_literal(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

fn envelope_type_of(envelope_json: &str) -> Option<String> {
    let envelope: serde_json::Value = serde_json::from_str(envelope_json).ok()?;
    envelope
        .get("type")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
}

struct CoreInner {
    config: ShimConfig,
    client: IpcClient,
    intake: DockActionIntake,
    pump: ScenePump,
    replay: ReplayCache,
    theme: ThemeCache,
    sink: JsSink,
    host: Mutex<Option<Arc<dyn HostFrontend>>>,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    selftest_attempted: AtomicBool,
}

/// Central core context (one per plugin load) tying the session supervisor,
/// dock intake, scene pump, replay cache and UI bridge together. IPC worker
/// callbacks hold weak handles and no-op once the core is dropped.
pub struct ShimCore {
    inner: Arc<CoreInner>,
}

impl ShimCore {
    pub fn new(config: ShimConfig) -> Self {
        let inner = Arc::new(CoreInner {
            config,
            client: IpcClient::new(),
            intake: DockActionIntake::new(),
            pump: ScenePump::new(),
            replay: ReplayCache::new(),
            theme: ThemeCache::new(),
            sink: JsSink::default(),
            host: Mutex::new(None),
            runtime: Mutex::new(None),
            selftest_attempted: AtomicBool::new(false),
        });
        wire_ipc_callbacks(&inner);
        Self { inner }
    }

    /// Wires the host frontend in. Scene switches are then verified against
    /// the host, so the dispatcher's auto-ack is turned off.
    pub fn attach_host_frontend(&self, host: Arc<dyn HostFrontend>) {
        *self.inner.host.lock().unwrap() = Some(host);
        self.inner.client.set_auto_ack_switch_scene(false);
        self.inner.theme.refresh(self.inner.derive_host_theme(), "host_attached");
    }

    /// Starts the IPC worker against the platform's default transport,
    /// creating the runtime the worker lives on.
    pub fn start(&self) -> io::Result<()> {
        self.start_with_connector(DefaultConnector::default())
    }

    pub fn start_with_connector<C: Connector>(&self, connector: C) -> io::Result<()> {
        let mut runtime_slot = self.inner.runtime.lock().unwrap();
        if runtime_slot.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("aegis-ipc")
            .enable_all()
            .build()?;
        {
            let _guard = runtime.enter();
            self.inner.client.start(connector);
        }
        *runtime_slot = Some(runtime);
        Ok(())
    }

    /// Idempotent shutdown: queues a shutdown notice, gives the worker a
    /// short drain grace, then stops it and clears every cache and table.
    pub fn stop(&self) {
        if self.inner.client.is_running() {
            self.inner.client.queue_obs_shutdown_notice("obs_module_unload");
            std::thread::sleep(Duration::from_millis(50));
        }
        self.inner.client.stop();
        let runtime = self.inner.runtime.lock().unwrap().take();
        if let Some(runtime) = runtime {
            runtime.shutdown_timeout(Duration::from_secs(1));
        }
        self.inner.client.outbound().clear();
        self.inner.pump.clear();
        self.inner.intake.clear();
        self.inner.replay.clear();
        self.inner.theme.clear();
        self.inner.sink.set_executor(None);
        self.inner.selftest_attempted.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.client.is_running()
    }

    /// UI action intake (§dock). Returns whether the action was accepted for
    /// handling or queueing.
    pub fn submit_dock_action_json(&self, action_json: &str) -> bool {
        self.inner.submit_dock_action_json(action_json)
    }

    /// Host UI-thread tick with elapsed seconds since the previous frame.
    pub fn tick(&self, elapsed_seconds: f32) {
        self.inner.tick(elapsed_seconds);
    }

    pub fn notify_frontend_event(&self, event: FrontendEvent) {
        self.inner.notify_frontend_event(event);
    }

    /// Registers (or replaces) the dock-page JS executor and replays cached
    /// state through it.
    pub fn register_js_executor(&self, executor: JsExecuteFn) {
        self.inner.sink.set_executor(Some(executor));
        self.inner.replay_state_to_sink();
    }

    pub fn clear_js_executor(&self) {
        self.inner.sink.set_executor(None);
    }

    /// Dock page finished bootstrapping: replay cached state, refresh status
    /// once the session is healthy, and run the optional env self-test.
    pub fn notify_page_ready(&self) {
        self.inner.sink.set_page_ready(true);
        self.inner.replay_state_to_sink();
        self.inner.client.queue_request_status();
        self.inner.maybe_run_selftest();
    }

    pub fn notify_page_unloaded(&self) {
        self.inner.sink.set_page_ready(false);
        self.inner.sink.set_executor(None);
    }

    pub fn queue_request_status(&self) {
        self.inner.client.queue_request_status();
    }

    #[cfg(test)]
    fn inner(&self) -> &CoreInner {
        &self.inner
    }
}

fn wire_ipc_callbacks(inner: &Arc<CoreInner>) {
    let pipe_state = {
        let weak: Weak<CoreInner> = Arc::downgrade(inner);
        Arc::new(move |connected: bool| {
            if let Some(core) = weak.upgrade() {
                core.handle_pipe_state(connected);
            }
        })
    };
    let incoming = {
        let weak: Weak<CoreInner> = Arc::downgrade(inner);
        Arc::new(move |envelope_json: &str| {
            if let Some(core) = weak.upgrade() {
                core.handle_incoming_envelope_json(envelope_json);
            }
        })
    };
    let switch_request = {
        let weak: Weak<CoreInner> = Arc::downgrade(inner);
        Arc::new(move |request_id: &str, scene_name: &str, reason: &str| {
            if let Some(core) = weak.upgrade() {
                core.handle_switch_scene_request(request_id, scene_name, reason);
            }
        })
    };
    inner.client.set_callbacks(IpcCallbacks {
        on_pipe_state: Some(pipe_state),
        on_message_type: Some(Arc::new(|message_type: &str| {
            tracing::debug!(message_type, "ipc message");
        })),
        on_incoming_envelope_json: Some(incoming),
        on_switch_scene_request: Some(switch_request),
    });
}

impl CoreInner {
    fn host(&self) -> Option<Arc<dyn HostFrontend>> {
        self.host.lock().unwrap().clone()
    }

    fn emit_json_arg_call(&self, method: &str, payload_json: &str) -> bool {
        if payload_json.is_empty() {
            return false;
        }
        let js = format!(
            "if (window.aegisDockNative && typeof window.aegisDockNative.{method} === 'function') \
             {{ window.aegisDockNative.{method}({literal}); }}",
            method = method,
            literal = js_string_literal(payload_json),
        );
        let delivered = self.sink.execute(&js);
        if !delivered {
            tracing::debug!(
                method,
                bytes = payload_json.len(),
                page_ready = self.sink.is_page_ready(),
                "dock js call undelivered"
            );
        }
        delivered
    }

    fn emit_pipe_status(&self, status: &str, reason: &str) -> bool {
        let reason_literal = if reason.is_empty() {
            "null".to_string()
        } else {
            js_string_literal(reason)
        };
        let js = format!(
            "if (window.aegisDockNative && typeof window.aegisDockNative.receivePipeStatus === \
             'function') {{ window.aegisDockNative.receivePipeStatus({status}, {reason}); }}",
            status = js_string_literal(status),
            reason = reason_literal,
        );
        self.sink.execute(&js)
    }

    fn emit_current_scene(&self, scene_name: &str) -> bool {
        let name_literal = if scene_name.is_empty() {
            "null".to_string()
        } else {
            js_string_literal(scene_name)
        };
        let js = format!(
            "if (window.aegisDockNative && typeof window.aegisDockNative.receiveCurrentScene === \
             'function') {{ window.aegisDockNative.receiveCurrentScene({name}); }}",
            name = name_literal,
        );
        self.sink.execute(&js)
    }

    /// Switch-request observer. With auto-ack on the dispatcher has already
    /// acknowledged the request, and pumping it would produce a second
    /// `scene_switch_result` for the same id; the two paths are exclusive.
    fn handle_switch_scene_request(&self, request_id: &str, scene_name: &str, reason: &str) {
        if self.client.auto_ack_switch_scene() {
            tracing::debug!(
                request_id,
                scene = scene_name,
                "switch_scene acknowledged by dispatcher; skipping host pump"
            );
            return;
        }
        self.pump.enqueue(request_id, scene_name, reason);
    }

    fn handle_pipe_state(&self, connected: bool) {
        let status = if connected { "ok" } else { "down" };
        let reason = if connected {
            "IPC connected"
        } else {
            "IPC disconnected"
        };
        tracing::info!(status, "ipc pipe state");
        self.replay.cache_pipe_status(status, reason);
        self.emit_pipe_status(status, reason);
    }

    /// Inbound-envelope observer: theme-augment status snapshots, cache,
    /// forward to the page, then resolve any dock-action completions the
    /// snapshot corroborates.
    fn handle_incoming_envelope_json(&self, envelope_json: &str) {
        let themed = match self.theme.cached() {
            Some(theme) => augment_status_snapshot_envelope(envelope_json, &theme),
            None => envelope_json.to_string(),
        };
        self.replay.cache_envelope_json(&themed);
        self.emit_json_arg_call("receiveIpcEnvelopeJson", &themed);

        if envelope_type_of(&themed).as_deref() == Some("status_snapshot") {
            if let Some(projection) = dock::project_status_snapshot(&themed) {
                for result in self.intake.resolve_completions(&projection) {
                    self.emit_dock_action_result(&result);
                }
            }
            if let Some(result) = self.intake.take_request_status_completion() {
                self.emit_dock_action_result(&result);
            }
        }
    }

    fn emit_dock_action_result(&self, result: &DockActionResult) {
        tracing::info!(
            action_type = result.action_type.as_deref().unwrap_or(""),
            request_id = result.request_id.as_deref().unwrap_or(""),
            status = %result.status,
            ok = result.ok,
            error = result.error.as_deref().unwrap_or(""),
            "dock action result"
        );
        let payload_json = result.to_json();
        self.replay.cache_dock_action_result(&payload_json);
        self.emit_json_arg_call("receiveDockActionResultJson", &payload_json);
    }

    fn emit_scene_switch_completed(
        &self,
        request_id: &str,
        scene_name: &str,
        ok: bool,
        error: &str,
        reason: &str,
    ) {
        fn nullable(s: &str) -> serde_json::Value {
            if s.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(s.to_string())
            }
        }
        let payload_json = serde_json::json!({
            "requestId": nullable(request_id),
            "sceneName": nullable(scene_name),
            "ok": ok,
            "error": if ok { serde_json::Value::Null } else { nullable(error) },
            "reason": nullable(reason),
        })
        .to_string();
        self.replay.cache_scene_switch_completed(&payload_json);
        self.emit_json_arg_call("receiveSceneSwitchCompletedJson", &payload_json);
    }

    fn emit_scene_snapshot(&self, reason: &str) {
        let Some(host) = self.host() else {
            tracing::debug!(reason, "scene snapshot skipped: no host frontend");
            return;
        };
        let names = host.scene_names();
        let current = host.current_scene_name().unwrap_or_default();
        tracing::info!(reason, current = %current, count = names.len(), "obs scene snapshot");
        let payload_json = serde_json::json!({
            "reason": reason,
            "sceneNames": names,
            "currentSceneName": if current.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(current)
            },
        })
        .to_string();
        self.replay.cache_scene_snapshot(&payload_json);
        self.emit_json_arg_call("receiveSceneSnapshotJson", &payload_json);
    }

    fn derive_host_theme(&self) -> Option<crate::theme::ThemeSlots> {
        self.host()
            .and_then(|host| host.palette())
            .map(|palette| derive_theme(&palette))
    }

    fn refresh_theme(&self, reason: &str) -> bool {
        self.theme.refresh(self.derive_host_theme(), reason)
    }

    /// Re-delivers the cached status snapshot with the current theme folded
    /// into its payload.
    fn reemit_status_snapshot_with_theme(&self, reason: &str) {
        let Some(snapshot_json) = self.replay.cached_status_snapshot_json() else {
            tracing::debug!(reason, "theme refresh skipped: no cached status_snapshot");
            return;
        };
        let themed = match self.theme.cached() {
            Some(theme) => augment_status_snapshot_envelope(&snapshot_json, &theme),
            None => snapshot_json,
        };
        self.replay.cache_envelope_json(&themed);
        let delivered = self.emit_json_arg_call("receiveIpcEnvelopeJson", &themed);
        tracing::debug!(reason, delivered, bytes = themed.len(), "themed status_snapshot re-emitted");
    }

    fn submit_dock_action_json(&self, action_json: &str) -> bool {
        let submission = self.intake.submit(action_json);
        if let Some(effect) = &submission.effect {
            match effect {
                DockActionEffect::QueueSwitchScene {
                    request_id,
                    scene_name,
                } => {
                    self.pump.enqueue(request_id, scene_name, "dock_ui");
                }
                DockActionEffect::QueueRequestStatus => {
                    self.client.queue_request_status();
                }
                DockActionEffect::QueueSetMode { mode } => {
                    self.client.queue_set_mode_request(mode);
                }
                DockActionEffect::QueueSetSetting { key, value } => {
                    self.client.queue_set_setting_request(key, *value);
                }
            }
        }
        if let Some(result) = &submission.result {
            self.emit_dock_action_result(result);
        }
        submission.accepted
    }

    fn tick(&self, elapsed_seconds: f32) {
        for result in self.intake.drain_expired(Instant::now()) {
            self.emit_dock_action_result(&result);
        }
        let work = self.pump.advance(elapsed_seconds);
        if work.theme_poll_due
            && self.refresh_theme("tick_poll")
            && self.theme.cached().is_some()
        {
            self.reemit_status_snapshot_with_theme("tick_poll");
        }
        for request in &work.switches {
            self.apply_scene_switch(request);
        }
    }

    /// Applies one deferred switch on the host UI thread and verifies the
    /// observed effect before acknowledging.
    fn apply_scene_switch(&self, request: &PendingSwitchRequest) {
        let request_id = request.request_id.as_str();
        let scene_name = request.scene_name.as_str();
        let reason = request.reason.as_str();
        let dock_ui = reason == "dock_ui";

        if scene_name.is_empty() {
            tracing::warn!(request_id, reason, "switch_scene request missing scene_name");
            if !request_id.is_empty() {
                self.client
                    .queue_scene_switch_result(request_id, false, "missing_scene_name");
                if dock_ui {
                    self.emit_dock_action_result(&DockActionResult::failed(
                        "switch_scene",
                        request_id,
                        "missing_scene_name",
                        "scene_name missing",
                    ));
                }
            }
            self.emit_scene_switch_completed(request_id, scene_name, false, "missing_scene_name", reason);
            return;
        }

        let host = self.host();
        let found = host
            .as_ref()
            .map(|host| host.scene_exists(scene_name))
            .unwrap_or(false);
        if !found {
            tracing::warn!(request_id, scene = scene_name, reason, "switch_scene target not found");
            if !request_id.is_empty() {
                self.client
                    .queue_scene_switch_result(request_id, false, "scene_not_found");
                if dock_ui {
                    self.emit_dock_action_result(&DockActionResult::failed(
                        "switch_scene",
                        request_id,
                        "scene_not_found",
                        "",
                    ));
                }
            }
            self.emit_scene_switch_completed(request_id, scene_name, false, "scene_not_found", reason);
            return;
        }
        let host = host.expect("scene_exists implies host");

        tracing::info!(request_id, scene = scene_name, reason, "switch_scene applying");
        host.set_current_scene(scene_name);

        if request_id.is_empty() {
            return;
        }
        if host.current_scene_name().as_deref() == Some(scene_name) {
            self.client.queue_scene_switch_result(request_id, true, "");
            self.replay.cache_current_scene(scene_name);
            self.emit_current_scene(scene_name);
            if dock_ui {
                self.emit_dock_action_result(&DockActionResult::completed(
                    "switch_scene",
                    request_id,
                    "scene_switch_applied",
                ));
            }
            self.emit_scene_switch_completed(request_id, scene_name, true, "", reason);
        } else {
            tracing::warn!(request_id, scene = scene_name, reason, "switch_scene verify failed");
            self.client
                .queue_scene_switch_result(request_id, false, "switch_verify_failed");
            if dock_ui {
                self.emit_dock_action_result(&DockActionResult::failed(
                    "switch_scene",
                    request_id,
                    "switch_verify_failed",
                    "",
                ));
            }
            self.emit_scene_switch_completed(request_id, scene_name, false, "switch_verify_failed", reason);
        }
    }

    fn notify_frontend_event(&self, event: FrontendEvent) {
        tracing::info!(event = event.name(), "frontend event");
        match event {
            FrontendEvent::SceneChanged
            | FrontendEvent::SceneListChanged
            | FrontendEvent::SceneCollectionChanged
            | FrontendEvent::FinishedLoading => {
                self.emit_scene_snapshot(event.name());
                self.refresh_theme(event.name());
            }
            FrontendEvent::ThemeChanged => {
                self.refresh_theme(event.name());
                self.reemit_status_snapshot_with_theme(event.name());
            }
            FrontendEvent::Exit => {
                // The page context dies with the host shortly; stop pushing
                // into it.
                self.sink.set_executor(None);
            }
        }
    }

    /// Replays cached state in the fixed order: pipe status, hello_ack, pong,
    /// status_snapshot, event ring, scene snapshot, current scene,
    /// scene-switch-completed, action result.
    fn replay_state_to_sink(&self) {
        let snapshot = self.replay.snapshot();
        if let Some((status, reason)) = &snapshot.pipe_status {
            self.emit_pipe_status(status, reason);
        }
        if let Some(json) = &snapshot.hello_ack_envelope_json {
            self.emit_json_arg_call("receiveIpcEnvelopeJson", json);
        }
        if let Some(json) = &snapshot.pong_envelope_json {
            self.emit_json_arg_call("receiveIpcEnvelopeJson", json);
        }
        if let Some(json) = &snapshot.status_snapshot_envelope_json {
            self.emit_json_arg_call("receiveIpcEnvelopeJson", json);
        }
        for json in &snapshot.recent_event_envelope_jsons {
            self.emit_json_arg_call("receiveIpcEnvelopeJson", json);
        }
        if let Some(json) = &snapshot.scene_snapshot_json {
            self.emit_json_arg_call("receiveSceneSnapshotJson", json);
        }
        if let Some(scene_name) = &snapshot.current_scene {
            self.emit_current_scene(scene_name);
        }
        if let Some(json) = &snapshot.scene_switch_completed_json {
            self.emit_json_arg_call("receiveSceneSwitchCompletedJson", json);
        }
        if let Some(json) = &snapshot.dock_action_result_json {
            self.emit_json_arg_call("receiveDockActionResultJson", json);
        }
    }

    fn maybe_run_selftest(&self) {
        if self.selftest_attempted.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.config.selftest.enabled {
            return;
        }
        let Some(action_json) = self.config.selftest.action_json.clone() else {
            tracing::info!("dock selftest enabled but no action json provided");
            return;
        };
        if self.config.selftest.direct_plugin_intake {
            let accepted = self.submit_dock_action_json(&action_json);
            tracing::info!(accepted, "dock selftest direct plugin intake");
            return;
        }
        let js = format!(
            "if (window.aegisDockNative && typeof window.aegisDockNative.sendDockActionJson === \
             'function') {{ window.aegisDockNative.sendDockActionJson({payload}); }}",
            payload = js_string_literal(&action_json),
        );
        let dispatched = self.sink.execute(&js);
        tracing::info!(dispatched, "dock selftest action dispatched via page");
    }
}
