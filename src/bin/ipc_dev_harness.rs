//! Dev harness: runs a mock core peer on the real channel transport and
//! drives a `ShimCore` against it with a fake host frontend. Exercises the
//! shim end to end; not part of the core.

use aegis_obs_shim::codec;
use aegis_obs_shim::protocol::{make_envelope, now_unix_ms, Envelope, Priority};
use aegis_obs_shim::runtime::{FrontendEvent, HostFrontend, JsExecuteFn, ShimCore};
use aegis_obs_shim::theme::{Color, HostPalette};
use aegis_obs_shim::ShimConfig;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HelloAckPayload {
    core_version: String,
    protocol_version: u8,
    capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PongPayload {
    nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockSwitchScenePayload {
    request_id: String,
    scene_name: String,
    reason: String,
}

/// Mode/settings state the mock peer echoes back in status snapshots.
#[derive(Debug, Default)]
struct MockCoreState {
    mode: Option<String>,
    settings: serde_json::Map<String, serde_json::Value>,
}

impl MockCoreState {
    fn status_snapshot(&self) -> Envelope<serde_json::Value> {
        let mut payload = serde_json::json!({
            "mode": self.mode.as_deref().unwrap_or("studio"),
            "health": "good",
        });
        if !self.settings.is_empty() {
            payload["settings"] = serde_json::Value::Object(self.settings.clone());
        }
        make_envelope("status_snapshot", Priority::Normal, payload)
    }
}

/// One mock-core session over an accepted channel pair: answers the shim's
/// handshake and requests, and optionally pushes a `switch_scene`.
async fn run_peer_session<R, W>(
    cmd_reader: &mut R,
    evt_writer: &mut W,
    push_scene: Option<String>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut state = MockCoreState::default();
    let mut pushed_switch = false;
    loop {
        let frame = codec::read_frame(cmd_reader).await?;
        let envelope = match codec::decode(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "mock core: undecodable frame");
                continue;
            }
        };
        tracing::info!(message_type = %envelope.message_type, "mock core <-");

        match envelope.message_type.as_str() {
            "hello" => {
                let ack = make_envelope(
                    "hello_ack",
                    Priority::High,
                    HelloAckPayload {
                        core_version: env!("CARGO_PKG_VERSION").to_string(),
                        protocol_version: 1,
                        capabilities: vec!["scene_switch".to_string(), "dock".to_string()],
                    },
                );
                codec::write_envelope(evt_writer, &ack).await?;
            }
            "ping" => {
                let nonce = envelope.payload["nonce"].as_str().unwrap_or("").to_string();
                let pong = make_envelope("pong", Priority::Normal, PongPayload { nonce });
                codec::write_envelope(evt_writer, &pong).await?;

                if let (Some(scene_name), false) = (&push_scene, pushed_switch) {
                    pushed_switch = true;
                    let switch = make_envelope(
                        "switch_scene",
                        Priority::High,
                        MockSwitchScenePayload {
                            request_id: Uuid::new_v4().to_string(),
                            scene_name: scene_name.clone(),
                            reason: "mock_core".to_string(),
                        },
                    );
                    tracing::info!(scene = %scene_name, "mock core -> switch_scene");
                    codec::write_envelope(evt_writer, &switch).await?;
                }
            }
            "request_status" => {
                codec::write_envelope(evt_writer, &state.status_snapshot()).await?;
            }
            "set_mode_request" => {
                state.mode = envelope.payload["mode"].as_str().map(|m| m.to_string());
                codec::write_envelope(evt_writer, &state.status_snapshot()).await?;
            }
            "set_setting_request" => {
                if let (Some(key), Some(value)) = (
                    envelope.payload["key"].as_str(),
                    envelope.payload["value"].as_bool(),
                ) {
                    state
                        .settings
                        .insert(key.to_string(), serde_json::Value::Bool(value));
                }
                codec::write_envelope(evt_writer, &state.status_snapshot()).await?;
            }
            "scene_switch_result" => {
                tracing::info!(
                    request_id = envelope.payload["request_id"].as_str().unwrap_or(""),
                    ok = envelope.payload["ok"].as_bool().unwrap_or(false),
                    "mock core <- scene_switch_result"
                );
            }
            "obs_shutdown_notice" => {
                tracing::info!(
                    reason = envelope.payload["reason"].as_str().unwrap_or(""),
                    "mock core <- obs_shutdown_notice"
                );
                return Ok(());
            }
            other => {
                tracing::warn!(message_type = %other, "mock core: unexpected frame");
            }
        }
    }
}

#[cfg(unix)]
async fn serve_mock_core(push_scene: Option<String>) -> io::Result<()> {
    use aegis_obs_shim::channel::{socket_path, CMD_CHANNEL_NAME, EVT_CHANNEL_NAME};
    use tokio::net::UnixListener;

    let cmd_path = socket_path(CMD_CHANNEL_NAME);
    let evt_path = socket_path(EVT_CHANNEL_NAME);
    let _ = std::fs::remove_file(&cmd_path);
    let _ = std::fs::remove_file(&evt_path);
    let cmd_listener = UnixListener::bind(&cmd_path)?;
    let evt_listener = UnixListener::bind(&evt_path)?;
    tracing::info!(cmd = %cmd_path.display(), evt = %evt_path.display(), "mock core listening");

    loop {
        let (mut cmd_stream, _) = cmd_listener.accept().await?;
        let (mut evt_stream, _) = evt_listener.accept().await?;
        tracing::info!("mock core: shim connected");
        match run_peer_session(&mut cmd_stream, &mut evt_stream, push_scene.clone()).await {
            Ok(()) => tracing::info!("mock core: session closed"),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::info!("mock core: shim disconnected")
            }
            Err(err) => tracing::warn!(error = %err, "mock core: session error"),
        }
    }
}

#[cfg(windows)]
async fn serve_mock_core(push_scene: Option<String>) -> io::Result<()> {
    use aegis_obs_shim::channel::{CMD_PIPE_PATH, EVT_PIPE_PATH};
    use tokio::net::windows::named_pipe::ServerOptions;

    tracing::info!(cmd = CMD_PIPE_PATH, evt = EVT_PIPE_PATH, "mock core listening");
    loop {
        let cmd_pipe = ServerOptions::new()
            .first_pipe_instance(true)
            .access_outbound(false)
            .create(CMD_PIPE_PATH)?;
        let evt_pipe = ServerOptions::new().access_inbound(false).create(EVT_PIPE_PATH)?;
        let (mut cmd_pipe, mut evt_pipe) = {
            cmd_pipe.connect().await?;
            evt_pipe.connect().await?;
            (cmd_pipe, evt_pipe)
        };
        tracing::info!("mock core: shim connected");
        match run_peer_session(&mut cmd_pipe, &mut evt_pipe, push_scene.clone()).await {
            Ok(()) => tracing::info!("mock core: session closed"),
            Err(err) => tracing::warn!(error = %err, "mock core: session error"),
        }
    }
}

/// Three-scene fake host the harness switches against.
struct SampleHost {
    scenes: Vec<String>,
    current: Mutex<String>,
}

impl SampleHost {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            scenes: vec!["Intro".to_string(), "Live".to_string(), "BRB".to_string()],
            current: Mutex::new("Intro".to_string()),
        })
    }
}

impl HostFrontend for SampleHost {
    fn scene_names(&self) -> Vec<String> {
        self.scenes.clone()
    }

    fn current_scene_name(&self) -> Option<String> {
        Some(self.current.lock().unwrap().clone())
    }

    fn scene_exists(&self, scene_name: &str) -> bool {
        self.scenes.iter().any(|s| s == scene_name)
    }

    fn set_current_scene(&self, scene_name: &str) {
        *self.current.lock().unwrap() = scene_name.to_string();
    }

    fn palette(&self) -> Option<HostPalette> {
        Some(HostPalette {
            window: Color::rgb(0x1e, 0x1e, 0x1e),
            base: Color::rgb(0x16, 0x16, 0x16),
            button: Color::rgb(0x2c, 0x2c, 0x2c),
            window_text: Color::rgb(0xe6, 0xe6, 0xe6),
            text: Color::rgb(0xf2, 0xf2, 0xf2),
            button_text: Color::rgb(0xd8, 0xd8, 0xd8),
            placeholder_text: Some(Color::rgb(0x8a, 0x8a, 0x8a)),
            highlight: Color::rgb(0x2a, 0x6b, 0xd4),
        })
    }
}

fn logging_js_executor() -> JsExecuteFn {
    Arc::new(|js_code: &str| {
        // Stand-in for the dock page: log the native call instead of running it.
        let preview: String = js_code.chars().take(160).collect();
        tracing::info!(js = %preview, "dock page <-");
        true
    })
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let push_scene = std::env::args()
        .skip_while(|a| a != "--push-switch-scene")
        .nth(1);
    let run_seconds: u64 = std::env::args()
        .skip_while(|a| a != "--run-seconds")
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(6);

    let peer_runtime = tokio::runtime::Runtime::new()?;
    peer_runtime.spawn(async move {
        if let Err(err) = serve_mock_core(push_scene).await {
            tracing::error!(error = %err, "mock core stopped");
        }
    });
    // Let the listeners come up before the shim dials.
    std::thread::sleep(Duration::from_millis(100));

    let core = ShimCore::new(ShimConfig::from_env());
    core.attach_host_frontend(SampleHost::new());
    core.register_js_executor(logging_js_executor());
    core.start()?;

    core.notify_frontend_event(FrontendEvent::FinishedLoading);
    core.notify_page_ready();

    core.submit_dock_action_json(&serde_json::json!({
        "type": "switch_scene",
        "requestId": format!("harness_{}", now_unix_ms()),
        "sceneName": "BRB",
    }).to_string());
    core.submit_dock_action_json(&serde_json::json!({
        "type": "set_mode",
        "requestId": format!("harness_mode_{}", now_unix_ms()),
        "mode": "irl",
    }).to_string());
    core.submit_dock_action_json(&serde_json::json!({
        "type": "set_setting",
        "requestId": format!("harness_setting_{}", now_unix_ms()),
        "key": "alerts",
        "value": true,
    }).to_string());

    // Stand-in for the host UI thread tick.
    let started = std::time::Instant::now();
    let mut last_tick = started;
    while started.elapsed() < Duration::from_secs(run_seconds) {
        std::thread::sleep(Duration::from_millis(16));
        let now = std::time::Instant::now();
        core.tick(now.duration_since(last_tick).as_secs_f32());
        last_tick = now;
    }

    core.notify_frontend_event(FrontendEvent::Exit);
    core.stop();
    tracing::info!("harness finished");
    Ok(())
}
