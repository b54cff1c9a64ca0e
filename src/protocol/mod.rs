use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const IPC_PROTOCOL_VERSION: u8 = 1;
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Version string advertised in `hello.plugin_version`. The core peer keys
/// capability gating off `protocol_version`, not this string, but it must
/// stay stable because dashboards group sessions by it.
pub const PLUGIN_VERSION: &str = "0.0.3-cpp-shim";

pub const HELLO_CAPABILITIES: [&str; 3] = ["scene_switch", "dock", "restart_hint"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub v: u8,
    pub id: String,
    pub ts_unix_ms: u64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub priority: Priority,
    pub payload: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub plugin_version: String,
    pub protocol_version: u8,
    pub obs_pid: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingPayload {
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestStatusPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetModeRequestPayload {
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSettingRequestPayload {
    pub key: String,
    pub value: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSwitchResultPayload {
    pub request_id: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsShutdownNoticePayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchScenePayload {
    pub request_id: String,
    pub scene_name: String,
    pub reason: String,
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn make_envelope<T: Serialize>(
    message_type: &str,
    priority: Priority,
    payload: T,
) -> Envelope<T> {
    Envelope {
        v: IPC_PROTOCOL_VERSION,
        id: Uuid::new_v4().to_string(),
        ts_unix_ms: now_unix_ms(),
        message_type: message_type.to_string(),
        priority,
        payload,
    }
}

pub fn hello_envelope() -> Envelope<HelloPayload> {
    make_envelope(
        "hello",
        Priority::High,
        HelloPayload {
            plugin_version: PLUGIN_VERSION.to_string(),
            protocol_version: IPC_PROTOCOL_VERSION,
            obs_pid: 0,
            capabilities: HELLO_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        },
    )
}

pub fn request_status_envelope() -> Envelope<RequestStatusPayload> {
    make_envelope("request_status", Priority::High, RequestStatusPayload {})
}

pub fn ping_envelope() -> Envelope<PingPayload> {
    make_envelope(
        "ping",
        Priority::Normal,
        PingPayload {
            nonce: Uuid::new_v4().to_string(),
        },
    )
}

pub fn set_mode_request_envelope(mode: &str) -> Envelope<SetModeRequestPayload> {
    make_envelope(
        "set_mode_request",
        Priority::High,
        SetModeRequestPayload {
            mode: mode.to_string(),
        },
    )
}

pub fn set_setting_request_envelope(key: &str, value: bool) -> Envelope<SetSettingRequestPayload> {
    make_envelope(
        "set_setting_request",
        Priority::High,
        SetSettingRequestPayload {
            key: key.to_string(),
            value,
        },
    )
}

pub fn scene_switch_result_envelope(
    request_id: &str,
    ok: bool,
    error: &str,
) -> Envelope<SceneSwitchResultPayload> {
    make_envelope(
        "scene_switch_result",
        Priority::High,
        SceneSwitchResultPayload {
            request_id: request_id.to_string(),
            ok,
            error: if ok || error.is_empty() {
                None
            } else {
                Some(error.to_string())
            },
        },
    )
}

pub fn obs_shutdown_notice_envelope(reason: &str) -> Envelope<ObsShutdownNoticePayload> {
    make_envelope(
        "obs_shutdown_notice",
        Priority::High,
        ObsShutdownNoticePayload {
            reason: if reason.is_empty() {
                "obs_module_unload".to_string()
            } else {
                reason.to_string()
            },
        },
    )
}
