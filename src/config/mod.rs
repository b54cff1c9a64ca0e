use std::env;
use std::path::PathBuf;

pub const ENV_BRIDGE_ROOT: &str = "AEGIS_DOCK_BRIDGE_ROOT";
pub const ENV_ENABLE_SELFTEST: &str = "AEGIS_DOCK_ENABLE_SELFTEST";
pub const ENV_SELFTEST_ACTION_JSON: &str = "AEGIS_DOCK_SELFTEST_ACTION_JSON";
pub const ENV_SELFTEST_DIRECT_INTAKE: &str = "AEGIS_DOCK_SELFTEST_DIRECT_PLUGIN_INTAKE";

/// Post-page-ready self-test knobs.
#[derive(Debug, Clone, Default)]
pub struct SelftestConfig {
    pub enabled: bool,
    pub action_json: Option<String>,
    /// When set, the canned action is fed straight into the plugin intake
    /// instead of being routed through the dock page.
    pub direct_plugin_intake: bool,
}

/// Shim configuration. Environment-only: the shim persists nothing to disk.
#[derive(Debug, Clone, Default)]
pub struct ShimConfig {
    pub bridge_root: Option<PathBuf>,
    pub selftest: SelftestConfig,
}

impl ShimConfig {
    pub fn from_env() -> Self {
        Self {
            bridge_root: env::var(ENV_BRIDGE_ROOT)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            selftest: SelftestConfig {
                enabled: env_flag(ENV_ENABLE_SELFTEST),
                action_json: env::var(ENV_SELFTEST_ACTION_JSON)
                    .ok()
                    .filter(|v| !v.is_empty()),
                // Any non-empty value except a literal "0" opts in.
                direct_plugin_intake: env::var(ENV_SELFTEST_DIRECT_INTAKE)
                    .map(|v| !v.is_empty() && v != "0")
                    .unwrap_or(false),
            },
        }
    }
}

/// Truthiness for boolean env values: set, non-empty, and not an explicit off
/// word (`0`, `false`, `no`, `off`, case-insensitive).
pub fn env_value_enabled(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    let lowered = value.to_ascii_lowercase();
    !matches!(lowered.as_str(), "0" | "false" | "no" | "off")
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| env_value_enabled(&v)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_truthiness_matches_off_words() {
        for off in ["", "0", "false", "no", "off", "FALSE", "Off", "NO"] {
            assert!(!env_value_enabled(off), "{off:?} should be off");
        }
        for on in ["1", "true", "yes", "on", "anything"] {
            assert!(env_value_enabled(on), "{on:?} should be on");
        }
    }

    #[test]
    fn from_env_reads_selftest_triple() {
        env::set_var(ENV_ENABLE_SELFTEST, "1");
        env::set_var(ENV_SELFTEST_ACTION_JSON, r#"{"type":"request_status"}"#);
        env::set_var(ENV_SELFTEST_DIRECT_INTAKE, "1");
        env::set_var(ENV_BRIDGE_ROOT, "/opt/aegis/dock");

        let config = ShimConfig::from_env();
        assert!(config.selftest.enabled);
        assert_eq!(
            config.selftest.action_json.as_deref(),
            Some(r#"{"type":"request_status"}"#)
        );
        assert!(config.selftest.direct_plugin_intake);
        assert_eq!(
            config.bridge_root.as_deref(),
            Some(std::path::Path::new("/opt/aegis/dock"))
        );

        env::set_var(ENV_SELFTEST_DIRECT_INTAKE, "0");
        assert!(!ShimConfig::from_env().selftest.direct_plugin_intake);

        env::remove_var(ENV_ENABLE_SELFTEST);
        env::remove_var(ENV_SELFTEST_ACTION_JSON);
        env::remove_var(ENV_SELFTEST_DIRECT_INTAKE);
        env::remove_var(ENV_BRIDGE_ROOT);
        let config = ShimConfig::from_env();
        assert!(!config.selftest.enabled);
        assert!(config.bridge_root.is_none());
    }
}
