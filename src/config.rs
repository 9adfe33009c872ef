use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{BackendKind, DeviceHandle};
use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub device: DeviceConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    /// Optional API key stored in config.toml (falls back to env var PHONEPILOT_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl ModelConfig {
    pub fn resolve_api_key(&self) -> String {
        std::env::var("PHONEPILOT_API_KEY")
            .ok()
            .or_else(|| self.api_key.clone())
            .unwrap_or_default()
    }
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub backend: BackendKind,
    /// Transport-level device selector (ADB serial, HDC connect key, iOS
    /// UDID). Absent means the sole/default attached device.
    #[serde(default)]
    pub device_id: Option<String>,
}

impl DeviceConfig {
    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle {
            id: self.device_id.clone(),
            backend: self.backend,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_lang")]
    pub lang: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            lang: default_lang(),
        }
    }
}

fn default_max_steps() -> u32 {
    100
}

fn default_lang() -> String {
    "en".to_string()
}

/// Delays between device sub-steps. On-device UI state updates
/// asynchronously, so every mutating command is followed by a settle pause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "d_half")]
    pub tap_delay: f64,
    #[serde(default = "d_tenth")]
    pub double_tap_interval: f64,
    #[serde(default = "d_half")]
    pub double_tap_delay: f64,
    #[serde(default = "d_half")]
    pub long_press_delay: f64,
    #[serde(default = "d_one")]
    pub swipe_delay: f64,
    #[serde(default = "d_half")]
    pub back_delay: f64,
    #[serde(default = "d_half")]
    pub home_delay: f64,
    #[serde(default = "d_two")]
    pub launch_delay: f64,
    #[serde(default = "d_one")]
    pub keyboard_switch_delay: f64,
    #[serde(default = "d_half")]
    pub text_clear_delay: f64,
    #[serde(default = "d_half")]
    pub text_input_delay: f64,
    #[serde(default = "d_half")]
    pub keyboard_restore_delay: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            tap_delay: d_half(),
            double_tap_interval: d_tenth(),
            double_tap_delay: d_half(),
            long_press_delay: d_half(),
            swipe_delay: d_one(),
            back_delay: d_half(),
            home_delay: d_half(),
            launch_delay: d_two(),
            keyboard_switch_delay: d_one(),
            text_clear_delay: d_half(),
            text_input_delay: d_half(),
            keyboard_restore_delay: d_half(),
        }
    }
}

impl TimingConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// All settle delays zeroed, for tests that drive the dispatcher or the
    /// step loop against mocks.
    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        Self {
            command_timeout_secs: 1,
            tap_delay: 0.0,
            double_tap_interval: 0.0,
            double_tap_delay: 0.0,
            long_press_delay: 0.0,
            swipe_delay: 0.0,
            back_delay: 0.0,
            home_delay: 0.0,
            launch_delay: 0.0,
            keyboard_switch_delay: 0.0,
            text_clear_delay: 0.0,
            text_input_delay: 0.0,
            keyboard_restore_delay: 0.0,
        }
    }
}

fn default_command_timeout() -> u64 {
    10
}

fn d_tenth() -> f64 {
    0.1
}

fn d_half() -> f64 {
    0.5
}

fn d_one() -> f64 {
    1.0
}

fn d_two() -> f64 {
    2.0
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        backend = ?config.device.backend,
        model = %config.model.model,
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> PilotResult<()> {
    let path = resolve_config_path()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [model]
            base_url = "http://localhost:8000/v1/chat/completions"
            model = "autoglm-phone"

            [device]
            backend = "adb"
            "#,
        )
        .unwrap();
        assert_eq!(config.model.max_retries, 3);
        assert_eq!(config.agent.max_steps, 100);
        assert_eq!(config.timing.command_timeout_secs, 10);
        assert!(config.device.device_id.is_none());
        assert_eq!(config.device.handle().backend, BackendKind::Adb);
    }

    #[test]
    fn timing_overrides_apply() {
        let config: AppConfig = toml::from_str(
            r#"
            [model]
            base_url = "http://localhost:8000/v1/chat/completions"
            model = "autoglm-phone"

            [device]
            backend = "hdc"
            device_id = "A1B2C3"

            [timing]
            keyboard_switch_delay = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.timing.keyboard_switch_delay, 2.5);
        assert_eq!(config.timing.tap_delay, 0.5);
        assert_eq!(config.device.handle().id.as_deref(), Some("A1B2C3"));
    }
}
