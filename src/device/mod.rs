//! Backend-agnostic device operations.
//!
//! Each backend drives its platform through a command-line bridge (`adb`,
//! `hdc`, `idb`). The backend is chosen once per session; the dispatcher and
//! step loop only ever see [`DeviceCapabilities`].

pub mod adb;
pub mod hdc;
pub mod ios;

use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::TimingConfig;
use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Adb,
    Hdc,
    Ios,
}

/// Identifies the transport target; resolved once per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub id: Option<String>,
    pub backend: BackendKind,
}

impl DeviceHandle {
    /// Registry key. Absent ids collapse onto the backend's default slot so
    /// "the sole attached device" is still a single handle.
    pub fn key(&self) -> String {
        format!(
            "{:?}:{}",
            self.backend,
            self.id.as_deref().unwrap_or("default")
        )
    }
}

#[async_trait]
pub trait DeviceCapabilities: Send + Sync {
    fn backend(&self) -> BackendKind;

    async fn tap(&self, x: i32, y: i32) -> PilotResult<()>;
    async fn double_tap(&self, x: i32, y: i32) -> PilotResult<()>;
    async fn long_press(&self, x: i32, y: i32, duration_ms: u32) -> PilotResult<()>;
    async fn swipe(&self, start: (i32, i32), end: (i32, i32), duration_ms: u32) -> PilotResult<()>;
    async fn back(&self) -> PilotResult<()>;
    async fn home(&self) -> PilotResult<()>;

    /// Launches an app by registry name. `Ok(false)` means the name (or its
    /// identifier for this backend) is unknown.
    async fn launch_app(&self, app_name: &str) -> PilotResult<bool>;

    async fn type_text(&self, text: &str) -> PilotResult<()>;
    async fn clear_text(&self) -> PilotResult<()>;

    /// Switches to the automation input method, returning the previously
    /// active one so it can be restored. `Ok(None)` when the backend has no
    /// keyboard switching concept.
    async fn detect_and_set_automation_keyboard(&self) -> PilotResult<Option<String>>;
    async fn restore_keyboard(&self, ime: &str) -> PilotResult<()>;

    async fn screenshot(&self) -> PilotResult<Vec<u8>>;

    /// Resolves the foreground app to a registry display name, retrying a
    /// bounded number of times before raising `PilotError::Retrieval`.
    async fn foreground_app(&self) -> PilotResult<String>;

    async fn screen_size(&self) -> PilotResult<(u32, u32)>;
    async fn list_devices(&self) -> PilotResult<Vec<String>>;
}

pub fn create_device(handle: &DeviceHandle, timing: &TimingConfig) -> Arc<dyn DeviceCapabilities> {
    match handle.backend {
        BackendKind::Adb => Arc::new(adb::AdbDevice::new(handle.id.clone(), timing.clone())),
        BackendKind::Hdc => Arc::new(hdc::HdcDevice::new(handle.id.clone(), timing.clone())),
        BackendKind::Ios => Arc::new(ios::IosDevice::new(handle.id.clone(), timing.clone())),
    }
}

/// Runs one bridge command with a per-call timeout. All device I/O funnels
/// through here so every backend gets identical timeout and error shaping.
pub(crate) struct ShellRunner {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl ShellRunner {
    pub(crate) fn new(program: &str, base_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            base_args,
            timeout,
        }
    }

    pub(crate) async fn output(&self, args: &[&str]) -> PilotResult<Output> {
        let mut command = Command::new(&self.program);
        command.args(&self.base_args).args(args);
        tracing::debug!(program = %self.program, ?args, "running bridge command");

        let result = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                PilotError::DeviceCommand(format!(
                    "{} {} timed out after {:?}",
                    self.program,
                    args.join(" "),
                    self.timeout
                ))
            })?;
        result.map_err(|e| {
            PilotError::DeviceCommand(format!("{} {}: {e}", self.program, args.join(" ")))
        })
    }

    /// Runs the command and returns trimmed stdout, failing on a non-zero
    /// exit status.
    pub(crate) async fn capture(&self, args: &[&str]) -> PilotResult<String> {
        let output = self.output(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PilotError::DeviceCommand(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Fire-and-forget variant for state-mutating input commands: transport
    /// errors surface, exit status is not inspected.
    pub(crate) async fn run(&self, args: &[&str]) -> PilotResult<()> {
        self.output(args).await.map(|_| ())
    }
}

pub(crate) async fn settle(seconds: f64) {
    if seconds > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    }
}
