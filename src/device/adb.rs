//! Android backend over the ADB command-line bridge.
//!
//! Text input goes through the ADBKeyboard IME (base64 broadcast), which is
//! the only reliable way to inject non-ASCII and multi-line text in one
//! logical edit.

use async_trait::async_trait;
use base64::Engine as _;

use crate::apps;
use crate::config::TimingConfig;
use crate::device::{settle, BackendKind, DeviceCapabilities, ShellRunner};
use crate::errors::{PilotError, PilotResult};

const ADB_KEYBOARD_IME: &str = "com.android.adbkeyboard/.AdbIME";
const FOREGROUND_RETRIES: u32 = 3;

pub struct AdbDevice {
    runner: ShellRunner,
    timing: TimingConfig,
}

impl AdbDevice {
    pub fn new(device_id: Option<String>, timing: TimingConfig) -> Self {
        let base_args = match device_id {
            Some(id) => vec!["-s".to_string(), id],
            None => Vec::new(),
        };
        Self {
            runner: ShellRunner::new("adb", base_args, timing.command_timeout()),
            timing,
        }
    }

    async fn try_foreground(&self) -> PilotResult<Option<String>> {
        let output = self.runner.capture(&["shell", "dumpsys", "window"]).await?;
        if output.is_empty() {
            return Ok(None);
        }
        for line in output.lines() {
            if line.contains("mCurrentFocus") || line.contains("mFocusedApp") {
                if let Some(entry) = apps::match_identifier(line) {
                    return Ok(Some(entry.name.to_string()));
                }
            }
        }
        Ok(Some("System Home".to_string()))
    }
}

#[async_trait]
impl DeviceCapabilities for AdbDevice {
    fn backend(&self) -> BackendKind {
        BackendKind::Adb
    }

    async fn tap(&self, x: i32, y: i32) -> PilotResult<()> {
        self.runner
            .run(&["shell", "input", "tap", &x.to_string(), &y.to_string()])
            .await?;
        settle(self.timing.tap_delay).await;
        Ok(())
    }

    async fn double_tap(&self, x: i32, y: i32) -> PilotResult<()> {
        let (xs, ys) = (x.to_string(), y.to_string());
        self.runner.run(&["shell", "input", "tap", &xs, &ys]).await?;
        settle(self.timing.double_tap_interval).await;
        self.runner.run(&["shell", "input", "tap", &xs, &ys]).await?;
        settle(self.timing.double_tap_delay).await;
        Ok(())
    }

    async fn long_press(&self, x: i32, y: i32, duration_ms: u32) -> PilotResult<()> {
        // A zero-distance swipe held for the duration.
        let (xs, ys) = (x.to_string(), y.to_string());
        self.runner
            .run(&[
                "shell",
                "input",
                "swipe",
                &xs,
                &ys,
                &xs,
                &ys,
                &duration_ms.to_string(),
            ])
            .await?;
        settle(self.timing.long_press_delay).await;
        Ok(())
    }

    async fn swipe(&self, start: (i32, i32), end: (i32, i32), duration_ms: u32) -> PilotResult<()> {
        self.runner
            .run(&[
                "shell",
                "input",
                "swipe",
                &start.0.to_string(),
                &start.1.to_string(),
                &end.0.to_string(),
                &end.1.to_string(),
                &duration_ms.to_string(),
            ])
            .await?;
        settle(self.timing.swipe_delay).await;
        Ok(())
    }

    async fn back(&self) -> PilotResult<()> {
        self.runner.run(&["shell", "input", "keyevent", "4"]).await?;
        settle(self.timing.back_delay).await;
        Ok(())
    }

    async fn home(&self) -> PilotResult<()> {
        self.runner
            .run(&["shell", "input", "keyevent", "KEYCODE_HOME"])
            .await?;
        settle(self.timing.home_delay).await;
        Ok(())
    }

    async fn launch_app(&self, app_name: &str) -> PilotResult<bool> {
        let Some(package) =
            apps::lookup(app_name).and_then(|e| e.identifier_for(BackendKind::Adb))
        else {
            return Ok(false);
        };
        self.runner
            .run(&[
                "shell",
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ])
            .await?;
        settle(self.timing.launch_delay).await;
        Ok(true)
    }

    async fn type_text(&self, text: &str) -> PilotResult<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
        self.runner
            .run(&[
                "shell",
                "am",
                "broadcast",
                "-a",
                "ADB_INPUT_B64",
                "--es",
                "msg",
                &encoded,
            ])
            .await
    }

    async fn clear_text(&self) -> PilotResult<()> {
        self.runner
            .run(&["shell", "am", "broadcast", "-a", "ADB_CLEAR_TEXT"])
            .await
    }

    async fn detect_and_set_automation_keyboard(&self) -> PilotResult<Option<String>> {
        let installed = self.runner.capture(&["shell", "ime", "list", "-s"]).await?;
        if !installed.contains("com.android.adbkeyboard") {
            return Err(PilotError::DeviceCommand(
                "ADBKeyboard IME is not installed on the device".into(),
            ));
        }
        let current = self
            .runner
            .capture(&["shell", "settings", "get", "secure", "default_input_method"])
            .await?;
        self.runner
            .run(&["shell", "ime", "set", ADB_KEYBOARD_IME])
            .await?;
        let prior = (!current.is_empty() && current != "null" && current != ADB_KEYBOARD_IME)
            .then_some(current);
        Ok(prior)
    }

    async fn restore_keyboard(&self, ime: &str) -> PilotResult<()> {
        self.runner.run(&["shell", "ime", "set", ime]).await
    }

    async fn screenshot(&self) -> PilotResult<Vec<u8>> {
        let output = self.runner.output(&["exec-out", "screencap", "-p"]).await?;
        if !output.status.success() || output.stdout.is_empty() {
            return Err(PilotError::DeviceCommand(format!(
                "screencap exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn foreground_app(&self) -> PilotResult<String> {
        let mut last_error = String::from("no output from dumpsys window");
        for attempt in 0..FOREGROUND_RETRIES {
            match self.try_foreground().await {
                Ok(Some(name)) => return Ok(name),
                Ok(None) => {
                    last_error = "no output from dumpsys window (stdout is empty)".into();
                    if attempt + 1 < FOREGROUND_RETRIES {
                        settle(0.5).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "foreground app query failed");
                    last_error = e.to_string();
                    if attempt + 1 < FOREGROUND_RETRIES {
                        settle(1.0).await;
                    }
                }
            }
        }
        Err(PilotError::Retrieval {
            attempts: FOREGROUND_RETRIES,
            last_error,
        })
    }

    async fn screen_size(&self) -> PilotResult<(u32, u32)> {
        // "Physical size: 1080x2400", possibly followed by an override line
        // that takes precedence.
        let output = self.runner.capture(&["shell", "wm", "size"]).await?;
        let mut size = None;
        for line in output.lines() {
            if let Some(rest) = line.split(": ").nth(1) {
                if let Some((w, h)) = rest.trim().split_once('x') {
                    if let (Ok(w), Ok(h)) = (w.parse(), h.parse()) {
                        size = Some((w, h));
                    }
                }
            }
        }
        size.ok_or_else(|| {
            PilotError::DeviceCommand(format!("could not parse screen size from: {output}"))
        })
    }

    async fn list_devices(&self) -> PilotResult<Vec<String>> {
        let output = self.runner.capture(&["devices"]).await?;
        Ok(output
            .lines()
            .skip(1)
            .filter(|line| line.ends_with("device"))
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect())
    }
}
