//! iOS backend over the `idb` command-line bridge.

use async_trait::async_trait;

use crate::apps;
use crate::config::TimingConfig;
use crate::device::{settle, BackendKind, DeviceCapabilities, ShellRunner};
use crate::errors::{PilotError, PilotResult};

const FOREGROUND_RETRIES: u32 = 3;

pub struct IosDevice {
    runner: ShellRunner,
    timing: TimingConfig,
}

impl IosDevice {
    pub fn new(device_id: Option<String>, timing: TimingConfig) -> Self {
        let base_args = match device_id {
            Some(id) => vec!["--udid".to_string(), id],
            None => Vec::new(),
        };
        Self {
            runner: ShellRunner::new("idb", base_args, timing.command_timeout()),
            timing,
        }
    }

    async fn try_foreground(&self) -> PilotResult<Option<String>> {
        let output = self.runner.capture(&["list-apps"]).await?;
        if output.is_empty() {
            return Ok(None);
        }
        for line in output.lines() {
            if line.contains("Running") {
                if let Some(entry) = apps::match_identifier(line) {
                    return Ok(Some(entry.name.to_string()));
                }
            }
        }
        Ok(Some("System Home".to_string()))
    }
}

#[async_trait]
impl DeviceCapabilities for IosDevice {
    fn backend(&self) -> BackendKind {
        BackendKind::Ios
    }

    async fn tap(&self, x: i32, y: i32) -> PilotResult<()> {
        self.runner
            .run(&["ui", "tap", &x.to_string(), &y.to_string()])
            .await?;
        settle(self.timing.tap_delay).await;
        Ok(())
    }

    async fn double_tap(&self, x: i32, y: i32) -> PilotResult<()> {
        let (xs, ys) = (x.to_string(), y.to_string());
        self.runner.run(&["ui", "tap", &xs, &ys]).await?;
        settle(self.timing.double_tap_interval).await;
        self.runner.run(&["ui", "tap", &xs, &ys]).await?;
        settle(self.timing.double_tap_delay).await;
        Ok(())
    }

    async fn long_press(&self, x: i32, y: i32, duration_ms: u32) -> PilotResult<()> {
        let duration_secs = format!("{:.1}", duration_ms as f64 / 1000.0);
        self.runner
            .run(&[
                "ui",
                "tap",
                &x.to_string(),
                &y.to_string(),
                "--duration",
                &duration_secs,
            ])
            .await?;
        settle(self.timing.long_press_delay).await;
        Ok(())
    }

    async fn swipe(&self, start: (i32, i32), end: (i32, i32), duration_ms: u32) -> PilotResult<()> {
        let duration_secs = format!("{:.1}", duration_ms as f64 / 1000.0);
        self.runner
            .run(&[
                "ui",
                "swipe",
                &start.0.to_string(),
                &start.1.to_string(),
                &end.0.to_string(),
                &end.1.to_string(),
                "--duration",
                &duration_secs,
            ])
            .await?;
        settle(self.timing.swipe_delay).await;
        Ok(())
    }

    async fn back(&self) -> PilotResult<()> {
        // iOS has no system back key; an edge swipe from the left is the
        // platform's back gesture.
        let (_, h) = self.screen_size().await?;
        let y = (h / 2) as i32;
        self.swipe((5, y), (300, y), 300).await?;
        settle(self.timing.back_delay).await;
        Ok(())
    }

    async fn home(&self) -> PilotResult<()> {
        self.runner.run(&["ui", "button", "HOME"]).await?;
        settle(self.timing.home_delay).await;
        Ok(())
    }

    async fn launch_app(&self, app_name: &str) -> PilotResult<bool> {
        let Some(bundle) = apps::lookup(app_name).and_then(|e| e.identifier_for(BackendKind::Ios))
        else {
            return Ok(false);
        };
        self.runner.run(&["launch", bundle]).await?;
        settle(self.timing.launch_delay).await;
        Ok(true)
    }

    async fn type_text(&self, text: &str) -> PilotResult<()> {
        self.runner.run(&["ui", "text", text]).await
    }

    async fn clear_text(&self) -> PilotResult<()> {
        // idb has no field-clear primitive; typing appends to whatever is
        // in the field.
        tracing::debug!("clear_text is a no-op on the iOS bridge");
        Ok(())
    }

    async fn detect_and_set_automation_keyboard(&self) -> PilotResult<Option<String>> {
        Ok(None)
    }

    async fn restore_keyboard(&self, _ime: &str) -> PilotResult<()> {
        Ok(())
    }

    async fn screenshot(&self) -> PilotResult<Vec<u8>> {
        let local = std::env::temp_dir().join(format!("phonepilot_{}.png", uuid::Uuid::new_v4()));
        let local_str = local.to_string_lossy().to_string();
        self.runner.capture(&["screenshot", &local_str]).await?;
        let bytes = std::fs::read(&local)?;
        let _ = std::fs::remove_file(&local);
        if bytes.is_empty() {
            return Err(PilotError::DeviceCommand(
                "idb screenshot produced an empty image".into(),
            ));
        }
        Ok(bytes)
    }

    async fn foreground_app(&self) -> PilotResult<String> {
        let mut last_error = String::from("no output from list-apps");
        for attempt in 0..FOREGROUND_RETRIES {
            match self.try_foreground().await {
                Ok(Some(name)) => return Ok(name),
                Ok(None) => {
                    last_error = "no output from list-apps (stdout is empty)".into();
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
        let output = self.runner.capture(&["describe", "--json"]).await?;
        let value: serde_json::Value = serde_json::from_str(&output)?;
        let dims = &value["screen_dimensions"];
        let w = dims["width"].as_u64().unwrap_or(0) as u32;
        let h = dims["height"].as_u64().unwrap_or(0) as u32;
        if w == 0 || h == 0 {
            return Err(PilotError::DeviceCommand(
                "idb describe reported no screen dimensions".into(),
            ));
        }
        Ok((w, h))
    }

    async fn list_devices(&self) -> PilotResult<Vec<String>> {
        let output = self.runner.capture(&["list-targets"]).await?;
        Ok(output
            .lines()
            .filter(|line| line.contains("Booted"))
            .filter_map(|line| line.split('|').nth(1))
            .map(|udid| udid.trim().to_string())
            .filter(|udid| !udid.is_empty())
            .collect())
    }
}
