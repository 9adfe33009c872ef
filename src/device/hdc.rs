//! HarmonyOS backend over the HDC command-line bridge.
//!
//! Input goes through `uitest uiInput`; key codes follow the HarmonyOS
//! KeyCode table (Home=1, Back=2, Enter=2054, Ctrl=2072, A=2017,
//! Delete=2055).

use async_trait::async_trait;

use crate::apps;
use crate::config::TimingConfig;
use crate::device::{settle, BackendKind, DeviceCapabilities, ShellRunner};
use crate::errors::{PilotError, PilotResult};

const KEY_HOME: &str = "1";
const KEY_BACK: &str = "2";
const KEY_CTRL: &str = "2072";
const KEY_A: &str = "2017";
const KEY_DELETE: &str = "2055";
const FOREGROUND_RETRIES: u32 = 3;

pub struct HdcDevice {
    runner: ShellRunner,
    timing: TimingConfig,
}

impl HdcDevice {
    pub fn new(device_id: Option<String>, timing: TimingConfig) -> Self {
        let base_args = match device_id {
            Some(id) => vec!["-t".to_string(), id],
            None => Vec::new(),
        };
        Self {
            runner: ShellRunner::new("hdc", base_args, timing.command_timeout()),
            timing,
        }
    }

    async fn ui_input(&self, args: &[&str]) -> PilotResult<()> {
        let mut full = vec!["shell", "uitest", "uiInput"];
        full.extend_from_slice(args);
        self.runner.run(&full).await
    }

    async fn try_foreground(&self) -> PilotResult<Option<String>> {
        let output = self
            .runner
            .capture(&["shell", "aa", "dump", "-a"])
            .await?;
        if output.is_empty() {
            return Ok(None);
        }
        for line in output.lines() {
            if let Some(entry) = apps::match_identifier(line) {
                return Ok(Some(entry.name.to_string()));
            }
        }
        Ok(Some("System Home".to_string()))
    }
}

#[async_trait]
impl DeviceCapabilities for HdcDevice {
    fn backend(&self) -> BackendKind {
        BackendKind::Hdc
    }

    async fn tap(&self, x: i32, y: i32) -> PilotResult<()> {
        self.ui_input(&["click", &x.to_string(), &y.to_string()])
            .await?;
        settle(self.timing.tap_delay).await;
        Ok(())
    }

    async fn double_tap(&self, x: i32, y: i32) -> PilotResult<()> {
        self.ui_input(&["doubleClick", &x.to_string(), &y.to_string()])
            .await?;
        settle(self.timing.double_tap_delay).await;
        Ok(())
    }

    async fn long_press(&self, x: i32, y: i32, _duration_ms: u32) -> PilotResult<()> {
        // uiInput has no press-duration knob; longClick is the native hold.
        self.ui_input(&["longClick", &x.to_string(), &y.to_string()])
            .await?;
        settle(self.timing.long_press_delay).await;
        Ok(())
    }

    async fn swipe(&self, start: (i32, i32), end: (i32, i32), duration_ms: u32) -> PilotResult<()> {
        // Convert the duration into the pixel-per-second speed uiInput wants.
        let dx = (end.0 - start.0) as f64;
        let dy = (end.1 - start.1) as f64;
        let distance = (dx * dx + dy * dy).sqrt().max(1.0);
        let speed = (distance / (duration_ms.max(1) as f64 / 1000.0)) as i64;
        let speed = speed.clamp(200, 40_000).to_string();
        self.ui_input(&[
            "swipe",
            &start.0.to_string(),
            &start.1.to_string(),
            &end.0.to_string(),
            &end.1.to_string(),
            &speed,
        ])
        .await?;
        settle(self.timing.swipe_delay).await;
        Ok(())
    }

    async fn back(&self) -> PilotResult<()> {
        self.ui_input(&["keyEvent", KEY_BACK]).await?;
        settle(self.timing.back_delay).await;
        Ok(())
    }

    async fn home(&self) -> PilotResult<()> {
        self.ui_input(&["keyEvent", KEY_HOME]).await?;
        settle(self.timing.home_delay).await;
        Ok(())
    }

    async fn launch_app(&self, app_name: &str) -> PilotResult<bool> {
        let Some(bundle) = apps::lookup(app_name).and_then(|e| e.identifier_for(BackendKind::Hdc))
        else {
            return Ok(false);
        };
        self.runner
            .run(&["shell", "aa", "start", "-b", bundle, "-a", "EntryAbility"])
            .await?;
        settle(self.timing.launch_delay).await;
        Ok(true)
    }

    async fn type_text(&self, text: &str) -> PilotResult<()> {
        // inputText focuses the given point first; the field is already
        // focused by the preceding tap, so re-click its center is harmless.
        let (w, h) = self.screen_size().await?;
        self.ui_input(&[
            "inputText",
            &(w / 2).to_string(),
            &(h / 2).to_string(),
            text,
        ])
        .await
    }

    async fn clear_text(&self) -> PilotResult<()> {
        // Select-all then delete.
        self.ui_input(&["keyEvent", KEY_CTRL, KEY_A]).await?;
        self.ui_input(&["keyEvent", KEY_DELETE]).await
    }

    async fn detect_and_set_automation_keyboard(&self) -> PilotResult<Option<String>> {
        // uiInput injects text below the IME layer; nothing to switch.
        Ok(None)
    }

    async fn restore_keyboard(&self, _ime: &str) -> PilotResult<()> {
        Ok(())
    }

    async fn screenshot(&self) -> PilotResult<Vec<u8>> {
        let remote = format!("/data/local/tmp/phonepilot_{}.jpeg", uuid::Uuid::new_v4());
        let local = std::env::temp_dir().join(format!("phonepilot_{}.jpeg", uuid::Uuid::new_v4()));
        self.runner
            .capture(&["shell", "snapshot_display", "-f", &remote])
            .await?;
        let local_str = local.to_string_lossy().to_string();
        self.runner.capture(&["file", "recv", &remote, &local_str]).await?;
        let _ = self.runner.run(&["shell", "rm", "-f", &remote]).await;
        let bytes = std::fs::read(&local)?;
        let _ = std::fs::remove_file(&local);
        if bytes.is_empty() {
            return Err(PilotError::DeviceCommand(
                "snapshot_display produced an empty image".into(),
            ));
        }
        Ok(bytes)
    }

    async fn foreground_app(&self) -> PilotResult<String> {
        let mut last_error = String::from("no output from aa dump");
        for attempt in 0..FOREGROUND_RETRIES {
            match self.try_foreground().await {
                Ok(Some(name)) => return Ok(name),
                Ok(None) => {
                    last_error = "no output from aa dump (stdout is empty)".into();
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
        let output = self
            .runner
            .capture(&["shell", "hidumper", "-s", "RenderService", "-a", "screen"])
            .await?;
        parse_resolution(&output).ok_or_else(|| {
            PilotError::DeviceCommand(format!("could not parse screen size from: {output}"))
        })
    }

    async fn list_devices(&self) -> PilotResult<Vec<String>> {
        let output = self.runner.capture(&["list", "targets"]).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.contains("Empty"))
            .map(str::to_string)
            .collect())
    }
}

/// Finds the first `<width>x<height>` token in hidumper output.
fn parse_resolution(output: &str) -> Option<(u32, u32)> {
    for token in output.split(|c: char| !c.is_ascii_digit() && c != 'x') {
        if let Some((w, h)) = token.split_once('x') {
            if let (Ok(w), Ok(h)) = (w.parse::<u32>(), h.parse::<u32>()) {
                if w > 0 && h > 0 {
                    return Some((w, h));
                }
            }
        }
    }
    None
}
