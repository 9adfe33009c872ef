//! Shared mocks for session and registry tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::device::{BackendKind, DeviceCapabilities};
use crate::errors::{PilotError, PilotResult};
use crate::model::client::split_response;
use crate::model::{ChatMessage, ModelProvider, ModelResponse};

/// In-memory device that records mutating calls and answers observations
/// with fixed data (1080×2400 panel, home screen).
#[derive(Default)]
pub(crate) struct RecordingDevice {
    calls: Mutex<Vec<String>>,
}

impl RecordingDevice {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DeviceCapabilities for RecordingDevice {
    fn backend(&self) -> BackendKind {
        BackendKind::Adb
    }

    async fn tap(&self, x: i32, y: i32) -> PilotResult<()> {
        self.record(format!("tap {x} {y}"));
        Ok(())
    }

    async fn double_tap(&self, x: i32, y: i32) -> PilotResult<()> {
        self.record(format!("double_tap {x} {y}"));
        Ok(())
    }

    async fn long_press(&self, x: i32, y: i32, duration_ms: u32) -> PilotResult<()> {
        self.record(format!("long_press {x} {y} {duration_ms}"));
        Ok(())
    }

    async fn swipe(&self, start: (i32, i32), end: (i32, i32), duration_ms: u32) -> PilotResult<()> {
        self.record(format!(
            "swipe {},{} -> {},{} in {duration_ms}",
            start.0, start.1, end.0, end.1
        ));
        Ok(())
    }

    async fn back(&self) -> PilotResult<()> {
        self.record("back".into());
        Ok(())
    }

    async fn home(&self) -> PilotResult<()> {
        self.record("home".into());
        Ok(())
    }

    async fn launch_app(&self, app_name: &str) -> PilotResult<bool> {
        self.record(format!("launch {app_name}"));
        Ok(true)
    }

    async fn type_text(&self, text: &str) -> PilotResult<()> {
        self.record(format!("type {text}"));
        Ok(())
    }

    async fn clear_text(&self) -> PilotResult<()> {
        self.record("clear".into());
        Ok(())
    }

    async fn detect_and_set_automation_keyboard(&self) -> PilotResult<Option<String>> {
        Ok(None)
    }

    async fn restore_keyboard(&self, _ime: &str) -> PilotResult<()> {
        Ok(())
    }

    async fn screenshot(&self) -> PilotResult<Vec<u8>> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn foreground_app(&self) -> PilotResult<String> {
        Ok("System Home".into())
    }

    async fn screen_size(&self) -> PilotResult<(u32, u32)> {
        Ok((1080, 2400))
    }

    async fn list_devices(&self) -> PilotResult<Vec<String>> {
        Ok(vec![])
    }
}

/// Model stub replaying a fixed script; the last entry repeats forever so
/// loops can be driven past the script length.
pub(crate) struct ScriptedModel {
    responses: Vec<String>,
    index: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl ScriptedModel {
    pub(crate) fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            index: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            responses: Vec::new(),
            index: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: true,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    async fn request(&self, _messages: &[ChatMessage]) -> PilotResult<ModelResponse> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(PilotError::Model("model endpoint unreachable".into()));
        }
        let index = self.index.fetch_add(1, Ordering::SeqCst);
        let raw = self
            .responses
            .get(index.min(self.responses.len().saturating_sub(1)))
            .ok_or_else(|| PilotError::Model("scripted model has no responses".into()))?;
        Ok(split_response(raw))
    }
}
