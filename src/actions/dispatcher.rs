//! Maps parsed actions onto device operations.
//!
//! The dispatcher is the hard isolation boundary of the step loop: handler
//! errors of any kind are folded into a failed [`ActionResult`], so nothing
//! below here can terminate an automation session involuntarily.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use crate::actions::coords;
use crate::actions::types::{Action, ActionName, ActionResult};
use crate::config::TimingConfig;
use crate::device::DeviceCapabilities;
use crate::errors::{PilotError, PilotResult};

const DEFAULT_LONG_PRESS_MS: u32 = 3000;
const MAX_WAIT_SECS: f64 = 60.0;

/// Returns true to proceed with a sensitive operation, false to cancel.
pub type ConfirmationCallback = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Blocks until the human has completed the handed-over step (login, captcha).
pub type TakeoverCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub struct ActionDispatcher {
    device: Arc<dyn DeviceCapabilities>,
    timing: TimingConfig,
    confirm: ConfirmationCallback,
    takeover: TakeoverCallback,
    notes: Vec<String>,
}

impl ActionDispatcher {
    pub fn new(device: Arc<dyn DeviceCapabilities>, timing: TimingConfig) -> Self {
        Self {
            device,
            timing,
            confirm: Arc::new(default_confirmation),
            takeover: Arc::new(default_takeover),
            notes: Vec::new(),
        }
    }

    pub fn with_confirmation(mut self, callback: ConfirmationCallback) -> Self {
        self.confirm = callback;
        self
    }

    pub fn with_takeover(mut self, callback: TakeoverCallback) -> Self {
        self.takeover = callback;
        self
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn clear_notes(&mut self) {
        self.notes.clear();
    }

    pub async fn dispatch(
        &mut self,
        action: &Action,
        screen_width: u32,
        screen_height: u32,
    ) -> ActionResult {
        match action {
            Action::Finish { message } => ActionResult::finished(Some(message.clone())),
            Action::Do { name, .. } => {
                let Some(kind) = ActionName::parse(name) else {
                    return ActionResult::failure(format!("Unknown action: {name}"));
                };
                match self
                    .run_handler(kind, action, screen_width, screen_height)
                    .await
                {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(action = %action, error = %e, "action handler failed");
                        ActionResult::failure(format!("Action failed: {e}"))
                    }
                }
            }
        }
    }

    async fn run_handler(
        &mut self,
        kind: ActionName,
        action: &Action,
        width: u32,
        height: u32,
    ) -> PilotResult<ActionResult> {
        match kind {
            ActionName::Launch => self.handle_launch(action).await,
            ActionName::Tap => self.handle_tap(action, width, height).await,
            ActionName::Type | ActionName::TypeName => self.handle_type(action).await,
            ActionName::Swipe => self.handle_swipe(action, width, height).await,
            ActionName::Back => {
                self.device.back().await?;
                Ok(ActionResult::ok())
            }
            ActionName::Home => {
                self.device.home().await?;
                Ok(ActionResult::ok())
            }
            ActionName::DoubleTap => self.handle_double_tap(action, width, height).await,
            ActionName::LongPress => self.handle_long_press(action, width, height).await,
            ActionName::Wait => self.handle_wait(action).await,
            ActionName::Takeover => self.handle_takeover(action).await,
            ActionName::Note => Ok(self.handle_note(action)),
            ActionName::CallApi => Ok(ActionResult::ok_with(
                "API call requested; external follow-up expected",
            )),
            ActionName::Interact => Ok(ActionResult::ok_with("User interaction required")),
        }
    }

    async fn handle_launch(&self, action: &Action) -> PilotResult<ActionResult> {
        let Some(app) = action.str_param("app") else {
            return Ok(ActionResult::failure("No app name specified"));
        };
        if self.device.launch_app(app).await? {
            Ok(ActionResult::ok())
        } else {
            Ok(ActionResult::failure(format!("App not found: {app}")))
        }
    }

    async fn handle_tap(&self, action: &Action, width: u32, height: u32) -> PilotResult<ActionResult> {
        let Some((nx, ny)) = action.point_param("element") else {
            return Ok(ActionResult::failure("No element coordinates"));
        };
        let (x, y) = coords::map_point(nx, ny, width, height);

        // A message on a Tap marks it as sensitive: the human decides
        // whether the sequence proceeds at all.
        if let Some(message) = action.str_param("message") {
            if !self.run_confirmation(message).await? {
                return Ok(ActionResult {
                    success: false,
                    should_finish: true,
                    message: Some("User cancelled sensitive operation".to_string()),
                    requires_confirmation: true,
                });
            }
            self.device.tap(x, y).await?;
            return Ok(ActionResult {
                requires_confirmation: true,
                ..ActionResult::ok()
            });
        }

        self.device.tap(x, y).await?;
        Ok(ActionResult::ok())
    }

    async fn handle_type(&self, action: &Action) -> PilotResult<ActionResult> {
        let text = action.str_param("text").unwrap_or_default().to_string();

        // Each sub-step is followed by a settle delay; the on-device IME and
        // field state update asynchronously.
        let prior_ime = self.device.detect_and_set_automation_keyboard().await?;
        sleep_secs(self.timing.keyboard_switch_delay).await;

        self.device.clear_text().await?;
        sleep_secs(self.timing.text_clear_delay).await;

        self.device.type_text(&text).await?;
        sleep_secs(self.timing.text_input_delay).await;

        if let Some(ime) = prior_ime {
            self.device.restore_keyboard(&ime).await?;
            sleep_secs(self.timing.keyboard_restore_delay).await;
        }

        Ok(ActionResult::ok())
    }

    async fn handle_swipe(
        &self,
        action: &Action,
        width: u32,
        height: u32,
    ) -> PilotResult<ActionResult> {
        let (Some(start), Some(end)) = (action.point_param("start"), action.point_param("end"))
        else {
            return Ok(ActionResult::failure("Missing swipe coordinates"));
        };
        let start = coords::map_point(start.0, start.1, width, height);
        let end = coords::map_point(end.0, end.1, width, height);
        let duration_ms = action
            .param("duration")
            .and_then(|v| v.as_int())
            .map(|ms| ms.max(1) as u32)
            .unwrap_or_else(|| coords::swipe_duration_ms(start, end));
        self.device.swipe(start, end, duration_ms).await?;
        Ok(ActionResult::ok())
    }

    async fn handle_double_tap(
        &self,
        action: &Action,
        width: u32,
        height: u32,
    ) -> PilotResult<ActionResult> {
        let Some((nx, ny)) = action.point_param("element") else {
            return Ok(ActionResult::failure("No element coordinates"));
        };
        let (x, y) = coords::map_point(nx, ny, width, height);
        self.device.double_tap(x, y).await?;
        Ok(ActionResult::ok())
    }

    async fn handle_long_press(
        &self,
        action: &Action,
        width: u32,
        height: u32,
    ) -> PilotResult<ActionResult> {
        let Some((nx, ny)) = action.point_param("element") else {
            return Ok(ActionResult::failure("No element coordinates"));
        };
        let (x, y) = coords::map_point(nx, ny, width, height);
        let duration_ms = action
            .param("duration")
            .and_then(|v| v.as_int())
            .map(|ms| ms.max(1) as u32)
            .unwrap_or(DEFAULT_LONG_PRESS_MS);
        self.device.long_press(x, y, duration_ms).await?;
        Ok(ActionResult::ok())
    }

    async fn handle_wait(&self, action: &Action) -> PilotResult<ActionResult> {
        let seconds = match action.param("duration") {
            Some(value) => parse_wait_seconds(value),
            None => 1.0,
        };
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(ActionResult::ok())
    }

    async fn handle_takeover(&self, action: &Action) -> PilotResult<ActionResult> {
        let message = action
            .str_param("message")
            .unwrap_or("User intervention required")
            .to_string();
        let callback = Arc::clone(&self.takeover);
        tokio::task::spawn_blocking(move || callback(&message))
            .await
            .map_err(|e| PilotError::SessionState(format!("takeover callback failed: {e}")))?;
        Ok(ActionResult::ok())
    }

    fn handle_note(&mut self, action: &Action) -> ActionResult {
        let Some(content) = action.str_param("content") else {
            return ActionResult::failure("Missing note content");
        };
        self.notes.push(content.to_string());
        let preview: String = content.chars().take(50).collect();
        ActionResult::ok_with(format!("Note saved: {preview}..."))
    }

    async fn run_confirmation(&self, message: &str) -> PilotResult<bool> {
        let callback = Arc::clone(&self.confirm);
        let message = message.to_string();
        tokio::task::spawn_blocking(move || callback(&message))
            .await
            .map_err(|e| PilotError::SessionState(format!("confirmation callback failed: {e}")))
    }
}

/// Accepts `"2 seconds"`, `"1.5"`, or a bare integer; anything unparsable
/// falls back to 1 second. Capped so a hallucinated duration cannot stall
/// the session for hours.
pub(crate) fn parse_wait_seconds(value: &crate::actions::types::ParamValue) -> f64 {
    use crate::actions::types::ParamValue;
    let seconds = match value {
        ParamValue::Int(n) => *n as f64,
        ParamValue::Str(s) => s.replace("seconds", "").trim().parse::<f64>().unwrap_or(1.0),
        ParamValue::IntList(_) => 1.0,
    };
    seconds.clamp(0.0, MAX_WAIT_SECS)
}

async fn sleep_secs(seconds: f64) {
    if seconds > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    }
}

fn default_confirmation(message: &str) -> bool {
    print!("Sensitive operation: {message}\nConfirm? (Y/N): ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    line.trim().eq_ignore_ascii_case("y")
}

fn default_takeover(message: &str) {
    println!("{message}\nPress Enter after completing manual operation...");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::actions::types::ParamValue;
    use crate::device::BackendKind;
    use crate::errors::PilotError;

    #[derive(Default)]
    struct MockDevice {
        calls: Mutex<Vec<String>>,
        fail_taps: AtomicBool,
    }

    impl MockDevice {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceCapabilities for MockDevice {
        fn backend(&self) -> BackendKind {
            BackendKind::Adb
        }

        async fn tap(&self, x: i32, y: i32) -> PilotResult<()> {
            if self.fail_taps.load(Ordering::SeqCst) {
                return Err(PilotError::DeviceCommand("input tap rejected".into()));
            }
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

        async fn swipe(
            &self,
            start: (i32, i32),
            end: (i32, i32),
            duration_ms: u32,
        ) -> PilotResult<()> {
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
            Ok(app_name == "WeChat")
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
            self.record("set_keyboard".into());
            Ok(Some("com.example/.PriorIme".into()))
        }

        async fn restore_keyboard(&self, ime: &str) -> PilotResult<()> {
            self.record(format!("restore_keyboard {ime}"));
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

    fn dispatcher(device: Arc<MockDevice>) -> ActionDispatcher {
        ActionDispatcher::new(device, TimingConfig::instant())
    }

    fn do_action(name: &str, params: &[(&str, ParamValue)]) -> Action {
        Action::Do {
            name: name.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn finish_signals_loop_exit() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(device);
        let result = dispatcher
            .dispatch(
                &Action::Finish {
                    message: "Done".into(),
                },
                1080,
                2400,
            )
            .await;
        assert!(result.success);
        assert!(result.should_finish);
        assert_eq!(result.message.as_deref(), Some("Done"));
    }

    #[tokio::test]
    async fn unknown_action_fails_without_finishing() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(device);
        let result = dispatcher
            .dispatch(&do_action("Teleport", &[]), 1080, 2400)
            .await;
        assert!(!result.success);
        assert!(!result.should_finish);
        assert_eq!(result.message.as_deref(), Some("Unknown action: Teleport"));
    }

    #[tokio::test]
    async fn tap_maps_normalized_coordinates() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(Arc::clone(&device));
        let action = do_action("Tap", &[("element", ParamValue::IntList(vec![500, 500]))]);
        let result = dispatcher.dispatch(&action, 1080, 2400).await;
        assert!(result.success);
        assert_eq!(device.calls(), vec!["tap 540 1200"]);
    }

    #[tokio::test]
    async fn tap_without_element_is_a_plain_failure() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(device);
        let result = dispatcher.dispatch(&do_action("Tap", &[]), 1080, 2400).await;
        assert!(!result.success);
        assert!(!result.should_finish);
    }

    #[tokio::test]
    async fn declined_confirmation_cancels_the_session() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher =
            dispatcher(Arc::clone(&device)).with_confirmation(Arc::new(|_| false));
        let action = do_action(
            "Tap",
            &[
                ("element", ParamValue::IntList(vec![500, 500])),
                ("message", ParamValue::Str("Confirm the payment".into())),
            ],
        );
        let result = dispatcher.dispatch(&action, 1080, 2400).await;
        assert!(!result.success);
        assert!(result.should_finish);
        assert_eq!(
            result.message.as_deref(),
            Some("User cancelled sensitive operation")
        );
        assert!(result.requires_confirmation);
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn approved_confirmation_taps_through() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(Arc::clone(&device)).with_confirmation(Arc::new(|_| true));
        let action = do_action(
            "Tap",
            &[
                ("element", ParamValue::IntList(vec![0, 1000])),
                ("message", ParamValue::Str("Confirm".into())),
            ],
        );
        let result = dispatcher.dispatch(&action, 1080, 2400).await;
        assert!(result.success);
        assert!(result.requires_confirmation);
        assert_eq!(device.calls(), vec!["tap 0 2400"]);
    }

    #[tokio::test]
    async fn type_runs_the_full_keyboard_sequence() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(Arc::clone(&device));
        let action = do_action("Type", &[("text", ParamValue::Str("hello\nworld".into()))]);
        let result = dispatcher.dispatch(&action, 1080, 2400).await;
        assert!(result.success);
        assert_eq!(
            device.calls(),
            vec![
                "set_keyboard",
                "clear",
                "type hello\nworld",
                "restore_keyboard com.example/.PriorIme",
            ]
        );
    }

    #[tokio::test]
    async fn swipe_computes_duration_when_absent() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(Arc::clone(&device));
        let action = do_action(
            "Swipe",
            &[
                ("start", ParamValue::IntList(vec![500, 800])),
                ("end", ParamValue::IntList(vec![500, 200])),
            ],
        );
        let result = dispatcher.dispatch(&action, 1080, 2400).await;
        assert!(result.success);
        let calls = device.calls();
        let duration: u32 = calls[0].rsplit(' ').next().unwrap().parse().unwrap();
        assert!((1000..=2000).contains(&duration));
    }

    #[tokio::test]
    async fn swipe_honors_explicit_duration() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(Arc::clone(&device));
        let action = do_action(
            "Swipe",
            &[
                ("start", ParamValue::IntList(vec![100, 100])),
                ("end", ParamValue::IntList(vec![900, 100])),
                ("duration", ParamValue::Int(450)),
            ],
        );
        dispatcher.dispatch(&action, 1000, 1000).await;
        assert!(device.calls()[0].ends_with("in 450"));
    }

    #[tokio::test]
    async fn long_press_defaults_to_three_seconds() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(Arc::clone(&device));
        let action = do_action(
            "Long Press",
            &[("element", ParamValue::IntList(vec![500, 500]))],
        );
        dispatcher.dispatch(&action, 1000, 1000).await;
        assert_eq!(device.calls(), vec!["long_press 500 500 3000"]);
    }

    #[tokio::test]
    async fn device_failure_is_folded_into_the_result() {
        let device = Arc::new(MockDevice::default());
        device.fail_taps.store(true, Ordering::SeqCst);
        let mut dispatcher = dispatcher(Arc::clone(&device));
        let action = do_action("Tap", &[("element", ParamValue::IntList(vec![500, 500]))]);
        let result = dispatcher.dispatch(&action, 1080, 2400).await;
        assert!(!result.success);
        assert!(!result.should_finish);
        assert!(result.message.unwrap().starts_with("Action failed: "));
    }

    #[tokio::test]
    async fn launch_unknown_app_reports_not_found() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(device);
        let action = do_action("Launch", &[("app", ParamValue::Str("NoSuchApp".into()))]);
        let result = dispatcher.dispatch(&action, 1080, 2400).await;
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some("App not found: NoSuchApp"));
    }

    #[tokio::test]
    async fn notes_accumulate_and_clear() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(device);
        let action = do_action("Note", &[("content", ParamValue::Str("price is 42".into()))]);
        let result = dispatcher.dispatch(&action, 1080, 2400).await;
        assert!(result.success);
        assert_eq!(dispatcher.notes(), ["price is 42"]);

        let missing = dispatcher.dispatch(&do_action("Note", &[]), 1080, 2400).await;
        assert!(!missing.success);
        assert_eq!(missing.message.as_deref(), Some("Missing note content"));

        dispatcher.clear_notes();
        assert!(dispatcher.notes().is_empty());
    }

    #[tokio::test]
    async fn call_api_and_interact_have_no_device_effect() {
        let device = Arc::new(MockDevice::default());
        let mut dispatcher = dispatcher(Arc::clone(&device));
        let api = dispatcher.dispatch(&do_action("Call_API", &[]), 1080, 2400).await;
        let interact = dispatcher.dispatch(&do_action("Interact", &[]), 1080, 2400).await;
        assert!(api.success && interact.success);
        assert!(!api.should_finish && !interact.should_finish);
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn takeover_invokes_the_callback() {
        let device = Arc::new(MockDevice::default());
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_cb = Arc::clone(&seen);
        let mut dispatcher = dispatcher(device).with_takeover(Arc::new(move |msg| {
            seen_in_cb.lock().unwrap().push(msg.to_string());
        }));
        let action = do_action(
            "Take_over",
            &[("message", ParamValue::Str("Solve the captcha".into()))],
        );
        let result = dispatcher.dispatch(&action, 1080, 2400).await;
        assert!(result.success);
        assert_eq!(seen.lock().unwrap().as_slice(), ["Solve the captcha"]);
    }

    #[test]
    fn wait_duration_parsing() {
        assert_eq!(parse_wait_seconds(&ParamValue::Str("2 seconds".into())), 2.0);
        assert_eq!(parse_wait_seconds(&ParamValue::Str("1.5".into())), 1.5);
        assert_eq!(parse_wait_seconds(&ParamValue::Str("soon".into())), 1.0);
        assert_eq!(parse_wait_seconds(&ParamValue::Int(5)), 5.0);
        // Hallucinated hour-long waits hit the ceiling.
        assert_eq!(parse_wait_seconds(&ParamValue::Int(3600)), MAX_WAIT_SECS);
    }
}
