//! The step loop: observe → model call → parse → dispatch → emit.
//!
//! One session is bound to one device handle. `run` hands back a finite,
//! non-restartable stream of [`StepEvent`]s produced by a background task;
//! `stop` is cooperative and only observed at iteration boundaries — an
//! in-flight device call is never interrupted.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use base64::Engine as _;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::actions::dispatcher::ActionDispatcher;
use crate::actions::parser;
use crate::config::AgentSettings;
use crate::device::{DeviceCapabilities, DeviceHandle};
use crate::errors::{PilotError, PilotResult};
use crate::model::{ChatMessage, ContentPart, ImageUrl, ModelProvider};
use crate::session::history::{HistoryEntry, SessionHistory};
use crate::session::state::{SessionState, StepEvent};

const PARSE_RETRY_HINT: &str =
    "The previous reply could not be parsed. Respond with exactly one do(...) or finish(...) directive.";

/// Conversation context and per-task collaborators, owned by the loop task
/// while a run is in flight.
struct Inner {
    conversation: Vec<ChatMessage>,
    dispatcher: ActionDispatcher,
    history: SessionHistory,
}

pub struct AgentSession {
    handle: DeviceHandle,
    device: Arc<dyn DeviceCapabilities>,
    model: Arc<dyn ModelProvider>,
    settings: AgentSettings,
    state: Mutex<SessionState>,
    stop_flag: AtomicBool,
    forced: AtomicBool,
    /// Bumped by every `run`; a loop whose epoch is stale must neither step
    /// nor write session state (it belongs to an abandoned run).
    epoch: AtomicU64,
    inner: tokio::sync::Mutex<Inner>,
}

enum StepOutcome {
    Continue,
    Finished,
    /// The host dropped the stream; there is nobody left to report to.
    HostGone,
}

enum LoopEnd {
    Finished,
    MaxSteps,
    Stopped,
    Errored,
}

impl AgentSession {
    pub fn new(
        handle: DeviceHandle,
        device: Arc<dyn DeviceCapabilities>,
        model: Arc<dyn ModelProvider>,
        dispatcher: ActionDispatcher,
        settings: AgentSettings,
    ) -> Self {
        Self {
            handle,
            device,
            model,
            settings,
            state: Mutex::new(SessionState::Idle),
            stop_flag: AtomicBool::new(false),
            forced: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            inner: tokio::sync::Mutex::new(Inner {
                conversation: Vec::new(),
                dispatcher,
                history: SessionHistory::new(),
            }),
        }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state lock poisoned")
    }

    /// Notes recorded by `Note` actions so far. Blocks while a run holds the
    /// session context.
    pub async fn notes(&self) -> Vec<String> {
        self.inner.lock().await.dispatcher.notes().to_vec()
    }

    /// Starts the step loop for `task`. Rejected unless the session is Idle;
    /// the returned stream is finite and not restartable.
    pub fn run(self: &Arc<Self>, task: &str) -> PilotResult<StepStream> {
        {
            let mut state = self.state.lock().expect("session state lock poisoned");
            if *state != SessionState::Idle {
                return Err(PilotError::SessionState(format!(
                    "cannot start a task while the session is {:?}",
                    *state
                )));
            }
            *state = SessionState::Running;
        }
        self.stop_flag.store(false, Ordering::SeqCst);
        self.forced.store(false, Ordering::SeqCst);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        // Capacity 1 keeps production lazy: the loop cannot run ahead of the
        // consumer by more than the step already in flight.
        let (tx, rx) = mpsc::channel(1);
        let session = Arc::clone(self);
        let task = task.to_string();
        tokio::spawn(async move {
            session.run_loop(task, epoch, tx).await;
        });
        Ok(StepStream { rx })
    }

    /// Requests a cooperative stop, observed before the next iteration
    /// starts. An in-flight device call is never interrupted.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().expect("session state lock poisoned");
        if *state == SessionState::Running {
            *state = SessionState::Stopping;
            tracing::info!(handle = %self.handle.key(), "stop requested");
        }
    }

    /// Stops and resets the session state immediately, even if an iteration
    /// is still unwinding in the background. Unclean by design.
    pub fn force_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.forced.store(true, Ordering::SeqCst);
        *self.state.lock().expect("session state lock poisoned") = SessionState::Idle;
        tracing::warn!(handle = %self.handle.key(), "forced stop, session state reset");
    }

    /// Clears conversation context and notes and returns to Idle. Rejected
    /// while a task is running.
    pub async fn reset(&self) -> PilotResult<()> {
        {
            let state = self.state.lock().expect("session state lock poisoned");
            if matches!(*state, SessionState::Running | SessionState::Stopping) {
                return Err(PilotError::SessionState(
                    "cannot reset while a task is running".into(),
                ));
            }
        }
        // Waits for a force-stopped loop to release the session context.
        let mut inner = self.inner.lock().await;
        inner.conversation.clear();
        inner.dispatcher.clear_notes();
        self.stop_flag.store(false, Ordering::SeqCst);
        self.forced.store(false, Ordering::SeqCst);
        *self.state.lock().expect("session state lock poisoned") = SessionState::Idle;
        Ok(())
    }

    async fn run_loop(&self, task: String, epoch: u64, tx: mpsc::Sender<StepEvent>) {
        let mut inner = self.inner.lock().await;

        // Notes survive until reset; only the conversation restarts per task.
        inner.conversation.clear();
        inner
            .conversation
            .push(ChatMessage::text("system", system_prompt(&self.settings.lang)));
        inner
            .conversation
            .push(ChatMessage::text("user", format!("Task: {task}")));
        inner.history.push(HistoryEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            role: "user".into(),
            content: Some(task.clone()),
            action: None,
        });
        let _ = inner.history.flush();

        let screen = match self.device.screen_size().await {
            Ok(size) => size,
            Err(e) => {
                tracing::error!(error = %e, "could not read screen size");
                let _ = tx
                    .send(StepEvent {
                        thinking: String::new(),
                        action: None,
                        finished: true,
                        message: Some(format!("Session error: {e}")),
                    })
                    .await;
                self.settle_state(SessionState::Errored, epoch);
                return;
            }
        };

        tracing::info!(
            task = %task,
            handle = %self.handle.key(),
            width = screen.0,
            height = screen.1,
            max_steps = self.settings.max_steps,
            "step loop started"
        );

        let mut end = LoopEnd::MaxSteps;
        for step in 0..self.settings.max_steps {
            // Cooperative cancellation point; nothing below it is aborted.
            // A stale epoch means this run was force-abandoned and a newer
            // one owns the session.
            if self.stop_flag.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch
            {
                tracing::info!(step, "stop observed at iteration boundary");
                end = LoopEnd::Stopped;
                break;
            }

            match self.step(&mut inner, screen, &tx).await {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Finished) => {
                    end = LoopEnd::Finished;
                    break;
                }
                Ok(StepOutcome::HostGone) => {
                    end = LoopEnd::Stopped;
                    break;
                }
                // Observation failures are step errors: report and give the
                // model another turn.
                Err(e @ PilotError::Retrieval { .. }) => {
                    tracing::warn!(step, error = %e, "observation failed, continuing");
                    let delivered = tx
                        .send(StepEvent {
                            thinking: String::new(),
                            action: None,
                            finished: false,
                            message: Some(e.to_string()),
                        })
                        .await;
                    if delivered.is_err() {
                        end = LoopEnd::Stopped;
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(step, error = %e, "session error, ending loop");
                    let _ = tx
                        .send(StepEvent {
                            thinking: String::new(),
                            action: None,
                            finished: true,
                            message: Some(format!("Session error: {e}")),
                        })
                        .await;
                    end = LoopEnd::Errored;
                    break;
                }
            }
        }

        match end {
            LoopEnd::Finished => self.settle_state(SessionState::Finished, epoch),
            LoopEnd::MaxSteps => {
                let _ = tx
                    .send(StepEvent {
                        thinking: String::new(),
                        action: None,
                        finished: true,
                        message: Some("Maximum step count reached".into()),
                    })
                    .await;
                self.settle_state(SessionState::Finished, epoch);
            }
            LoopEnd::Stopped => self.settle_state(SessionState::Idle, epoch),
            LoopEnd::Errored => self.settle_state(SessionState::Errored, epoch),
        }
        tracing::info!(session = %inner.history.session_id, "step loop ended");
    }

    /// One observe → model → parse → dispatch round.
    async fn step(
        &self,
        inner: &mut Inner,
        screen: (u32, u32),
        tx: &mpsc::Sender<StepEvent>,
    ) -> PilotResult<StepOutcome> {
        let screenshot = self.device.screenshot().await?;
        let foreground = self.device.foreground_app().await?;
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(&screenshot);

        inner.conversation.push(ChatMessage::parts(
            "user",
            vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: image_b64 },
                },
                ContentPart::Text {
                    text: format!("Current app: {foreground}"),
                },
            ],
        ));

        let response = self.model.request(&inner.conversation).await?;
        tracing::debug!(
            thinking = %response.thinking,
            directive = %response.action_text,
            "model turn received"
        );

        inner.conversation.push(ChatMessage::text(
            "assistant",
            format!("{}\n{}", response.thinking, response.action_text),
        ));
        inner.history.push(HistoryEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            role: "assistant".into(),
            content: Some(response.action_text.clone()),
            action: None,
        });
        let _ = inner.history.flush();

        let action = match parser::parse(&response.action_text) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(error = %e, "directive rejected by parser");
                let delivered = tx
                    .send(StepEvent {
                        thinking: response.thinking,
                        action: None,
                        finished: false,
                        message: Some(e.to_string()),
                    })
                    .await;
                if delivered.is_err() {
                    return Ok(StepOutcome::HostGone);
                }
                inner
                    .conversation
                    .push(ChatMessage::text("user", PARSE_RETRY_HINT));
                return Ok(StepOutcome::Continue);
            }
        };

        let result = inner.dispatcher.dispatch(&action, screen.0, screen.1).await;

        inner.history.push(HistoryEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            role: "tool".into(),
            content: result.message.clone(),
            action: Some(serde_json::to_value(&action).unwrap_or_default()),
        });
        let _ = inner.history.flush();

        let should_finish = result.should_finish;
        let delivered = tx
            .send(StepEvent {
                thinking: response.thinking,
                action: Some(action),
                finished: should_finish,
                message: result.message.clone(),
            })
            .await;
        if delivered.is_err() {
            return Ok(StepOutcome::HostGone);
        }

        if should_finish {
            return Ok(StepOutcome::Finished);
        }

        let feedback = if result.success {
            "OK".to_string()
        } else {
            result
                .message
                .unwrap_or_else(|| "Action failed".to_string())
        };
        inner.conversation.push(ChatMessage::text("user", feedback));

        Ok(StepOutcome::Continue)
    }

    /// Final state write at loop exit. Skipped when a forced stop already
    /// pinned the state, or when a newer run owns the session.
    fn settle_state(&self, state: SessionState, epoch: u64) {
        if self.forced.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        *self.state.lock().expect("session state lock poisoned") = state;
    }
}

/// Lazily-produced sequence of step events for one task.
pub struct StepStream {
    rx: mpsc::Receiver<StepEvent>,
}

impl StepStream {
    pub async fn next_event(&mut self) -> Option<StepEvent> {
        self.rx.recv().await
    }
}

impl Stream for StepStream {
    type Item = StepEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn system_prompt(lang: &str) -> String {
    let lang_line = match lang {
        "cn" => "Respond in Chinese.",
        _ => "Respond in English.",
    };
    format!(
        "You are PhonePilot, a phone automation agent.\n\n\
         Each turn you receive a screenshot of the current screen and the name \
         of the foreground app. Reply with your reasoning, then exactly one \
         directive on the final line:\n\
         - do(action=\"Launch\", app=\"<name>\")\n\
         - do(action=\"Tap\", element=[x, y]) — coordinates on a 0-1000 grid\n\
         - do(action=\"Double Tap\", element=[x, y])\n\
         - do(action=\"Long Press\", element=[x, y])\n\
         - do(action=\"Swipe\", start=[x, y], end=[x, y])\n\
         - do(action=\"Type\", text=\"...\") — replaces the focused field's content\n\
         - do(action=\"Back\") / do(action=\"Home\")\n\
         - do(action=\"Wait\", duration=\"1 seconds\")\n\
         - do(action=\"Note\", content=\"...\") — record information you will need later\n\
         - do(action=\"Take_over\", message=\"...\") — hand control to the user for login or captcha\n\
         - finish(message=\"...\") — the task is complete\n\
         For a Tap that triggers a sensitive operation (payment, deletion, \
         sending), add message=\"...\" so the user can confirm first.\n\
         {lang_line}"
    )
}
