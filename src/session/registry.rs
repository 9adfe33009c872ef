//! Session registry: the hosting process's explicit owner of sessions,
//! enforcing at most one running task per device handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::device::DeviceHandle;
use crate::errors::{PilotError, PilotResult};
use crate::session::session::{AgentSession, StepStream};
use crate::session::state::SessionState;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<AgentSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for its device handle. A handle can only ever be
    /// bound to one session at a time.
    pub fn register(&self, session: Arc<AgentSession>) -> PilotResult<()> {
        let key = session.handle().key();
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        if sessions.contains_key(&key) {
            return Err(PilotError::SessionState(format!(
                "device {key} already has a session"
            )));
        }
        tracing::info!(handle = %key, "session registered");
        sessions.insert(key, session);
        Ok(())
    }

    pub fn get(&self, handle: &DeviceHandle) -> Option<Arc<AgentSession>> {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .get(&handle.key())
            .cloned()
    }

    /// Starts a task on the handle's session. A busy handle is rejected,
    /// never queued.
    pub fn start_task(&self, handle: &DeviceHandle, task: &str) -> PilotResult<StepStream> {
        let session = self.get(handle).ok_or_else(|| {
            PilotError::SessionState(format!("no session registered for {}", handle.key()))
        })?;
        session.run(task)
    }

    /// Removes a session; rejected while its task is still running.
    pub fn remove(&self, handle: &DeviceHandle) -> PilotResult<()> {
        let mut sessions = self.sessions.lock().expect("registry lock poisoned");
        let key = handle.key();
        match sessions.get(&key) {
            None => Ok(()),
            Some(session) => {
                if matches!(
                    session.state(),
                    SessionState::Running | SessionState::Stopping
                ) {
                    return Err(PilotError::SessionState(format!(
                        "cannot remove {key} while its task is running"
                    )));
                }
                sessions.remove(&key);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::actions::dispatcher::ActionDispatcher;
    use crate::config::{AgentSettings, TimingConfig};
    use crate::device::{BackendKind, DeviceCapabilities};
    use crate::test_support::{RecordingDevice, ScriptedModel};

    fn handle() -> DeviceHandle {
        DeviceHandle {
            id: Some("emulator-5554".into()),
            backend: BackendKind::Adb,
        }
    }

    fn busy_session(handle: DeviceHandle) -> Arc<AgentSession> {
        let device = Arc::new(RecordingDevice::default());
        let model = ScriptedModel::new(vec![
            "tap\ndo(action=\"Tap\", element=[500, 500])".into()
        ])
        .with_delay(Duration::from_millis(20));
        let dispatcher = ActionDispatcher::new(
            Arc::clone(&device) as Arc<dyn DeviceCapabilities>,
            TimingConfig::instant(),
        );
        Arc::new(AgentSession::new(
            handle,
            device,
            Arc::new(model),
            dispatcher,
            AgentSettings {
                max_steps: 1000,
                lang: "en".into(),
            },
        ))
    }

    #[tokio::test]
    async fn duplicate_handle_registration_is_rejected() {
        let registry = SessionRegistry::new();
        registry.register(busy_session(handle())).unwrap();
        assert!(matches!(
            registry.register(busy_session(handle())),
            Err(PilotError::SessionState(_))
        ));
    }

    #[tokio::test]
    async fn second_run_on_a_busy_handle_is_rejected_not_queued() {
        let registry = SessionRegistry::new();
        registry.register(busy_session(handle())).unwrap();

        let mut stream = registry.start_task(&handle(), "first").unwrap();
        let _ = stream.next_event().await;

        assert!(matches!(
            registry.start_task(&handle(), "second"),
            Err(PilotError::SessionState(_))
        ));

        let session = registry.get(&handle()).unwrap();
        session.stop();
        while stream.next_event().await.is_some() {}
    }

    #[tokio::test]
    async fn unknown_handle_is_rejected() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.start_task(&handle(), "task"),
            Err(PilotError::SessionState(_))
        ));
    }

    #[tokio::test]
    async fn remove_rejects_running_sessions() {
        let registry = SessionRegistry::new();
        registry.register(busy_session(handle())).unwrap();
        let mut stream = registry.start_task(&handle(), "first").unwrap();
        let _ = stream.next_event().await;

        assert!(matches!(
            registry.remove(&handle()),
            Err(PilotError::SessionState(_))
        ));

        let session = registry.get(&handle()).unwrap();
        session.stop();
        while stream.next_event().await.is_some() {}
        for _ in 0..100 {
            if registry.remove(&handle()).is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never became removable");
    }
}
