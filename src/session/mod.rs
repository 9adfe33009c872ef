pub mod history;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;
pub mod state;

pub use registry::SessionRegistry;
pub use session::{AgentSession, StepStream};
pub use state::{SessionState, StepEvent};
