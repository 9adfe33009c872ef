use std::sync::Arc;

use futures_util::StreamExt;

use phonepilot::actions::ActionDispatcher;
use phonepilot::model::ModelClient;
use phonepilot::session::{AgentSession, SessionRegistry};
use phonepilot::{create_device, load_config};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let task = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if task.trim().is_empty() {
        eprintln!("usage: phonepilot <task description>");
        std::process::exit(2);
    }

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let handle = config.device.handle();
    let device = create_device(&handle, &config.timing);
    let model = Arc::new(ModelClient::new(config.model.clone()));
    let dispatcher = ActionDispatcher::new(Arc::clone(&device), config.timing.clone());
    let session = Arc::new(AgentSession::new(
        handle.clone(),
        device,
        model,
        dispatcher,
        config.agent.clone(),
    ));

    let registry = SessionRegistry::new();
    if let Err(e) = registry.register(Arc::clone(&session)) {
        tracing::error!(error = %e, "could not register session");
        std::process::exit(1);
    }

    let mut stream = match registry.start_task(&handle, &task) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "could not start task");
            std::process::exit(1);
        }
    };

    // First Ctrl-C stops cooperatively after the in-flight step.
    let session_for_signal = Arc::clone(&session);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            session_for_signal.stop();
        }
    });

    while let Some(event) = stream.next().await {
        if !event.thinking.is_empty() {
            println!("· {}", event.thinking);
        }
        if let Some(action) = &event.action {
            println!("→ {action}");
        }
        if let Some(message) = &event.message {
            println!("  {message}");
        }
        if event.finished {
            break;
        }
    }

    let notes = session.notes().await;
    if !notes.is_empty() {
        println!("\nNotes:");
        for note in &notes {
            println!("- {note}");
        }
    }
}
