pub mod client;
pub mod types;

pub use client::{ModelClient, ModelProvider};
pub use types::{ChatMessage, ContentPart, ImageUrl, MessageContent, ModelResponse};
