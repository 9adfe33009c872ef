use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Failed to parse directive: {raw}")]
    Parse { raw: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model client error: {0}")]
    Model(String),

    #[error("Device command failed: {0}")]
    DeviceCommand(String),

    #[error("Foreground app retrieval failed after {attempts} attempts: {last_error}")]
    Retrieval { attempts: u32, last_error: String },

    #[error("Invalid session state: {0}")]
    SessionState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl serde::Serialize for PilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
