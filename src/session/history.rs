use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::PilotResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub role: String,
    pub content: Option<String>,
    pub action: Option<serde_json::Value>,
}

/// Append-only JSONL transcript of one session.
pub struct SessionHistory {
    pub session_id: String,
    entries: Vec<HistoryEntry>,
    file_path: PathBuf,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::in_dir(data_dir_or_cwd())
    }

    pub fn in_dir(dir: PathBuf) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        Self {
            session_id,
            entries: Vec::new(),
            file_path,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Append the latest entry to the JSONL file.
    pub fn flush(&self) -> PilotResult<()> {
        if let Some(last) = self.entries.last() {
            let line = serde_json::to_string(last)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?;
            writeln!(file, "{}", line)?;
            tracing::debug!(
                path = %self.file_path.display(),
                "history entry flushed"
            );
        }
        Ok(())
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn data_dir_or_cwd() -> PathBuf {
    if let Some(data_dir) = dirs::data_local_dir() {
        let d = data_dir.join("phonepilot").join("sessions");
        let _ = std::fs::create_dir_all(&d);
        return d;
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_appends_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = SessionHistory::in_dir(dir.path().to_path_buf());

        history.push(HistoryEntry {
            ts: 1,
            role: "user".into(),
            content: Some("open settings".into()),
            action: None,
        });
        history.flush().unwrap();
        history.push(HistoryEntry {
            ts: 2,
            role: "tool".into(),
            content: None,
            action: Some(serde_json::json!({"type": "do", "name": "Tap"})),
        });
        history.flush().unwrap();

        let path = dir
            .path()
            .join(format!("session_{}.jsonl", history.session_id));
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: HistoryEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.content.as_deref(), Some("open settings"));
    }
}
