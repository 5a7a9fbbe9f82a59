//! Session management for saving and loading conversations

use coach_ai::ChatMessage;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Session entry types for JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEntry {
    /// Session metadata
    Metadata {
        id: String,
        created_at: i64,
        model: String,
        context_type: String,
    },
    /// A message in the conversation
    Message { message: ChatMessage },
}

/// Append-only JSONL conversation log
pub struct SessionManager {
    id: String,
    context_type: String,
    writer: BufWriter<File>,
}

impl SessionManager {
    /// Get the sessions directory
    pub fn sessions_dir() -> PathBuf {
        crate::config::data_dir().join("sessions")
    }

    /// Create a new session in the default directory
    pub fn new(model: &str, context_type: &str) -> std::io::Result<Self> {
        Self::create_in(&Self::sessions_dir(), model, context_type)
    }

    /// Create a new session in `dir`
    pub fn create_in(dir: &Path, model: &str, context_type: &str) -> std::io::Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        fs::create_dir_all(dir)?;

        let file = File::create(dir.join(format!("{}.jsonl", id)))?;
        let mut writer = BufWriter::new(file);

        let metadata = SessionEntry::Metadata {
            id: id.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
            model: model.to_string(),
            context_type: context_type.to_string(),
        };
        writeln!(writer, "{}", serde_json::to_string(&metadata)?)?;
        writer.flush()?;

        Ok(Self {
            id,
            context_type: context_type.to_string(),
            writer,
        })
    }

    /// Load an existing session from the default directory
    pub fn load(id: &str) -> std::io::Result<(Self, Vec<ChatMessage>)> {
        Self::load_from(&Self::sessions_dir(), id)
    }

    /// Load an existing session and reopen it for appending
    pub fn load_from(dir: &Path, id: &str) -> std::io::Result<(Self, Vec<ChatMessage>)> {
        let path = dir.join(format!("{}.jsonl", id));
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Session not found: {}", id),
            ));
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut messages = Vec::new();
        let mut context_type = String::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEntry>(&line) {
                Ok(SessionEntry::Message { message }) => messages.push(message),
                Ok(SessionEntry::Metadata { context_type: ct, .. }) => context_type = ct,
                Err(_) => {}
            }
        }

        let file = File::options().append(true).open(&path)?;
        Ok((
            Self {
                id: id.to_string(),
                context_type,
                writer: BufWriter::new(file),
            },
            messages,
        ))
    }

    /// Delete a session from the default directory
    pub fn delete(id: &str) -> std::io::Result<()> {
        Self::delete_in(&Self::sessions_dir(), id)
    }

    /// Delete the session file for `id` in `dir`
    pub fn delete_in(dir: &Path, id: &str) -> std::io::Result<()> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid session ID: {}", id),
            ));
        }
        let path = dir.join(format!("{}.jsonl", id));
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Session not found: {}", id),
            ));
        }
        fs::remove_file(path)
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Context type recorded when the session was created (empty if unknown)
    pub fn context_type(&self) -> &str {
        &self.context_type
    }

    /// Append a message to the session
    pub fn append_message(&mut self, message: &ChatMessage) -> std::io::Result<()> {
        let entry = SessionEntry::Message {
            message: message.clone(),
        };
        writeln!(self.writer, "{}", serde_json::to_string(&entry)?)?;
        self.writer.flush()
    }

    /// List sessions in the default directory
    pub fn list_sessions() -> std::io::Result<Vec<SessionInfo>> {
        Self::list_in(&Self::sessions_dir())
    }

    /// List sessions in `dir`, newest first
    pub fn list_in(dir: &Path) -> std::io::Result<Vec<SessionInfo>> {
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut sessions = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                if let Some(info) = Self::read_session_info(&path) {
                    sessions.push(info);
                }
            }
        }

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    fn read_session_info(path: &Path) -> Option<SessionInfo> {
        let reader = BufReader::new(File::open(path).ok()?);
        let mut lines = reader.lines().map_while(Result::ok);
        let first_line = lines.next()?;

        let SessionEntry::Metadata {
            id,
            created_at,
            model,
            context_type,
        } = serde_json::from_str(&first_line).ok()?
        else {
            return None;
        };

        let message_count = lines
            .filter(|l| l.contains("\"type\":\"message\""))
            .count();

        Some(SessionInfo {
            id,
            created_at,
            model,
            context_type,
            message_count,
        })
    }
}

/// Information about a saved session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: i64,
    pub model: String,
    pub context_type: String,
    pub message_count: usize,
}

impl SessionInfo {
    /// Format the created_at timestamp for display
    pub fn created_at_display(&self) -> String {
        use chrono::{TimeZone, Utc};
        Utc.timestamp_millis_opt(self.created_at)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionManager::create_in(dir.path(), "gpt-4o-mini", "epic").unwrap();
        session
            .append_message(&ChatMessage::user("Draft an epic"))
            .unwrap();
        session
            .append_message(&ChatMessage::assistant("EPIC NAME: Onboarding"))
            .unwrap();
        let id = session.id().to_string();
        drop(session);

        let (mut resumed, messages) = SessionManager::load_from(dir.path(), &id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(resumed.context_type(), "epic");
        assert_eq!(messages[1].content, "EPIC NAME: Onboarding");

        resumed
            .append_message(&ChatMessage::user("Now the features"))
            .unwrap();
        let (_, messages) = SessionManager::load_from(dir.path(), &id).unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn test_missing_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionManager::load_from(dir.path(), "nope").err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_list_reports_metadata() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SessionManager::list_in(&dir.path().join("absent")).unwrap().is_empty());

        let mut session = SessionManager::create_in(dir.path(), "llama3.2", "feature").unwrap();
        session.append_message(&ChatMessage::user("hi")).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let sessions = SessionManager::list_in(dir.path()).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, session.id());
        assert_eq!(sessions[0].model, "llama3.2");
        assert_eq!(sessions[0].context_type, "feature");
        assert_eq!(sessions[0].message_count, 1);
    }

    #[test]
    fn test_delete_removes_only_that_session() {
        let dir = tempfile::tempdir().unwrap();
        let keep = SessionManager::create_in(dir.path(), "gpt-4o-mini", "epic").unwrap();
        let gone = SessionManager::create_in(dir.path(), "gpt-4o-mini", "feature").unwrap();
        let gone_id = gone.id().to_string();
        drop(gone);

        SessionManager::delete_in(dir.path(), &gone_id).unwrap();
        let sessions = SessionManager::list_in(dir.path()).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, keep.id());

        let err = SessionManager::delete_in(dir.path(), &gone_id).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        let err = SessionManager::delete_in(dir.path(), "../config").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
