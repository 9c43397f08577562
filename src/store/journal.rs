//! Append-only journal of completed dialogs.
//!
//! Entries are plain text meant for a human reader:
//!
//! ```text
//! [2026-10-16] Diário Pessoal
//! <summary>
//!
//! Respostas:
//! Momento marcante: ...
//!
//! ```
//!
//! The core only appends; nothing parses the file back.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::JournalError;
use crate::flows::FlowKind;

/// What produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Flow(FlowKind),
    /// One-shot `/diario <texto>` entry.
    QuickNote,
}

impl EntryKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Flow(kind) => kind.label(),
            Self::QuickNote => "Registo rápido",
        }
    }
}

/// One immutable journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub kind: EntryKind,
    /// Synthesized summary, or the deterministic fallback.
    pub summary: String,
    /// Whether `summary` came from the synthesizer.
    pub synthesized: bool,
    /// Mood line for quick notes.
    pub mood: Option<String>,
    /// Raw answers as `(label, value)` pairs, in step order.
    pub answers: Vec<(String, String)>,
}

impl JournalEntry {
    pub fn new(user_id: &str, kind: EntryKind, summary: String, synthesized: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            kind,
            summary,
            synthesized,
            mood: None,
            answers: Vec::new(),
        }
    }

    /// Tag the entry with a mood. Only the first non-empty line is kept so
    /// the header stays on one line.
    pub fn with_mood(mut self, mood: &str) -> Self {
        let line = mood.lines().map(str::trim).find(|l| !l.is_empty());
        self.mood = line.map(str::to_string);
        self
    }

    pub fn with_answers(mut self, answers: Vec<(String, String)>) -> Self {
        self.answers = answers;
        self
    }

    /// Text block appended to the journal, including the trailing blank line.
    pub fn render(&self) -> String {
        let date = self.created_at.with_timezone(&Local).format("%Y-%m-%d");
        let mut out = match &self.mood {
            Some(mood) => format!("[{date}] {} - Humor: {}\n", self.kind.label(), mood),
            None => format!("[{date}] {}\n", self.kind.label()),
        };
        out.push_str(&self.summary);
        if !self.summary.ends_with('\n') {
            out.push('\n');
        }
        if !self.answers.is_empty() {
            out.push_str("\nRespostas:\n");
            for (label, value) in &self.answers {
                out.push_str(&format!("{label}: {value}"));
                if !value.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        out.push('\n');
        out
    }
}

/// Durable, append-only sink for journal entries.
#[async_trait]
pub trait JournalStore: Send + Sync {
    async fn append(&self, entry: &JournalEntry) -> Result<(), JournalError>;
}

/// Journal kept in a single UTF-8 text file.
pub struct FileJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, source: std::io::Error) -> JournalError {
        JournalError::Unavailable {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl JournalStore for FileJournal {
    async fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let block = entry.render();
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.unavailable(e))?;
        file.write_all(block.as_bytes())
            .await
            .map_err(|e| JournalError::Write(e.to_string()))?;
        file.sync_data()
            .await
            .map_err(|e| JournalError::Write(e.to_string()))?;

        tracing::debug!(
            entry_id = %entry.id,
            kind = entry.kind.label(),
            path = %self.path.display(),
            "Journal entry appended"
        );
        Ok(())
    }
}

/// In-memory journal, for tests.
#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl JournalStore for MemoryJournal {
    async fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}
