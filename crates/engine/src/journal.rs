use crate::error::Result;
use chrono::{DateTime, Utc};
use drift_protocol::{Fork, ReasoningTrace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One audited reasoning pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub recorded_at: DateTime<Utc>,
    pub fork: Fork,
    pub trace: ReasoningTrace,
}

/// Append-only JSON Lines log of reasoning traces.
#[derive(Debug)]
pub struct TraceJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TraceJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, fork: &Fork, traces: &[ReasoningTrace]) -> Result<()> {
        if traces.is_empty() {
            return Ok(());
        }
        let recorded_at = Utc::now();
        let mut buf = String::new();
        for trace in traces {
            let entry = JournalEntry {
                recorded_at,
                fork: fork.clone(),
                trace: trace.clone(),
            };
            buf.push_str(&serde_json::to_string(&entry)?);
            buf.push('\n');
        }

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        log::debug!("Journaled {} traces to {}", traces.len(), self.path.display());
        Ok(())
    }

    /// Every entry, oldest first. Unparsable lines are skipped with a warning.
    pub async fn read_all(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path).await?;
        let mut entries = Vec::new();
        for (i, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("{}:{}: skipping journal line: {e}", path.display(), i + 1),
            }
        }
        Ok(entries)
    }
}
