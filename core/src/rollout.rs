//! Conversation history persistence ("rollout").
//!
//! One line of JSON per item. The recorder is a collaborator interface so the
//! core never depends on where history lives; the JSONL implementation here
//! is the production default and the in-memory one backs tests and ephemeral
//! sessions.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use foreman_protocol::models::ResponseItem;
use serde::Deserialize;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::ForemanErr;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RolloutItem {
    ResponseItem(ResponseItem),
}

#[async_trait]
pub trait RolloutRecorder: Send + Sync {
    async fn append(&self, items: &[RolloutItem]) -> Result<()>;

    /// Replays the recorded history for resume. Fails with
    /// [`ForemanErr::EmptyRollout`] when nothing was recorded and
    /// [`ForemanErr::CorruptedRollout`] when a line cannot be decoded;
    /// neither is retried automatically.
    async fn read_for_resume(&self) -> Result<Vec<ResponseItem>>;
}

/// Append-only JSONL file recorder.
pub struct JsonlRollout {
    path: PathBuf,
}

impl JsonlRollout {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl RolloutRecorder for JsonlRollout {
    async fn append(&self, items: &[RolloutItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for item in items {
            let line = serde_json::to_string(item)
                .map_err(|err| ForemanErr::CorruptedRollout(err.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_for_resume(&self) -> Result<Vec<ResponseItem>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ForemanErr::EmptyRollout);
            }
            Err(err) => return Err(err.into()),
        };

        let mut items = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let item: RolloutItem = serde_json::from_str(line).map_err(|err| {
                ForemanErr::CorruptedRollout(format!("line {}: {err}", index + 1))
            })?;
            let RolloutItem::ResponseItem(item) = item;
            items.push(item);
        }
        if items.is_empty() {
            return Err(ForemanErr::EmptyRollout);
        }
        Ok(items)
    }
}

/// Recorder for ephemeral conversations; also the default in tests.
#[derive(Default)]
pub struct InMemoryRollout {
    items: Mutex<Vec<RolloutItem>>,
}

#[async_trait]
impl RolloutRecorder for InMemoryRollout {
    async fn append(&self, items: &[RolloutItem]) -> Result<()> {
        match self.items.lock() {
            Ok(mut guard) => guard.extend_from_slice(items),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(items),
        }
        Ok(())
    }

    async fn read_for_resume(&self) -> Result<Vec<ResponseItem>> {
        let items = match self.items.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if items.is_empty() {
            return Err(ForemanErr::EmptyRollout);
        }
        Ok(items
            .into_iter()
            .map(|RolloutItem::ResponseItem(item)| item)
            .collect())
    }
}
