//! Spool-directory queue
//!
//! Layout under `<root>/<name>/`:
//!
//! ```text
//! ready/<send-millis>-<seq>-<id>.json      waiting messages, FIFO by name
//! inflight/<claim-millis>~<ready-name>     claimed messages
//! ```
//!
//! Every transition is a single `rename`, so two workers sharing a spool can
//! never claim the same message. A claimed message whose claim time is older
//! than the visibility timeout is moved back to `ready/` by the next receive.

use super::{Delivery, QueueError, QueueResult, WorkQueue};
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const READY_DIR: &str = "ready";
const INFLIGHT_DIR: &str = "inflight";
const CLAIM_SEPARATOR: char = '~';

/// Queue backed by a spool directory
#[derive(Debug, Clone)]
pub struct FileQueue {
    name: String,
    ready: PathBuf,
    inflight: PathBuf,
    visibility_timeout: Duration,
    sequence: Arc<AtomicU64>,
}

impl FileQueue {
    /// Open (creating if needed) queue `name` under `root`
    pub async fn open(
        root: impl AsRef<Path>,
        name: &str,
        visibility_timeout: Duration,
    ) -> QueueResult<Self> {
        if name.is_empty()
            || name.starts_with('.')
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(QueueError::InvalidName(name.to_string()));
        }

        let base = root.as_ref().join(name);
        let ready = base.join(READY_DIR);
        let inflight = base.join(INFLIGHT_DIR);
        for dir in [&ready, &inflight] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| QueueError::IoError(format!("Failed to create {dir:?}: {e}")))?;
        }

        Ok(Self {
            name: name.to_string(),
            ready,
            inflight,
            visibility_timeout,
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Visibility timeout applied to claimed messages
    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// Messages currently claimed
    pub async fn in_flight(&self) -> QueueResult<usize> {
        Ok(list_messages(&self.inflight).await?.len())
    }

    fn receipt_path(&self, receipt: &str) -> QueueResult<(PathBuf, String)> {
        let Some((_, ready_name)) = receipt.split_once(CLAIM_SEPARATOR) else {
            return Err(QueueError::UnknownReceipt(receipt.to_string()));
        };
        if receipt.contains('/') || receipt.contains('\\') || ready_name.is_empty() {
            return Err(QueueError::UnknownReceipt(receipt.to_string()));
        }
        Ok((self.inflight.join(receipt), ready_name.to_string()))
    }

    /// Move claims older than the visibility timeout back to `ready/`
    async fn requeue_expired(&self) -> QueueResult<usize> {
        let now = Utc::now().timestamp_millis();
        let timeout = i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        let mut requeued = 0;

        for receipt in list_messages(&self.inflight).await? {
            let Some((claimed, ready_name)) = receipt.split_once(CLAIM_SEPARATOR) else {
                continue;
            };
            let Ok(claimed) = claimed.parse::<i64>() else {
                continue;
            };
            if now.saturating_sub(claimed) < timeout {
                continue;
            }
            match tokio::fs::rename(self.inflight.join(&receipt), self.ready.join(ready_name)).await
            {
                Ok(()) => {
                    warn!(
                        queue = %self.name,
                        message = %ready_name,
                        "Visibility timeout expired, message returned to queue"
                    );
                    requeued += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(QueueError::IoError(e.to_string())),
            }
        }
        Ok(requeued)
    }
}

#[async_trait]
impl WorkQueue for FileQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn purge(&self) -> QueueResult<usize> {
        let mut purged = 0;
        for dir in [&self.ready, &self.inflight] {
            for name in list_messages(dir).await? {
                match tokio::fs::remove_file(dir.join(&name)).await {
                    Ok(()) => purged += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(QueueError::IoError(e.to_string())),
                }
            }
        }
        debug!(queue = %self.name, purged, "Purged queue");
        Ok(purged)
    }

    async fn send(&self, body: &str) -> QueueResult<String> {
        let message_id = format!(
            "{:020}-{:010}-{}",
            Utc::now().timestamp_millis(),
            self.sequence.fetch_add(1, Ordering::Relaxed),
            Uuid::new_v4().simple()
        );
        let file_name = format!("{message_id}.json");
        let tmp = self.ready.join(format!(".{file_name}.tmp"));

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| QueueError::IoError(format!("Failed to write {tmp:?}: {e}")))?;
        tokio::fs::rename(&tmp, self.ready.join(&file_name))
            .await
            .map_err(|e| QueueError::IoError(format!("Failed to publish message: {e}")))?;

        Ok(message_id)
    }

    async fn receive(&self) -> QueueResult<Option<Delivery>> {
        self.requeue_expired().await?;

        for ready_name in list_messages(&self.ready).await? {
            let receipt = format!(
                "{}{}{}",
                Utc::now().timestamp_millis(),
                CLAIM_SEPARATOR,
                ready_name
            );
            let claimed = self.inflight.join(&receipt);
            match tokio::fs::rename(self.ready.join(&ready_name), &claimed).await {
                Ok(()) => {}
                // Another consumer claimed it first
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(QueueError::IoError(e.to_string())),
            }

            let body = tokio::fs::read_to_string(&claimed)
                .await
                .map_err(|e| QueueError::IoError(format!("Failed to read {claimed:?}: {e}")))?;
            let message_id = ready_name.trim_end_matches(".json").to_string();

            return Ok(Some(Delivery {
                receipt,
                message_id,
                body,
            }));
        }

        Ok(None)
    }

    async fn peek(&self) -> QueueResult<Option<String>> {
        let mut candidates: Vec<(String, PathBuf)> = list_messages(&self.ready)
            .await?
            .into_iter()
            .map(|name| (name.clone(), self.ready.join(name)))
            .collect();
        for receipt in list_messages(&self.inflight).await? {
            if let Some((_, ready_name)) = receipt.split_once(CLAIM_SEPARATOR) {
                candidates.push((ready_name.to_string(), self.inflight.join(&receipt)));
            }
        }
        candidates.sort();

        for (_, path) in candidates {
            match tokio::fs::read_to_string(&path).await {
                Ok(body) => return Ok(Some(body)),
                // Moved between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(QueueError::IoError(format!("Failed to read {path:?}: {e}")))
                }
            }
        }
        Ok(None)
    }

    async fn ack(&self, receipt: &str) -> QueueResult<()> {
        let (path, _) = self.receipt_path(receipt)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(QueueError::UnknownReceipt(receipt.to_string()))
            }
            Err(e) => Err(QueueError::IoError(e.to_string())),
        }
    }

    async fn release(&self, receipt: &str) -> QueueResult<()> {
        let (path, ready_name) = self.receipt_path(receipt)?;
        match tokio::fs::rename(&path, self.ready.join(ready_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(QueueError::UnknownReceipt(receipt.to_string()))
            }
            Err(e) => Err(QueueError::IoError(e.to_string())),
        }
    }

    async fn pending(&self) -> QueueResult<usize> {
        Ok(list_messages(&self.ready).await?.len())
    }
}

/// Visible message file names in `dir`, sorted
async fn list_messages(dir: &Path) -> QueueResult<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(QueueError::IoError(format!("Failed to list {dir:?}: {e}"))),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| QueueError::IoError(e.to_string()))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
