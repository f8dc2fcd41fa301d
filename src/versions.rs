//! Pointer-based version store for monitored documents.
//!
//! Per document key, the store maintains:
//!
//! - `current` — a standing snapshot overwritten on every ingest, changed
//!   or not.
//! - dated snapshots (`YYYY-MM-DD`) — append-only history, created only
//!   when an ingest detects a structural change.
//! - `last` / `prev` — pointer files naming the dated snapshot they
//!   designate. `last` is the most recent snapshot that differed from its
//!   predecessor; `prev` is whatever `last` pointed to before the most
//!   recent rollover (depth-1 history, not a stack).
//! - `changed` — a marker holding the date of the most recent rollover;
//!   absent when the latest ingest saw no change.
//!
//! Ingest for one document is a critical section: the pointer read, the
//! change decision, and the pointer writes must not interleave with another
//! ingest of the same document, or the depth-1 invariant breaks. The store
//! keeps a per-key async mutex and holds it for the whole sequence; the blob
//! layer itself has no compare-and-swap.
//!
//! Date labels are day-granular by design: two changing ingests on the same
//! calendar day collapse into one dated snapshot, last writer wins. The
//! `prev`/`last` semantics depend on date-string ordering, so this is not
//! "fixed" to sub-day granularity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{NaiveDate, Utc};

use crate::hasher;
use crate::models::{DocumentConfig, IngestOutcome, SnapshotMetadata, VersionSummary};
use crate::store::BlobStore;

/// Reserved labels plus dated labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionLabel {
    Current,
    Last,
    Prev,
    Date(String),
}

impl VersionLabel {
    /// Parse a user-supplied version string. Anything that is not a
    /// reserved word is treated as a date label.
    pub fn parse(s: &str) -> Self {
        match s {
            "current" => Self::Current,
            "last" => Self::Last,
            "prev" => Self::Prev,
            other => Self::Date(other.to_string()),
        }
    }
}

/// A loaded snapshot: content plus its stored metadata (when readable).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub content: String,
    pub metadata: Option<SnapshotMetadata>,
}

pub struct VersionStore {
    store: Arc<dyn BlobStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn content_path(doc_id: &str, label: &str) -> String {
    format!("tos/{}/{}.txt", doc_id, label)
}

fn metadata_path(doc_id: &str, label: &str) -> String {
    format!("tos/{}/{}.json", doc_id, label)
}

fn changed_path(doc_id: &str) -> String {
    format!("tos/{}/changed", doc_id)
}

impl VersionStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, doc_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(doc_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Ingest freshly fetched content for a document, dated today (UTC).
    pub async fn ingest(
        &self,
        doc_id: &str,
        content: &str,
        metadata: &SnapshotMetadata,
        force: bool,
    ) -> Result<IngestOutcome> {
        self.ingest_at(doc_id, content, metadata, force, Utc::now().date_naive())
            .await
    }

    /// Ingest with an explicit capture date.
    ///
    /// 1. `current` is rewritten unconditionally.
    /// 2. The change decision compares structural hashes against the
    ///    snapshot `last` designates; a missing or unreadable predecessor
    ///    reads as changed (first ingest always "changes").
    /// 3. On change, `prev` takes `last`'s old date, the dated snapshot is
    ///    written, `last` moves to it, and the changed marker records the
    ///    date. Otherwise only the stale changed marker is cleared.
    pub async fn ingest_at(
        &self,
        doc_id: &str,
        content: &str,
        metadata: &SnapshotMetadata,
        force: bool,
        date: NaiveDate,
    ) -> Result<IngestOutcome> {
        let lock = self.lock_for(doc_id);
        let _guard = lock.lock().await;

        let metadata_json = serde_json::to_string_pretty(metadata)?;

        self.store
            .put(&content_path(doc_id, "current"), content)
            .await?;
        self.store
            .put(&metadata_path(doc_id, "current"), &metadata_json)
            .await?;

        let last_date = self.resolve_pointer(doc_id, "last").await?;

        let changes_detected = if force {
            true
        } else {
            match &last_date {
                None => true,
                Some(pointer_date) => match self.load_metadata(doc_id, pointer_date).await? {
                    // Unreadable history fails open toward re-processing
                    None => true,
                    Some(previous) => hasher::has_changed(
                        &previous.structural_hash,
                        &metadata.structural_hash,
                    ),
                },
            }
        };

        if !changes_detected {
            tracing::debug!(doc_id, "no structural change, current updated only");
            self.store.delete(&changed_path(doc_id)).await?;
            return Ok(IngestOutcome {
                changes_detected: false,
                snapshot_created: false,
                timestamp: None,
            });
        }

        // Demote before overwriting: prev must take last's old date first
        if let Some(old_last) = &last_date {
            self.store
                .put(&format!("tos/{}/prev.txt", doc_id), old_last)
                .await?;
        }

        let date_label = date.format("%Y-%m-%d").to_string();
        self.store
            .put(&content_path(doc_id, &date_label), content)
            .await?;
        self.store
            .put(&metadata_path(doc_id, &date_label), &metadata_json)
            .await?;
        self.store
            .put(&format!("tos/{}/last.txt", doc_id), &date_label)
            .await?;
        self.store.put(&changed_path(doc_id), &date_label).await?;

        tracing::info!(doc_id, date = %date_label, "change detected, snapshot created");

        Ok(IngestOutcome {
            changes_detected: true,
            snapshot_created: true,
            timestamp: Some(date_label),
        })
    }

    /// Read the date a pointer file (`last`, `prev`) currently designates.
    pub async fn resolve_pointer(&self, doc_id: &str, name: &str) -> Result<Option<String>> {
        let raw = self
            .store
            .get(&format!("tos/{}/{}.txt", doc_id, name))
            .await?;
        Ok(raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
    }

    /// Load a snapshot by version label.
    ///
    /// `current` and dated labels resolve directly to their files; `last`
    /// and `prev` are indirections through their pointer files.
    pub async fn read(&self, doc_id: &str, label: &VersionLabel) -> Result<Option<Snapshot>> {
        let file_label = match label {
            VersionLabel::Current => "current".to_string(),
            VersionLabel::Date(date) => date.clone(),
            VersionLabel::Last => match self.resolve_pointer(doc_id, "last").await? {
                Some(date) => date,
                None => return Ok(None),
            },
            VersionLabel::Prev => match self.resolve_pointer(doc_id, "prev").await? {
                Some(date) => date,
                None => return Ok(None),
            },
        };

        let content = match self.store.get(&content_path(doc_id, &file_label)).await? {
            Some(content) => content,
            None => return Ok(None),
        };
        let metadata = self.load_metadata(doc_id, &file_label).await?;

        Ok(Some(Snapshot { content, metadata }))
    }

    async fn load_metadata(&self, doc_id: &str, label: &str) -> Result<Option<SnapshotMetadata>> {
        let raw = match self.store.get(&metadata_path(doc_id, label)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                tracing::warn!(doc_id, label, "unreadable snapshot metadata: {}", e);
                Ok(None)
            }
        }
    }

    /// All dated snapshot labels for a document, newest first.
    ///
    /// Lexicographic descending order on `YYYY-MM-DD` labels is
    /// date-correct.
    pub async fn list_dates(&self, doc_id: &str) -> Result<Vec<String>> {
        let prefix = format!("tos/{}/", doc_id);
        let paths = self.store.list(&prefix).await?;

        let mut dates: Vec<String> = paths
            .iter()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|name| name.strip_suffix(".txt"))
            .filter(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").is_ok())
            .map(|stem| stem.to_string())
            .collect();

        dates.sort_by(|a, b| b.cmp(a));
        dates.dedup();
        Ok(dates)
    }

    /// Date recorded by the changed marker, when present.
    pub async fn changed_date(&self, doc_id: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get(&changed_path(doc_id))
            .await?
            .map(|s| s.trim().to_string()))
    }

    /// Assemble the version overview for one configured document.
    pub async fn summary(&self, doc: &DocumentConfig) -> Result<VersionSummary> {
        let last = self.resolve_pointer(&doc.id, "last").await?;
        let prev = self.resolve_pointer(&doc.id, "prev").await?;
        let changed = self.changed_date(&doc.id).await?.is_some();
        let available_dates = self.list_dates(&doc.id).await?;

        let current = self
            .load_metadata(&doc.id, "current")
            .await?
            .and_then(|m| {
                chrono::DateTime::parse_from_rfc3339(&m.timestamp)
                    .ok()
                    .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
            });

        Ok(VersionSummary {
            id: doc.id.clone(),
            name: doc.name.clone(),
            url: doc.url.clone(),
            current,
            last,
            prev,
            changed,
            total: available_dates.len(),
            available_dates,
        })
    }
}
