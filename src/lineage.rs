//! Diff lineage tracking.
//!
//! Decides, per document, whether the two newest dated snapshots warrant an
//! AI comparison, and persists the resulting summary as an immutable diff
//! artifact. Three gates keep the expensive step quiet:
//!
//! 1. Fewer than two dated snapshots: nothing to compare (reported, not an
//!    error).
//! 2. The latest stored artifact already covers exactly this snapshot pair:
//!    skip unless forced.
//! 3. The snapshots' fingerprint hashes are equal: the structural change
//!    that minted the newer snapshot was formatting or re-dating only, so
//!    no summary is generated.
//!
//! Every per-document failure becomes a structured [`DiffResult`]; nothing
//! escapes the document boundary.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::ai::Comparer;
use crate::hasher;
use crate::models::{DiffMetadata, DiffResult, DocumentConfig};
use crate::store::BlobStore;
use crate::versions::{VersionLabel, VersionStore};

/// Built-in prompt used when storage holds neither a document-specific nor
/// a default template.
pub const FALLBACK_PROMPT: &str = r#"Compare the two versions of the legal document '{document_name}' below and provide a clear, concise summary of the changes.

Focus on:
1. **Substantial Changes**: New terms, modified policies, changed obligations
2. **User Impact**: How changes affect users' rights, responsibilities, or experience
3. **Legal Implications**: Changes in liability, data handling, dispute resolution
4. **Compliance Requirements**: New requirements users must follow

Ignore:
- Minor formatting or wording changes that don't alter meaning
- Updated dates or version numbers
- Cosmetic changes to layout or presentation

**Previous Version:**
{previous_content}

**Current Version:**
{current_content}

**Additional Context:**
{metadata}

Please provide a structured summary with:
- **Summary**: Brief overview of changes
- **Key Changes**: Bulleted list of important modifications
- **User Impact**: How these changes affect users
- **Recommendations**: Any actions users should consider

Be objective, clear, and focus on meaningful changes that matter to users."#;

pub struct DiffTracker {
    store: Arc<dyn BlobStore>,
    versions: Arc<VersionStore>,
}

fn diff_content_path(doc_id: &str, label: &str) -> String {
    format!("diffs/{}/{}.txt", doc_id, label)
}

fn diff_metadata_path(doc_id: &str, label: &str) -> String {
    format!("diffs/{}/{}.json", doc_id, label)
}

/// A successful no-op result: the document was handled, no diff was needed.
fn skipped(doc: &DocumentConfig, message: &str, pair: Option<(&str, &str)>) -> DiffResult {
    DiffResult {
        document_id: doc.id.clone(),
        document_name: doc.name.clone(),
        success: true,
        diff_generated: false,
        timestamp: None,
        previous_snapshot_timestamp: pair.map(|(p, _)| p.to_string()),
        current_snapshot_timestamp: pair.map(|(_, c)| c.to_string()),
        error_message: Some(message.to_string()),
        diff_length: None,
    }
}

impl DiffTracker {
    pub fn new(store: Arc<dyn BlobStore>, versions: Arc<VersionStore>) -> Self {
        Self { store, versions }
    }

    /// Run the gated comparison for one document.
    ///
    /// Always returns a structured result; failures are reported per
    /// document and never abort a batch.
    pub async fn maybe_generate_diff(
        &self,
        doc: &DocumentConfig,
        comparer: &dyn Comparer,
        force: bool,
    ) -> DiffResult {
        match self.generate_inner(doc, comparer, force).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(doc_id = %doc.id, "diff generation failed: {:#}", e);
                DiffResult {
                    document_id: doc.id.clone(),
                    document_name: doc.name.clone(),
                    success: false,
                    diff_generated: false,
                    timestamp: None,
                    previous_snapshot_timestamp: None,
                    current_snapshot_timestamp: None,
                    error_message: Some(e.to_string()),
                    diff_length: None,
                }
            }
        }
    }

    async fn generate_inner(
        &self,
        doc: &DocumentConfig,
        comparer: &dyn Comparer,
        force: bool,
    ) -> Result<DiffResult> {
        let dates = self.versions.list_dates(&doc.id).await?;
        if dates.len() < 2 {
            tracing::debug!(doc_id = %doc.id, snapshots = dates.len(), "not enough history for a diff");
            return Ok(skipped(
                doc,
                &format!("Need at least 2 snapshots for diff, found {}", dates.len()),
                None,
            ));
        }

        let current_ts = dates[0].clone();
        let previous_ts = dates[1].clone();
        let pair = Some((previous_ts.as_str(), current_ts.as_str()));

        if !force {
            if let Some(existing) = self.latest_diff_metadata(&doc.id).await? {
                if existing.current_snapshot_timestamp == current_ts
                    && existing.previous_snapshot_timestamp == previous_ts
                {
                    tracing::debug!(doc_id = %doc.id, "diff already covers {} -> {}", previous_ts, current_ts);
                    return Ok(skipped(doc, "Diff already exists for these snapshots", pair));
                }
            }
        }

        let previous = self
            .versions
            .read(&doc.id, &VersionLabel::Date(previous_ts.clone()))
            .await?;
        let current = self
            .versions
            .read(&doc.id, &VersionLabel::Date(current_ts.clone()))
            .await?;

        let (previous, current) = match (previous, current) {
            (Some(p), Some(c)) => (p, c),
            _ => {
                return Ok(DiffResult {
                    document_id: doc.id.clone(),
                    document_name: doc.name.clone(),
                    success: false,
                    diff_generated: false,
                    timestamp: None,
                    previous_snapshot_timestamp: Some(previous_ts),
                    current_snapshot_timestamp: Some(current_ts),
                    error_message: Some(
                        "Could not load snapshot content for comparison".to_string(),
                    ),
                    diff_length: None,
                })
            }
        };

        // Snapshot creation is gated on structural difference; generation is
        // gated on the coarser fingerprint, so a re-dated document stops here.
        if let (Some(prev_meta), Some(curr_meta)) = (&previous.metadata, &current.metadata) {
            if !hasher::should_generate_diff(&prev_meta.hashes(), &curr_meta.hashes()) {
                tracing::info!(doc_id = %doc.id, "no meaningful content changes, skipping diff");
                return Ok(skipped(doc, "No meaningful content changes detected", pair));
            }
        }

        let (template, template_used) = self.load_prompt(&doc.id).await?;

        let metadata = serde_json::json!({
            "document_id": doc.id,
            "previous_timestamp": previous_ts,
            "current_timestamp": current_ts,
            "url": doc.url,
        });

        let summary = match comparer
            .compare_documents(
                &previous.content,
                &current.content,
                &doc.name,
                &template,
                &metadata,
            )
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(doc_id = %doc.id, "comparison failed: {:#}", e);
                return Ok(DiffResult {
                    document_id: doc.id.clone(),
                    document_name: doc.name.clone(),
                    success: false,
                    diff_generated: false,
                    timestamp: None,
                    previous_snapshot_timestamp: Some(previous_ts),
                    current_snapshot_timestamp: Some(current_ts),
                    error_message: Some(format!("LLM failed to generate diff content: {}", e)),
                    diff_length: None,
                });
            }
        };

        let info = comparer.model_info();
        let diff_metadata = DiffMetadata {
            document_id: doc.id.clone(),
            document_name: doc.name.clone(),
            previous_snapshot_timestamp: previous_ts.clone(),
            current_snapshot_timestamp: current_ts.clone(),
            model: info.model,
            provider: info.provider,
            prompt_template_used: template_used,
            generated_at: Utc::now().to_rfc3339(),
            url: doc.url.clone(),
        };

        let timestamp = self.store_diff(&doc.id, &summary, &diff_metadata).await?;
        tracing::info!(doc_id = %doc.id, %timestamp, "stored diff {} -> {}", previous_ts, current_ts);

        Ok(DiffResult {
            document_id: doc.id.clone(),
            document_name: doc.name.clone(),
            success: true,
            diff_generated: true,
            timestamp: Some(timestamp),
            previous_snapshot_timestamp: Some(previous_ts),
            current_snapshot_timestamp: Some(current_ts),
            error_message: None,
            diff_length: Some(summary.len()),
        })
    }

    /// Persist a diff artifact under a fresh generation timestamp and update
    /// the standing `latest` pair.
    async fn store_diff(
        &self,
        doc_id: &str,
        content: &str,
        metadata: &DiffMetadata,
    ) -> Result<String> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%6f").to_string();
        let metadata_json = serde_json::to_string_pretty(metadata)?;

        self.store
            .put(&diff_content_path(doc_id, &timestamp), content)
            .await?;
        self.store
            .put(&diff_metadata_path(doc_id, &timestamp), &metadata_json)
            .await?;
        self.store
            .put(&diff_content_path(doc_id, "latest"), content)
            .await?;
        self.store
            .put(&diff_metadata_path(doc_id, "latest"), &metadata_json)
            .await?;

        Ok(timestamp)
    }

    /// Load the prompt template for a document: document-specific, then
    /// default, then the built-in constant. Returns the template and which
    /// source supplied it.
    async fn load_prompt(&self, doc_id: &str) -> Result<(String, String)> {
        let doc_specific = format!("prompts/{}_comparison.txt", doc_id);
        if let Some(template) = self.store.get(&doc_specific).await? {
            return Ok((template, format!("{}_comparison.txt", doc_id)));
        }
        if let Some(template) = self.store.get("prompts/default_comparison.txt").await? {
            return Ok((template, "default_comparison.txt".to_string()));
        }
        tracing::warn!(doc_id, "no prompt found in storage, using built-in fallback");
        Ok((FALLBACK_PROMPT.to_string(), "builtin".to_string()))
    }

    async fn latest_diff_metadata(&self, doc_id: &str) -> Result<Option<DiffMetadata>> {
        let raw = match self.store.get(&diff_metadata_path(doc_id, "latest")).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match serde_json::from_str(&raw) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                tracing::warn!(doc_id, "unreadable latest diff metadata: {}", e);
                Ok(None)
            }
        }
    }

    /// Latest diff artifact for a document, when one exists.
    pub async fn latest_diff(&self, doc_id: &str) -> Result<Option<(String, DiffMetadata)>> {
        let content = match self.store.get(&diff_content_path(doc_id, "latest")).await? {
            Some(content) => content,
            None => return Ok(None),
        };
        match self.latest_diff_metadata(doc_id).await? {
            Some(metadata) => Ok(Some((content, metadata))),
            None => Ok(None),
        }
    }

    /// A specific diff artifact by generation timestamp.
    pub async fn diff_by_timestamp(
        &self,
        doc_id: &str,
        timestamp: &str,
    ) -> Result<Option<(String, DiffMetadata)>> {
        let content = match self.store.get(&diff_content_path(doc_id, timestamp)).await? {
            Some(content) => content,
            None => return Ok(None),
        };
        let raw = match self.store.get(&diff_metadata_path(doc_id, timestamp)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let metadata: DiffMetadata = serde_json::from_str(&raw)?;
        Ok(Some((content, metadata)))
    }

    /// All diff generation timestamps for a document, newest first.
    pub async fn diff_history(&self, doc_id: &str) -> Result<Vec<String>> {
        let prefix = format!("diffs/{}/", doc_id);
        let paths = self.store.list(&prefix).await?;

        let mut timestamps: Vec<String> = paths
            .iter()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|name| name.strip_suffix(".txt"))
            .filter(|stem| *stem != "latest")
            .map(|stem| stem.to_string())
            .collect();

        timestamps.sort_by(|a, b| b.cmp(a));
        timestamps.dedup();
        Ok(timestamps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::ContentHasher;
    use crate::models::{ModelInfo, SnapshotMetadata};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingComparer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingComparer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Comparer for CountingComparer {
        async fn compare_documents(
            &self,
            _previous: &str,
            _current: &str,
            document_name: &str,
            _template: &str,
            _metadata: &serde_json::Value,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("provider unavailable");
            }
            Ok(format!("Summary of changes to {}", document_name))
        }

        async fn test_connection(&self) -> bool {
            true
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                model: "mock-model".to_string(),
                max_tokens: 4000,
                temperature: 0.1,
                provider: "mock".to_string(),
            }
        }
    }

    fn doc() -> DocumentConfig {
        DocumentConfig {
            id: "d1".to_string(),
            name: "Example ToS".to_string(),
            url: "https://example.com/tos".to_string(),
            selector: None,
            description: None,
        }
    }

    fn metadata_for(content: &str) -> SnapshotMetadata {
        let hashes = ContentHasher::new().generate_all_hashes(content);
        SnapshotMetadata {
            timestamp: Utc::now().to_rfc3339(),
            url: "https://example.com/tos".to_string(),
            content_length: content.len(),
            content_hash: hashes.content,
            structural_hash: hashes.structural,
            fingerprint_hash: hashes.fingerprint,
            document_id: Some("d1".to_string()),
            document_name: Some("Example ToS".to_string()),
            title: None,
            selector_used: None,
            page_metadata: serde_json::Value::Null,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn setup() -> (Arc<MemoryStore>, Arc<VersionStore>, DiffTracker) {
        let store = Arc::new(MemoryStore::new());
        let versions = Arc::new(VersionStore::new(store.clone()));
        let tracker = DiffTracker::new(store.clone(), versions.clone());
        (store, versions, tracker)
    }

    #[tokio::test]
    async fn single_snapshot_is_not_enough_history() {
        let (_, versions, tracker) = setup().await;
        let text = "Terms alpha.";
        versions
            .ingest_at("d1", text, &metadata_for(text), false, date("2024-01-01"))
            .await
            .unwrap();

        let comparer = CountingComparer::new();
        let result = tracker.maybe_generate_diff(&doc(), &comparer, false).await;

        assert!(result.success);
        assert!(!result.diff_generated);
        assert_eq!(comparer.calls(), 0);
        assert!(result.error_message.unwrap().contains("at least 2 snapshots"));
    }

    #[tokio::test]
    async fn substantive_change_generates_and_stores_diff() {
        let (_, versions, tracker) = setup().await;
        let v1 = "Terms v1. Effective January 1, 2024.";
        let v2 = "Terms v2. Effective January 1, 2024. New clause added.";
        versions
            .ingest_at("d1", v1, &metadata_for(v1), false, date("2024-01-01"))
            .await
            .unwrap();
        versions
            .ingest_at("d1", v2, &metadata_for(v2), false, date("2024-01-03"))
            .await
            .unwrap();

        let comparer = CountingComparer::new();
        let result = tracker.maybe_generate_diff(&doc(), &comparer, false).await;

        assert!(result.success);
        assert!(result.diff_generated);
        assert_eq!(comparer.calls(), 1);
        assert_eq!(result.previous_snapshot_timestamp.as_deref(), Some("2024-01-01"));
        assert_eq!(result.current_snapshot_timestamp.as_deref(), Some("2024-01-03"));

        let (content, metadata) = tracker.latest_diff("d1").await.unwrap().unwrap();
        assert!(content.contains("Example ToS"));
        assert_eq!(metadata.previous_snapshot_timestamp, "2024-01-01");
        assert_eq!(metadata.current_snapshot_timestamp, "2024-01-03");
        assert_eq!(metadata.model, "mock-model");

        let history = tracker.diff_history("d1").await.unwrap();
        assert_eq!(history.len(), 1);
        let by_ts = tracker
            .diff_by_timestamp("d1", &history[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ts.0, content);
    }

    #[tokio::test]
    async fn covered_pair_skips_without_force() {
        let (_, versions, tracker) = setup().await;
        let v1 = "Terms alpha clause.";
        let v2 = "Terms beta clause rewritten.";
        versions
            .ingest_at("d1", v1, &metadata_for(v1), false, date("2024-01-01"))
            .await
            .unwrap();
        versions
            .ingest_at("d1", v2, &metadata_for(v2), false, date("2024-01-03"))
            .await
            .unwrap();

        let comparer = CountingComparer::new();
        let first = tracker.maybe_generate_diff(&doc(), &comparer, false).await;
        assert!(first.diff_generated);

        let second = tracker.maybe_generate_diff(&doc(), &comparer, false).await;
        assert!(second.success);
        assert!(!second.diff_generated);
        assert_eq!(comparer.calls(), 1);
        assert!(second.error_message.unwrap().contains("already exists"));

        // force regenerates and appends to history without deleting
        let third = tracker.maybe_generate_diff(&doc(), &comparer, true).await;
        assert!(third.diff_generated);
        assert_eq!(comparer.calls(), 2);
    }

    #[tokio::test]
    async fn fingerprint_equality_gates_generation() {
        let (_, versions, tracker) = setup().await;
        // Version bump and re-date only: structural change, same fingerprint
        let v1 = "Terms v1. Updated: January 1, 2024. You agree.";
        let v2 = "Terms v2. Updated: March 5, 2024. You agree.";
        versions
            .ingest_at("d1", v1, &metadata_for(v1), false, date("2024-01-01"))
            .await
            .unwrap();
        versions
            .ingest_at("d1", v2, &metadata_for(v2), false, date("2024-03-05"))
            .await
            .unwrap();
        assert_eq!(versions.list_dates("d1").await.unwrap().len(), 2);

        let comparer = CountingComparer::new();
        let result = tracker.maybe_generate_diff(&doc(), &comparer, false).await;

        assert!(result.success);
        assert!(!result.diff_generated);
        assert_eq!(comparer.calls(), 0);
        assert!(result
            .error_message
            .unwrap()
            .contains("No meaningful content changes"));
    }

    #[tokio::test]
    async fn comparer_failure_is_contained() {
        let (_, versions, tracker) = setup().await;
        let v1 = "Terms alpha clause.";
        let v2 = "Terms beta clause rewritten.";
        versions
            .ingest_at("d1", v1, &metadata_for(v1), false, date("2024-01-01"))
            .await
            .unwrap();
        versions
            .ingest_at("d1", v2, &metadata_for(v2), false, date("2024-01-03"))
            .await
            .unwrap();

        let comparer = CountingComparer::failing();
        let result = tracker.maybe_generate_diff(&doc(), &comparer, false).await;

        assert!(!result.success);
        assert!(!result.diff_generated);
        assert!(result.error_message.unwrap().contains("provider unavailable"));
        assert!(tracker.latest_diff("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn document_specific_prompt_wins_over_default() {
        let (store, versions, tracker) = setup().await;
        store
            .put("prompts/default_comparison.txt", "default {current_content}")
            .await
            .unwrap();
        store
            .put("prompts/d1_comparison.txt", "specific {current_content}")
            .await
            .unwrap();

        let v1 = "Terms alpha clause.";
        let v2 = "Terms beta clause rewritten.";
        versions
            .ingest_at("d1", v1, &metadata_for(v1), false, date("2024-01-01"))
            .await
            .unwrap();
        versions
            .ingest_at("d1", v2, &metadata_for(v2), false, date("2024-01-03"))
            .await
            .unwrap();

        let comparer = CountingComparer::new();
        tracker.maybe_generate_diff(&doc(), &comparer, false).await;

        let (_, metadata) = tracker.latest_diff("d1").await.unwrap().unwrap();
        assert_eq!(metadata.prompt_template_used, "d1_comparison.txt");
    }
}
