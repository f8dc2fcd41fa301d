//! Pipeline orchestration.
//!
//! Wires fetch → normalize → hash → version-store ingest into one pass, and
//! snapshot-history → fingerprint gate → AI compare → diff-store into the
//! other. Documents in a batch are processed sequentially; every
//! per-document failure is converted into a structured result and the loop
//! continues. Only configuration failures (no document list at all) abort a
//! batch.
//!
//! No business logic lives here: the change decision belongs to
//! [`crate::versions`], the generation gates to [`crate::lineage`].

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;

use crate::ai::Comparer;
use crate::config::Config;
use crate::fetch::PageFetcher;
use crate::hasher::ContentHasher;
use crate::lineage::DiffTracker;
use crate::models::{
    DiffBatchResponse, DocumentConfig, DocumentResult, FetchBatchResponse, SnapshotMetadata,
};
use crate::normalize::TextNormalizer;
use crate::store::{self, BlobStore};
use crate::versions::VersionStore;

/// The assembled processing pipeline: one instance per process, every
/// dependency injected at construction.
pub struct Pipeline {
    pub store: Arc<dyn BlobStore>,
    pub versions: Arc<VersionStore>,
    pub tracker: DiffTracker,
    pub comparer: Arc<dyn Comparer>,
    fetcher: PageFetcher,
    hasher: ContentHasher,
    normalizer: TextNormalizer,
}

impl Pipeline {
    /// Build the pipeline from configuration (storage backend and AI
    /// provider resolved here, once).
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = store::create_store(&config.storage)?;
        let comparer = crate::ai::create_comparer(&config.ai)?;
        Self::with_components(config, store, comparer)
    }

    /// Build the pipeline around externally constructed store and comparer.
    pub fn with_components(
        config: &Config,
        store: Arc<dyn BlobStore>,
        comparer: Arc<dyn Comparer>,
    ) -> Result<Self> {
        let versions = Arc::new(VersionStore::new(store.clone()));
        let tracker = DiffTracker::new(store.clone(), versions.clone());

        Ok(Self {
            store,
            versions,
            tracker,
            comparer,
            fetcher: PageFetcher::new(&config.fetch)?,
            hasher: ContentHasher::new(),
            normalizer: TextNormalizer::new(),
        })
    }

    /// Resolve the batch's document list.
    ///
    /// Inline documents win; otherwise `config/documents.json` is loaded
    /// from storage. A missing or empty configuration is a request-level
    /// failure, as is an id filter that matches nothing.
    pub async fn resolve_documents(
        &self,
        inline: Option<Vec<DocumentConfig>>,
        ids: Option<&[String]>,
    ) -> Result<Vec<DocumentConfig>> {
        let mut documents = match inline {
            Some(docs) if !docs.is_empty() => docs,
            _ => {
                let file = store::load_documents(self.store.as_ref())
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!("Could not load document configuration from storage")
                    })?;
                if file.documents.is_empty() {
                    anyhow::bail!("No documents configured in documents.json");
                }
                file.documents
            }
        };

        if let Some(ids) = ids {
            if !ids.is_empty() {
                documents.retain(|doc| ids.contains(&doc.id));
                if documents.is_empty() {
                    anyhow::bail!("No documents found for IDs: {}", ids.join(", "));
                }
            }
        }

        Ok(documents)
    }

    /// Fetch, normalize, hash, and ingest every document in the batch.
    pub async fn run_fetch_batch(
        &self,
        documents: &[DocumentConfig],
        force: bool,
    ) -> FetchBatchResponse {
        let start = Instant::now();
        tracing::info!(count = documents.len(), "processing fetch batch");

        let mut results = Vec::with_capacity(documents.len());
        for doc in documents {
            results.push(self.process_document(doc, force).await);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let processing_time = start.elapsed().as_secs_f64();
        tracing::info!(
            succeeded = success_count,
            total = results.len(),
            elapsed = processing_time,
            "fetch batch complete"
        );

        FetchBatchResponse {
            success: true,
            processed_count: results.len(),
            success_count,
            error_count: results.len() - success_count,
            documents: results,
            processing_time,
        }
    }

    /// Run the full ingest pass for one document.
    pub async fn process_document(&self, doc: &DocumentConfig, force: bool) -> DocumentResult {
        if doc.id.is_empty() || doc.url.is_empty() {
            return DocumentResult::failed(doc, "Missing document ID or URL in configuration");
        }

        tracing::info!(doc_id = %doc.id, url = %doc.url, "processing document");

        let page = match self.fetcher.fetch_page(&doc.url, doc.selector.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                return DocumentResult::failed(
                    doc,
                    format!("Failed to fetch document content: {}", e),
                )
            }
        };

        let normalized = self.normalizer.normalize_text(&page.content, true);
        if normalized.trim().is_empty() {
            return DocumentResult::failed(doc, "Document content is empty after normalization");
        }

        let hashes = self.hasher.generate_all_hashes(&normalized);
        let metadata = SnapshotMetadata {
            timestamp: Utc::now().to_rfc3339(),
            url: doc.url.clone(),
            content_length: normalized.len(),
            content_hash: hashes.content.clone(),
            structural_hash: hashes.structural.clone(),
            fingerprint_hash: hashes.fingerprint.clone(),
            document_id: Some(doc.id.clone()),
            document_name: Some(doc.name.clone()),
            title: page.title.clone(),
            selector_used: doc.selector.clone(),
            page_metadata: page.metadata.clone(),
        };

        let outcome = match self.versions.ingest(&doc.id, &normalized, &metadata, force).await {
            Ok(outcome) => outcome,
            Err(e) => return DocumentResult::failed(doc, format!("Failed to store document: {}", e)),
        };

        DocumentResult {
            document_id: doc.id.clone(),
            document_name: doc.name.clone(),
            url: doc.url.clone(),
            success: true,
            changes_detected: outcome.changes_detected,
            snapshot_created: outcome.snapshot_created,
            timestamp: outcome.timestamp,
            error_message: None,
            content_length: Some(normalized.len()),
            hashes: Some(hashes),
        }
    }

    /// Run the diff lineage tracker for every document in the batch.
    pub async fn run_diff_batch(
        &self,
        documents: &[DocumentConfig],
        force: bool,
    ) -> DiffBatchResponse {
        let start = Instant::now();
        tracing::info!(count = documents.len(), "processing diff batch");

        let mut results = Vec::with_capacity(documents.len());
        for doc in documents {
            results.push(
                self.tracker
                    .maybe_generate_diff(doc, self.comparer.as_ref(), force)
                    .await,
            );
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let diffs_generated = results.iter().filter(|r| r.diff_generated).count();
        let processing_time = start.elapsed().as_secs_f64();
        tracing::info!(
            succeeded = success_count,
            diffs = diffs_generated,
            total = results.len(),
            elapsed = processing_time,
            "diff batch complete"
        );

        DiffBatchResponse {
            success: true,
            processed_count: results.len(),
            success_count,
            error_count: results.len() - success_count,
            diffs_generated,
            documents: results,
            processing_time,
        }
    }
}
