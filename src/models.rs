//! Core data models used throughout policywatch.
//!
//! These types represent the monitored documents, snapshot metadata, and
//! per-document processing results that flow through the fetch and diff
//! pipelines.

use serde::{Deserialize, Serialize};

use crate::hasher::DocumentHashes;

/// One monitored document, as configured in `config/documents.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    /// CSS selector narrowing extraction to part of the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Top-level shape of `config/documents.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentsFile {
    #[serde(default)]
    pub documents: Vec<DocumentConfig>,
}

/// Metadata stored alongside every snapshot (`current.json` and `{date}.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Capture time, RFC 3339.
    pub timestamp: String,
    pub url: String,
    pub content_length: usize,
    pub content_hash: String,
    pub structural_hash: String,
    pub fingerprint_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_used: Option<String>,
    /// Page-level metadata captured at fetch time (headers, meta tags).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub page_metadata: serde_json::Value,
}

impl SnapshotMetadata {
    pub fn hashes(&self) -> DocumentHashes {
        DocumentHashes {
            content: self.content_hash.clone(),
            structural: self.structural_hash.clone(),
            fingerprint: self.fingerprint_hash.clone(),
        }
    }
}

/// Metadata stored alongside every diff artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffMetadata {
    pub document_id: String,
    pub document_name: String,
    pub previous_snapshot_timestamp: String,
    pub current_snapshot_timestamp: String,
    pub model: String,
    pub provider: String,
    pub prompt_template_used: String,
    /// Generation time, RFC 3339.
    pub generated_at: String,
    #[serde(default)]
    pub url: String,
}

/// Outcome of a single version-store ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub changes_detected: bool,
    pub snapshot_created: bool,
    /// Date label of the snapshot written, when one was.
    pub timestamp: Option<String>,
}

/// Per-document result of the fetch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document_id: String,
    pub document_name: String,
    pub url: String,
    pub success: bool,
    pub changes_detected: bool,
    pub snapshot_created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<DocumentHashes>,
}

impl DocumentResult {
    /// A failure result carrying only identity and a reason.
    pub fn failed(doc: &DocumentConfig, message: impl Into<String>) -> Self {
        Self {
            document_id: doc.id.clone(),
            document_name: doc.name.clone(),
            url: doc.url.clone(),
            success: false,
            changes_detected: false,
            snapshot_created: false,
            timestamp: None,
            error_message: Some(message.into()),
            content_length: None,
            hashes: None,
        }
    }
}

/// Batch summary returned by `POST /fetch-docs` and `pwatch fetch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchBatchResponse {
    pub success: bool,
    pub processed_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub documents: Vec<DocumentResult>,
    pub processing_time: f64,
}

/// Per-document result of the diff pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResult {
    pub document_id: String,
    pub document_name: String,
    pub success: bool,
    pub diff_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_snapshot_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_snapshot_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_length: Option<usize>,
}

/// Batch summary returned by `POST /generate-diffs` and `pwatch diff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffBatchResponse {
    pub success: bool,
    pub processed_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub diffs_generated: usize,
    pub documents: Vec<DiffResult>,
    pub processing_time: f64,
}

/// Version summary for one document, as returned by `GET /tos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Calendar date of the standing `current` snapshot, when one exists.
    pub current: Option<String>,
    pub last: Option<String>,
    pub prev: Option<String>,
    /// Whether the most recent ingest rolled the pointers.
    pub changed: bool,
    pub total: usize,
    pub available_dates: Vec<String>,
}

/// Identity of the AI backend, as reported by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub provider: String,
}
