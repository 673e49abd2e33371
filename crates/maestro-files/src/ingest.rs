// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use maestro_domain::{ExtractMode, FileRef, FileSource, SessionContext};
use maestro_events::EventPublisher;

use crate::store::{FileMeta, FileStore};

/// Extracted text content for a file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub content: Option<String>,
    pub preview: Option<String>,
    pub metadata: Option<Value>,
}

/// Content extraction port (PDF text, spreadsheet previews, ...).
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    fn default_mode(&self) -> ExtractMode {
        ExtractMode::Preview
    }

    async fn extract(
        &self,
        filename: &str,
        content_base64: &str,
        mime_type: Option<&str>,
    ) -> anyhow::Result<Extraction>;
}

/// An incoming file attachment.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub content_base64: String,
    /// When absent, the extractor's default mode applies.
    pub extract_mode: Option<ExtractMode>,
}

impl FilePayload {
    pub fn new(content_base64: impl Into<String>) -> Self {
        Self {
            content_base64: content_base64.into(),
            extract_mode: None,
        }
    }

    pub fn with_extract_mode(mut self, mode: ExtractMode) -> Self {
        self.extract_mode = Some(mode);
        self
    }
}

/// Ingest user file attachments into the store and the session context.
///
/// Per-file failures are logged and skipped; a `files_update` event is
/// emitted when at least one upload succeeded.
pub async fn handle_session_files(
    context: &mut SessionContext,
    user_email: Option<&str>,
    files: &HashMap<String, FilePayload>,
    store: &dyn FileStore,
    extractor: Option<&dyn ContentExtractor>,
    publisher: &dyn EventPublisher,
) {
    let Some(user_email) = user_email else {
        return;
    };
    if files.is_empty() {
        return;
    }

    let default_mode = extractor
        .filter(|e| e.is_enabled())
        .map(|e| e.default_mode())
        .unwrap_or(ExtractMode::None);

    let mut uploaded: HashMap<String, FileMeta> = HashMap::new();
    for (filename, payload) in files {
        let extract_mode = payload.extract_mode.unwrap_or(default_mode);
        let meta = match store
            .upload_file(
                user_email,
                filename,
                &payload.content_base64,
                FileSource::User,
                HashMap::from([("source".to_string(), "user".to_string())]),
            )
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                error!("failed uploading user file {filename}: {e:#}");
                continue;
            }
        };

        let mut file_ref = FileRef::new(&meta.key, FileSource::User);
        file_ref.content_type = Some(meta.content_type.clone());
        file_ref.size = Some(meta.size);
        file_ref.last_modified = Some(meta.last_modified);
        file_ref.extract_mode = extract_mode;

        if matches!(extract_mode, ExtractMode::Full | ExtractMode::Preview) {
            if let Some(extractor) = extractor.filter(|e| e.is_enabled()) {
                match extractor
                    .extract(filename, &payload.content_base64, Some(&meta.content_type))
                    .await
                {
                    Ok(extraction) => {
                        let preview_len =
                            extraction.preview.as_deref().map(str::len).unwrap_or(0);
                        info!("extracted content from {filename}: {preview_len} chars preview");
                        file_ref.extracted_content = extraction.content;
                        file_ref.extracted_preview = extraction.preview;
                        file_ref.extraction_metadata = extraction.metadata;
                    }
                    Err(e) => debug!("content extraction skipped for {filename}: {e:#}"),
                }
            }
        }

        context.files.insert(filename.clone(), file_ref);
        uploaded.insert(filename.clone(), meta);
    }

    if !uploaded.is_empty() {
        let organized = store.organize_files_metadata(&uploaded);
        info!(
            "emitting files_update for user uploads: total={}",
            uploaded.len()
        );
        publisher.publish_files_update(organized).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
