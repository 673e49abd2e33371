// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use maestro_domain::FileSource;

/// Metadata returned by an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// A stored file with its payload.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub content_base64: String,
    pub meta: FileMeta,
    pub tags: HashMap<String, String>,
}

/// Blob store port.
///
/// Keys carry a `<timestamp>_<hash>_<filename>` prefix so references stay
/// unique across re-uploads; the UI sanitizers strip it back off.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn upload_file(
        &self,
        user_email: &str,
        filename: &str,
        content_base64: &str,
        source_type: FileSource,
        tags: HashMap<String, String>,
    ) -> anyhow::Result<FileMeta>;

    async fn get_file(&self, user_email: &str, key: &str) -> anyhow::Result<StoredFile>;

    /// Shape stored references into the `{files: [...]}` payload the client
    /// renders in its file panel.
    fn organize_files_metadata(&self, refs: &HashMap<String, FileMeta>) -> Value {
        let mut files: Vec<Value> = refs
            .iter()
            .map(|(filename, meta)| {
                json!({
                    "filename": filename,
                    "key": meta.key,
                    "content_type": meta.content_type,
                    "size": meta.size,
                    "last_modified": meta.last_modified.to_rfc3339(),
                })
            })
            .collect();
        files.sort_by(|a, b| a["filename"].as_str().cmp(&b["filename"].as_str()));
        json!({ "files": files })
    }

    fn should_display_in_canvas(&self, filename: &str) -> bool {
        matches!(
            self.get_file_extension(filename).as_str(),
            "html" | "htm" | "md" | "markdown" | "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp"
                | "pdf" | "csv" | "json"
        )
    }

    fn get_file_extension(&self, filename: &str) -> String {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn get_canvas_file_type(&self, ext: &str) -> String {
        match ext {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => "image",
            "html" | "htm" => "html",
            "md" | "markdown" => "markdown",
            "pdf" => "pdf",
            "csv" | "json" => "data",
            _ => "text",
        }
        .to_string()
    }
}

/// Process-local file store used by tests and the CLI default profile.
#[derive(Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<(String, String), StoredFile>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guess_content_type(filename: &str) -> &'static str {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => "text/csv",
            "json" => "application/json",
            "html" | "htm" => "text/html",
            "md" | "markdown" => "text/markdown",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "svg" => "image/svg+xml",
            "pdf" => "application/pdf",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        }
    }

    fn storage_key(filename: &str, content_base64: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content_base64.as_bytes());
        hasher.update(filename.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}_{}_{filename}", Utc::now().timestamp(), &digest[..8])
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn upload_file(
        &self,
        user_email: &str,
        filename: &str,
        content_base64: &str,
        _source_type: FileSource,
        tags: HashMap<String, String>,
    ) -> anyhow::Result<FileMeta> {
        use base64::Engine;
        let size = base64::engine::general_purpose::STANDARD
            .decode(content_base64.trim())
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(content_base64.len() as u64);

        let meta = FileMeta {
            key: Self::storage_key(filename, content_base64),
            content_type: Self::guess_content_type(filename).to_string(),
            size,
            last_modified: Utc::now(),
        };
        self.files.write().await.insert(
            (user_email.to_string(), meta.key.clone()),
            StoredFile {
                filename: filename.to_string(),
                content_base64: content_base64.to_string(),
                meta: meta.clone(),
                tags,
            },
        );
        Ok(meta)
    }

    async fn get_file(&self, user_email: &str, key: &str) -> anyhow::Result<StoredFile> {
        self.files
            .read()
            .await
            .get(&(user_email.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("file not found: {key}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
