// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use maestro_domain::{FileRef, FileSource, Session, ToolResult};
use maestro_events::{ClientEvent, EventPublisher};

use crate::store::{FileMeta, FileStore};

/// Safety cap: a single tool result never ingests more than this many files.
const MAX_ARTIFACTS: usize = 10;

fn has_iframe_display(result: &ToolResult) -> bool {
    result
        .display_config
        .as_ref()
        .map(|display| {
            display["type"].as_str() == Some("iframe") && display["url"].as_str().is_some()
        })
        .unwrap_or(false)
}

/// Ingest a tool result's artifacts into the session file store and notify
/// the client (`files_update`, then `canvas_files` honoring the display
/// configuration).  A no-op for results without artifacts or iframe display.
pub async fn process_tool_artifacts(
    session: &mut Session,
    result: &ToolResult,
    store: &dyn FileStore,
    publisher: &dyn EventPublisher,
) {
    if result.artifacts.is_empty() && !has_iframe_display(result) {
        return;
    }

    if !result.artifacts.is_empty() {
        let Some(user_email) = session.user_email.clone() else {
            return;
        };
        ingest_artifacts(session, result, &user_email, store, publisher).await;
    }

    notify_canvas_files(session, result, store, publisher).await;
}

async fn ingest_artifacts(
    session: &mut Session,
    result: &ToolResult,
    user_email: &str,
    store: &dyn FileStore,
    publisher: &dyn EventPublisher,
) {
    if result.artifacts.len() > MAX_ARTIFACTS {
        warn!(
            "tool result carries {} artifacts, ingesting first {MAX_ARTIFACTS}",
            result.artifacts.len()
        );
    }

    let mut uploaded: HashMap<String, FileMeta> = HashMap::new();
    for artifact in result.artifacts.iter().take(MAX_ARTIFACTS) {
        if artifact.name.is_empty() || artifact.b64.is_empty() {
            warn!("skipping artifact with missing name or content");
            continue;
        }
        let meta = match store
            .upload_file(
                user_email,
                &artifact.name,
                &artifact.b64,
                FileSource::Tool,
                HashMap::from([("source".to_string(), "tool".to_string())]),
            )
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                error!("failed uploading tool artifact {}: {e:#}", artifact.name);
                continue;
            }
        };

        let mut file_ref = FileRef::new(&meta.key, FileSource::Tool);
        file_ref.content_type = Some(meta.content_type.clone());
        file_ref.size = Some(meta.size);
        file_ref.last_modified = Some(meta.last_modified);
        file_ref.tool_call_id = Some(result.tool_call_id.clone());
        session.context.files.insert(artifact.name.clone(), file_ref);
        uploaded.insert(artifact.name.clone(), meta);
    }

    if !uploaded.is_empty() {
        info!("emitting files_update for tool artifacts: total={}", uploaded.len());
        publisher
            .publish_files_update(store.organize_files_metadata(&uploaded))
            .await;
    }
}

async fn notify_canvas_files(
    session: &Session,
    result: &ToolResult,
    store: &dyn FileStore,
    publisher: &dyn EventPublisher,
) {
    // Iframe-only display: nothing was ingested, the canvas embeds a URL.
    if result.artifacts.is_empty() {
        if let Some(display) = &result.display_config {
            info!("emitting canvas_files event for iframe display");
            publisher
                .send_event(ClientEvent::IntermediateUpdate {
                    update_type: "canvas_files".into(),
                    data: json!({"files": [], "display": display}),
                })
                .await;
        }
        return;
    }

    let mut canvas_files: Vec<Value> = Vec::new();
    for artifact in &result.artifacts {
        let Some(file_ref) = session.context.files.get(&artifact.name) else {
            continue;
        };
        if !store.should_display_in_canvas(&artifact.name) {
            continue;
        }
        let ext = store.get_file_extension(&artifact.name);
        canvas_files.push(json!({
            "filename": artifact.name,
            "type": store.get_canvas_file_type(&ext),
            "key": file_ref.key,
            "size": file_ref.size.unwrap_or(0),
            "mime_type": artifact.mime,
        }));
    }

    if canvas_files.is_empty() {
        return;
    }

    // Stable reorder: the display's primary file leads.
    if let Some(primary) = result
        .display_config
        .as_ref()
        .and_then(|d| d["primary_file"].as_str())
    {
        canvas_files.sort_by_key(|f| if f["filename"] == primary { 0 } else { 1 });
    }

    let mut data = json!({"files": canvas_files});
    if let Some(display) = &result.display_config {
        data["display"] = display.clone();
    }

    info!(
        "emitting canvas_files event: count={}",
        data["files"].as_array().map(Vec::len).unwrap_or(0)
    );
    publisher
        .send_event(ClientEvent::IntermediateUpdate {
            update_type: "canvas_files".into(),
            data,
        })
        .await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
