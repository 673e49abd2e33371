// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use maestro_domain::{ExtractMode, SessionContext};

const PREVIEW_MAX_LINES: usize = 10;
const PREVIEW_MAX_CHARS: usize = 2000;

/// Per-file entries for the manifest, sorted by filename.
fn file_listing(context: &SessionContext) -> Option<(String, bool, bool, bool)> {
    if context.files.is_empty() {
        return None;
    }

    let mut names: Vec<&String> = context.files.keys().collect();
    names.sort();

    let mut entries = Vec::with_capacity(names.len());
    let (mut has_full, mut has_preview, mut has_none) = (false, false, false);

    for name in names {
        let info = &context.files[name];
        let mut entry = format!("- {name}");

        if let Some(pages) = info
            .extraction_metadata
            .as_ref()
            .and_then(|m| m.get("pages"))
            .and_then(|p| p.as_u64())
        {
            entry.push_str(&format!(" ({pages} pages)"));
        }

        match (info.extract_mode, &info.extracted_content, &info.extracted_preview) {
            (ExtractMode::Full, Some(content), _) => {
                has_full = true;
                entry.push_str(&format!(
                    "\n    << content of file {name} >>\n    {content}\n    << end content of file {name} >>"
                ));
            }
            (ExtractMode::Preview, _, Some(preview)) => {
                has_preview = true;
                let mut capped = preview
                    .lines()
                    .take(PREVIEW_MAX_LINES)
                    .collect::<Vec<_>>()
                    .join("\n    ");
                if capped.len() > PREVIEW_MAX_CHARS {
                    capped.truncate(PREVIEW_MAX_CHARS - 3);
                    capped.push_str("...");
                }
                entry.push_str(&format!("\n    Content preview:\n    {capped}"));
            }
            _ => has_none = true,
        }

        entries.push(entry);
    }

    Some((entries.join("\n"), has_full, has_preview, has_none))
}

/// Build the ephemeral files manifest injected as a system message.
///
/// Returns `None` when the session has no files.
pub fn build_files_manifest(context: &SessionContext) -> Option<String> {
    let (listing, has_full, has_preview, has_none) = file_listing(context)?;

    let mut notes = Vec::new();
    if has_full {
        notes.push(
            "Files with full content shown above have been fully extracted. \
             You can reference this content directly.",
        );
    }
    if has_preview {
        notes.push(
            "Files with content previews shown above have been partially analyzed. \
             You can reference preview content directly.",
        );
    }
    if has_none {
        notes.push("Files listed by name only can be opened or analyzed on request.");
    }
    let context_note = if notes.is_empty() {
        String::new()
    } else {
        format!("({})", notes.join(" "))
    };

    Some(format!(
        "Available session files:\n{listing}\n\n{context_note} \
         The user may refer to these files in their requests as session files or attachments."
    ))
}

/// Manifest variant appended before synthesis, after tool runs may have
/// added files.
pub fn build_updated_manifest(context: &SessionContext) -> Option<String> {
    let (listing, _, _, _) = file_listing(context)?;
    Some(format!(
        "Available session files (updated after tool runs):\n{listing}\n\n\
         (You can ask to open or analyze any of these by name.)"
    ))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_domain::{FileRef, FileSource};
    use serde_json::json;

    fn context_with(files: Vec<(&str, FileRef)>) -> SessionContext {
        let mut context = SessionContext::default();
        for (name, file_ref) in files {
            context.files.insert(name.to_string(), file_ref);
        }
        context
    }

    fn plain_ref() -> FileRef {
        FileRef::new("123456789_abcdef_x", FileSource::User)
    }

    #[test]
    fn empty_context_yields_no_manifest() {
        assert!(build_files_manifest(&SessionContext::default()).is_none());
    }

    #[test]
    fn names_are_sorted() {
        let context = context_with(vec![("b.csv", plain_ref()), ("a.csv", plain_ref())]);
        let manifest = build_files_manifest(&context).unwrap();
        let a_pos = manifest.find("- a.csv").unwrap();
        let b_pos = manifest.find("- b.csv").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn full_mode_inlines_content_with_markers() {
        let mut file_ref = plain_ref();
        file_ref.extract_mode = ExtractMode::Full;
        file_ref.extracted_content = Some("col1,col2\n1,2".into());
        let context = context_with(vec![("data.csv", file_ref)]);

        let manifest = build_files_manifest(&context).unwrap();
        assert!(manifest.contains("<< content of file data.csv >>"));
        assert!(manifest.contains("col1,col2"));
        assert!(manifest.contains("fully extracted"));
    }

    #[test]
    fn preview_mode_caps_lines_and_chars() {
        let mut file_ref = plain_ref();
        file_ref.extract_mode = ExtractMode::Preview;
        file_ref.extracted_preview = Some((0..50).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n"));
        let context = context_with(vec![("big.txt", file_ref)]);

        let manifest = build_files_manifest(&context).unwrap();
        assert!(manifest.contains("line 9"));
        assert!(!manifest.contains("line 12"));
        assert!(manifest.contains("partially analyzed"));
    }

    #[test]
    fn page_count_is_annotated() {
        let mut file_ref = plain_ref();
        file_ref.extraction_metadata = Some(json!({"pages": 7}));
        let context = context_with(vec![("doc.pdf", file_ref)]);
        assert!(build_files_manifest(&context).unwrap().contains("doc.pdf (7 pages)"));
    }

    #[test]
    fn name_only_files_get_the_on_request_note() {
        let context = context_with(vec![("x.bin", plain_ref())]);
        let manifest = build_files_manifest(&context).unwrap();
        assert!(manifest.contains("opened or analyzed on request"));
    }

    #[test]
    fn updated_manifest_has_post_tool_header() {
        let context = context_with(vec![("out.png", plain_ref())]);
        let updated = build_updated_manifest(&context).unwrap();
        assert!(updated.starts_with("Available session files (updated after tool runs):"));
        assert!(updated.contains("- out.png"));
    }
}
