//! Active-memory refresher (§4.9): rewrites only the bounded
//! `<!-- AUTO-GENERATED: START -->` / `<!-- AUTO-GENERATED: END -->`
//! section of a memory file, leaving anything above or below it —
//! operator notes, prior manual edits — untouched. Writes via
//! tmpfile-then-rename, matching the atomicity idiom used by
//! `surprisebot-session`'s store.

use std::path::Path;

pub const START_MARKER: &str = "<!-- AUTO-GENERATED: START -->";
pub const END_MARKER: &str = "<!-- AUTO-GENERATED: END -->";

#[derive(Debug, thiserror::Error)]
pub enum ActiveMemoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("markers not found or out of order in memory file")]
    MarkersMissing,
}

/// Replaces the content strictly between the markers with `generated`,
/// preserving the markers themselves and everything outside them. If the
/// file doesn't exist yet, it is created with just the marker pair
/// wrapping `generated`.
pub fn render_with_generated_section(existing: &str, generated: &str) -> Result<String, ActiveMemoryError> {
    let start = existing.find(START_MARKER);
    let end = existing.find(END_MARKER);

    match (start, end) {
        (Some(start_idx), Some(end_idx)) if start_idx < end_idx => {
            let before = &existing[..start_idx + START_MARKER.len()];
            let after = &existing[end_idx..];
            Ok(format!("{before}\n{generated}\n{after}"))
        }
        (None, None) => Ok(format!("{START_MARKER}\n{generated}\n{END_MARKER}\n")),
        _ => Err(ActiveMemoryError::MarkersMissing),
    }
}

pub async fn refresh_active_memory(path: &Path, generated: &str) -> Result<(), ActiveMemoryError> {
    let existing = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };

    let rendered = render_with_generated_section(&existing, generated)?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, rendered).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
