//! Writes copies of the analysed sources with intercepted calls replaced.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::analysis::AnalyzedFile;
use crate::analysis::location::Span;
use crate::pipeline::CancellationToken;

/// Replacement text for one call expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub file: String,
    pub span: Span,
    pub text: String,
}

/// Applies `replacements` back to front; overlapping or invalid spans are skipped.
pub fn rewrite_source(source: &str, replacements: &[&Replacement]) -> String {
    let mut ordered = replacements.to_vec();
    ordered.sort_by(|a, b| b.span.start().cmp(&a.span.start()));

    let mut out = source.to_string();
    let mut limit = source.len();
    for replacement in ordered {
        let (start, end) = (replacement.span.start(), replacement.span.end());
        let valid = start < end
            && end <= limit
            && source.is_char_boundary(start)
            && source.is_char_boundary(end);
        if !valid {
            warn!(
                file = %replacement.file,
                start,
                end,
                "skipping replacement with an unusable span"
            );
            continue;
        }
        out.replace_range(start..end, &replacement.text);
        limit = start;
    }
    out
}

/// Writes `<dest>/<display path>` for every file with at least one replacement.
pub fn write_rewritten(
    dest: &Path,
    files: &[AnalyzedFile],
    replacements: &[Replacement],
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    let mut by_file: BTreeMap<&str, Vec<&Replacement>> = BTreeMap::new();
    for replacement in replacements {
        by_file
            .entry(replacement.file.as_str())
            .or_default()
            .push(replacement);
    }

    let mut written = Vec::new();
    for (display_path, replacements) in by_file {
        let Some(file) = files.iter().find(|file| file.display_path == display_path) else {
            warn!(file = display_path, "rewrite target was not analysed");
            continue;
        };
        cancel.check()?;
        let text = rewrite_source(&file.source, &replacements);
        let path = dest.join(display_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
        debug!(file = display_path, calls = replacements.len(), "rewrote source");
        written.push(path);
    }
    Ok(written)
}
