//! Candidate filtering for [`crate::orchestrator::Orchestrator::add_files`].
//!
//! Filtering happens in two passes and both passes are counted separately,
//! because the user is told about each kind of rejection:
//!
//! 1. **Format** — keep only files that look like JFIF by extension or by
//!    declared media type. Content is not sniffed; a JFIF file is a JPEG
//!    stream and the conversion service is the authority on decoding it.
//! 2. **Duplicates** — drop files whose name matches an item already in the
//!    queue, or an earlier file in the same batch.

use crate::model::SourceFile;
use std::collections::HashSet;

/// File extension accepted by the converter (compared case-insensitively).
pub const ACCEPTED_EXTENSION: &str = "jfif";

/// Declared media type accepted by the converter.
pub const ACCEPTED_MEDIA_TYPE: &str = "image/jfif";

/// Whether a candidate is in the accepted source format.
pub fn is_accepted_format(file: &SourceFile) -> bool {
    let by_extension = file
        .name
        .rsplit_once('.')
        .map(|(_, ext)| ext.eq_ignore_ascii_case(ACCEPTED_EXTENSION))
        .unwrap_or(false);

    let by_media_type = file
        .media_type
        .as_deref()
        .map(|t| t.trim().eq_ignore_ascii_case(ACCEPTED_MEDIA_TYPE))
        .unwrap_or(false);

    by_extension || by_media_type
}

/// Outcome of filtering one batch of candidates.
#[derive(Debug, Default)]
pub struct Screened {
    /// Candidates that passed both passes, in selection order.
    pub accepted: Vec<SourceFile>,
    /// Candidates dropped for their format.
    pub rejected_format: usize,
    /// Candidates dropped because their name is already taken.
    pub rejected_duplicate: usize,
}

/// Run both filtering passes over `candidates`.
///
/// `existing` holds the names currently in the queue.
pub fn screen<'a>(
    candidates: Vec<SourceFile>,
    existing: impl IntoIterator<Item = &'a str>,
) -> Screened {
    let total = candidates.len();
    let valid: Vec<SourceFile> = candidates.into_iter().filter(is_accepted_format).collect();
    let rejected_format = total - valid.len();

    let mut taken: HashSet<&str> = existing.into_iter().collect();
    let mut accepted = Vec::with_capacity(valid.len());
    let mut rejected_duplicate = 0;

    for file in &valid {
        if taken.contains(file.name.as_str()) {
            rejected_duplicate += 1;
        } else {
            taken.insert(file.name.as_str());
            accepted.push(file.clone());
        }
    }

    Screened {
        accepted,
        rejected_format,
        rejected_duplicate,
    }
}
