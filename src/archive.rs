//! Batch packaging of finished results into one zip archive.
//!
//! Entry names come from the conversion service, so they are reduced to a
//! bare file name first; two results that end up with the same name get a
//! ` (n)` suffix instead of overwriting each other.

use crate::error::Jfif2JpgError;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::Arc;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Reduce a suggested output name to its final path component.
///
/// Returns `fallback` when nothing usable is left.
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if last.is_empty() || last == "." || last == ".." {
        fallback.to_string()
    } else {
        last.to_string()
    }
}

/// Make every name in `names` distinct, keeping the first occurrence as is.
///
/// `photo.jpg`, `photo.jpg` → `photo.jpg`, `photo (1).jpg`.
pub fn dedupe_names(names: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        let mut candidate = name.clone();
        let mut n = 1;
        while seen.contains(&candidate) {
            candidate = match name.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
                _ => format!("{name} ({n})"),
            };
            n += 1;
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }

    out
}

/// Build an in-memory zip with one entry per `(name, bytes)` pair.
///
/// Names are used as given; run them through [`dedupe_names`] first.
pub fn build_zip(entries: &[(String, Arc<[u8]>)]) -> Result<Vec<u8>, Jfif2JpgError> {
    let zip_err = |e: zip::result::ZipError| Jfif2JpgError::ArchiveFailed(e.to_string());
    let io_err = |e: std::io::Error| Jfif2JpgError::ArchiveFailed(e.to_string());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in entries {
        writer.start_file(name.as_str(), options).map_err(zip_err)?;
        writer.write_all(bytes).map_err(io_err)?;
        debug!("Archived {} ({} bytes)", name, bytes.len());
    }

    let cursor = writer.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}
