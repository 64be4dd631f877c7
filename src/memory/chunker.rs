//! Reference document ingestion: directory walk and sliding-window chunking.

use std::path::Path;

use walkdir::WalkDir;

use super::CorpusError;

/// Split `text` into overlapping windows of `chunk_size` characters.
///
/// Window `i` starts at `i * (chunk_size - overlap)`; the last window may be
/// shorter and always ends at the end of the text. Windows are measured in
/// `char`s so a multi-byte character is never split.
///
/// Returns no chunks for empty text, or when `chunk_size` is zero or not
/// larger than `overlap`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Vec::new();
    }
    let step = chunk_size.saturating_sub(overlap);
    let chars: Vec<char> = text.chars().collect();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = start.saturating_add(chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start = start.saturating_add(step);
    }
    chunks
}

/// Read every file with extension `ext` under `dir`, recursively, in path order.
///
/// # Errors
///
/// Returns `CorpusError::Io` if the directory cannot be walked or a file
/// cannot be read as UTF-8.
pub fn load_documents(dir: &Path, ext: &str) -> Result<Vec<String>, CorpusError> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CorpusError::Io {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        let content = std::fs::read_to_string(path).map_err(|e| CorpusError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), chars = content.len(), "loaded reference document");
        documents.push(content);
    }
    Ok(documents)
}
