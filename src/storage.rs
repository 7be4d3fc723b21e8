//
// storage.rs
// dicomweb-static
//
// Persistence helpers for the archive: gzip JSON payloads and temp-then-rename
// writes so readers never observe a partially written file.
//

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

/// Write bytes to `path` via a temp file in the same directory and an atomic
/// rename.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write temp file for {:?}", path))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to persist {:?}", path))?;
    Ok(())
}

/// Human-readable JSON (indented), written atomically.
pub fn write_json_pretty_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("Failed to serialize to JSON")?;
    write_bytes_atomic(path, &bytes)
}

/// Compact JSON compressed with gzip, written atomically.
pub fn write_json_gz_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec(value).context("Failed to serialize to JSON")?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .context("Failed to compress JSON payload")?;
    let bytes = encoder.finish().context("Failed to finish gzip stream")?;
    write_bytes_atomic(path, &bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_json::from_reader(file).with_context(|| format!("Failed to parse JSON in {:?}", path))
}

pub fn read_json_gz<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut decoder = GzDecoder::new(file);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .with_context(|| format!("Failed to decompress {:?}", path))?;
    serde_json::from_slice(&json).with_context(|| format!("Failed to parse JSON in {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn gzip_json_round_trips() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("payload.json.gz");

        let mut value = BTreeMap::new();
        value.insert("key".to_string(), vec![1, 2, 3]);

        write_json_gz_atomic(&path, &value).expect("write");
        let restored: BTreeMap<String, Vec<i32>> = read_json_gz(&path).expect("read");
        assert_eq!(restored, value);
    }

    #[test]
    fn atomic_write_replaces_previous_content() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("index.json");

        write_bytes_atomic(&path, b"old").expect("first write");
        write_bytes_atomic(&path, b"new").expect("second write");
        assert_eq!(std::fs::read(&path).expect("read"), b"new");
        // No temp file debris left behind.
        let entries = std::fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn read_json_reports_missing_files() {
        let dir = tempdir().expect("tmpdir");
        let missing = dir.path().join("absent.json");
        let result: Result<Vec<String>> = read_json(&missing);
        assert!(result.is_err());
    }
}
