//
// repair.rs
// dicomweb-static
//
// Post-hoc utilities that operate directly on an already written archive:
// series-singleton backfill, thumbnail promotion, and metadata pruning.
//

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dicom::core::Tag;
use dicom::object::DefaultDicomObject;
use dicom_object::{file::ReadPreamble, OpenFileOptions};
use serde_json::json;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::dicom_access::ElementAccess;
use crate::models::{InstanceMetadata, PruneOutcome, TagRecord};
use crate::storage;

/// Tags the viewer needs to hang and window an image. Everything else is
/// stripped by `prune_metadata`.
const ESSENTIAL_TAGS: [&str; 21] = [
    "00080016", // SOPClassUID
    "00080018", // SOPInstanceUID
    "00080060", // Modality
    "00180050", // SliceThickness
    "0020000D", // StudyInstanceUID
    "0020000E", // SeriesInstanceUID
    "00200012", // AcquisitionNumber
    "00200013", // InstanceNumber
    "00200032", // ImagePositionPatient
    "00200037", // ImageOrientationPatient
    "00280010", // Rows
    "00280011", // Columns
    "00280030", // PixelSpacing
    "00280100", // BitsAllocated
    "00280101", // BitsStored
    "00280102", // HighBit
    "00280103", // PixelRepresentation
    "00281050", // WindowCenter
    "00281051", // WindowWidth
    "00281052", // RescaleIntercept
    "00281053", // RescaleSlope
];

/// Derive the fixed 8-field series summary from one source file of the study
/// and write it as `series-singleton.json.gz` next to the existing series
/// metadata. Does not touch or validate that metadata.
pub fn backfill_series_singleton(source_dir: &Path, archive_root: &Path) -> Result<PathBuf> {
    let sample = find_reference_object(source_dir)?;

    let study_uid = sample
        .element_str(Tag(0x0020, 0x000D))
        .context("Reference file has no StudyInstanceUID")?;
    let series_uid = sample
        .element_str(Tag(0x0020, 0x000E))
        .context("Reference file has no SeriesInstanceUID")?;

    let series_dir = crate::archive::series_dir(archive_root, &study_uid, &series_uid);
    if !series_dir.is_dir() {
        bail!("Series directory not found in archive: {:?}", series_dir);
    }

    let record = series_singleton_record(&study_uid, &series_uid, &sample);
    let path = series_dir.join("series-singleton.json.gz");
    storage::write_json_gz_atomic(&path, &vec![record])?;
    info!(path = %path.display(), "series singleton written");
    Ok(path)
}

/// Copy the first instance thumbnail (directory-listing order) up to the
/// series directory root. Returns `None`, with a warning, when no instance
/// has one.
pub fn promote_thumbnail(series_dir: &Path) -> Result<Option<PathBuf>> {
    let instances_dir = series_dir.join("instances");
    let mut instance_dirs: Vec<PathBuf> = fs::read_dir(&instances_dir)
        .with_context(|| format!("Failed to list {:?}", instances_dir))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    instance_dirs.sort();

    for instance_dir in instance_dirs {
        let thumbnail = instance_dir.join("thumbnail");
        if thumbnail.is_file() {
            let destination = series_dir.join("thumbnail");
            fs::copy(&thumbnail, &destination)
                .with_context(|| format!("Failed to copy {:?}", thumbnail))?;
            info!(from = %thumbnail.display(), "series thumbnail promoted");
            return Ok(Some(destination));
        }
    }

    warn!(dir = %instances_dir.display(), "no instance thumbnail found");
    Ok(None)
}

/// Rewrite an oversized `metadata.gz` keeping only the essential tags per
/// instance. Lossy and one-way: the untouched original is backed up as
/// `metadata_original.gz` first.
pub fn prune_metadata(series_dir: &Path) -> Result<PruneOutcome> {
    let metadata_path = series_dir.join("metadata.gz");
    let backup_path = series_dir.join("metadata_original.gz");

    let original: Vec<InstanceMetadata> =
        storage::read_json_gz(&metadata_path).context("Failed to load series metadata")?;
    let bytes_before = fs::metadata(&metadata_path)
        .with_context(|| format!("Failed to stat {:?}", metadata_path))?
        .len();

    // Backup before any rewrite; this is the only way back.
    fs::copy(&metadata_path, &backup_path).context("Failed to back up series metadata")?;

    let pruned: Vec<InstanceMetadata> = original
        .iter()
        .map(|instance| {
            instance
                .iter()
                .filter(|(tag, _)| ESSENTIAL_TAGS.contains(&tag.as_str()))
                .map(|(tag, record)| (tag.clone(), record.clone()))
                .collect()
        })
        .collect();

    storage::write_json_gz_atomic(&metadata_path, &pruned)?;
    let bytes_after = fs::metadata(&metadata_path)
        .with_context(|| format!("Failed to stat {:?}", metadata_path))?
        .len();

    Ok(PruneOutcome {
        instances: pruned.len(),
        bytes_before,
        bytes_after,
    })
}

/// First file under `source_dir` that parses leniently and carries a
/// SeriesInstanceUID.
fn find_reference_object(source_dir: &Path) -> Result<DefaultDicomObject> {
    if !source_dir.is_dir() {
        bail!("Source directory not found: {}", source_dir.display());
    }
    for entry in WalkDir::new(source_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_uppercase().contains("DICOMDIR"))
            .unwrap_or(false)
        {
            continue;
        }
        if let Ok(object) = OpenFileOptions::new()
            .read_preamble(ReadPreamble::Auto)
            .open_file(path)
        {
            if object.element_str(Tag(0x0020, 0x000E)).is_some() {
                return Ok(object);
            }
        }
    }
    bail!(
        "No DICOM file with a SeriesInstanceUID found under {}",
        source_dir.display()
    )
}

fn series_singleton_record(
    study_uid: &str,
    series_uid: &str,
    obj: &DefaultDicomObject,
) -> InstanceMetadata {
    let modality = obj
        .element_str(Tag(0x0008, 0x0060))
        .unwrap_or_else(|| "CT".to_string());
    let description = obj
        .element_str(Tag(0x0008, 0x103E))
        .unwrap_or_else(|| "Series".to_string());
    let series_number = obj.element_i64(Tag(0x0020, 0x0011)).unwrap_or(1);
    let series_date = obj.element_str(Tag(0x0008, 0x0021)).unwrap_or_default();
    let series_time = obj.element_str(Tag(0x0008, 0x0031)).unwrap_or_default();

    let mut record = InstanceMetadata::new();
    record.insert(
        "0020000D".to_string(),
        TagRecord::of("UI", vec![json!(study_uid)]),
    );
    record.insert(
        "0020000E".to_string(),
        TagRecord::of("UI", vec![json!(series_uid)]),
    );
    record.insert(
        "00080060".to_string(),
        TagRecord::of("CS", vec![json!(modality)]),
    );
    record.insert(
        "0008103E".to_string(),
        TagRecord::of("LO", vec![json!(description)]),
    );
    record.insert(
        "00200011".to_string(),
        TagRecord::of("IS", vec![json!(series_number)]),
    );
    record.insert(
        "00080021".to_string(),
        TagRecord::of("DA", vec![json!(series_date)]),
    );
    record.insert(
        "00080031".to_string(),
        TagRecord::of("TM", vec![json!(series_time)]),
    );
    record.insert(
        "00080005".to_string(),
        TagRecord::of("CS", vec![json!("ISO_IR 192")]),
    );
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn essential_tag_list_is_fixed() {
        assert_eq!(ESSENTIAL_TAGS.len(), 21);
        assert!(ESSENTIAL_TAGS.contains(&"00080018"));
        assert!(ESSENTIAL_TAGS.contains(&"00280010"));
        assert!(!ESSENTIAL_TAGS.contains(&"00100010"));
    }
}
