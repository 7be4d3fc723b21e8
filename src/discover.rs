//
// discover.rs
// dicomweb-static
//
// Walks a source tree, classifies files as valid DICOM instances, and
// partitions them into the study/series/instance hierarchy.
//

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Result};
use dicom::core::Tag;
use dicom_object::{file::ReadPreamble, OpenFileOptions};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::dicom_access::ElementAccess;
use crate::models::{GroupedStudies, ParsedInstance, ScanReport, SkipReason};

/// Recursively scan `source_root` and parse every candidate file leniently
/// (tolerating a missing preamble). A file is accepted only when it exposes
/// study, series, and SOP instance UIDs; everything else is counted and
/// skipped, never fatal. A missing source root is the one fatal error.
pub fn scan(source_root: &Path) -> Result<(Vec<ParsedInstance>, ScanReport)> {
    if !source_root.is_dir() {
        bail!("Source directory not found: {}", source_root.display());
    }

    let mut instances = Vec::new();
    let mut report = ScanReport::default();

    for entry in WalkDir::new(source_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();

        if is_dicomdir(path) {
            report.skip(SkipReason::DicomDirIndex);
            continue;
        }

        let object = match OpenFileOptions::new()
            .read_preamble(ReadPreamble::Auto)
            .open_file(path)
        {
            Ok(object) => object,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "not a readable DICOM file");
                report.skip(SkipReason::NotDicom);
                continue;
            }
        };

        let study_uid = object.element_str(Tag(0x0020, 0x000D));
        let series_uid = object.element_str(Tag(0x0020, 0x000E));
        let sop_uid = object.element_str(Tag(0x0008, 0x0018));

        match (study_uid, series_uid, sop_uid) {
            (Some(study_uid), Some(series_uid), Some(sop_uid)) => {
                instances.push(ParsedInstance {
                    path: path.to_path_buf(),
                    study_uid,
                    series_uid,
                    sop_uid,
                    object,
                });
            }
            _ => {
                warn!(path = %path.display(), "DICOM file without complete UID hierarchy");
                report.skip(SkipReason::MissingUid);
            }
        }
    }

    report.accepted = instances.len();
    Ok((instances, report))
}

/// Pure partition of the discovery result into study -> series -> instances.
/// Instance order within a series is discovery order. Instances repeating an
/// already seen (study, series, sop) triple are dropped (keep-first); the
/// second value is the number of such duplicates.
pub fn group(instances: Vec<ParsedInstance>) -> (GroupedStudies, usize) {
    let mut studies = GroupedStudies::new();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut duplicates = 0;

    for instance in instances {
        let key = (
            instance.study_uid.clone(),
            instance.series_uid.clone(),
            instance.sop_uid.clone(),
        );
        if !seen.insert(key) {
            warn!(
                sop = %instance.sop_uid,
                path = %instance.path.display(),
                "duplicate SOP instance dropped"
            );
            duplicates += 1;
            continue;
        }
        studies
            .entry(instance.study_uid.clone())
            .or_default()
            .entry(instance.series_uid.clone())
            .or_default()
            .push(instance);
    }

    (studies, duplicates)
}

fn is_dicomdir(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_ascii_uppercase().contains("DICOMDIR"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dicomdir_names_are_recognized() {
        assert!(is_dicomdir(Path::new("/data/DICOMDIR")));
        assert!(is_dicomdir(Path::new("/data/dicomdir")));
        assert!(!is_dicomdir(Path::new("/data/IM000001")));
    }

    #[test]
    fn scan_rejects_missing_source_root() {
        let missing = Path::new("/definitely/not/here");
        assert!(scan(missing).is_err());
    }
}
