//
// archive.rs
// dicomweb-static
//
// Writes the static DICOMweb layout: per-instance frames and thumbnails,
// per-series metadata and instance indexes, and the merged top-level study
// index with duplicate-study removal.
//

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dicom::core::Tag;
use dicom::object::DefaultDicomObject;
use serde_json::json;
use tracing::{info, warn};

use crate::codec;
use crate::dicom_access::ElementAccess;
use crate::discover;
use crate::models::{
    ConvertSummary, InstanceMetadata, SeriesMap, SkipReason, StudyWriteStats, TagRecord,
};
use crate::render;
use crate::storage;

const STUDY_INSTANCE_UID_KEY: &str = "0020000D";

/// Writes studies into the fixed on-disk layout the viewer reads by convention.
pub struct ArchiveWriter {
    output_root: PathBuf,
}

impl ArchiveWriter {
    pub fn new(output_root: impl AsRef<Path>) -> Self {
        ArchiveWriter {
            output_root: output_root.as_ref().to_path_buf(),
        }
    }

    fn studies_dir(&self) -> PathBuf {
        self.output_root.join("studies")
    }

    /// Persist one study: every series with its instances, then the merged
    /// study index. Idempotent at study granularity; re-running recomputes
    /// and overwrites each instance's artifacts.
    pub fn write_study(&self, study_uid: &str, series_map: &SeriesMap) -> Result<StudyWriteStats> {
        let study_dir = self.studies_dir().join(study_uid);
        let mut stats = StudyWriteStats::default();

        for (series_uid, instances) in series_map {
            info!(series = %series_uid, instances = instances.len(), "writing series");
            let series_dir = study_dir.join("series").join(series_uid);
            let instances_dir = series_dir.join("instances");
            fs::create_dir_all(&instances_dir)
                .with_context(|| format!("Failed to create series directory {:?}", series_dir))?;

            let mut series_metadata = Vec::with_capacity(instances.len());
            let mut instance_index = Vec::with_capacity(instances.len());

            for instance in instances {
                series_metadata.push(codec::encode_object(&instance.object));
                instance_index.push(uid_index_record(&instance.sop_uid));

                let instance_dir = instances_dir.join(&instance.sop_uid);
                fs::create_dir_all(&instance_dir).with_context(|| {
                    format!("Failed to create instance directory {:?}", instance_dir)
                })?;

                // A failed render leaves the frame absent; the run continues.
                match render::render_frame(&instance.object) {
                    Ok(frame_png) => {
                        let frames_dir = instance_dir.join("frames");
                        fs::create_dir_all(&frames_dir).with_context(|| {
                            format!("Failed to create frames directory {:?}", frames_dir)
                        })?;
                        storage::write_bytes_atomic(&frames_dir.join("1"), &frame_png)?;
                        stats.frames += 1;

                        match render::thumbnail_png(&frame_png, render::THUMBNAIL_MAX) {
                            Ok(thumb) => {
                                storage::write_bytes_atomic(
                                    &instance_dir.join("thumbnail"),
                                    &thumb,
                                )?;
                                stats.thumbnails += 1;
                            }
                            Err(err) => {
                                warn!(sop = %instance.sop_uid, error = %err, "thumbnail skipped")
                            }
                        }
                    }
                    Err(err) => {
                        warn!(sop = %instance.sop_uid, error = %err, "frame skipped")
                    }
                }
                stats.instances += 1;
            }

            storage::write_json_gz_atomic(&series_dir.join("metadata.gz"), &series_metadata)?;
            storage::write_json_gz_atomic(&instances_dir.join("index.json.gz"), &instance_index)?;
            stats.series += 1;
        }

        // One summary per study, derived from the first instance encountered;
        // patient/study tags are assumed constant across the study.
        let representative = series_map
            .values()
            .flat_map(|instances| instances.iter())
            .next()
            .context("Study has no instances")?;
        let entry = study_summary(study_uid, &representative.object);
        self.update_study_index(study_uid, entry)?;

        Ok(stats)
    }

    /// Read-filter-append-rewrite of the top-level study index: at most one
    /// entry per StudyInstanceUID, both a pretty and a gzip copy.
    fn update_study_index(&self, study_uid: &str, entry: InstanceMetadata) -> Result<()> {
        let studies_dir = self.studies_dir();
        fs::create_dir_all(&studies_dir)
            .with_context(|| format!("Failed to create {:?}", studies_dir))?;
        let index_path = studies_dir.join("index.json");

        // An unreadable existing index starts over empty rather than failing
        // the whole run.
        let mut entries: Vec<InstanceMetadata> = match storage::read_json(&index_path) {
            Ok(entries) => entries,
            Err(_) => Vec::new(),
        };

        entries.retain(|existing| {
            existing
                .get(STUDY_INSTANCE_UID_KEY)
                .and_then(TagRecord::first_str)
                != Some(study_uid)
        });
        entries.push(entry);

        storage::write_json_pretty_atomic(&index_path, &entries)?;
        storage::write_json_gz_atomic(&studies_dir.join("index.json.gz"), &entries)?;
        Ok(())
    }
}

/// Full pipeline: scan, group, write every study, and report.
pub fn convert(source: &Path, output: &Path) -> Result<ConvertSummary> {
    info!(source = %source.display(), output = %output.display(), "starting conversion");

    let (instances, mut report) = discover::scan(source)?;
    if instances.is_empty() {
        bail!("No valid DICOM files found under {}", source.display());
    }

    let (studies, duplicates) = discover::group(instances);
    report.skip_many(SkipReason::DuplicateSop, duplicates);

    let writer = ArchiveWriter::new(output);
    let mut stats = StudyWriteStats::default();
    let study_count = studies.len();

    for (study_uid, series_map) in &studies {
        info!(study = %study_uid, series = series_map.len(), "writing study");
        stats.merge(writer.write_study(study_uid, series_map)?);
    }

    Ok(ConvertSummary {
        studies: study_count,
        stats,
        report,
    })
}

/// The instance-index record: one SOPInstanceUID tag per instance.
fn uid_index_record(sop_uid: &str) -> InstanceMetadata {
    let mut record = InstanceMetadata::new();
    record.insert(
        "00080018".to_string(),
        TagRecord::of("UI", vec![json!(sop_uid)]),
    );
    record
}

/// The 8-field study summary shown in the global index, pulled from a single
/// representative instance.
fn study_summary(study_uid: &str, obj: &DefaultDicomObject) -> InstanceMetadata {
    let mut entry = InstanceMetadata::new();
    entry.insert(
        STUDY_INSTANCE_UID_KEY.to_string(),
        TagRecord::of("UI", vec![json!(study_uid)]),
    );

    let patient_name = obj
        .element_str(Tag(0x0010, 0x0010))
        .unwrap_or_else(|| "Unknown".to_string());
    entry.insert(
        "00100010".to_string(),
        TagRecord::of("PN", vec![json!({ "Alphabetic": patient_name })]),
    );

    let text_fields: [(&str, &str, Tag); 6] = [
        ("00100020", "LO", Tag(0x0010, 0x0020)), // PatientID
        ("00080020", "DA", Tag(0x0008, 0x0020)), // StudyDate
        ("00080030", "TM", Tag(0x0008, 0x0030)), // StudyTime
        ("00080050", "SH", Tag(0x0008, 0x0050)), // AccessionNumber
        ("00080060", "CS", Tag(0x0008, 0x0060)), // Modality
        ("00081030", "LO", Tag(0x0008, 0x1030)), // StudyDescription
    ];
    for (key, vr, tag) in text_fields {
        let value = obj.element_str(tag).unwrap_or_default();
        entry.insert(key.to_string(), TagRecord::of(vr, vec![json!(value)]));
    }

    entry
}

/// Convenience used by tests and tooling to locate archive paths.
pub fn series_dir(output_root: &Path, study_uid: &str, series_uid: &str) -> PathBuf {
    output_root
        .join("studies")
        .join(study_uid)
        .join("series")
        .join(series_uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_index_record_wraps_the_sop_uid() {
        let record = uid_index_record("1.2.3");
        let tag = record.get("00080018").expect("sop tag");
        assert_eq!(tag.vr, "UI");
        assert_eq!(tag.first_str(), Some("1.2.3"));
    }

    #[test]
    fn study_index_filter_matches_on_uid_value() {
        let mut entry = InstanceMetadata::new();
        entry.insert(
            STUDY_INSTANCE_UID_KEY.to_string(),
            TagRecord::of("UI", vec![json!("S1")]),
        );
        assert_eq!(
            entry
                .get(STUDY_INSTANCE_UID_KEY)
                .and_then(TagRecord::first_str),
            Some("S1")
        );
    }

    #[test]
    fn series_dir_follows_the_layout_convention() {
        let dir = series_dir(Path::new("/out"), "S1", "A");
        assert_eq!(dir, Path::new("/out/studies/S1/series/A"));
    }
}
