//
// models.rs
// dicomweb-static
//
// Defines serializable data structures for tag records, groupings, and run reports.
//

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use dicom::object::DefaultDicomObject;
use serde::{Deserialize, Serialize};

/// One DICOMweb JSON tag record: `{"vr": "..", "Value": [..]}`.
///
/// `Value`, when present, is always an array, even for single-valued
/// elements. Zero-multiplicity elements omit the field entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub vr: String,
    #[serde(rename = "Value", skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<serde_json::Value>>,
}

impl TagRecord {
    pub fn of(vr: &str, values: Vec<serde_json::Value>) -> Self {
        TagRecord {
            vr: vr.to_string(),
            value: Some(values),
        }
    }

    pub fn empty(vr: &str) -> Self {
        TagRecord {
            vr: vr.to_string(),
            value: None,
        }
    }

    /// First value as a string slice, if any.
    pub fn first_str(&self) -> Option<&str> {
        self.value.as_ref()?.first()?.as_str()
    }
}

/// Per-instance metadata mapping, keyed by 8-hex-digit uppercase tag.
pub type InstanceMetadata = BTreeMap<String, TagRecord>;

/// One accepted source file, parsed once during discovery.
pub struct ParsedInstance {
    pub path: PathBuf,
    pub study_uid: String,
    pub series_uid: String,
    pub sop_uid: String,
    pub object: DefaultDicomObject,
}

/// SeriesInstanceUID -> instances in discovery order.
pub type SeriesMap = BTreeMap<String, Vec<ParsedInstance>>;
/// StudyInstanceUID -> series mapping.
pub type GroupedStudies = BTreeMap<String, SeriesMap>;

/// Why a candidate file was left out of the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipReason {
    /// The file could not be parsed as DICOM, even leniently.
    NotDicom,
    /// Parsed, but one of the study/series/SOP instance UIDs is absent.
    MissingUid,
    /// DICOMDIR index files are never instances.
    DicomDirIndex,
    /// A second instance with an already seen (study, series, sop) triple.
    DuplicateSop,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::NotDicom => "not a DICOM file",
            SkipReason::MissingUid => "missing study/series/instance UID",
            SkipReason::DicomDirIndex => "DICOMDIR index file",
            SkipReason::DuplicateSop => "duplicate SOP instance",
        };
        f.write_str(text)
    }
}

/// Run-level aggregation of accepted and skipped files.
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub accepted: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl ScanReport {
    pub fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    pub fn skip_many(&mut self, reason: SkipReason, count: usize) {
        if count > 0 {
            *self.skipped.entry(reason).or_insert(0) += count;
        }
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Artifact counters accumulated while writing studies.
#[derive(Debug, Default, Clone, Copy)]
pub struct StudyWriteStats {
    pub series: usize,
    pub instances: usize,
    pub frames: usize,
    pub thumbnails: usize,
}

impl StudyWriteStats {
    pub fn merge(&mut self, other: StudyWriteStats) {
        self.series += other.series;
        self.instances += other.instances;
        self.frames += other.frames;
        self.thumbnails += other.thumbnails;
    }
}

/// Outcome of a full conversion run.
#[derive(Debug)]
pub struct ConvertSummary {
    pub studies: usize,
    pub stats: StudyWriteStats,
    pub report: ScanReport,
}

/// Before/after measurements of a metadata pruning pass.
#[derive(Debug, Clone, Copy)]
pub struct PruneOutcome {
    pub instances: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}
