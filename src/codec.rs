//
// codec.rs
// dicomweb-static
//
// Converts DICOM data elements into DICOMweb JSON tag records with one explicit
// conversion rule per value-representation category.
//

use dicom::core::value::{PrimitiveValue, Value};
use dicom::core::{Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::mem::InMemElement;
use dicom::object::InMemDicomObject;
use serde_json::json;

use crate::models::{InstanceMetadata, TagRecord};

/// Render a tag as the 8-hex-digit uppercase key used throughout the archive.
pub fn tag_key(tag: Tag) -> String {
    format!("{:04X}{:04X}", tag.group(), tag.element())
}

/// Encode every element of a dataset, dropping sequences and unconvertible values.
pub fn encode_object(obj: &InMemDicomObject<StandardDataDictionary>) -> InstanceMetadata {
    let mut metadata = InstanceMetadata::new();
    for elem in obj.iter() {
        if let Some(record) = encode_element(elem) {
            metadata.insert(tag_key(elem.header().tag), record);
        }
    }
    metadata
}

/// Encode a single element. Returns `None` for sequence-valued elements and
/// for any value that fails to convert; a failed element never aborts the
/// rest of the instance.
pub fn encode_element(elem: &InMemElement<StandardDataDictionary>) -> Option<TagRecord> {
    let vr = elem.header().vr;
    if vr == VR::SQ {
        return None;
    }

    let primitive = match elem.value() {
        Value::Primitive(p) => p,
        // Nested datasets and encapsulated pixel streams have no place in
        // the flat tag mapping.
        Value::Sequence(_) | Value::PixelSequence(_) => return None,
    };

    if matches!(primitive, PrimitiveValue::Empty) {
        // Zero-multiplicity values keep the VR but omit the field.
        return Some(TagRecord::empty(&vr.to_string()));
    }

    let values = convert_primitive(vr, primitive)?;
    Some(TagRecord::of(&vr.to_string(), values))
}

/// Closed dispatch over VR categories. The final arm is the explicit
/// fallback for unknown or rarely seen VRs.
fn convert_primitive(vr: VR, value: &PrimitiveValue) -> Option<Vec<serde_json::Value>> {
    let converted = match vr {
        VR::DA => strings(value)
            .into_iter()
            .map(|s| json!(iso_date(&s)))
            .collect(),
        VR::TM => strings(value)
            .into_iter()
            .map(|s| json!(iso_time(&s)))
            .collect(),
        VR::DT => strings(value)
            .into_iter()
            .map(|s| json!(iso_datetime(&s)))
            .collect(),
        VR::PN => strings(value)
            .into_iter()
            .map(|s| json!({ "Alphabetic": s }))
            .collect(),
        VR::UI => strings(value).into_iter().map(|s| json!(s)).collect(),
        VR::US | VR::SS | VR::UL | VR::SL | VR::UV | VR::SV | VR::IS => value
            .to_multi_int::<i64>()
            .ok()?
            .into_iter()
            .map(|n| json!(n))
            .collect(),
        VR::FL | VR::FD | VR::DS | VR::OD | VR::OF => value
            .to_multi_float64()
            .ok()?
            .into_iter()
            .map(|n| json!(n))
            .collect(),
        VR::OB | VR::OW | VR::OL | VR::OV | VR::UN => vec![json!(lossy_text(value))],
        _ => strings(value).into_iter().map(|s| json!(s)).collect(),
    };
    Some(converted)
}

fn strings(value: &PrimitiveValue) -> Vec<String> {
    value
        .to_multi_str()
        .iter()
        .map(|s| {
            s.trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string()
        })
        .collect()
}

/// Best-effort text rendering of binary payloads: invalid bytes are dropped,
/// never raised.
fn lossy_text(value: &PrimitiveValue) -> String {
    let bytes = value.to_bytes();
    String::from_utf8_lossy(&bytes)
        .chars()
        .filter(|c| *c != '\u{FFFD}')
        .collect()
}

fn iso_date(raw: &str) -> String {
    chrono::NaiveDate::parse_from_str(raw, "%Y%m%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn iso_time(raw: &str) -> String {
    // DICOM TM allows a fractional part after the seconds.
    let (main, fraction) = match raw.split_once('.') {
        Some((main, fraction)) => (main, Some(fraction)),
        None => (raw, None),
    };
    // TM also allows hour-only and hour-minute forms; pad the omitted
    // components with zeros before parsing.
    let padded = if main.len() < 6 && !main.is_empty() && main.bytes().all(|b| b.is_ascii_digit())
    {
        format!("{main:0<6}")
    } else {
        main.to_string()
    };
    match chrono::NaiveTime::parse_from_str(&padded, "%H%M%S") {
        Ok(time) => {
            let mut text = time.format("%H:%M:%S").to_string();
            if let Some(fraction) = fraction {
                text.push('.');
                text.push_str(fraction);
            }
            text
        }
        Err(_) => raw.to_string(),
    }
}

fn iso_datetime(raw: &str) -> String {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|_| iso_date(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{dicom_value, DataElement, PrimitiveValue, Tag, VR};
    use dicom::object::InMemDicomObject;

    fn element(tag: Tag, vr: VR, value: PrimitiveValue) -> InMemElement<StandardDataDictionary> {
        DataElement::new(tag, vr, value)
    }

    #[test]
    fn sequences_are_omitted() {
        let elem = element(Tag(0x0008, 0x1140), VR::SQ, PrimitiveValue::Empty);
        assert!(encode_element(&elem).is_none());
    }

    #[test]
    fn value_is_always_an_array_even_for_single_values() {
        let elem = element(
            Tag(0x0010, 0x0020),
            VR::LO,
            PrimitiveValue::from("PAT123"),
        );
        let record = encode_element(&elem).expect("record");
        let json = serde_json::to_value(&record).expect("serialize");
        assert!(json["Value"].is_array());
        assert_eq!(json["Value"][0], "PAT123");
        assert_eq!(json["vr"], "LO");
    }

    #[test]
    fn empty_values_omit_the_value_field() {
        let elem = element(Tag(0x0008, 0x0050), VR::SH, PrimitiveValue::Empty);
        let record = encode_element(&elem).expect("record");
        assert!(record.value.is_none());
        let json = serde_json::to_value(&record).expect("serialize");
        assert!(json.get("Value").is_none());
    }

    #[test]
    fn dates_render_as_iso_8601() {
        let elem = element(
            Tag(0x0008, 0x0020),
            VR::DA,
            PrimitiveValue::from("20240101"),
        );
        let record = encode_element(&elem).expect("record");
        assert_eq!(record.first_str(), Some("2024-01-01"));
    }

    #[test]
    fn times_render_with_colons_and_keep_fractions() {
        assert_eq!(iso_time("120000"), "12:00:00");
        assert_eq!(iso_time("120000.123456"), "12:00:00.123456");
        assert_eq!(iso_time("not-a-time"), "not-a-time");
    }

    #[test]
    fn abbreviated_times_pad_the_missing_components() {
        assert_eq!(iso_time("12"), "12:00:00");
        assert_eq!(iso_time("1230"), "12:30:00");
        assert_eq!(iso_time("1230.5"), "12:30:00.5");
    }

    #[test]
    fn person_names_use_the_alphabetic_wrapper() {
        let elem = element(
            Tag(0x0010, 0x0010),
            VR::PN,
            PrimitiveValue::from("Test^Patient"),
        );
        let record = encode_element(&elem).expect("record");
        let value = record.value.expect("value");
        assert_eq!(value[0]["Alphabetic"], "Test^Patient");
    }

    #[test]
    fn numeric_multivalues_become_number_arrays() {
        let elem = element(
            Tag(0x0028, 0x0030),
            VR::DS,
            dicom_value!(Strs, ["0.5", "0.5"]),
        );
        let record = encode_element(&elem).expect("record");
        let value = record.value.expect("value");
        assert_eq!(value.len(), 2);
        assert_eq!(value[0], 0.5);
    }

    #[test]
    fn binary_payloads_decode_as_best_effort_text() {
        let elem = element(
            Tag(0x7FE0, 0x0010),
            VR::OB,
            PrimitiveValue::from(vec![b'o', b'k', 0xFF, b'!']),
        );
        let record = encode_element(&elem).expect("record");
        assert_eq!(record.first_str(), Some("ok!"));
    }

    #[test]
    fn whole_object_never_contains_sequence_tags() {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(
            Tag(0x0010, 0x0010),
            VR::PN,
            PrimitiveValue::from("A^B"),
        ));
        obj.put(DataElement::new(
            Tag(0x0008, 0x1140),
            VR::SQ,
            PrimitiveValue::Empty,
        ));
        let metadata = encode_object(&obj);
        assert!(metadata.contains_key("00100010"));
        assert!(!metadata.contains_key("00081140"));
    }
}
