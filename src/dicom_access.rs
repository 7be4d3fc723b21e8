use dicom_core::Tag;
use dicom_dictionary_std::StandardDataDictionary;
use dicom_object::{DefaultDicomObject, InMemDicomObject};

/// Small helper trait to pull scalar values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
    fn element_f64(&self, tag: Tag) -> Option<f64>;
    fn element_i64(&self, tag: Tag) -> Option<i64>;
}

fn clean(text: &str) -> Option<String> {
    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .and_then(|s| clean(&s))
    }

    fn element_f64(&self, tag: Tag) -> Option<f64> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_multi_float64().ok())
            .and_then(|values| values.first().copied())
    }

    fn element_i64(&self, tag: Tag) -> Option<i64> {
        self.element(tag).ok().and_then(|e| e.to_int::<i64>().ok())
    }
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .and_then(|s| clean(&s))
    }

    fn element_f64(&self, tag: Tag) -> Option<f64> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_multi_float64().ok())
            .and_then(|values| values.first().copied())
    }

    fn element_i64(&self, tag: Tag) -> Option<i64> {
        self.element(tag).ok().and_then(|e| e.to_int::<i64>().ok())
    }
}
