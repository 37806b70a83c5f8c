use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::FillRequest;

/// A presets file: named value sets for the forms in a forms directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetFile {
    #[serde(default)]
    pub version: Option<String>,
    pub presets: Vec<FormPreset>,
}

/// Reusable field values for one form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormPreset {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// File name of the form this preset belongs to, e.g. `ficha_lote.xlsx`.
    pub form_type: String,
    /// Field id -> value.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub is_default: bool,
}

impl FormPreset {
    pub fn to_request(&self) -> FillRequest {
        FillRequest::from(self)
    }
}

impl From<&FormPreset> for FillRequest {
    fn from(preset: &FormPreset) -> Self {
        preset
            .data
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }
}
