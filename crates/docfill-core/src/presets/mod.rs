pub mod schema;

use crate::error::DocfillError;
use schema::{FormPreset, PresetFile};
use std::collections::BTreeSet;
use std::path::Path;

/// Source of saved field values, keyed by form file name.
///
/// The engine never persists presets itself; a preset is turned into a
/// [`FillRequest`](crate::FillRequest) and filled like any other request.
pub trait PresetStore {
    /// All presets for a form, in stored order.
    fn list(&self, form_type: &str) -> Vec<&FormPreset>;

    fn get(&self, form_type: &str, name: &str) -> Option<&FormPreset> {
        self.list(form_type).into_iter().find(|p| p.name == name)
    }

    /// The preset marked as default for a form, if any.
    fn default_for(&self, form_type: &str) -> Option<&FormPreset> {
        self.list(form_type).into_iter().find(|p| p.is_default)
    }
}

/// Read-only preset store backed by a JSON file.
#[derive(Debug, Clone, Default)]
pub struct JsonPresetStore {
    file: PresetFile,
}

impl JsonPresetStore {
    pub fn load(path: &Path) -> Result<Self, DocfillError> {
        Ok(JsonPresetStore {
            file: load_presets(path)?,
        })
    }

    pub fn from_file(file: PresetFile) -> Result<Self, DocfillError> {
        validate_presets(&file)?;
        Ok(JsonPresetStore { file })
    }

    /// Every preset, across all forms.
    pub fn all(&self) -> &[FormPreset] {
        &self.file.presets
    }

    /// Distinct form types with at least one preset.
    pub fn form_types(&self) -> BTreeSet<&str> {
        self.file.presets.iter().map(|p| p.form_type.as_str()).collect()
    }
}

impl PresetStore for JsonPresetStore {
    fn list(&self, form_type: &str) -> Vec<&FormPreset> {
        self.file
            .presets
            .iter()
            .filter(|p| p.form_type == form_type)
            .collect()
    }
}

/// Load presets from a JSON file.
pub fn load_presets(path: &Path) -> Result<PresetFile, DocfillError> {
    let content = std::fs::read_to_string(path).map_err(|e| DocfillError::PresetLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_presets(&content, path)
}

/// Parse presets from a JSON string.
pub fn parse_presets(json: &str, source: &Path) -> Result<PresetFile, DocfillError> {
    let file: PresetFile = serde_json::from_str(json).map_err(|e| DocfillError::PresetLoad {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;
    validate_presets(&file)?;
    Ok(file)
}

/// Parse presets from a JSON string (no file path context).
pub fn parse_presets_str(json: &str) -> Result<PresetFile, DocfillError> {
    let file: PresetFile = serde_json::from_str(json).map_err(DocfillError::Json)?;
    validate_presets(&file)?;
    Ok(file)
}

/// Validate that a presets file is well-formed.
pub fn validate_presets(file: &PresetFile) -> Result<(), DocfillError> {
    let mut seen = BTreeSet::new();
    let mut defaults = BTreeSet::new();

    for preset in &file.presets {
        if preset.name.trim().is_empty() {
            return Err(DocfillError::PresetInvalid(
                "preset name must not be empty".into(),
            ));
        }

        if preset.form_type.trim().is_empty() {
            return Err(DocfillError::PresetInvalid(format!(
                "preset '{}' has no form_type",
                preset.name
            )));
        }

        if !seen.insert((preset.form_type.as_str(), preset.name.as_str())) {
            return Err(DocfillError::PresetInvalid(format!(
                "duplicate preset '{}' for form '{}'",
                preset.name, preset.form_type
            )));
        }

        if preset.is_default && !defaults.insert(preset.form_type.as_str()) {
            return Err(DocfillError::PresetInvalid(format!(
                "form '{}' has more than one default preset",
                preset.form_type
            )));
        }

        if preset.data.keys().any(|id| id.is_empty()) {
            return Err(DocfillError::PresetInvalid(format!(
                "preset '{}' has an empty field id",
                preset.name
            )));
        }
    }

    Ok(())
}
