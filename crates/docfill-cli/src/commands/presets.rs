use docfill_core::presets::schema::FormPreset;
use docfill_core::presets::{JsonPresetStore, PresetStore};
use docfill_core::DocfillError;
use std::path::Path;

use crate::output;

pub fn list(file: &Path, form: Option<&str>) -> Result<(), DocfillError> {
    let store = JsonPresetStore::load(file)?;
    let presets: Vec<&FormPreset> = match form {
        Some(form) => store.list(form),
        None => store.all().iter().collect(),
    };

    if presets.is_empty() {
        println!("No presets found.");
        return Ok(());
    }
    output::table::print_presets(&presets);
    Ok(())
}

pub fn show(file: &Path, form: &str, name: Option<&str>) -> Result<(), DocfillError> {
    let store = JsonPresetStore::load(file)?;
    let preset = match name {
        Some(name) => store.get(form, name),
        None => store.default_for(form),
    };
    let preset = preset.ok_or_else(|| {
        DocfillError::PresetInvalid(match name {
            Some(name) => format!("no preset '{name}' for form '{form}'"),
            None => format!("form '{form}' has no default preset"),
        })
    })?;
    output::json::print(&preset.to_request())
}

pub fn validate(file: &Path) -> Result<(), DocfillError> {
    let store = JsonPresetStore::load(file)?;
    println!(
        "OK: {} preset(s) for {} form(s)",
        store.all().len(),
        store.form_types().len()
    );
    Ok(())
}
