use docfill_core::presets::{JsonPresetStore, PresetStore};
use docfill_core::{Deadline, DocfillError, EngineConfig, FillRequest};
use std::path::PathBuf;

use crate::output;

pub struct FillArgs {
    pub input_file: PathBuf,
    pub set: Vec<(String, String)>,
    pub values: Option<PathBuf>,
    pub presets: Option<PathBuf>,
    pub preset: Option<String>,
}

/// Parse a `--set ID=VALUE` argument. The value may itself contain `=`.
pub fn parse_assignment(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((id, value)) if !id.is_empty() => Ok((id.to_string(), value.to_string())),
        _ => Err(format!("expected ID=VALUE, got '{arg}'")),
    }
}

pub fn run(
    args: FillArgs,
    config: &EngineConfig,
    deadline: Deadline,
    output_format: &str,
) -> Result<(), DocfillError> {
    let request = build_request(&args)?;
    if request.is_empty() {
        log::warn!("no field values given; the output will be an unchanged copy");
    }

    let result = docfill_core::fill(&args.input_file, &request, config, deadline)?;

    match output_format {
        "json" => output::json::print(&result)?,
        _ => output::table::print_output(&result),
    }

    Ok(())
}

/// Preset values first, then the values file, then `--set` on top.
fn build_request(args: &FillArgs) -> Result<FillRequest, DocfillError> {
    let mut request = FillRequest::new();

    if let Some(path) = &args.presets {
        let store = JsonPresetStore::load(path)?;
        let form_type = args
            .input_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let preset = match &args.preset {
            Some(name) => store.get(&form_type, name).ok_or_else(|| {
                DocfillError::PresetInvalid(format!(
                    "no preset '{name}' for form '{form_type}' in {}",
                    path.display()
                ))
            })?,
            None => store.default_for(&form_type).ok_or_else(|| {
                DocfillError::PresetInvalid(format!(
                    "form '{form_type}' has no default preset in {}",
                    path.display()
                ))
            })?,
        };
        log::info!("using preset '{}' for {form_type}", preset.name);
        request.merge(&preset.to_request());
    }

    if let Some(path) = &args.values {
        let json = std::fs::read_to_string(path)?;
        let values: FillRequest = serde_json::from_str(&json)?;
        request.merge(&values);
    }

    for (id, value) in &args.set {
        request.insert(id.clone(), value.clone());
    }

    Ok(request)
}
