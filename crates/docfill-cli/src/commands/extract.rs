use docfill_core::{Deadline, DocfillError, EngineConfig};
use std::path::PathBuf;

use crate::output;

pub fn run(
    input_file: PathBuf,
    config: &EngineConfig,
    deadline: Deadline,
    output_format: &str,
    preview: bool,
) -> Result<(), DocfillError> {
    let content = docfill_core::extract(&input_file, config, deadline)?;

    match output_format {
        "json" => output::json::print(&content)?,
        _ => output::table::print_content(&content, preview),
    }

    Ok(())
}
