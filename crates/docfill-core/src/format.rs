use std::path::Path;

use crate::error::DocfillError;
use crate::model::DocumentFormat;

/// Map a path's extension to a container kind. No I/O is performed.
///
/// Only containers the engine can write back are recognized: legacy binary
/// `.xls`/`.doc` files are rejected.
pub fn detect_format(path: &Path) -> Result<DocumentFormat, DocfillError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "xlsx" | "xlsm" => Ok(DocumentFormat::Workbook),
        "docx" | "docm" => Ok(DocumentFormat::TextDocument),
        "pdf" => Ok(DocumentFormat::Pdf),
        _ => Err(DocfillError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: ext,
        }),
    }
}
