pub mod config;
pub mod deadline;
pub mod error;
pub mod extraction;
pub mod format;
pub mod model;
pub mod output;
pub mod parsing;
pub mod presets;

use std::path::Path;

pub use config::{EngineConfig, MarkerStyle, PagePlaceholderPolicy};
pub use deadline::Deadline;
pub use error::DocfillError;
pub use model::{
    ContentPreview, DocumentFormat, DocumentMetadata, EditableContent, FieldDescriptor, FieldKind,
    FieldLocation, FillRequest, OutputDocument, SourceDocument,
};

use extraction::{handler_for, Substitution};

/// Scan a document and return its fillable fields plus a display preview.
///
/// `path` is resolved against `config.forms_dir` when relative. The format is
/// chosen from the file extension before the file is opened. The source file
/// is only read.
pub fn extract(path: &Path, config: &EngineConfig, deadline: Deadline) -> Result<EditableContent, DocfillError> {
    let doc = SourceDocument::open(path, config)?;
    let handler = handler_for(doc.format());
    let content = handler.scan(&doc, &deadline)?;

    log::info!(
        "extracted {} field(s) from {} {} via {}",
        content.fields.len(),
        doc.format(),
        doc.path().display(),
        handler.backend_name()
    );
    Ok(content)
}

/// Write a filled copy of a document.
///
/// The document is scanned afresh and every request id is resolved against
/// that scan. Ids the document does not have are ignored. The output goes to
/// a new per-call directory; the source file is never modified, and the
/// caller removes the output with [`OutputDocument::dispose`].
pub fn fill(
    path: &Path,
    request: &FillRequest,
    config: &EngineConfig,
    deadline: Deadline,
) -> Result<OutputDocument, DocfillError> {
    let doc = SourceDocument::open(path, config)?;
    let handler = handler_for(doc.format());
    let content = handler.scan(&doc, &deadline)?;

    let substitutions: Vec<Substitution<'_>> = content
        .fields
        .iter()
        .filter_map(|field| {
            request
                .get(&field.id)
                .map(|value| Substitution { field, value })
        })
        .collect();

    let ignored: Vec<String> = request
        .iter()
        .filter(|(id, _)| content.field(id).is_none())
        .map(|(id, _)| {
            log::debug!("ignoring unknown field id '{id}' for {}", doc.path().display());
            id.to_string()
        })
        .collect();

    let rendered = handler.render(&doc, &content, &substitutions, config, &deadline)?;

    deadline.check(doc.path(), "publishing output for")?;
    let published = output::publish(&doc, &rendered.bytes, config)?;

    log::info!(
        "filled {} of {} requested field(s) in {} -> {}",
        rendered.applied.len(),
        request.len(),
        doc.path().display(),
        published.path.display()
    );
    Ok(OutputDocument {
        path: published.path,
        file_name: published.file_name,
        format: doc.format(),
        success: true,
        work_dir: published.work_dir,
        applied: rendered.applied,
        ignored,
        unapplied: rendered.unapplied,
    })
}
