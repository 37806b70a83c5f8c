pub(crate) mod package;
pub mod pdf;
pub mod text_document;
pub mod workbook;

use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::error::DocfillError;
use crate::model::{DocumentFormat, EditableContent, FieldDescriptor, SourceDocument};

pub use pdf::PdfHandler;
pub use text_document::TextDocumentHandler;
pub use workbook::WorkbookHandler;

/// One requested value resolved against a freshly scanned field.
#[derive(Debug, Clone, Copy)]
pub struct Substitution<'a> {
    pub field: &'a FieldDescriptor,
    pub value: &'a str,
}

/// Serialized output of a handler's fill step.
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    /// Field ids whose values were written.
    pub applied: Vec<String>,
    /// Field ids that were requested but could not be written.
    pub unapplied: Vec<String>,
}

/// Format-specific scanning and filling.
///
/// Each call opens its own copy of the document and releases it before
/// returning; handlers keep no state between calls.
pub trait DocumentHandler: Send + Sync {
    /// Discover the fillable units of `doc`.
    fn scan(&self, doc: &SourceDocument, deadline: &Deadline) -> Result<EditableContent, DocfillError>;

    /// Re-open `doc` and serialize a copy with `substitutions` applied.
    ///
    /// `content` is the scan of this same file the substitutions were
    /// resolved against. The source file is never modified.
    fn render(
        &self,
        doc: &SourceDocument,
        content: &EditableContent,
        substitutions: &[Substitution<'_>],
        config: &EngineConfig,
        deadline: &Deadline,
    ) -> Result<Rendered, DocfillError>;

    /// Name of this handler (for diagnostics).
    fn backend_name(&self) -> &str;
}

/// The handler for a detected format.
pub fn handler_for(format: DocumentFormat) -> &'static dyn DocumentHandler {
    match format {
        DocumentFormat::Workbook => &WorkbookHandler,
        DocumentFormat::TextDocument => &TextDocumentHandler,
        DocumentFormat::Pdf => &PdfHandler,
    }
}
