use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::error::DocfillError;
use crate::format::detect_format;

/// The three container kinds the engine can scan and fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Workbook,
    TextDocument,
    Pdf,
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Workbook => write!(f, "workbook"),
            DocumentFormat::TextDocument => write!(f, "text document"),
            DocumentFormat::Pdf => write!(f, "PDF"),
        }
    }
}

/// Immutable handle to an on-disk document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    path: PathBuf,
    format: DocumentFormat,
    size: u64,
}

impl SourceDocument {
    /// Resolve `path` against the configured forms directory, detect its
    /// format and stat it.
    ///
    /// The extension is checked before touching the filesystem, so an
    /// unsupported file fails with `UnsupportedFormat` even if it is missing.
    pub fn open(path: &Path, config: &EngineConfig) -> Result<Self, DocfillError> {
        let resolved = config.resolve(path);
        let format = detect_format(&resolved)?;
        let path = std::path::absolute(&resolved).unwrap_or(resolved);

        let meta = std::fs::metadata(&path).map_err(|e| DocfillError::DocumentParse {
            path: path.clone(),
            format,
            reason: e.to_string(),
        })?;
        if !meta.is_file() {
            return Err(DocfillError::DocumentParse {
                path,
                format,
                reason: "not a regular file".into(),
            });
        }

        Ok(SourceDocument {
            path,
            format,
            size: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without its extension.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Extension including the leading dot, as spelled in the file name.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Read the whole file. Failures are reported as parse errors.
    pub fn read(&self) -> Result<Vec<u8>, DocfillError> {
        std::fs::read(&self.path).map_err(|e| self.parse_error(e))
    }

    pub(crate) fn parse_error(&self, reason: impl fmt::Display) -> DocfillError {
        DocfillError::DocumentParse {
            path: self.path.clone(),
            format: self.format,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write_error(&self, reason: impl fmt::Display) -> DocfillError {
        DocfillError::FillWrite {
            path: self.path.clone(),
            format: self.format,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unsupported(&self, reason: impl fmt::Display) -> DocfillError {
        DocfillError::UnsupportedOperation {
            path: self.path.clone(),
            format: self.format,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A named interactive field from a PDF AcroForm.
    NativeFormField,
    /// A text unit containing a run of three or more underscores.
    PlaceholderText,
}

/// Format-specific address of a fillable unit.
///
/// Workbook rows and columns are 1-based; every other index is 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldLocation {
    Cell { sheet: String, row: u32, col: u32 },
    Paragraph { index: usize },
    TableCell { table: usize, row: usize, col: usize },
    PdfField { name: String },
    PdfPage { index: usize },
}

impl FieldLocation {
    /// Stable id derived from the location alone.
    pub fn id(&self) -> String {
        match self {
            FieldLocation::Cell { sheet, row, col } => format!("sheet:{sheet}:row:{row}:col:{col}"),
            FieldLocation::Paragraph { index } => format!("paragraph:{index}"),
            FieldLocation::TableCell { table, row, col } => {
                format!("table:{table}:row:{row}:col:{col}")
            }
            FieldLocation::PdfField { name } => format!("pdfField:{name}"),
            FieldLocation::PdfPage { index } => format!("pdfPage:{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: String,
    pub kind: FieldKind,
    pub label: String,
    pub raw_value: String,
    pub location: FieldLocation,
}

impl FieldDescriptor {
    pub fn new(
        kind: FieldKind,
        label: impl Into<String>,
        raw_value: impl Into<String>,
        location: FieldLocation,
    ) -> Self {
        FieldDescriptor {
            id: location.id(),
            kind,
            label: label.into(),
            raw_value: raw_value.into(),
            location,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub format: DocumentFormat,
    pub file_name: String,
    pub byte_size: u64,
    pub total_fields: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_sheets: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_paragraphs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tables: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
}

/// Result of an extraction: metadata, the ordered field list, and a
/// display-only copy of the surrounding content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditableContent {
    pub metadata: DocumentMetadata,
    pub fields: Vec<FieldDescriptor>,
    pub preview: ContentPreview,
}

impl EditableContent {
    pub(crate) fn new(
        doc: &SourceDocument,
        fields: Vec<FieldDescriptor>,
        preview: ContentPreview,
    ) -> Self {
        let mut metadata = DocumentMetadata {
            format: doc.format(),
            file_name: doc.file_name(),
            byte_size: doc.size(),
            total_fields: fields.len(),
            total_sheets: None,
            total_paragraphs: None,
            total_tables: None,
            total_pages: None,
        };
        match &preview {
            ContentPreview::Workbook { sheets } => metadata.total_sheets = Some(sheets.len()),
            ContentPreview::TextDocument { paragraphs, tables } => {
                metadata.total_paragraphs = Some(paragraphs.len());
                metadata.total_tables = Some(tables.len());
            }
            ContentPreview::Pdf { pages, .. } => metadata.total_pages = Some(pages.len()),
        }
        EditableContent {
            metadata,
            fields,
            preview,
        }
    }

    pub fn field(&self, id: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_ids(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "content_type", rename_all = "snake_case")]
pub enum ContentPreview {
    Workbook {
        sheets: Vec<SheetPreview>,
    },
    TextDocument {
        paragraphs: Vec<ParagraphPreview>,
        tables: Vec<TablePreview>,
    },
    Pdf {
        pages: Vec<PagePreview>,
        has_form_fields: bool,
        /// Original file bytes, base64-encoded, for an inline viewer.
        pdf_base64: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetPreview {
    pub name: String,
    pub row_count: usize,
    pub col_count: usize,
    pub rows: Vec<Vec<GridCell>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridCell {
    pub row: u32,
    pub col: u32,
    pub value: String,
    pub is_field: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphPreview {
    pub index: usize,
    pub text: String,
    pub is_field: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePreview {
    pub index: usize,
    pub row_count: usize,
    pub col_count: usize,
    pub rows: Vec<Vec<CellPreview>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellPreview {
    pub row: usize,
    pub col: usize,
    pub text: String,
    pub is_field: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagePreview {
    pub index: usize,
    pub text: String,
}

/// Field id -> replacement value.
///
/// Ids unknown to the document are ignored and ids left out keep their
/// original content, so partial value sets are always valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FillRequest {
    values: BTreeMap<String, String>,
}

impl FillRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(id.into(), value.into());
        self
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.values.get(id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay `other` on top of this request; `other` wins on conflicts.
    pub fn merge(&mut self, other: &FillRequest) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FillRequest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        FillRequest {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A filled document written by the engine.
///
/// The file lives in a per-call directory that the engine does not clean up;
/// call [`OutputDocument::dispose`] once the file has been consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDocument {
    pub path: PathBuf,
    pub file_name: String,
    pub format: DocumentFormat,
    pub success: bool,
    /// Directory created for this fill call.
    pub work_dir: PathBuf,
    /// Ids whose values were written.
    pub applied: Vec<String>,
    /// Ids present in the request but unknown to the document.
    pub ignored: Vec<String>,
    /// Ids known to the document that could not be written.
    pub unapplied: Vec<String>,
}

impl OutputDocument {
    /// Remove the generated file and its per-call directory.
    pub fn dispose(self) -> std::io::Result<()> {
        std::fs::remove_dir_all(&self.work_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_ids() {
        let cell = FieldLocation::Cell {
            sheet: "Sheet1".into(),
            row: 3,
            col: 2,
        };
        assert_eq!(cell.id(), "sheet:Sheet1:row:3:col:2");
        assert_eq!(FieldLocation::Paragraph { index: 4 }.id(), "paragraph:4");
        assert_eq!(
            FieldLocation::TableCell {
                table: 0,
                row: 1,
                col: 2
            }
            .id(),
            "table:0:row:1:col:2"
        );
        assert_eq!(
            FieldLocation::PdfField {
                name: "cliente.nome".into()
            }
            .id(),
            "pdfField:cliente.nome"
        );
        assert_eq!(FieldLocation::PdfPage { index: 0 }.id(), "pdfPage:0");
    }

    #[test]
    fn fill_request_merge_prefers_overlay() {
        let mut base: FillRequest = [("a", "1"), ("b", "2")].into_iter().collect();
        let overlay: FillRequest = [("b", "20"), ("c", "30")].into_iter().collect();
        base.merge(&overlay);
        assert_eq!(base.get("a"), Some("1"));
        assert_eq!(base.get("b"), Some("20"));
        assert_eq!(base.get("c"), Some("30"));
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn fill_request_is_plain_json_map() {
        let req: FillRequest = serde_json::from_str(r#"{"paragraph:4": "L-001"}"#).unwrap();
        assert_eq!(req.get("paragraph:4"), Some("L-001"));
    }

    #[test]
    fn location_serializes_with_type_tag() {
        let json = serde_json::to_string(&FieldLocation::PdfPage { index: 2 }).unwrap();
        assert_eq!(json, r#"{"type":"pdf_page","index":2}"#);
    }
}
