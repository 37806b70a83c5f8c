//! PDF documents.
//!
//! AcroForm fields are the fillable units when a document has any. Otherwise
//! each page whose extracted text contains an underscore run yields one coarse
//! page-level field; those cannot be filled in place, see
//! [`PagePlaceholderPolicy`](crate::config::PagePlaceholderPolicy).

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine;
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};

use crate::config::{EngineConfig, PagePlaceholderPolicy};
use crate::deadline::Deadline;
use crate::error::DocfillError;
use crate::extraction::{DocumentHandler, Rendered, Substitution};
use crate::model::{
    ContentPreview, EditableContent, FieldDescriptor, FieldKind, FieldLocation, PagePreview,
    SourceDocument,
};
use crate::parsing::placeholder::has_placeholder;

pub struct PdfHandler;

impl DocumentHandler for PdfHandler {
    fn scan(&self, doc: &SourceDocument, deadline: &Deadline) -> Result<EditableContent, DocfillError> {
        deadline.check(doc.path(), "opening")?;
        let bytes = doc.read()?;
        let pdf = load(&bytes).map_err(|e| doc.parse_error(e))?;

        let form_fields = collect_fields(&pdf);
        let mut fields: Vec<FieldDescriptor> = form_fields
            .iter()
            .map(|f| {
                FieldDescriptor::new(
                    FieldKind::NativeFormField,
                    f.name.clone(),
                    f.value.clone(),
                    FieldLocation::PdfField { name: f.name.clone() },
                )
            })
            .collect();

        let mut pages = Vec::new();
        for (index, &number) in pdf.get_pages().keys().enumerate() {
            deadline.check(doc.path(), &format!("scanning page {index} of"))?;
            let text = pdf.extract_text(&[number]).unwrap_or_else(|e| {
                log::warn!("no text extracted from page {number} of {}: {e}", doc.path().display());
                String::new()
            });
            if form_fields.is_empty() && has_placeholder(&text) {
                fields.push(FieldDescriptor::new(
                    FieldKind::PlaceholderText,
                    format!("Field on page {}", index + 1),
                    text.clone(),
                    FieldLocation::PdfPage { index },
                ));
            }
            pages.push(PagePreview { index, text });
        }

        Ok(EditableContent::new(
            doc,
            fields,
            ContentPreview::Pdf {
                pages,
                has_form_fields: !form_fields.is_empty(),
                pdf_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
            },
        ))
    }

    fn render(
        &self,
        doc: &SourceDocument,
        _content: &EditableContent,
        substitutions: &[Substitution<'_>],
        config: &EngineConfig,
        deadline: &Deadline,
    ) -> Result<Rendered, DocfillError> {
        let bytes = doc.read()?;
        let mut pdf = load(&bytes).map_err(|e| doc.write_error(e))?;
        let form_fields = collect_fields(&pdf);

        let (page_subs, field_subs): (Vec<&Substitution<'_>>, Vec<&Substitution<'_>>) = substitutions
            .iter()
            .partition(|s| matches!(s.field.location, FieldLocation::PdfPage { .. }));

        let mut rendered = Rendered::default();
        if !page_subs.is_empty() {
            match config.page_placeholders {
                PagePlaceholderPolicy::Reject => {
                    return Err(doc.unsupported(
                        "document has no form fields; page-level placeholders cannot be filled in place",
                    ))
                }
                PagePlaceholderPolicy::PassThrough => {
                    log::warn!(
                        "{} page-level placeholder(s) left unchanged in {}",
                        page_subs.len(),
                        doc.path().display()
                    );
                    rendered
                        .unapplied
                        .extend(page_subs.iter().map(|s| s.field.id.clone()));
                }
            }
        }

        if form_fields.is_empty() {
            // Nothing to write; hand back the original bytes untouched.
            rendered.unapplied.extend(field_subs.iter().map(|s| s.field.id.clone()));
            rendered.bytes = bytes;
            return Ok(rendered);
        }

        deadline.check(doc.path(), "filling form fields of")?;
        let by_name: BTreeMap<&str, &FormField> =
            form_fields.iter().map(|f| (f.name.as_str(), f)).collect();
        for sub in field_subs {
            let field = match &sub.field.location {
                FieldLocation::PdfField { name } => by_name.get(name.as_str()),
                _ => None,
            };
            match field {
                Some(field) => {
                    set_field_value(&mut pdf, field, sub.value);
                    rendered.applied.push(sub.field.id.clone());
                }
                None => {
                    log::warn!("form field for {} not found in {}", sub.field.id, doc.path().display());
                    rendered.unapplied.push(sub.field.id.clone());
                }
            }
        }
        if !rendered.applied.is_empty() {
            set_need_appearances(&mut pdf);
        }

        deadline.check(doc.path(), "serializing")?;
        let mut out = Vec::with_capacity(bytes.len());
        pdf.save_to(&mut out)
            .map_err(|e| doc.write_error(format!("failed to save PDF: {e}")))?;
        rendered.bytes = out;
        Ok(rendered)
    }

    fn backend_name(&self) -> &str {
        "pdf"
    }
}

fn load(bytes: &[u8]) -> Result<Document, String> {
    let pdf = Document::load_mem(bytes).map_err(|e| format!("failed to load PDF: {e}"))?;
    if pdf.is_encrypted() {
        return Err("encrypted PDFs are not supported".into());
    }
    Ok(pdf)
}

/// A terminal AcroForm field.
#[derive(Debug, Clone, PartialEq)]
struct FormField {
    /// Fully qualified name, e.g. `applicant.name`.
    name: String,
    /// `/FT`, inherited from ancestors when absent.
    field_type: Option<Vec<u8>>,
    value: String,
    /// Objects holding the field dictionary; more than one when a name repeats.
    ids: Vec<ObjectId>,
    widgets: Vec<ObjectId>,
}

impl FormField {
    fn is_button(&self) -> bool {
        self.field_type.as_deref() == Some(&b"Btn"[..])
    }
}

fn resolve<'a>(pdf: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => pdf.get_object(*id).ok(),
        other => Some(other),
    }
}

fn dict_of(pdf: &Document, id: ObjectId) -> Option<&Dictionary> {
    pdf.get_object(id).ok()?.as_dict().ok()
}

fn acro_form(pdf: &Document) -> Option<&Dictionary> {
    let root = resolve(pdf, pdf.trailer.get(b"Root").ok()?)?.as_dict().ok()?;
    resolve(pdf, root.get(b"AcroForm").ok()?)?.as_dict().ok()
}

/// Terminal fields in document order. Fields sharing a fully qualified name
/// are merged into one.
fn collect_fields(pdf: &Document) -> Vec<FormField> {
    let Some(roots) = acro_form(pdf)
        .and_then(|form| form.get(b"Fields").ok())
        .and_then(|fields| resolve(pdf, fields))
        .and_then(|fields| fields.as_array().ok())
    else {
        return Vec::new();
    };

    let mut visited = BTreeSet::new();
    let mut found = Vec::new();
    for root in roots {
        if let Object::Reference(id) = root {
            walk_field(pdf, *id, None, None, &mut visited, &mut found);
        }
    }

    let mut merged: Vec<FormField> = Vec::with_capacity(found.len());
    let mut positions: BTreeMap<String, usize> = BTreeMap::new();
    for field in found {
        match positions.get(&field.name) {
            Some(&i) => {
                merged[i].ids.extend(field.ids);
                merged[i].widgets.extend(field.widgets);
            }
            None => {
                positions.insert(field.name.clone(), merged.len());
                merged.push(field);
            }
        }
    }
    merged
}

fn walk_field(
    pdf: &Document,
    id: ObjectId,
    parent: Option<&str>,
    inherited_type: Option<&[u8]>,
    visited: &mut BTreeSet<ObjectId>,
    out: &mut Vec<FormField>,
) {
    if !visited.insert(id) {
        return;
    }
    let Some(dict) = dict_of(pdf, id) else {
        return;
    };

    let partial = dict
        .get(b"T")
        .ok()
        .and_then(|t| resolve(pdf, t))
        .and_then(object_text);
    let name = match (parent, partial) {
        (Some(p), Some(t)) => Some(format!("{p}.{t}")),
        (None, Some(t)) => Some(t),
        (Some(p), None) => Some(p.to_string()),
        (None, None) => None,
    };
    let field_type = match dict.get(b"FT").ok().and_then(|t| resolve(pdf, t)) {
        Some(Object::Name(t)) => Some(t.clone()),
        _ => inherited_type.map(<[u8]>::to_vec),
    };

    let kids: Vec<ObjectId> = dict
        .get(b"Kids")
        .ok()
        .and_then(|k| resolve(pdf, k))
        .and_then(|k| k.as_array().ok())
        .map(|kids| kids.iter().filter_map(|k| k.as_reference().ok()).collect())
        .unwrap_or_default();
    let (child_fields, widgets): (Vec<ObjectId>, Vec<ObjectId>) = kids
        .into_iter()
        .partition(|kid| dict_of(pdf, *kid).is_some_and(|d| d.has(b"T")));

    if child_fields.is_empty() {
        let Some(name) = name else {
            return;
        };
        let value = dict
            .get(b"V")
            .ok()
            .and_then(|v| resolve(pdf, v))
            .and_then(object_text)
            .unwrap_or_default();
        out.push(FormField {
            name,
            field_type,
            value,
            ids: vec![id],
            widgets: if widgets.is_empty() { vec![id] } else { widgets },
        });
        return;
    }

    for kid in child_fields {
        walk_field(pdf, kid, name.as_deref(), field_type.as_deref(), visited, out);
    }
}

/// Display text of a field name or value object.
fn object_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_text(bytes)),
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        Object::Integer(i) => Some(i.to_string()),
        Object::Real(r) => Some(r.to_string()),
        Object::Boolean(b) => Some(b.to_string()),
        Object::Array(items) => Some(
            items
                .iter()
                .filter_map(object_text)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
}

/// Decode a PDF text string: UTF-16BE with a byte order mark, UTF-8 with one,
/// or single-byte text read as Latin-1.
fn decode_text(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        return char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
    }
    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(utf8).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode a value as a PDF text string: plain ASCII literal, or UTF-16BE.
fn encode_text(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn set_field_value(pdf: &mut Document, field: &FormField, value: &str) {
    if field.is_button() {
        let states: Vec<(ObjectId, Vec<u8>)> = field
            .widgets
            .iter()
            .map(|&w| (w, appearance_state(pdf, w, value.as_bytes())))
            .collect();
        for &id in &field.ids {
            set_entry(pdf, id, "V", Object::Name(value.as_bytes().to_vec()));
        }
        for (widget, state) in states {
            set_entry(pdf, widget, "AS", Object::Name(state));
        }
        return;
    }

    for &id in &field.ids {
        set_entry(pdf, id, "V", encode_text(value));
    }
    // Stale appearance streams would keep showing the old value.
    for &widget in &field.widgets {
        if let Ok(Object::Dictionary(dict)) = pdf.get_object_mut(widget) {
            dict.remove(b"AP");
        }
    }
}

/// `value` if the widget has an appearance for it, `Off` otherwise.
fn appearance_state(pdf: &Document, widget: ObjectId, value: &[u8]) -> Vec<u8> {
    let normal = dict_of(pdf, widget)
        .and_then(|w| w.get(b"AP").ok())
        .and_then(|ap| resolve(pdf, ap))
        .and_then(|ap| ap.as_dict().ok())
        .and_then(|ap| ap.get(b"N").ok())
        .and_then(|n| resolve(pdf, n))
        .and_then(|n| n.as_dict().ok());
    match normal {
        Some(states) if !states.has(value) => b"Off".to_vec(),
        _ => value.to_vec(),
    }
}

fn set_entry(pdf: &mut Document, id: ObjectId, key: &str, value: Object) {
    if let Ok(Object::Dictionary(dict)) = pdf.get_object_mut(id) {
        dict.set(key, value);
    }
}

/// Ask viewers to regenerate field appearances from the new values.
fn set_need_appearances(pdf: &mut Document) {
    let Some(root_id) = pdf
        .trailer
        .get(b"Root")
        .ok()
        .and_then(|r| r.as_reference().ok())
    else {
        return;
    };
    let form_id = dict_of(pdf, root_id)
        .and_then(|root| root.get(b"AcroForm").ok())
        .and_then(|form| form.as_reference().ok());
    let form = match form_id {
        Some(id) => pdf.get_object_mut(id).ok(),
        None => pdf
            .get_object_mut(root_id)
            .ok()
            .and_then(|root| root.as_dict_mut().ok())
            .and_then(|root| root.get_mut(b"AcroForm").ok()),
    };
    if let Some(Object::Dictionary(form)) = form {
        form.set("NeedAppearances", Object::Boolean(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    /// One page, one text field nested under a parent, one checkbox.
    fn form_document() -> Document {
        let mut pdf = Document::with_version("1.5");
        let pages_id = pdf.new_object_id();
        let page_id = pdf.new_object_id();
        let parent_id = pdf.new_object_id();

        let first_id = pdf.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "T" => Object::string_literal("first"),
            "V" => Object::String(vec![0xFE, 0xFF, 0x00, 0x4A, 0x00, 0xE3], StringFormat::Hexadecimal),
            "Parent" => parent_id,
            "P" => page_id,
            "Rect" => vec![100.into(), 700.into(), 300.into(), 720.into()],
            "AP" => dictionary! { "N" => Object::Null },
        });
        pdf.objects.insert(
            parent_id,
            Object::Dictionary(dictionary! {
                "FT" => "Tx",
                "T" => Object::string_literal("person"),
                "Kids" => vec![first_id.into()],
            }),
        );
        let agree_id = pdf.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Btn",
            "T" => Object::string_literal("agree"),
            "V" => "Off",
            "AS" => "Off",
            "P" => page_id,
            "Rect" => vec![100.into(), 650.into(), 115.into(), 665.into()],
            "AP" => dictionary! { "N" => dictionary! { "Yes" => Object::Null, "Off" => Object::Null } },
        });

        pdf.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Annots" => vec![first_id.into(), agree_id.into()],
            }),
        );
        pdf.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let form_id = pdf.add_object(dictionary! {
            "Fields" => vec![parent_id.into(), agree_id.into()],
        });
        let catalog_id = pdf.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "AcroForm" => form_id,
        });
        pdf.trailer.set("Root", catalog_id);
        pdf
    }

    #[test]
    fn fields_are_fully_qualified_and_typed() {
        let fields = collect_fields(&form_document());
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "person.first");
        assert_eq!(fields[0].field_type.as_deref(), Some(&b"Tx"[..]));
        assert_eq!(fields[0].value, "Jã");
        assert_eq!(fields[1].name, "agree");
        assert!(fields[1].is_button());
        assert_eq!(fields[1].value, "Off");
    }

    #[test]
    fn text_value_is_set_and_appearance_dropped() {
        let mut pdf = form_document();
        let fields = collect_fields(&pdf);
        set_field_value(&mut pdf, &fields[0], "Ana Souza");
        set_need_appearances(&mut pdf);

        let refreshed = collect_fields(&pdf);
        assert_eq!(refreshed[0].value, "Ana Souza");
        let widget = dict_of(&pdf, fields[0].widgets[0]).unwrap();
        assert!(!widget.has(b"AP"));
        assert!(matches!(
            acro_form(&pdf).unwrap().get(b"NeedAppearances"),
            Ok(Object::Boolean(true))
        ));
    }

    #[test]
    fn checkbox_state_follows_available_appearances() {
        let mut pdf = form_document();
        let fields = collect_fields(&pdf);
        set_field_value(&mut pdf, &fields[1], "Yes");
        let widget = dict_of(&pdf, fields[1].widgets[0]).unwrap();
        assert!(matches!(widget.get(b"AS"), Ok(Object::Name(n)) if n == b"Yes"));

        set_field_value(&mut pdf, &fields[1], "Maybe");
        let widget = dict_of(&pdf, fields[1].widgets[0]).unwrap();
        assert!(matches!(widget.get(b"AS"), Ok(Object::Name(n)) if n == b"Off"));
    }

    #[test]
    fn document_without_acroform_has_no_fields() {
        let mut pdf = form_document();
        let catalog_id = pdf.trailer.get(b"Root").unwrap().as_reference().unwrap();
        pdf.get_object_mut(catalog_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .remove(b"AcroForm");
        assert!(collect_fields(&pdf).is_empty());
    }

    #[test]
    fn text_strings() {
        assert_eq!(decode_text(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE7]), "Aç");
        assert_eq!(decode_text(b"Jo\xE3o"), "João");
        assert_eq!(decode_text(b"\xEF\xBB\xBFol\xC3\xA1"), "olá");
        assert!(matches!(encode_text("abc"), Object::String(b, StringFormat::Literal) if b == b"abc"));
        match encode_text("ç") {
            Object::String(b, StringFormat::Hexadecimal) => assert_eq!(b, vec![0xFE, 0xFF, 0x00, 0xE7]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
