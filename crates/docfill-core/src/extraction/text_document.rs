//! Word-processing documents (`.docx`, `.docm`).
//!
//! Body paragraphs and table cells are addressed by their position among the
//! direct children of `w:body` (and `w:tbl`/`w:tr`/`w:tc` below it), so a
//! table's cells are never also counted as body paragraphs. A filled unit is
//! rebuilt as plain text in a single run that keeps the paragraph properties
//! and the formatting of its first run. Text boxes and other drawn objects are
//! not paragraph text and survive a fill.

use std::collections::BTreeMap;

use quick_xml::events::Event;

use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::error::DocfillError;
use crate::extraction::package::Package;
use crate::extraction::{DocumentHandler, Rendered, Substitution};
use crate::model::{
    CellPreview, ContentPreview, EditableContent, FieldDescriptor, FieldKind, FieldLocation,
    ParagraphPreview, SourceDocument, TablePreview,
};
use crate::parsing::placeholder::{has_placeholder, substitute};
use crate::parsing::xml::{empty, end, qualify, retag, start, start_with, text, Span, XmlDoc};

const DEFAULT_MAIN_PART: &str = "word/document.xml";

pub struct TextDocumentHandler;

impl DocumentHandler for TextDocumentHandler {
    fn scan(&self, doc: &SourceDocument, deadline: &Deadline) -> Result<EditableContent, DocfillError> {
        deadline.check(doc.path(), "opening")?;
        let mut package = Package::open(doc.read()?).map_err(|e| doc.parse_error(e))?;
        let part = package
            .main_part(DEFAULT_MAIN_PART)
            .map_err(|e| doc.parse_error(e))?;
        let xml = package.read_xml(&part).map_err(|e| doc.parse_error(e))?;
        let body = Body::locate(&xml).ok_or_else(|| doc.parse_error("document has no body"))?;

        let mut fields = Vec::new();
        let mut paragraphs = Vec::with_capacity(body.paragraphs.len());
        for (index, &span) in body.paragraphs.iter().enumerate() {
            deadline.check(doc.path(), &format!("scanning paragraph {index} of"))?;
            let text = paragraph_text(&xml, span);
            let is_field = has_placeholder(&text);
            if is_field {
                fields.push(FieldDescriptor::new(
                    FieldKind::PlaceholderText,
                    format!("Field in paragraph {}", index + 1),
                    text.clone(),
                    FieldLocation::Paragraph { index },
                ));
            }
            paragraphs.push(ParagraphPreview { index, text, is_field });
        }

        let mut tables = Vec::with_capacity(body.tables.len());
        for (t, &table) in body.tables.iter().enumerate() {
            deadline.check(doc.path(), &format!("scanning table {t} of"))?;
            let rows = table_cells(&xml, table);
            let mut preview_rows = Vec::with_capacity(rows.len());
            for (r, cells) in rows.iter().enumerate() {
                let mut preview_cells = Vec::with_capacity(cells.len());
                for (c, &cell) in cells.iter().enumerate() {
                    let text = cell_text(&xml, cell);
                    let is_field = has_placeholder(&text);
                    if is_field {
                        fields.push(FieldDescriptor::new(
                            FieldKind::PlaceholderText,
                            format!("Field in table {}, row {}, column {}", t + 1, r + 1, c + 1),
                            text.clone(),
                            FieldLocation::TableCell { table: t, row: r, col: c },
                        ));
                    }
                    preview_cells.push(CellPreview {
                        row: r,
                        col: c,
                        text,
                        is_field,
                    });
                }
                preview_rows.push(preview_cells);
            }
            tables.push(TablePreview {
                index: t,
                row_count: rows.len(),
                col_count: rows.first().map_or(0, Vec::len),
                rows: preview_rows,
            });
        }

        Ok(EditableContent::new(
            doc,
            fields,
            ContentPreview::TextDocument { paragraphs, tables },
        ))
    }

    fn render(
        &self,
        doc: &SourceDocument,
        _content: &EditableContent,
        substitutions: &[Substitution<'_>],
        _config: &EngineConfig,
        deadline: &Deadline,
    ) -> Result<Rendered, DocfillError> {
        let mut package = Package::open(doc.read()?).map_err(|e| doc.write_error(e))?;
        let part = package
            .main_part(DEFAULT_MAIN_PART)
            .map_err(|e| doc.write_error(e))?;
        let xml = package.read_xml(&part).map_err(|e| doc.write_error(e))?;
        let body = Body::locate(&xml).ok_or_else(|| doc.write_error("document has no body"))?;
        let tables: Vec<Vec<Vec<Span>>> = body.tables.iter().map(|&t| table_cells(&xml, t)).collect();

        let mut rendered = Rendered::default();
        let mut replacements = Vec::new();
        for sub in substitutions {
            let target = match &sub.field.location {
                FieldLocation::Paragraph { index } => {
                    deadline.check(doc.path(), &format!("filling paragraph {index} of"))?;
                    body.paragraphs
                        .get(*index)
                        .map(|&p| (p, fill_paragraph(&xml, p, sub.value)))
                }
                FieldLocation::TableCell { table, row, col } => {
                    deadline.check(doc.path(), &format!("filling table {table} of"))?;
                    tables
                        .get(*table)
                        .and_then(|rows| rows.get(*row))
                        .and_then(|cells| cells.get(*col))
                        .map(|&c| (c, fill_cell(&xml, c, sub.value)))
                }
                _ => None,
            };
            match target {
                Some(replacement) => {
                    replacements.push(replacement);
                    rendered.applied.push(sub.field.id.clone());
                }
                None => {
                    log::warn!("field {} no longer resolves in {}", sub.field.id, doc.path().display());
                    rendered.unapplied.push(sub.field.id.clone());
                }
            }
        }

        deadline.check(doc.path(), "serializing")?;
        let bytes = xml.write_with(replacements).map_err(|e| doc.write_error(e))?;
        let replaced = BTreeMap::from([(part, bytes)]);
        rendered.bytes = package.rewrite(&replaced).map_err(|e| doc.write_error(e))?;
        Ok(rendered)
    }

    fn backend_name(&self) -> &str {
        "text-document"
    }
}

/// Direct paragraph and table children of the document body.
struct Body {
    paragraphs: Vec<Span>,
    tables: Vec<Span>,
}

impl Body {
    fn locate(xml: &XmlDoc) -> Option<Body> {
        let body = xml.child_local(xml.root()?, b"body")?;
        Some(Body {
            paragraphs: xml.children_local(body, b"p"),
            tables: xml.children_local(body, b"tbl"),
        })
    }
}

/// Physical `w:tc` cells of a table, by row.
fn table_cells(xml: &XmlDoc, table: Span) -> Vec<Vec<Span>> {
    xml.children_local(table, b"tr")
        .into_iter()
        .map(|row| xml.children_local(row, b"tc"))
        .collect()
}

/// Elements that wrap a paragraph's own runs.
const RUN_CONTAINERS: [&[u8]; 3] = [b"hyperlink", b"ins", b"smartTag"];

/// Run children holding drawn objects. Text inside them (text boxes, shapes)
/// belongs to the object, not to the paragraph.
const EMBEDDED: [&[u8]; 4] = [b"drawing", b"pict", b"AlternateContent", b"object"];

/// Runs whose text makes up the paragraph: direct `w:r` children and those
/// nested in hyperlinks, insertions and smart tags.
fn text_runs(xml: &XmlDoc, parent: Span) -> Vec<Span> {
    let mut runs = Vec::new();
    for child in xml.children(parent) {
        match xml.local(child) {
            b"r" => runs.push(child),
            local if RUN_CONTAINERS.contains(&local) => runs.extend(text_runs(xml, child)),
            _ => {}
        }
    }
    runs
}

/// Visible text of a paragraph: `w:t` content of its own runs, with tabs and
/// breaks as `\t` and `\n`.
fn paragraph_text(xml: &XmlDoc, paragraph: Span) -> String {
    let mut out = String::new();
    for run in text_runs(xml, paragraph) {
        for child in xml.children(run) {
            match xml.local(child) {
                b"t" => push_text(xml, child, &mut out),
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            }
        }
    }
    out
}

fn push_text(xml: &XmlDoc, element: Span, out: &mut String) {
    for event in xml.events(element) {
        match event {
            Event::Text(t) => match t.unescape() {
                Ok(s) => out.push_str(&s),
                Err(_) => out.push_str(&String::from_utf8_lossy(t)),
            },
            Event::CData(t) => out.push_str(&String::from_utf8_lossy(t)),
            _ => {}
        }
    }
}

/// A cell's paragraphs joined by newlines.
fn cell_text(xml: &XmlDoc, cell: Span) -> String {
    xml.children_local(cell, b"p")
        .into_iter()
        .map(|p| paragraph_text(xml, p))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fill_paragraph(xml: &XmlDoc, paragraph: Span, value: &str) -> Vec<Event<'static>> {
    let filled = substitute(&paragraph_text(xml, paragraph), value);
    rebuilt_paragraph(xml, paragraph, &filled)
}

fn fill_cell(xml: &XmlDoc, cell: Span, value: &str) -> Vec<Event<'static>> {
    let filled = substitute(&cell_text(xml, cell), value);
    let name = String::from_utf8_lossy(xml.name(cell)).into_owned();

    let mut out = Vec::new();
    match xml.tag(cell) {
        Some(tag) => out.push(Event::Start(retag(tag, &[], &[]))),
        None => out.push(start(&name)),
    }
    if let Some(props) = xml.child_local(cell, b"tcPr") {
        out.extend_from_slice(xml.events(props));
    }
    match xml.child_local(cell, b"p") {
        Some(first) => out.extend(rebuilt_paragraph(xml, first, &filled)),
        None => {
            let paragraph = qualify(name.as_bytes(), "p");
            out.push(start(&paragraph));
            out.extend(run_events(&paragraph, None, xml, &filled));
            out.push(end(&paragraph));
        }
    }
    out.push(end(&name));
    out
}

/// `paragraph` with its text runs replaced by a single run holding `content`.
///
/// The new run takes the place of the first text-bearing child. Drawn objects
/// carried by the old runs are kept in their own runs, and children that hold
/// no paragraph text (bookmarks, fields, deletions) are copied unchanged.
fn rebuilt_paragraph(xml: &XmlDoc, paragraph: Span, content: &str) -> Vec<Event<'static>> {
    let name = String::from_utf8_lossy(xml.name(paragraph)).into_owned();
    let run_props = text_runs(xml, paragraph)
        .first()
        .and_then(|&run| xml.child_local(run, b"rPr"));
    let mut filled = Some(run_events(&name, run_props, xml, content));

    let mut out = Vec::new();
    match xml.tag(paragraph) {
        Some(tag) => out.push(Event::Start(retag(tag, &[], &[]))),
        None => out.push(start(&name)),
    }
    for child in xml.children(paragraph) {
        let local = xml.local(child);
        if local == b"r" || RUN_CONTAINERS.contains(&local) {
            if let Some(run) = filled.take() {
                out.extend(run);
            }
            if local == b"r" {
                out.extend(embedded_run(xml, child));
            }
        } else {
            out.extend_from_slice(xml.events(child));
        }
    }
    if let Some(run) = filled {
        out.extend(run);
    }
    out.push(end(&name));
    out
}

/// `run` reduced to its properties and drawn objects, or nothing if it has none.
fn embedded_run(xml: &XmlDoc, run: Span) -> Vec<Event<'static>> {
    let children = xml.children(run);
    if !children.iter().any(|&c| EMBEDDED.contains(&xml.local(c))) {
        return Vec::new();
    }
    let mut out = Vec::new();
    if let Some(tag) = xml.tag(run) {
        out.push(Event::Start(retag(tag, &[], &[])));
    }
    for child in children {
        let local = xml.local(child);
        if local == b"rPr" || EMBEDDED.contains(&local) {
            out.extend_from_slice(xml.events(child));
        }
    }
    out.push(end(&String::from_utf8_lossy(xml.name(run))));
    out
}

/// One run: optional copied `rPr`, then text split around tabs and newlines.
fn run_events(reference: &str, props: Option<Span>, xml: &XmlDoc, content: &str) -> Vec<Event<'static>> {
    let run = qualify(reference.as_bytes(), "r");
    let t = qualify(reference.as_bytes(), "t");

    let mut out = vec![start(&run)];
    if let Some(props) = props {
        out.extend_from_slice(xml.events(props));
    }
    let mut segment = String::new();
    let flush = |segment: &mut String, out: &mut Vec<Event<'static>>| {
        if !segment.is_empty() {
            out.push(start_with(&t, &[("xml:space", "preserve")]));
            out.push(text(segment));
            out.push(end(&t));
            segment.clear();
        }
    };
    for ch in content.chars() {
        match ch {
            '\n' => {
                flush(&mut segment, &mut out);
                out.push(empty(&qualify(reference.as_bytes(), "br")));
            }
            '\t' => {
                flush(&mut segment, &mut out);
                out.push(empty(&qualify(reference.as_bytes(), "tab")));
            }
            c => segment.push(c),
        }
    }
    flush(&mut segment, &mut out);
    out.push(end(&run));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = concat!(
        r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#,
        r#"<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr><w:r><w:rPr><w:b/></w:rPr><w:t>Lote: </w:t></w:r><w:r><w:t>___</w:t></w:r></w:p>"#,
        r#"<w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t xml:space="preserve">c </w:t></w:r></w:p>"#,
        r#"<w:tbl><w:tr><w:tc><w:tcPr><w:tcW w:w="100"/></w:tcPr><w:p><w:r><w:t>x</w:t></w:r></w:p><w:p><w:r><w:t>____</w:t></w:r></w:p></w:tc><w:tc><w:p/></w:tc></w:tr></w:tbl>"#,
        r#"<w:sectPr/></w:body></w:document>"#
    );

    fn parsed() -> (XmlDoc, Body) {
        let xml = XmlDoc::parse(DOC.as_bytes()).unwrap();
        let body = Body::locate(&xml).unwrap();
        (xml, body)
    }

    #[test]
    fn body_children_only() {
        let (_, body) = parsed();
        assert_eq!(body.paragraphs.len(), 2);
        assert_eq!(body.tables.len(), 1);
    }

    #[test]
    fn paragraph_text_ignores_tab_stops() {
        let (xml, body) = parsed();
        assert_eq!(paragraph_text(&xml, body.paragraphs[0]), "Lote: ___");
        assert_eq!(paragraph_text(&xml, body.paragraphs[1]), "a\tb\nc ");
    }

    #[test]
    fn cell_text_joins_paragraphs() {
        let (xml, body) = parsed();
        let cells = table_cells(&xml, body.tables[0]);
        assert_eq!(cells[0].len(), 2);
        assert_eq!(cell_text(&xml, cells[0][0]), "x\n____");
        assert_eq!(cell_text(&xml, cells[0][1]), "");
    }

    #[test]
    fn filled_paragraph_keeps_properties_and_first_run_format() {
        let (xml, body) = parsed();
        let p = body.paragraphs[0];
        let out = xml.write_with(vec![(p, fill_paragraph(&xml, p, "L-42"))]).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(concat!(
            r#"<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr>"#,
            r#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">Lote: L-42</w:t></w:r></w:p>"#
        )));
    }

    #[test]
    fn filled_cell_collapses_to_one_paragraph() {
        let (xml, body) = parsed();
        let cell = table_cells(&xml, body.tables[0])[0][0];
        let out = xml.write_with(vec![(cell, fill_cell(&xml, cell, "OK"))]).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(concat!(
            r#"<w:tc><w:tcPr><w:tcW w:w="100"/></w:tcPr><w:p><w:r>"#,
            r#"<w:t xml:space="preserve">x</w:t><w:br/><w:t xml:space="preserve">OK</w:t></w:r></w:p></w:tc>"#
        )));
        assert!(out.contains("<w:tc><w:p/></w:tc>"));
    }

    const TEXT_BOX: &str = concat!(
        r#"<mc:AlternateContent><mc:Choice Requires="wps"><w:drawing><wps:txbx><w:txbxContent>"#,
        r#"<w:p><w:r><w:t>Nome: ___</w:t></w:r></w:p></w:txbxContent></wps:txbx></w:drawing></mc:Choice>"#,
        r#"<mc:Fallback><w:pict><v:textbox><w:txbxContent>"#,
        r#"<w:p><w:r><w:t>Nome: ___</w:t></w:r></w:p></w:txbxContent></v:textbox></w:pict></mc:Fallback>"#,
        r#"</mc:AlternateContent>"#
    );

    fn text_box_doc() -> String {
        format!(
            concat!(
                r#"<w:document xmlns:w="w" xmlns:mc="mc" xmlns:wps="wps" xmlns:v="v" xmlns:r="r"><w:body>"#,
                r#"<w:p><w:r><w:t>Assinatura</w:t></w:r><w:r><w:rPr><w:noProof/></w:rPr>{0}</w:r></w:p>"#,
                r#"<w:p><w:bookmarkStart w:id="0" w:name="obs"/><w:r><w:rPr><w:i/></w:rPr><w:t xml:space="preserve">Obs: ___ </w:t>{0}</w:r>"#,
                r#"<w:hyperlink r:id="rId9"><w:r><w:t>ver</w:t></w:r></w:hyperlink><w:bookmarkEnd w:id="0"/></w:p>"#,
                r#"</w:body></w:document>"#
            ),
            TEXT_BOX
        )
    }

    #[test]
    fn text_box_content_is_not_paragraph_text() {
        let source = text_box_doc();
        let xml = XmlDoc::parse(source.as_bytes()).unwrap();
        let body = Body::locate(&xml).unwrap();
        assert_eq!(paragraph_text(&xml, body.paragraphs[0]), "Assinatura");
        assert!(!has_placeholder(&paragraph_text(&xml, body.paragraphs[0])));
        assert_eq!(paragraph_text(&xml, body.paragraphs[1]), "Obs: ___ ver");
    }

    #[test]
    fn filled_paragraph_keeps_text_box_and_bookmarks() {
        let source = text_box_doc();
        let xml = XmlDoc::parse(source.as_bytes()).unwrap();
        let body = Body::locate(&xml).unwrap();
        let p = body.paragraphs[1];
        let out = xml.write_with(vec![(p, fill_paragraph(&xml, p, "X"))]).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(out.matches("Obs: X ver").count(), 1);
        assert!(!out.contains("Nome: X"));
        assert_eq!(out.matches("Nome: ___").count(), 4);
        assert_eq!(out.matches("<mc:AlternateContent>").count(), 2);
        assert!(out.contains(concat!(
            r#"<w:p><w:bookmarkStart w:id="0" w:name="obs"/>"#,
            r#"<w:r><w:rPr><w:i/></w:rPr><w:t xml:space="preserve">Obs: X ver</w:t></w:r>"#,
            r#"<w:r><w:rPr><w:i/></w:rPr><mc:AlternateContent>"#
        )));
        assert!(out.contains(r#"</mc:AlternateContent></w:r><w:bookmarkEnd w:id="0"/></w:p>"#));
    }
}
