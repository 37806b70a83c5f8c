//! Spreadsheet workbooks (`.xlsx`, `.xlsm`).
//!
//! Scanning reads cell values through calamine. Filling edits the package
//! directly: each targeted `<c>` element in the sheet XML is replaced by an
//! inline-string cell carrying a marker style, and the marker font/xf records
//! are appended to the styles part. Every other part is copied unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

use calamine::{Data, Range, Reader, SheetType, Xlsx};
use quick_xml::events::{BytesEnd, BytesStart, Event};

use crate::config::{EngineConfig, MarkerStyle};
use crate::deadline::Deadline;
use crate::error::DocfillError;
use crate::extraction::package::{Package, PackageError};
use crate::extraction::{DocumentHandler, Rendered, Substitution};
use crate::model::{
    ContentPreview, EditableContent, FieldDescriptor, FieldKind, FieldLocation, GridCell,
    SheetPreview, SourceDocument,
};
use crate::parsing::placeholder::has_placeholder;
use crate::parsing::xml::{
    empty, empty_with, end, qualify, retag, start, start_with, text, Span, XmlDoc, XmlResult,
};

pub struct WorkbookHandler;

impl DocumentHandler for WorkbookHandler {
    fn scan(&self, doc: &SourceDocument, deadline: &Deadline) -> Result<EditableContent, DocfillError> {
        deadline.check(doc.path(), "opening")?;
        let bytes = doc.read()?;
        let mut workbook: Xlsx<_> = calamine::open_workbook_from_rs(Cursor::new(bytes))
            .map_err(|e| doc.parse_error(format!("failed to open workbook: {e}")))?;

        let sheet_names: Vec<String> = workbook
            .sheets_metadata()
            .iter()
            .filter(|s| s.typ == SheetType::WorkSheet)
            .map(|s| s.name.clone())
            .collect();

        let mut fields = Vec::new();
        let mut sheets = Vec::with_capacity(sheet_names.len());
        for name in sheet_names {
            deadline.check(doc.path(), &format!("scanning sheet '{name}' of"))?;
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| doc.parse_error(format!("failed to read sheet '{name}': {e}")))?;
            sheets.push(scan_sheet(name, &range, &mut fields));
        }

        Ok(EditableContent::new(
            doc,
            fields,
            ContentPreview::Workbook { sheets },
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
        let mut package = Package::open(bytes).map_err(|e| doc.write_error(e))?;
        fill_package(&mut package, substitutions, &config.marker, doc, deadline)
    }

    fn backend_name(&self) -> &str {
        "workbook"
    }
}

/// Walk the used range row by row; addresses are absolute and 1-based.
fn scan_sheet(name: String, range: &Range<Data>, fields: &mut Vec<FieldDescriptor>) -> SheetPreview {
    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    let (height, width) = range.get_size();

    let mut rows = Vec::with_capacity(height);
    for (r, cells) in range.rows().enumerate() {
        let row = first_row + r as u32 + 1;
        let mut grid = Vec::with_capacity(width);
        for (c, cell) in cells.iter().enumerate() {
            let col = first_col + c as u32 + 1;
            let is_field = match cell {
                Data::String(s) if has_placeholder(s) => {
                    fields.push(FieldDescriptor::new(
                        FieldKind::PlaceholderText,
                        format!("{name} ({}{row})", column_letters(col)),
                        s.clone(),
                        FieldLocation::Cell {
                            sheet: name.clone(),
                            row,
                            col,
                        },
                    ));
                    true
                }
                _ => false,
            };
            grid.push(GridCell {
                row,
                col,
                value: cell.to_string(),
                is_field,
            });
        }
        rows.push(grid);
    }

    SheetPreview {
        name,
        row_count: height,
        col_count: width,
        rows,
    }
}

struct SheetEdit<'a> {
    part: String,
    xml: XmlDoc,
    cells: Vec<(Span, u32, &'a Substitution<'a>)>,
}

fn fill_package(
    package: &mut Package,
    substitutions: &[Substitution<'_>],
    marker: &MarkerStyle,
    doc: &SourceDocument,
    deadline: &Deadline,
) -> Result<Rendered, DocfillError> {
    let fail = |e: PackageError| doc.write_error(e);
    let workbook_part = package.main_part("xl/workbook.xml").map_err(fail)?;
    let sheet_parts = sheet_parts(package, &workbook_part).map_err(fail)?;

    let mut by_sheet: BTreeMap<&str, Vec<(u32, u32, &Substitution<'_>)>> = BTreeMap::new();
    for sub in substitutions {
        if let FieldLocation::Cell { sheet, row, col } = &sub.field.location {
            by_sheet.entry(sheet.as_str()).or_default().push((*row, *col, sub));
        }
    }

    let mut rendered = Rendered::default();
    let mut edits = Vec::new();
    for (sheet, targets) in by_sheet {
        deadline.check(doc.path(), &format!("filling sheet '{sheet}' of"))?;
        let Some(part) = sheet_parts.get(sheet) else {
            log::warn!("sheet '{sheet}' has no worksheet part in {}", doc.path().display());
            rendered
                .unapplied
                .extend(targets.iter().map(|(_, _, s)| s.field.id.clone()));
            continue;
        };
        let xml = package.read_xml(part).map_err(fail)?;
        let wanted: BTreeSet<(u32, u32)> = targets.iter().map(|(r, c, _)| (*r, *c)).collect();
        let found = locate_cells(&xml, &wanted);

        let mut cells = Vec::new();
        for (row, col, sub) in targets {
            match found.get(&(row, col)) {
                Some(&span) => {
                    let style = xml
                        .attr(span, b"s")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    cells.push((span, style, sub));
                }
                None => {
                    log::warn!("cell {}{row} not found in sheet '{sheet}'", column_letters(col));
                    rendered.unapplied.push(sub.field.id.clone());
                }
            }
        }
        edits.push(SheetEdit {
            part: part.clone(),
            xml,
            cells,
        });
    }

    let mut replaced = BTreeMap::new();
    let originals: BTreeSet<u32> = edits
        .iter()
        .flat_map(|e| e.cells.iter().map(|(_, style, _)| *style))
        .collect();
    let marker_map = if originals.is_empty() || (!marker.bold && marker.color.is_empty()) {
        BTreeMap::new()
    } else {
        match package.related_part(&workbook_part, "styles").map_err(fail)? {
            Some(styles_part) if package.has_part(&styles_part) => {
                let styles = package.read_xml(&styles_part).map_err(fail)?;
                match marker_styles(&styles, &originals, marker).map_err(|e| doc.write_error(e))? {
                    Some((bytes, map)) => {
                        replaced.insert(styles_part, bytes);
                        map
                    }
                    None => {
                        log::warn!("styles part has no fonts/cellXfs; filled cells are left unstyled");
                        BTreeMap::new()
                    }
                }
            }
            _ => {
                log::warn!("workbook has no styles part; filled cells are left unstyled");
                BTreeMap::new()
            }
        }
    };

    for edit in edits {
        let replacements = edit
            .cells
            .iter()
            .filter_map(|(span, style, sub)| {
                let events = cell_events(&edit.xml, *span, sub.value, marker_map.get(style).copied())?;
                Some((*span, events))
            })
            .collect();
        let bytes = edit
            .xml
            .write_with(replacements)
            .map_err(|e| doc.write_error(e))?;
        rendered
            .applied
            .extend(edit.cells.iter().map(|(_, _, s)| s.field.id.clone()));
        replaced.insert(edit.part, bytes);
    }

    deadline.check(doc.path(), "serializing")?;
    rendered.bytes = package.rewrite(&replaced).map_err(fail)?;
    Ok(rendered)
}

/// Sheet name -> worksheet part name, from the workbook part and its relationships.
fn sheet_parts(package: &mut Package, workbook_part: &str) -> Result<BTreeMap<String, String>, PackageError> {
    let xml = package.read_xml(workbook_part)?;
    let targets: BTreeMap<String, String> = package
        .relationships(workbook_part)?
        .into_iter()
        .map(|r| (r.id, r.target))
        .collect();

    let mut parts = BTreeMap::new();
    let Some(sheets) = xml.root().and_then(|root| xml.child_local(root, b"sheets")) else {
        return Ok(parts);
    };
    for sheet in xml.children_local(sheets, b"sheet") {
        let (Some(name), Some(rel_id)) = (
            xml.attr(sheet, b"name"),
            xml.tag(sheet).and_then(relationship_id),
        ) else {
            continue;
        };
        if let Some(target) = targets.get(&rel_id) {
            parts.insert(name, target.clone());
        }
    }
    Ok(parts)
}

/// The namespaced `r:id` attribute, whatever prefix the relationships namespace uses.
fn relationship_id(tag: &BytesStart<'_>) -> Option<String> {
    tag.attributes()
        .with_checks(false)
        .flatten()
        .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Find the `<c>` elements for the wanted (row, col) pairs. Rows and cells
/// without an `r` attribute follow their predecessor.
fn locate_cells(xml: &XmlDoc, wanted: &BTreeSet<(u32, u32)>) -> BTreeMap<(u32, u32), Span> {
    let mut found = BTreeMap::new();
    let Some(data) = xml.root().and_then(|root| xml.child_local(root, b"sheetData")) else {
        return found;
    };

    let mut row_no = 0;
    for row in xml.children_local(data, b"row") {
        row_no = xml
            .attr(row, b"r")
            .and_then(|r| r.parse().ok())
            .unwrap_or(row_no + 1);
        let mut col_no = 0;
        for cell in xml.children_local(row, b"c") {
            let (r, c) = xml
                .attr(cell, b"r")
                .and_then(|r| parse_cell_ref(&r))
                .unwrap_or((row_no, col_no + 1));
            col_no = c;
            if wanted.contains(&(r, c)) {
                found.insert((r, c), cell);
            }
        }
    }
    found
}

/// Replacement events for one cell: an inline string, optionally restyled.
fn cell_events(xml: &XmlDoc, span: Span, value: &str, style: Option<u32>) -> Option<Vec<Event<'static>>> {
    let tag = xml.tag(span)?;
    let name = String::from_utf8_lossy(xml.name(span)).into_owned();
    let style = style.map(|s| s.to_string());

    let mut set = vec![("t", "inlineStr")];
    if let Some(s) = &style {
        set.push(("s", s.as_str()));
    }
    let is = qualify(name.as_bytes(), "is");
    let t = qualify(name.as_bytes(), "t");

    Some(vec![
        Event::Start(retag(tag, &set, &[])),
        start(&is),
        start_with(&t, &[("xml:space", "preserve")]),
        text(value),
        end(&t),
        end(&is),
        Event::End(BytesEnd::new(name)),
    ])
}

/// Append one marker font and one cell format per original cell format in
/// use, returning the new styles part and original -> marker xf index map.
///
/// Each marker format clones its original (number format, fill, border,
/// alignment) and points at a clone of the original font with bold and the
/// marker colour applied.
fn marker_styles(
    xml: &XmlDoc,
    originals: &BTreeSet<u32>,
    marker: &MarkerStyle,
) -> XmlResult<Option<(Vec<u8>, BTreeMap<u32, u32>)>> {
    let Some(root) = xml.root() else {
        return Ok(None);
    };
    let (Some(fonts), Some(xfs)) = (
        xml.child_local(root, b"fonts"),
        xml.child_local(root, b"cellXfs"),
    ) else {
        return Ok(None);
    };
    if xml.is_empty_element(fonts) || xml.is_empty_element(xfs) {
        return Ok(None);
    }

    let font_spans = xml.children_local(fonts, b"font");
    let xf_spans = xml.children_local(xfs, b"xf");
    let font_name = qualify(xml.name(fonts), "font");
    let xf_name = qualify(xml.name(xfs), "xf");

    let mut new_fonts = Vec::new();
    let mut new_xfs = Vec::new();
    let mut map = BTreeMap::new();
    for &original in originals {
        let base_xf = xf_spans.get(original as usize).or(xf_spans.first()).copied();
        let font_id = base_xf
            .and_then(|xf| xml.attr(xf, b"fontId"))
            .and_then(|f| f.parse::<usize>().ok())
            .unwrap_or(0);

        let marker_font_id = font_spans.len() + new_fonts.len();
        new_fonts.push(marker_font(xml, font_spans.get(font_id).copied(), &font_name, marker));

        let marker_xf_id = xf_spans.len() + new_xfs.len();
        new_xfs.push(marker_xf(xml, base_xf, &xf_name, marker_font_id));
        map.insert(original, marker_xf_id as u32);
    }

    let font_count = font_spans.len() + new_fonts.len();
    let xf_count = xf_spans.len() + new_xfs.len();
    let replacements = vec![
        (fonts, extend_list(xml, fonts, font_count, new_fonts.concat())),
        (xfs, extend_list(xml, xfs, xf_count, new_xfs.concat())),
    ];
    Ok(Some((xml.write_with(replacements)?, map)))
}

/// The list element with `extra` appended before its end tag and `count` updated.
fn extend_list(xml: &XmlDoc, span: Span, count: usize, extra: Vec<Event<'static>>) -> Vec<Event<'static>> {
    let events = xml.events(span);
    let count = count.to_string();
    let mut out = Vec::with_capacity(events.len() + extra.len());
    match xml.tag(span) {
        Some(tag) => out.push(Event::Start(retag(tag, &[("count", count.as_str())], &[]))),
        None => out.push(events[0].clone()),
    }
    out.extend_from_slice(&events[1..events.len() - 1]);
    out.extend(extra);
    out.push(events[events.len() - 1].clone());
    out
}

fn marker_font(xml: &XmlDoc, base: Option<Span>, name: &str, marker: &MarkerStyle) -> Vec<Event<'static>> {
    let mut out = Vec::new();
    match base.filter(|s| !xml.is_empty_element(*s)) {
        Some(span) => {
            let events = xml.events(span);
            out.push(events[0].clone());
            for child in xml.children(span) {
                if matches!(xml.local(child), b"b" | b"color") {
                    continue;
                }
                out.extend_from_slice(xml.events(child));
            }
            push_marker(&mut out, xml.name(span), marker);
            out.push(events[events.len() - 1].clone());
        }
        None => {
            out.push(start(name));
            push_marker(&mut out, name.as_bytes(), marker);
            out.push(end(name));
        }
    }
    out
}

fn push_marker(out: &mut Vec<Event<'static>>, font_name: &[u8], marker: &MarkerStyle) {
    if marker.bold {
        out.push(empty(&qualify(font_name, "b")));
    }
    if !marker.color.is_empty() {
        out.push(empty_with(
            &qualify(font_name, "color"),
            &[("rgb", marker.color.as_str())],
        ));
    }
}

fn marker_xf(xml: &XmlDoc, base: Option<Span>, name: &str, font_id: usize) -> Vec<Event<'static>> {
    let font_id = font_id.to_string();
    let set = [("fontId", font_id.as_str()), ("applyFont", "1")];
    match base.and_then(|span| xml.tag(span).map(|tag| (span, tag))) {
        Some((span, tag)) if xml.is_empty_element(span) => vec![Event::Empty(retag(tag, &set, &[]))],
        Some((span, tag)) => {
            let events = xml.events(span);
            let mut out = vec![Event::Start(retag(tag, &set, &[]))];
            out.extend_from_slice(&events[1..events.len() - 1]);
            out.push(events[events.len() - 1].clone());
            out
        }
        None => vec![empty_with(
            name,
            &[
                ("numFmtId", "0"),
                ("fontId", font_id.as_str()),
                ("fillId", "0"),
                ("borderId", "0"),
                ("xfId", "0"),
                ("applyFont", "1"),
            ],
        )],
    }
}

/// `"B3"` -> `Some((3, 2))`.
pub fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .chars()
        .try_fold(0u32, |acc, c| {
            acc.checked_mul(26)?
                .checked_add(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)
        })?;
    let row = digits.parse().ok()?;
    Some((row, col))
}

/// 1-based column number to letters: 1 -> `A`, 28 -> `AB`.
pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_roundtrip_known_values() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(2), "B");
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(28), "AB");
        assert_eq!(column_letters(703), "AAA");
    }

    #[test]
    fn cell_refs() {
        assert_eq!(parse_cell_ref("B3"), Some((3, 2)));
        assert_eq!(parse_cell_ref("aa10"), Some((10, 27)));
        assert_eq!(parse_cell_ref("3"), None);
        assert_eq!(parse_cell_ref("B"), None);
        assert_eq!(parse_cell_ref("B3x"), None);
    }

    const SHEET: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c></row><row r="3"><c r="A3" t="s"><v>1</v></c><c r="B3" s="2" t="s"><v>2</v></c></row><row><c><v>7</v></c><c t="s"><v>3</v></c></row></sheetData></worksheet>"#;

    #[test]
    fn locates_cells_with_and_without_refs() {
        let xml = XmlDoc::parse(SHEET.as_bytes()).unwrap();
        let wanted: BTreeSet<(u32, u32)> = [(3, 2), (4, 2), (9, 9)].into_iter().collect();
        let found = locate_cells(&xml, &wanted);
        assert_eq!(found.len(), 2);
        assert_eq!(xml.attr(found[&(3, 2)], b"s").as_deref(), Some("2"));
        assert_eq!(xml.attr(found[&(4, 2)], b"t").as_deref(), Some("s"));
    }

    #[test]
    fn cell_becomes_styled_inline_string() {
        let xml = XmlDoc::parse(SHEET.as_bytes()).unwrap();
        let wanted: BTreeSet<(u32, u32)> = [(3, 2)].into_iter().collect();
        let span = locate_cells(&xml, &wanted)[&(3, 2)];
        let events = cell_events(&xml, span, "João & Cia", Some(9)).unwrap();
        let out = String::from_utf8(xml.write_with(vec![(span, events)]).unwrap()).unwrap();
        assert!(out.contains(
            r#"<c r="B3" t="inlineStr" s="9"><is><t xml:space="preserve">João &amp; Cia</t></is></c>"#
        ));
        assert!(out.contains(r#"<c r="A3" t="s"><v>1</v></c>"#));
    }

    const STYLES: &str = r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><color theme="1"/><name val="Calibri"/></font><font><b/><sz val="14"/><name val="Arial"/></font></fonts><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="1" xfId="0" applyBorder="1"><alignment horizontal="center"/></xf></cellXfs></styleSheet>"#;

    #[test]
    fn marker_styles_clone_original_formats() {
        let xml = XmlDoc::parse(STYLES.as_bytes()).unwrap();
        let originals: BTreeSet<u32> = [0, 1].into_iter().collect();
        let (bytes, map) = marker_styles(&xml, &originals, &MarkerStyle::default())
            .unwrap()
            .unwrap();
        assert_eq!(map[&0], 2);
        assert_eq!(map[&1], 3);

        let out = String::from_utf8(bytes).unwrap();
        assert!(out.contains(r#"<fonts count="4">"#));
        assert!(out.contains(r#"<cellXfs count="4">"#));
        assert!(out.contains(
            r#"<font><sz val="11"/><name val="Calibri"/><b/><color rgb="FF1F4E9A"/></font>"#
        ));
        assert!(out.contains(r#"<xf numFmtId="0" fillId="0" borderId="1" xfId="0" applyBorder="1" fontId="3" applyFont="1"><alignment horizontal="center"/></xf>"#));
    }

    #[test]
    fn marker_styles_need_font_and_format_lists() {
        let xml = XmlDoc::parse(b"<styleSheet><fonts count=\"0\"/></styleSheet>").unwrap();
        let originals: BTreeSet<u32> = [0].into_iter().collect();
        assert!(marker_styles(&xml, &originals, &MarkerStyle::default())
            .unwrap()
            .is_none());
    }
}
