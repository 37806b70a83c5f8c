use docfill_core::presets::schema::FormPreset;
use docfill_core::{ContentPreview, EditableContent, FieldKind, OutputDocument};

pub fn print_content(content: &EditableContent, preview: bool) {
    let meta = &content.metadata;
    println!("{} ({}, {} bytes)\n", meta.file_name, meta.format, meta.byte_size);

    let mut counts = Vec::new();
    if let Some(n) = meta.total_sheets {
        counts.push(format!("{n} sheet(s)"));
    }
    if let Some(n) = meta.total_paragraphs {
        counts.push(format!("{n} paragraph(s)"));
    }
    if let Some(n) = meta.total_tables {
        counts.push(format!("{n} table(s)"));
    }
    if let Some(n) = meta.total_pages {
        counts.push(format!("{n} page(s)"));
    }
    counts.push(format!("{} field(s)", meta.total_fields));
    println!("  {}\n", counts.join(", "));

    if content.fields.is_empty() {
        println!("  No fillable fields found.");
    } else {
        let max_id = content
            .fields
            .iter()
            .map(|f| f.id.chars().count())
            .max()
            .unwrap_or(10);

        for field in &content.fields {
            let kind = match field.kind {
                FieldKind::NativeFormField => "form",
                FieldKind::PlaceholderText => "text",
            };
            println!(
                "  {:<width$}  [{}] {}",
                field.id,
                kind,
                one_line(&field.raw_value, 60),
                width = max_id
            );
        }
    }

    if preview {
        println!();
        print_preview(&content.preview);
    }
}

fn print_preview(preview: &ContentPreview) {
    match preview {
        ContentPreview::Workbook { sheets } => {
            for sheet in sheets {
                println!("=== {} ({}x{}) ===", sheet.name, sheet.row_count, sheet.col_count);
                for row in &sheet.rows {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|c| {
                            let marker = if c.is_field { "*" } else { "" };
                            format!("{}{}", one_line(&c.value, 20), marker)
                        })
                        .collect();
                    println!("  {}", cells.join(" | "));
                }
                println!();
            }
        }
        ContentPreview::TextDocument { paragraphs, tables } => {
            for p in paragraphs {
                let marker = if p.is_field { "*" } else { " " };
                println!("{marker} {:>4}  {}", p.index, one_line(&p.text, 80));
            }
            for table in tables {
                println!(
                    "\n=== Table {} ({}x{}) ===",
                    table.index, table.row_count, table.col_count
                );
                for row in &table.rows {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|c| {
                            let marker = if c.is_field { "*" } else { "" };
                            format!("{}{}", one_line(&c.text, 20), marker)
                        })
                        .collect();
                    println!("  {}", cells.join(" | "));
                }
            }
        }
        ContentPreview::Pdf {
            pages,
            has_form_fields,
            ..
        } => {
            if *has_form_fields {
                println!("Document has interactive form fields.\n");
            }
            for page in pages {
                println!("=== Page {} ===", page.index + 1);
                println!("{}\n", page.text.trim_end());
            }
        }
    }
}

pub fn print_output(output: &OutputDocument) {
    println!("Written: {}\n", output.path.display());
    println!("  Filled:  {}", output.applied.len());
    if !output.ignored.is_empty() {
        println!("  Ignored (unknown ids): {}", output.ignored.join(", "));
    }
    if !output.unapplied.is_empty() {
        println!("  Not written: {}", output.unapplied.join(", "));
    }
    println!("\nRemove {} when done with the file.", output.work_dir.display());
}

pub fn print_presets(presets: &[&FormPreset]) {
    let max_name = presets
        .iter()
        .map(|p| p.name.chars().count())
        .max()
        .unwrap_or(10);

    let mut current_form = None;
    for preset in presets {
        if current_form != Some(preset.form_type.as_str()) {
            if current_form.is_some() {
                println!();
            }
            println!("{}:", preset.form_type);
            current_form = Some(preset.form_type.as_str());
        }
        let default_marker = if preset.is_default { " (default)" } else { "" };
        println!(
            "  {:<width$}  {} value(s){}",
            preset.name,
            preset.data.len(),
            default_marker,
            width = max_name
        );
        if let Some(ref desc) = preset.description {
            println!("  {:<width$}  {}", "", desc, width = max_name);
        }
    }
}

/// First line of `text`, cut to `max` characters.
fn one_line(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    let mut out: String = line.chars().take(max).collect();
    if line.chars().count() > max || text.lines().nth(1).is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_line() {
        assert_eq!(one_line("Nome: ____", 20), "Nome: ____");
        assert_eq!(one_line("abcdef", 3), "abc…");
        assert_eq!(one_line("x\ny", 10), "x…");
        assert_eq!(one_line("", 10), "");
    }
}
