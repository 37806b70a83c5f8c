//! Publishing fill results.
//!
//! Every fill call gets its own directory under the configured work root. The
//! rendered bytes are written to a temporary file inside it and renamed into
//! place, so a reader never observes a partially written output.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::config::EngineConfig;
use crate::error::DocfillError;
use crate::model::SourceDocument;

/// Location of a published output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Published {
    pub work_dir: PathBuf,
    pub path: PathBuf,
    pub file_name: String,
}

/// `<stem>_<suffix>_<YYYYMMDDHHMMSS><.ext>`
pub fn output_file_name(stem: &str, suffix: &str, extension: &str, at: DateTime<Local>) -> String {
    format!("{stem}_{suffix}_{}{extension}", at.format("%Y%m%d%H%M%S"))
}

pub(crate) fn publish(doc: &SourceDocument, bytes: &[u8], config: &EngineConfig) -> Result<Published, DocfillError> {
    let root = config.work_dir();
    std::fs::create_dir_all(&root)
        .map_err(|e| doc.write_error(format!("cannot create {}: {e}", root.display())))?;

    let dir = tempfile::Builder::new()
        .prefix(&config.output_prefix)
        .tempdir_in(&root)
        .map_err(|e| doc.write_error(format!("cannot create output directory: {e}")))?;

    let file_name = output_file_name(&doc.stem(), &config.fill_suffix, &doc.extension(), Local::now());
    let path = dir.path().join(&file_name);
    write_atomic(dir.path(), &path, bytes).map_err(|e| doc.write_error(e))?;

    let work_dir = dir.keep();
    log::debug!("published {} ({} bytes)", path.display(), bytes.len());
    Ok(Published {
        work_dir,
        path,
        file_name,
    })
}

fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::model::OutputDocument;

    #[test]
    fn file_name_convention() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(
            output_file_name("Ficha Lote", "preenchido", ".xlsx", at),
            "Ficha Lote_preenchido_20240307090502.xlsx"
        );
        assert_eq!(output_file_name("raw", "filled", "", at), "raw_filled_20240307090502");
    }

    #[test]
    fn publish_creates_private_directory_per_call() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("form.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();

        let config = EngineConfig {
            work_dir: Some(root.path().join("out")),
            ..EngineConfig::default()
        };
        let doc = SourceDocument::open(&source, &config).unwrap();

        let first = publish(&doc, b"one", &config).unwrap();
        let second = publish(&doc, b"two", &config).unwrap();
        assert_ne!(first.work_dir, second.work_dir);
        assert!(first.work_dir.starts_with(root.path().join("out")));
        assert!(first
            .work_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("docfill_"));
        assert!(first.file_name.starts_with("form_preenchido_"));
        assert!(first.file_name.ends_with(".pdf"));
        assert_eq!(std::fs::read(&first.path).unwrap(), b"one");
        assert_eq!(std::fs::read_dir(&first.work_dir).unwrap().count(), 1);
        assert_eq!(std::fs::read(&source).unwrap(), b"%PDF-1.4");

        let output = OutputDocument {
            path: first.path.clone(),
            file_name: first.file_name.clone(),
            format: doc.format(),
            success: true,
            work_dir: first.work_dir.clone(),
            applied: Vec::new(),
            ignored: Vec::new(),
            unapplied: Vec::new(),
        };
        output.dispose().unwrap();
        assert!(!first.work_dir.exists());
        assert!(second.path.exists());
    }
}
