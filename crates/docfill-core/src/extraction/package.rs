//! OOXML package access: zip parts, relationships, and rewriting a package
//! with a few parts replaced while every other entry is copied raw.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::parsing::xml::{XmlDoc, XmlError};

#[derive(Debug, thiserror::Error)]
pub(crate) enum PackageError {
    #[error("invalid zip container: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed XML in {part}: {source}")]
    Xml { part: String, source: XmlError },

    #[error("missing part {0}")]
    MissingPart(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relationship {
    pub id: String,
    pub rel_type: String,
    /// Part name the target resolves to, without a leading slash.
    pub target: String,
}

pub(crate) struct Package {
    archive: ZipArchive<Cursor<Vec<u8>>>,
}

impl Package {
    pub fn open(bytes: Vec<u8>) -> Result<Self, PackageError> {
        Ok(Package {
            archive: ZipArchive::new(Cursor::new(bytes))?,
        })
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.archive.index_for_name(name).is_some()
    }

    pub fn read_part(&mut self, name: &str) -> Result<Vec<u8>, PackageError> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(PackageError::MissingPart(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut out)?;
        Ok(out)
    }

    pub fn read_xml(&mut self, name: &str) -> Result<XmlDoc, PackageError> {
        let bytes = self.read_part(name)?;
        XmlDoc::parse(&bytes).map_err(|source| PackageError::Xml {
            part: name.to_string(),
            source,
        })
    }

    /// Internal relationships declared by `part` (`""` for the package itself).
    /// A part without a relationships file has none.
    pub fn relationships(&mut self, part: &str) -> Result<Vec<Relationship>, PackageError> {
        let rels_name = rels_part_name(part);
        if !self.has_part(&rels_name) {
            return Ok(Vec::new());
        }
        let doc = self.read_xml(&rels_name)?;
        let Some(root) = doc.root() else {
            return Ok(Vec::new());
        };

        let base = part_dir(part);
        let rels = doc
            .children(root)
            .into_iter()
            .filter(|r| doc.local(*r) == b"Relationship")
            .filter(|r| doc.attr(*r, b"TargetMode").as_deref() != Some("External"))
            .filter_map(|r| {
                Some(Relationship {
                    id: doc.attr(r, b"Id")?,
                    rel_type: doc.attr(r, b"Type").unwrap_or_default(),
                    target: resolve_target(base, &doc.attr(r, b"Target")?),
                })
            })
            .collect();
        Ok(rels)
    }

    /// First relationship of `part` whose type ends with `/{kind}`.
    pub fn related_part(&mut self, part: &str, kind: &str) -> Result<Option<String>, PackageError> {
        let suffix = format!("/{kind}");
        Ok(self
            .relationships(part)?
            .into_iter()
            .find(|r| r.rel_type.ends_with(&suffix))
            .map(|r| r.target))
    }

    /// Name of the main document part (`word/document.xml`, `xl/workbook.xml`),
    /// taken from the package relationships, or `fallback` if none is declared.
    pub fn main_part(&mut self, fallback: &str) -> Result<String, PackageError> {
        let main = self
            .relationships("")?
            .into_iter()
            .find(|r| r.rel_type.ends_with("/officeDocument"))
            .map(|r| r.target);
        Ok(main.unwrap_or_else(|| fallback.to_string()))
    }

    /// Build a new package with `replaced` parts substituted. Every other
    /// entry is copied without recompression, in its original order.
    pub fn rewrite(&mut self, replaced: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, PackageError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for i in 0..self.archive.len() {
            let entry = self.archive.by_index_raw(i)?;
            match replaced.get(entry.name()) {
                Some(bytes) => {
                    let name = entry.name().to_string();
                    drop(entry);
                    writer.start_file(name, options)?;
                    writer.write_all(bytes)?;
                }
                None => writer.raw_copy_file(entry)?,
            }
        }

        Ok(writer.finish()?.into_inner())
    }
}

/// `xl/workbook.xml` -> `xl/_rels/workbook.xml.rels`; `""` -> `_rels/.rels`.
pub(crate) fn rels_part_name(part: &str) -> String {
    match part.rfind('/') {
        Some(i) => format!("{}/_rels/{}.rels", &part[..i], &part[i + 1..]),
        None => format!("_rels/{part}.rels"),
    }
}

fn part_dir(part: &str) -> &str {
    part.rfind('/').map(|i| &part[..i]).unwrap_or("")
}

/// Resolve a relationship target against the directory of its source part.
pub(crate) fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_names() {
        assert_eq!(rels_part_name(""), "_rels/.rels");
        assert_eq!(rels_part_name("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
        assert_eq!(rels_part_name("word/document.xml"), "word/_rels/document.xml.rels");
    }

    #[test]
    fn targets_resolve_relative_and_absolute() {
        assert_eq!(resolve_target("xl", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("xl", "/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(resolve_target("xl/worksheets", "../styles.xml"), "xl/styles.xml");
        assert_eq!(resolve_target("", "word/document.xml"), "word/document.xml");
    }

    fn sample_package() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("_rels/.rels", options).unwrap();
        writer
            .write_all(
                br#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://example.com/hyperlink" Target="https://example.com" TargetMode="External"/></Relationships>"#,
            )
            .unwrap();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(b"<doc>old</doc>").unwrap();
        writer.start_file("word/media/image1.bin", options).unwrap();
        writer.write_all(&[0u8, 1, 2, 3]).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn main_part_comes_from_package_rels() {
        let mut pkg = Package::open(sample_package()).unwrap();
        assert_eq!(pkg.main_part("fallback.xml").unwrap(), "word/document.xml");
        assert_eq!(pkg.relationships("").unwrap().len(), 1);
    }

    #[test]
    fn rewrite_replaces_only_named_parts() {
        let mut pkg = Package::open(sample_package()).unwrap();
        let mut replaced = BTreeMap::new();
        replaced.insert("word/document.xml".to_string(), b"<doc>new</doc>".to_vec());
        let out = pkg.rewrite(&replaced).unwrap();

        let mut rewritten = Package::open(out).unwrap();
        assert_eq!(rewritten.read_part("word/document.xml").unwrap(), b"<doc>new</doc>");
        assert_eq!(rewritten.read_part("word/media/image1.bin").unwrap(), vec![0u8, 1, 2, 3]);
        assert!(matches!(
            rewritten.read_part("missing.xml"),
            Err(PackageError::MissingPart(_))
        ));
    }
}
