use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine configuration, passed explicitly to every public operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory that relative document paths are resolved against.
    pub forms_dir: Option<PathBuf>,
    /// Root for per-call output directories. Defaults to the system temp dir.
    pub work_dir: Option<PathBuf>,
    /// Prefix of the per-call output directory name.
    pub output_prefix: String,
    /// Infix placed between the original stem and the timestamp.
    pub fill_suffix: String,
    /// Style applied to filled workbook cells.
    pub marker: MarkerStyle,
    pub page_placeholders: PagePlaceholderPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            forms_dir: None,
            work_dir: None,
            output_prefix: "docfill_".into(),
            fill_suffix: "preenchido".into(),
            marker: MarkerStyle::default(),
            page_placeholders: PagePlaceholderPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Resolve a caller-supplied path against `forms_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.forms_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    pub bold: bool,
    /// ARGB hex, e.g. `FF1F4E9A`.
    pub color: String,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        MarkerStyle {
            bold: true,
            color: "FF1F4E9A".into(),
        }
    }
}

/// What to do when asked to fill a PDF that has no AcroForm fields.
///
/// Page-level placeholders only say "somewhere on this page", and there is no
/// safe way to rewrite page content streams, so such a fill can either be
/// refused or produce an unchanged copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagePlaceholderPolicy {
    /// Fail with `UnsupportedOperation`.
    #[default]
    Reject,
    /// Write an unchanged copy and report page ids as unapplied.
    PassThrough,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_against_forms_dir() {
        let config = EngineConfig {
            forms_dir: Some(PathBuf::from("/srv/forms")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve(Path::new("qualidade/laudo.xlsx")),
            PathBuf::from("/srv/forms/qualidade/laudo.xlsx")
        );
        assert_eq!(
            config.resolve(Path::new("/tmp/x.pdf")),
            PathBuf::from("/tmp/x.pdf")
        );
    }

    #[test]
    fn defaults_follow_naming_convention() {
        let config = EngineConfig::default();
        assert_eq!(config.fill_suffix, "preenchido");
        assert_eq!(config.page_placeholders, PagePlaceholderPolicy::Reject);
        assert!(config.marker.bold);
    }

    #[test]
    fn partial_json_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "page_placeholders": "pass_through" }"#).unwrap();
        assert_eq!(config.page_placeholders, PagePlaceholderPolicy::PassThrough);
        assert_eq!(config.output_prefix, "docfill_");
    }
}
