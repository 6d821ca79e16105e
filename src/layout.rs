use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directories every pipeline stage expects, relative to the base directory
pub const REQUIRED_DIRS: &[&str] = &[
    "data/raw",
    "data/products",
    "outputs/figures/cutouts",
    "outputs/figures/spectra",
    "outputs/tables",
    "outputs/report",
];

/// Resolves every file the pipeline reads or writes under one base directory
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    base_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn products_dir(&self) -> PathBuf {
        self.base_dir.join("data").join("products")
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.base_dir.join("outputs").join("tables")
    }

    pub fn cutouts_dir(&self) -> PathBuf {
        self.base_dir.join("outputs").join("figures").join("cutouts")
    }

    pub fn spectra_plots_dir(&self) -> PathBuf {
        self.base_dir.join("outputs").join("figures").join("spectra")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.base_dir.join("outputs").join("report")
    }

    pub fn table(&self, name: &str) -> PathBuf {
        self.tables_dir().join(name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.table("download_manifest.csv")
    }

    pub fn all_sources_path(&self) -> PathBuf {
        self.table("all_sources.csv")
    }

    pub fn image_candidates_path(&self) -> PathBuf {
        self.table("anomaly_candidates_images.csv")
    }

    pub fn spectra_features_path(&self) -> PathBuf {
        self.table("spectra_features.csv")
    }

    pub fn spectra_lines_path(&self) -> PathBuf {
        self.table("spectra_lines.csv")
    }

    pub fn spectra_candidates_path(&self) -> PathBuf {
        self.table("anomaly_candidates_spectra.csv")
    }

    pub fn ranked_path(&self) -> PathBuf {
        self.table("ranked_candidates.csv")
    }

    pub fn verified_path(&self) -> PathBuf {
        self.table("verified_candidates.csv")
    }

    pub fn report_path(&self) -> PathBuf {
        self.report_dir().join("REPORT.md")
    }

    pub fn verification_report_path(&self) -> PathBuf {
        self.report_dir().join("VERIFICATION.md")
    }

    /// Resolve a path stored in a table: relative paths are under the base directory
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Path relative to the base directory, for links inside reports
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.base_dir).unwrap_or(path)
    }

    /// Create any missing required directory, returning the ones created
    pub fn ensure_all(&self) -> Result<Vec<&'static str>> {
        let mut created = Vec::new();
        for dir in REQUIRED_DIRS {
            let full = self.base_dir.join(dir);
            if !full.exists() {
                std::fs::create_dir_all(&full)
                    .with_context(|| format!("Failed to create directory: {}", full.display()))?;
                created.push(*dir);
            }
        }
        Ok(created)
    }
}

/// Ensure the directory for `path` exists. Paths with an extension are
/// treated as files and get their parent created.
pub fn ensure_dir(path: &Path) -> Result<()> {
    let dir = if path.extension().is_some() {
        match path.parent() {
            Some(parent) => parent,
            None => return Ok(()),
        }
    } else {
        path
    };
    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_under_base() {
        let layout = ProjectLayout::new("/work/lab");
        assert_eq!(
            layout.manifest_path(),
            PathBuf::from("/work/lab/outputs/tables/download_manifest.csv")
        );
        assert_eq!(
            layout.report_path(),
            PathBuf::from("/work/lab/outputs/report/REPORT.md")
        );
        assert_eq!(
            layout.cutouts_dir(),
            PathBuf::from("/work/lab/outputs/figures/cutouts")
        );
    }

    #[test]
    fn test_relative_strips_base() {
        let layout = ProjectLayout::new("/work/lab");
        let p = PathBuf::from("/work/lab/outputs/figures/cutouts/a.png");
        assert_eq!(
            layout.relative(&p),
            Path::new("outputs/figures/cutouts/a.png")
        );
        let outside = PathBuf::from("/elsewhere/b.png");
        assert_eq!(layout.relative(&outside), outside.as_path());
    }

    #[test]
    fn test_resolve_table_paths() {
        let layout = ProjectLayout::new("/work/lab");
        assert_eq!(
            layout.resolve("data/products/a.fits"),
            PathBuf::from("/work/lab/data/products/a.fits")
        );
        assert_eq!(layout.resolve("/abs/a.fits"), PathBuf::from("/abs/a.fits"));
    }

    #[test]
    fn test_ensure_all_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let created = layout.ensure_all().unwrap();
        assert_eq!(created.len(), REQUIRED_DIRS.len());
        assert!(layout.tables_dir().is_dir());
        assert!(layout.ensure_all().unwrap().is_empty());
    }

    #[test]
    fn test_ensure_dir_for_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("table.csv");
        ensure_dir(&file).unwrap();
        assert!(dir.path().join("nested").is_dir());
        assert!(!file.exists());
    }
}
