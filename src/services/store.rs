use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("Invalid product pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// What a wildcard delete did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub removed: usize,
    pub failed: usize,
}

/// File-level bookkeeping of image products between passes.
#[cfg_attr(test, mockall::automock)]
pub trait ProductStore: Send + Sync {
    /// Copy every `<old_root>.*` product to the matching `<new_root>.*` name.
    /// Returns the number of products copied.
    fn copy(&self, old_root: &str, new_root: &str) -> Result<usize, StoreError>;

    /// Remove everything matching the glob `pattern`, relative to the working directory.
    /// With `ignore_errors` individual failures are logged and counted instead
    /// of aborting.
    fn delete(&self, pattern: &str, ignore_errors: bool) -> Result<DeleteReport, StoreError>;

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError>;
}

/// Products as files and directories under a working directory.
pub struct FsProductStore {
    working_dir: Utf8PathBuf,
}

impl FsProductStore {
    pub fn new(working_dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, name: &str) -> Utf8PathBuf {
        self.working_dir.join(name)
    }

    /// Paths under `prefix` matching the glob `name_pattern`, sorted.
    ///
    /// The prefix is escaped so working directories containing `[`, `?` or `*`
    /// are taken literally.
    fn matching(&self, prefix: &Utf8Path, name_pattern: &str) -> Result<Vec<Utf8PathBuf>, StoreError> {
        let pattern = format!("{}{}", Pattern::escape(prefix.as_str()), name_pattern);
        let entries = glob::glob(&pattern).map_err(|source| StoreError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;

        let mut matches = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) => match Utf8PathBuf::from_path_buf(path) {
                    Ok(path) => matches.push(path),
                    Err(path) => tracing::warn!("Skipping non UTF-8 path {}", path.display()),
                },
                Err(e) => tracing::warn!("Unreadable entry while matching {}: {}", pattern, e),
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn copy_tree(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), StoreError> {
        let io_err = |action: &'static str, path: &Utf8Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io {
                action,
                path,
                source,
            }
        };

        if from.is_dir() {
            fs::create_dir_all(to).map_err(io_err("create", to))?;
            for entry in from.read_dir_utf8().map_err(io_err("list", from))? {
                let entry = entry.map_err(io_err("list", from))?;
                self.copy_tree(entry.path(), &to.join(entry.file_name()))?;
            }
        } else {
            fs::copy(from, to).map_err(io_err("copy", from))?;
        }
        Ok(())
    }

    fn copy_products(&self, old_root: &Utf8Path, new_root: &Utf8Path) -> Result<usize, StoreError> {
        let mut copied = 0;

        for product in self.matching(old_root, ".*")? {
            let Some(name) = product.file_name() else {
                continue;
            };
            let old_name = old_root.file_name().unwrap_or(old_root.as_str());
            let new_name = new_root.file_name().unwrap_or(new_root.as_str());
            let target = new_root.with_file_name(name.replacen(old_name, new_name, 1));

            if name == format!("{}.workdirectory", old_name) {
                // parallel runs keep per-process products inside the work directory
                fs::create_dir_all(&target).map_err(|source| StoreError::Io {
                    action: "create",
                    path: target.clone(),
                    source,
                })?;
                let inner_old = product.join(old_name);
                let inner_new = target.join(new_name);
                copied += self.copy_products(&inner_old, &inner_new)?;
            } else {
                tracing::info!("Copying {} to {}", product, target);
                self.copy_tree(&product, &target)?;
                copied += 1;
            }
        }
        Ok(copied)
    }
}

impl ProductStore for FsProductStore {
    fn copy(&self, old_root: &str, new_root: &str) -> Result<usize, StoreError> {
        self.copy_products(&self.resolve(old_root), &self.resolve(new_root))
    }

    fn delete(&self, pattern: &str, ignore_errors: bool) -> Result<DeleteReport, StoreError> {
        let mut report = DeleteReport::default();

        let prefix = format!("{}/", self.working_dir);
        for path in self.matching(Utf8Path::new(&prefix), pattern)? {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };

            match result {
                Ok(()) => {
                    tracing::debug!("Deleted {}", path);
                    report.removed += 1;
                }
                Err(source) if ignore_errors => {
                    tracing::warn!("Exception while deleting {}: {}", path, source);
                    report.failed += 1;
                }
                Err(source) => {
                    return Err(StoreError::Io {
                        action: "delete",
                        path,
                        source,
                    });
                }
            }
        }
        Ok(report)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let from = self.resolve(from);
        if !from.exists() {
            return Err(StoreError::NotFound(from));
        }
        let to = self.resolve(to);
        fs::rename(&from, &to).map_err(|source| StoreError::Io {
            action: "rename",
            path: from,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, dir)
    }

    #[test]
    fn test_delete_matches_iteration_products_only() {
        let (_tmp, dir) = setup();
        for name in ["img.iter1.residual", "img.iter1", "img.iter10.model", "img.iter2.model"] {
            fs::write(dir.join(name), "").unwrap();
        }

        let store = FsProductStore::new(&dir);
        let report = store.delete("img.iter1*", true).unwrap();

        assert_eq!(report.removed, 3);
        assert!(dir.join("img.iter2.model").exists());
    }

    #[test]
    fn test_working_dir_with_glob_characters() {
        let temp_dir = TempDir::with_prefix("run[1]").unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        fs::write(dir.join("img.iter0.model"), "m").unwrap();
        fs::write(dir.join("img.iter0.psf"), "p").unwrap();

        let store = FsProductStore::new(&dir);
        assert_eq!(store.copy("img.iter0", "img.iter1").unwrap(), 2);
        assert!(dir.join("img.iter1.psf").exists());

        let report = store.delete("*.iter*", true).unwrap();
        assert_eq!(report.removed, 4);
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let (_tmp, dir) = setup();
        let store = FsProductStore::new(&dir);
        assert!(matches!(
            store.delete("img.iter[1*", true),
            Err(StoreError::Pattern { .. })
        ));
    }

    #[test]
    fn test_copy_products_renames_root() {
        let (_tmp, dir) = setup();
        fs::write(dir.join("img.iter1.model"), "m").unwrap();
        fs::create_dir(dir.join("img.iter1.residual")).unwrap();
        fs::write(dir.join("img.iter1.residual").join("table.dat"), "r").unwrap();
        fs::write(dir.join("img.iter10.model"), "other").unwrap();

        let store = FsProductStore::new(&dir);
        let copied = store.copy("img.iter1", "img.iter2").unwrap();

        // img.iter10.model does not match `img.iter1.*`
        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dir.join("img.iter2.model")).unwrap(), "m");
        assert!(dir.join("img.iter2.residual").join("table.dat").exists());
        assert!(!dir.join("img.iter20.model").exists());
    }

    #[test]
    fn test_copy_products_workdirectory() {
        let (_tmp, dir) = setup();
        let work = dir.join("img.iter0.workdirectory");
        fs::create_dir(&work).unwrap();
        fs::write(work.join("img.iter0.n1.model"), "m").unwrap();

        let store = FsProductStore::new(&dir);
        store.copy("img.iter0", "img.iter1").unwrap();

        assert!(dir.join("img.iter1.workdirectory").join("img.iter1.n1.model").exists());
    }

    #[test]
    fn test_delete_pattern() {
        let (_tmp, dir) = setup();
        fs::write(dir.join("img.iter2.model"), "").unwrap();
        fs::create_dir(dir.join("img.iter2.mask")).unwrap();
        fs::write(dir.join("img.iter1.model"), "").unwrap();

        let store = FsProductStore::new(&dir);
        let report = store.delete("img.iter2*", true).unwrap();

        assert_eq!(report, DeleteReport { removed: 2, failed: 0 });
        assert!(dir.join("img.iter1.model").exists());
    }

    #[test]
    fn test_delete_missing_directory_is_noop() {
        let (_tmp, dir) = setup();
        let store = FsProductStore::new(&dir);
        let report = store.delete("nowhere/img*", false).unwrap();
        assert_eq!(report, DeleteReport::default());
    }

    #[test]
    fn test_rename_missing_is_not_found() {
        let (_tmp, dir) = setup();
        let store = FsProductStore::new(&dir);
        assert!(matches!(
            store.rename("summaryplot_1.png", "img.iter1.summaryplot.png"),
            Err(StoreError::NotFound(_))
        ));

        fs::write(dir.join("summaryplot_1.png"), "png").unwrap();
        store.rename("summaryplot_1.png", "img.iter1.summaryplot.png").unwrap();
        assert!(dir.join("img.iter1.summaryplot.png").exists());
    }
}
