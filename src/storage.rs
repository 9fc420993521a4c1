use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Component, Path, PathBuf},
    sync::Mutex,
    time::SystemTime,
};

use log::{debug, error, info, trace};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::{MemoError, Result};

/// A transform applied to a file's full text inside [`Vault::atomic_transform`].
pub type TextTransform<'a> = dyn Fn(&str) -> Result<String> + 'a;

/// File access the memo core needs from its host.
///
/// Paths are vault-relative and use `/` separators.
pub trait Vault: Send + Sync {
    /// Reads the full text of a file.
    fn read_text(&self, path: &str) -> Result<String>;

    /// Replaces a file's text with `transform(old_text)`.
    ///
    /// No other writer on the same file interleaves with this call. When
    /// `transform` fails, nothing is written and its error is returned.
    fn atomic_transform(&self, path: &str, transform: &TextTransform<'_>) -> Result<()>;

    /// Creates a new text file. Fails if the file already exists.
    fn create_file(&self, path: &str, initial_text: &str) -> Result<()>;

    /// Creates a new binary file. Fails if the file already exists.
    fn create_binary_file(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Creates a folder and any missing parents.
    fn ensure_folder(&self, path: &str) -> Result<()>;

    fn exists(&self, path: &str) -> bool;

    /// Every file below `prefix`, sorted.
    fn list_files(&self, prefix: &str) -> Result<Vec<String>>;

    /// Modification time of a file, compared for equality only.
    fn stat_mod_time(&self, path: &str) -> Result<SystemTime>;
}

/// Normalizes a vault path: `/` separators, no empty segments, no leading
/// or trailing slash.
pub fn normalize_vault_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// The `/`-separated path of `path` relative to `root`, or `None` when it
/// is not below `root`.
pub fn vault_path_under(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let joined = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    (!joined.is_empty()).then_some(joined)
}

/// A [`Vault`] backed by a directory on the local filesystem.
pub struct FsVault {
    /// Directory every vault path is resolved against
    root: PathBuf,

    /// Serializes read-transform-write cycles
    write_lock: Mutex<()>,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a vault path onto the filesystem, refusing paths that climb out
    /// of the vault.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize_vault_path(path);
        let relative = Path::new(&normalized);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(MemoError::ApplicationError {
                message: format!("Path escapes the vault: {}", path),
            });
        }
        Ok(self.root.join(relative))
    }

    /// The vault path of a filesystem path below the root.
    pub fn vault_path(&self, path: &Path) -> Option<String> {
        vault_path_under(&self.root, path)
    }

    fn create_new(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let file_path = self.resolve(path)?;
        debug!("Creating file: {}", file_path.display());

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    MemoError::FileAlreadyExists {
                        file_path: path.to_string(),
                    }
                } else {
                    error!("Failed to create file {}: {}", file_path.display(), e);
                    MemoError::Io(e)
                }
            })?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }
}

impl Vault for FsVault {
    fn read_text(&self, path: &str) -> Result<String> {
        let file_path = self.resolve(path)?;
        trace!("Reading {}", file_path.display());
        fs::read_to_string(&file_path).map_err(|e| {
            error!("Failed to read {}: {}", file_path.display(), e);
            MemoError::Io(e)
        })
    }

    fn atomic_transform(&self, path: &str, transform: &TextTransform<'_>) -> Result<()> {
        let file_path = self.resolve(path)?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| MemoError::LockAcquisitionFailed {
                message: format!("Failed to acquire write lock for {}", path),
            })?;

        let current = fs::read_to_string(&file_path)?;
        let updated = transform(&current)?;
        if updated == current {
            debug!("Transform left {} unchanged, skipping write", path);
            return Ok(());
        }

        // Create a temporary file in the same directory (for atomic operation)
        let dir = file_path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = NamedTempFile::new_in(dir).map_err(|e| {
            error!("Failed to create temporary file: {}", e);
            MemoError::Io(e)
        })?;

        temp_file.write_all(updated.as_bytes()).map_err(|e| {
            error!("Failed to write to temporary file: {}", e);
            MemoError::Io(e)
        })?;
        temp_file.flush()?;

        // Atomically move the temporary file to the target location
        temp_file.persist(&file_path).map_err(|e| {
            error!(
                "Failed to persist file {}: {}",
                file_path.display(),
                e.error
            );
            MemoError::Io(e.error)
        })?;

        info!("Wrote {} ({} bytes)", path, updated.len());
        Ok(())
    }

    fn create_file(&self, path: &str, initial_text: &str) -> Result<()> {
        self.create_new(path, initial_text.as_bytes())
    }

    fn create_binary_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.create_new(path, bytes)
    }

    fn ensure_folder(&self, path: &str) -> Result<()> {
        let mut current = String::new();
        for segment in normalize_vault_path(path).split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);

            let dir = self.resolve(&current)?;
            if !dir.exists() {
                debug!("Creating folder: {}", dir.display());
                fs::create_dir(&dir)?;
            } else if !dir.is_dir() {
                return Err(MemoError::NotAFolder {
                    path: current.clone(),
                });
            }
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<String> = WalkDir::new(&dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| self.vault_path(entry.path()))
            .collect();
        files.sort();
        Ok(files)
    }

    fn stat_mod_time(&self, path: &str) -> Result<SystemTime> {
        let file_path = self.resolve(path)?;
        Ok(fs::metadata(file_path)?.modified()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, FsVault) {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        (dir, vault)
    }

    #[test]
    fn test_normalize_vault_path() {
        assert_eq!(normalize_vault_path("/Daily//2024/"), "Daily/2024");
        assert_eq!(normalize_vault_path("Daily\\x.md"), "Daily/x.md");
        assert_eq!(normalize_vault_path("./a/./b"), "a/b");
        assert_eq!(normalize_vault_path(""), "");
    }

    #[test]
    fn test_resolve_rejects_parent_segments() {
        let (_dir, vault) = setup();
        assert!(vault.resolve("../outside.md").is_err());
        assert!(vault.resolve("Daily/../../x").is_err());
        assert!(vault.resolve("Daily/x.md").is_ok());
    }

    #[test]
    fn test_create_read_and_transform() {
        let (_dir, vault) = setup();
        vault.ensure_folder("Daily").unwrap();
        vault.create_file("Daily/2024-03-10.md", "one\n").unwrap();
        assert!(matches!(
            vault.create_file("Daily/2024-03-10.md", ""),
            Err(MemoError::FileAlreadyExists { .. })
        ));

        vault
            .atomic_transform("Daily/2024-03-10.md", &|text| Ok(format!("{}two\n", text)))
            .unwrap();
        assert_eq!(vault.read_text("Daily/2024-03-10.md").unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_failed_transform_writes_nothing() {
        let (_dir, vault) = setup();
        vault.create_file("note.md", "keep me").unwrap();
        let result = vault.atomic_transform("note.md", &|_| {
            Err(MemoError::MemoNotFound {
                id: "note.md:0".to_string(),
            })
        });
        assert!(matches!(result, Err(MemoError::MemoNotFound { .. })));
        assert_eq!(vault.read_text("note.md").unwrap(), "keep me");
    }

    #[test]
    fn test_ensure_folder_conflict_with_file() {
        let (_dir, vault) = setup();
        vault.create_file("Daily", "").unwrap();
        assert!(matches!(
            vault.ensure_folder("Daily/2024"),
            Err(MemoError::NotAFolder { path }) if path == "Daily"
        ));
    }

    #[test]
    fn test_list_files_and_stat() {
        let (_dir, vault) = setup();
        vault.ensure_folder("Daily/2024/03").unwrap();
        vault.create_file("Daily/2024/03/2024-03-10.md", "").unwrap();
        vault.create_file("Daily/2024-03-09.md", "").unwrap();
        vault.create_binary_file("Other/x.png", &[1, 2]).unwrap_err();

        let files = vault.list_files("Daily").unwrap();
        assert_eq!(files, vec!["Daily/2024-03-09.md", "Daily/2024/03/2024-03-10.md"]);
        assert!(vault.list_files("Missing").unwrap().is_empty());

        assert!(vault.exists("Daily/2024-03-09.md"));
        assert!(!vault.exists("Daily/2024-03-08.md"));
        assert!(vault.stat_mod_time("Daily/2024-03-09.md").is_ok());
        assert!(vault.stat_mod_time("Daily/2024-03-08.md").is_err());
    }
}
