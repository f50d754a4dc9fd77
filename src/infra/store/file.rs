//! File-backed store: one JSON file per key.
//!
//! Keys map to paths (`task/<id>` becomes `<root>/task/<id>.json`). Writes go
//! to a hidden temp file in the same directory, are fsynced, and then renamed
//! over the target so a crash never leaves a half-written record.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{StateStore, StoreError};

const EXTENSION: &str = "json";

/// Directory-backed store.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let mut path = self.root.clone();
        let segments: Vec<&str> = key.split('/').collect();
        for segment in &segments {
            let valid = !segment.is_empty()
                && !segment.starts_with('.')
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !valid {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
        }
        for segment in &segments[..segments.len() - 1] {
            path.push(segment);
        }
        path.push(format!("{}.{EXTENSION}", segments[segments.len() - 1]));
        Ok(path)
    }

    fn collect_keys(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(StoreError::Io {
                    key: dir.display().to_string(),
                    source,
                })
            }
        };
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                key: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if path.is_dir() {
                self.collect_keys(&path, prefix, out)?;
                continue;
            }
            let Some(stem) = name.strip_suffix(&format!(".{EXTENSION}")).map(str::to_string) else {
                continue;
            };
            let Ok(rel) = path.parent().unwrap_or(self.root.as_path()).strip_prefix(&self.root) else {
                continue;
            };
            let mut key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(&stem);
            if key.starts_with(prefix) {
                out.push(key);
            }
        }
        Ok(())
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let final_path = self.path_for(key)?;
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        let dir = final_path.parent().unwrap_or(self.root.as_path()).to_path_buf();
        fs::create_dir_all(&dir).map_err(io_err)?;
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let mut file = File::create(&tmp_path).map_err(io_err)?;
        file.write_all(value).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        if let Err(source) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(source));
        }
        tracing::trace!(key, path = %final_path.display(), "record written");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        self.collect_keys(&self.root, prefix, &mut out)?;
        out.sort();
        Ok(out)
    }
}
