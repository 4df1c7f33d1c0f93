//! Keyed file storage.
//!
//! Every key is one file directly under the base directory. Each key has its
//! own mutex, held for the whole of any read, write, append or scan of that
//! key's file; operations on different keys never wait on each other.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store base path {path:?} is not a readable directory: {source}")]
    BasePath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("key {key:?} already exists")]
    AlreadyExists { key: String },
    #[error("key {key:?} is not present in store")]
    NotFound { key: String },
    #[error("invalid store key {key:?}")]
    InvalidKey { key: String },
    #[error("io error on key {key:?}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("json error on key {key:?}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

type KeyLock = Arc<Mutex<()>>;

pub struct FileStore {
    base: PathBuf,
    files: RwLock<HashMap<String, KeyLock>>,
}

impl FileStore {
    /// Indexes every regular entry under `base` as a key. File contents are
    /// not read.
    pub fn open(base: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base = base.as_ref().to_path_buf();
        let base_err = |source: io::Error| StoreError::BasePath {
            path: base.clone(),
            source,
        };

        let metadata = fs::metadata(&base).map_err(base_err)?;
        if !metadata.is_dir() {
            return Err(base_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a directory",
            )));
        }

        let mut files = HashMap::new();
        for entry in fs::read_dir(&base).map_err(base_err)? {
            let entry = entry.map_err(base_err)?;
            if entry.file_type().map_err(base_err)?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.insert(name.to_string(), KeyLock::default());
            }
        }

        debug!(base = %base.display(), keys = files.len(), "store opened");
        Ok(Self {
            base,
            files: RwLock::new(files),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read_index().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read_index().contains_key(key)
    }

    /// Creates an empty backing file. Existence check and creation happen
    /// under the index lock with exclusive-create semantics, so two racing
    /// creates of one key cannot both succeed.
    pub fn create(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut files = self.write_index();
        if files.contains_key(key) {
            return Err(StoreError::AlreadyExists {
                key: key.to_string(),
            });
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_of(key))
        {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                });
            }
            Err(source) => return Err(io_error(key, source)),
        }

        files.insert(key.to_string(), KeyLock::default());
        Ok(())
    }

    /// Creates `key` holding the JSON encoding of `value` in one step. The
    /// value is encoded before the file is touched, and a failed write
    /// removes the file again, so the key either exists with its full
    /// contents or not at all.
    pub fn create_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        validate_key(key)?;
        let payload = serde_json::to_vec(value).map_err(|source| json_error(key, source))?;
        let mut files = self.write_index();
        if files.contains_key(key) {
            return Err(StoreError::AlreadyExists {
                key: key.to_string(),
            });
        }

        let path = self.path_of(key);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                });
            }
            Err(source) => return Err(io_error(key, source)),
        };
        if let Err(source) = file.write_all(&payload) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(io_error(key, source));
        }

        files.insert(key.to_string(), KeyLock::default());
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let lock = self.lookup(key).ok_or_else(|| not_found(key))?;
        let _guard = lock_key(&lock);

        let mut files = self.write_index();
        if !files.get(key).is_some_and(|current| Arc::ptr_eq(current, &lock)) {
            return Err(not_found(key));
        }
        match fs::remove_file(self.path_of(key)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(io_error(key, source)),
        }
        files.remove(key);
        Ok(())
    }

    /// Replaces the key's contents with the JSON encoding of `value`,
    /// creating the key if needed.
    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(value).map_err(|source| json_error(key, source))?;
        self.with_key(key, true, |path| {
            fs::write(path, &payload).map_err(|source| io_error(key, source))
        })
    }

    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        self.with_key(key, false, |path| {
            let data = fs::read(path).map_err(|source| io_error(key, source))?;
            serde_json::from_slice(&data).map_err(|source| json_error(key, source))
        })
    }

    /// Appends `line` and a trailing newline, creating the key if needed.
    pub fn append(&self, key: &str, line: &str) -> Result<(), StoreError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.with_key(key, true, |path| {
            let mut file = OpenOptions::new()
                .append(true)
                .open(path)
                .map_err(|source| io_error(key, source))?;
            file.write_all(&buf).map_err(|source| io_error(key, source))
        })
    }

    /// Visits lines in file order until `visit` returns `false` or the file ends.
    pub fn scan_lines<F>(&self, key: &str, mut visit: F) -> Result<(), StoreError>
    where
        F: FnMut(&str) -> bool,
    {
        self.with_key(key, false, |path| {
            let file = File::open(path).map_err(|source| io_error(key, source))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|source| io_error(key, source))?;
                if !visit(&line) {
                    break;
                }
            }
            Ok(())
        })
    }

    fn with_key<T, F>(&self, key: &str, create_missing: bool, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Path) -> Result<T, StoreError>,
    {
        validate_key(key)?;
        let path = self.path_of(key);
        loop {
            let lock = match self.lookup(key) {
                Some(lock) => lock,
                None if create_missing => self.register(key)?,
                None => return Err(not_found(key)),
            };
            let _guard = lock_key(&lock);
            // A delete may have won the race for this key's lock.
            if !self.is_registered(key, &lock) {
                if create_missing {
                    continue;
                }
                return Err(not_found(key));
            }
            return op(&path);
        }
    }

    /// Registers `key`, adopting a file that already exists on disk.
    fn register(&self, key: &str) -> Result<KeyLock, StoreError> {
        let mut files = self.write_index();
        if let Some(lock) = files.get(key) {
            return Ok(Arc::clone(lock));
        }
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.path_of(key))
            .map_err(|source| io_error(key, source))?;
        let lock = KeyLock::default();
        files.insert(key.to_string(), Arc::clone(&lock));
        Ok(lock)
    }

    fn lookup(&self, key: &str) -> Option<KeyLock> {
        self.read_index().get(key).cloned()
    }

    fn is_registered(&self, key: &str, lock: &KeyLock) -> bool {
        self.read_index()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, lock))
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, KeyLock>> {
        self.files.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_index(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, KeyLock>> {
        self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lock_key(lock: &KeyLock) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

fn not_found(key: &str) -> StoreError {
    StoreError::NotFound {
        key: key.to_string(),
    }
}

fn io_error(key: &str, source: io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

fn json_error(key: &str, source: serde_json::Error) -> StoreError {
    StoreError::Json {
        key: key.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests;
