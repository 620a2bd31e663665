//! Small JSON documents on disk with a cached in-memory snapshot.
//!
//! Readers get the last committed snapshot without touching the disk or
//! waiting for writers. Writers are serialized, and a new snapshot becomes
//! visible to readers only after it was durably written to a temporary file
//! and renamed over the old document.

use crate::prelude::*;
use arc_swap::ArcSwap;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Deserialize, Clone, Debug)]
pub(crate) struct Config {
    #[serde(default = "default_settings_path")]
    pub(crate) settings_path: PathBuf,

    #[serde(default = "default_blocklist_path")]
    pub(crate) blocklist_path: PathBuf,

    #[serde(default = "default_jobs_path")]
    pub(crate) jobs_path: PathBuf,
}

fn default_settings_path() -> PathBuf {
    "settings.json".into()
}

fn default_blocklist_path() -> PathBuf {
    "blocklist.json".into()
}

fn default_jobs_path() -> PathBuf {
    "jobs.json".into()
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read the document at {path:?}")]
    Read { path: PathBuf, source: io::Error },

    #[error("The document at {path:?} is not valid JSON of the expected shape")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Failed to serialize the document for {path:?}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write the document to {path:?}")]
    Write { path: PathBuf, source: io::Error },
}

pub(crate) struct JsonDocument<T> {
    path: PathBuf,
    snapshot: Arc<ArcSwap<T>>,

    /// Serializes "read snapshot, mutate, persist, publish" sequences. The
    /// guard is owned by the blocking commit task, so a writer that stops
    /// waiting can't let the next one in before its rename is done.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    /// Reads the document from disk. A missing document is not an error, it
    /// just means nothing was saved yet, so the default value is used.
    pub(crate) fn load(path: PathBuf) -> (Self, Result<(), LoadError>) {
        let (value, result) = match read_document(&path) {
            Ok(value) => (value.unwrap_or_default(), Ok(())),
            Err(err) => (T::default(), Err(err)),
        };

        let doc = Self {
            path,
            snapshot: Arc::new(ArcSwap::from_pointee(value)),
            write_lock: Default::default(),
        };

        (doc, result)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn get(&self) -> Arc<T> {
        self.snapshot.load_full()
    }

    /// Applies the `update` to the current snapshot and persists the result.
    ///
    /// If `update` returns [`None`], then there is nothing to change, and the
    /// disk isn't touched. Returns whether the document was changed.
    ///
    /// The new value is published to readers only if it was written to disk
    /// successfully, so a failed write leaves the old snapshot in force.
    ///
    /// Once the write has started, it is committed even if the returned
    /// future is dropped. Disk and memory never diverge because of that.
    pub(crate) async fn update(
        &self,
        update: impl FnOnce(&T) -> Option<T>,
    ) -> Result<bool, PersistError> {
        let guard = self.write_lock.clone().lock_owned().await;

        let current = self.snapshot.load_full();

        let Some(next) = update(&current) else {
            return Ok(false);
        };

        let bytes = serde_json::to_vec_pretty(&next).map_err(|source| PersistError::Serialize {
            path: self.path.clone(),
            source,
        })?;

        let path = self.path.clone();
        let snapshot = self.snapshot.clone();

        let commit = tokio::task::spawn_blocking(move || -> io::Result<()> {
            let _guard = guard;
            write_atomically(&path, &bytes)?;
            snapshot.store(Arc::new(next));
            Ok(())
        });

        commit
            .await
            .unwrap_or_else(|err| Err(io::Error::other(err)))
            .map_err(|source| PersistError::Write {
                path: self.path.clone(),
                source,
            })?;

        Ok(true)
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LoadError> {
    let bytes = match fs_err::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LoadError::Read {
                path: path.to_owned(),
                source,
            })
        }
    };

    let malformed = |source| LoadError::Malformed {
        path: path.to_owned(),
        source,
    };

    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(malformed)?;

    // Derived struct deserializers also accept arrays as positional fields
    if !value.is_object() {
        let unexpected = match &value {
            serde_json::Value::Array(_) => de::Unexpected::Seq,
            serde_json::Value::String(value) => de::Unexpected::Str(value),
            serde_json::Value::Bool(value) => de::Unexpected::Bool(*value),
            serde_json::Value::Null => de::Unexpected::Unit,
            _ => de::Unexpected::Other("number"),
        };
        let err = <serde_json::Error as de::Error>::invalid_type(unexpected, &"a JSON object");
        return Err(malformed(err));
    }

    serde_json::from_value(value).map(Some).map_err(malformed)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    fs_err::create_dir_all(dir)?;

    let mut file = tempfile::Builder::new()
        .prefix(".teleprobe-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    file.write_all(bytes)?;
    file.as_file().sync_all()?;

    file.persist(path).map_err(|err| err.error)?;

    trace!(?path, "Document persisted");

    Ok(())
}
