//! Object storage for raw and transformed image bytes.
//!
//! [`ObjectStore`] is the port the service talks to; [`FsObjectStore`] keeps
//! objects as plain files under `<data_dir>/<bucket>/<key>`, with the content
//! type in a `<key>.content-type` sidecar.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const CONTENT_TYPE_SUFFIX: &str = ".content-type";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0:?}")]
    InvalidKey(String),
    #[error("storage error for {key}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Missing objects and bad keys won't fix themselves; I/O might.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, replacing any existing object.
    fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StoreError>;

    /// Open the object for reading.
    fn get(&self, key: &str) -> Result<Box<dyn Read + Send>, StoreError>;

    /// Content type recorded at `put` time.
    fn content_type(&self, key: &str) -> Result<String, StoreError>;

    /// Remove the object. Removing a missing object is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(data_dir: &Path, bucket: &str) -> Self {
        Self {
            root: data_dir.join(bucket),
        }
    }

    /// Map a key to its file, rejecting anything that could leave the bucket.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes || key.ends_with(CONTENT_TYPE_SUFFIX) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn sidecar(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(CONTENT_TYPE_SUFFIX);
        PathBuf::from(name)
    }
}

fn io_error(key: &str, source: io::Error) -> StoreError {
    if source.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let wrap = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(wrap)?;
        }
        fs::write(&path, data).map_err(wrap)?;
        fs::write(Self::sidecar(&path), content_type).map_err(wrap)?;
        debug!(key, bytes = data.len(), content_type, "stored object");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Box<dyn Read + Send>, StoreError> {
        let path = self.path_for(key)?;
        let file = File::open(&path).map_err(|e| io_error(key, e))?;
        Ok(Box::new(file))
    }

    fn content_type(&self, key: &str) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        fs::read_to_string(Self::sidecar(&path)).map_err(|e| io_error(key, e))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        for target in [Self::sidecar(&path), path] {
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(key, e)),
            }
        }
        debug!(key, "deleted object");
        Ok(())
    }
}
