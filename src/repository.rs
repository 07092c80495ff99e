//! Image record storage.
//!
//! [`JsonImageRepository`] keeps every record in a mutex-guarded map and,
//! when given a path, rewrites `<data_dir>/images.json` after each mutation.
//! The file is written to a temporary sibling and renamed into place so a
//! crash never leaves a half-written store.

use crate::types::{ImagePage, ImageRecord};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Largest page size `list` accepts.
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("image {0} not found")]
    NotFound(Uuid),
    #[error("image {0} already exists")]
    AlreadyExists(Uuid),
    #[error("invalid page request: page must be >= 1 and limit 1-{MAX_PAGE_LIMIT}, got page {page}, limit {limit}")]
    InvalidPage { page: usize, limit: usize },
    #[error("record store I/O failed")]
    Io(#[from] io::Error),
    #[error("record store is corrupt")]
    Json(#[from] serde_json::Error),
    #[error("record store lock poisoned")]
    Poisoned,
}

impl RepositoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

pub trait ImageRepository: Send + Sync {
    fn create(&self, record: &ImageRecord) -> Result<(), RepositoryError>;
    fn update(&self, record: &ImageRecord) -> Result<(), RepositoryError>;
    fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;
    fn find(&self, id: Uuid) -> Result<ImageRecord, RepositoryError>;
    /// One page of records, newest first. `page` is 1-based.
    fn list(&self, page: usize, limit: usize) -> Result<ImagePage, RepositoryError>;
}

#[derive(Debug, Default)]
pub struct JsonImageRepository {
    records: Mutex<HashMap<Uuid, ImageRecord>>,
    path: Option<PathBuf>,
}

impl JsonImageRepository {
    /// A repository that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`, starting empty if the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let records = match std::fs::read_to_string(path) {
            Ok(content) => {
                let list: Vec<ImageRecord> = serde_json::from_str(&content)?;
                list.into_iter().map(|r| (r.id, r)).collect()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), count = records.len(), "loaded image records");
        Ok(Self {
            records: Mutex::new(records),
            path: Some(path.to_path_buf()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, ImageRecord>>, RepositoryError> {
        self.records.lock().map_err(|_| RepositoryError::Poisoned)
    }

    /// Rewrite the backing file from `records`. Called with the lock held so
    /// concurrent writers cannot interleave. Callers undo their change to the
    /// map when this fails, so memory never runs ahead of the file.
    fn persist(&self, records: &HashMap<Uuid, ImageRecord>) -> Result<(), RepositoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&newest_first(records.values()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn newest_first<'a>(records: impl Iterator<Item = &'a ImageRecord>) -> Vec<&'a ImageRecord> {
    let mut sorted: Vec<_> = records.collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    sorted
}

impl ImageRepository for JsonImageRepository {
    fn create(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        let mut records = self.lock()?;
        if records.contains_key(&record.id) {
            return Err(RepositoryError::AlreadyExists(record.id));
        }
        records.insert(record.id, record.clone());
        self.persist(&records).inspect_err(|_| {
            records.remove(&record.id);
        })
    }

    fn update(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        let mut records = self.lock()?;
        let previous = match records.get_mut(&record.id) {
            Some(existing) => std::mem::replace(existing, record.clone()),
            None => return Err(RepositoryError::NotFound(record.id)),
        };
        self.persist(&records).inspect_err(|_| {
            records.insert(record.id, previous);
        })
    }

    fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut records = self.lock()?;
        let Some(removed) = records.remove(&id) else {
            return Err(RepositoryError::NotFound(id));
        };
        self.persist(&records).inspect_err(|_| {
            records.insert(id, removed);
        })
    }

    fn find(&self, id: Uuid) -> Result<ImageRecord, RepositoryError> {
        self.lock()?
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    fn list(&self, page: usize, limit: usize) -> Result<ImagePage, RepositoryError> {
        if page == 0 || limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(RepositoryError::InvalidPage { page, limit });
        }
        let records = self.lock()?;
        let offset = (page - 1).saturating_mul(limit);
        let data = newest_first(records.values())
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(ImagePage {
            page,
            limit,
            count: records.len(),
            data,
        })
    }
}
