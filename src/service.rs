//! Image lifecycle orchestration.
//!
//! [`ImageService`] ties the pipeline to its collaborators:
//!
//! ```text
//! create_image ──validate──► record (pending) ──► queue
//!                                                   │
//! process_image ◄───────────────────────────────────┘
//!   fetch source (first time) → raw object
//!   raw object → pipeline → transformed object
//!   record → processed | failed
//! ```
//!
//! Bad chains are rejected synchronously and never reach the queue. Failures
//! during processing are split by [`ServiceError::is_retryable`]: permanent
//! ones mark the record `failed` right away, transient ones leave it `pending`
//! for the worker to redeliver.

use crate::cancel::CancellationToken;
use crate::config::{FetchConfig, ServiceConfig, StorageConfig};
use crate::fetch::{FetchError, FileFetcher, HttpFetcher, SourceFetcher, SourceRouter};
use crate::messaging::{BroadcastNotifier, ChannelQueue, JobQueue, Notifier, QueueError};
use crate::pipeline::{ChainError, Pipeline};
use crate::repository::{ImageRepository, JsonImageRepository, RepositoryError};
use crate::store::{FsObjectStore, ObjectStore, StoreError};
use crate::transform::codec;
use crate::types::{ImagePage, ImageRecord, ImageStatus, ProcessImageJob, TransformationChain};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    InvalidChain(ChainError),
    #[error("image {0} not found")]
    NotFound(Uuid),
    #[error("disallowed MIME type: {0}")]
    DisallowedMimeType(String),
    #[error("no file extension for MIME type: {0}")]
    UnknownMimeType(String),
    #[error("failed to fetch source image")]
    Fetch(#[from] FetchError),
    #[error("object storage error")]
    Store(#[from] StoreError),
    #[error("record store error")]
    Repository(#[source] RepositoryError),
    #[error("queue error")]
    Queue(#[from] QueueError),
    #[error("failed to process image transformations")]
    Pipeline(#[source] ChainError),
}

/// Render an error and its `source()` chain on one line.
///
/// Each cause is appended as `: cause` unless the text so far already
/// contains it, so wrappers that quote their cause are not repeated.
pub fn error_report(err: &(dyn std::error::Error + 'static)) -> String {
    let mut report = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        let text = inner.to_string();
        if !report.contains(&text) {
            report.push_str(": ");
            report.push_str(&text);
        }
        cause = inner.source();
    }
    report
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            other => Self::Repository(other),
        }
    }
}

impl ServiceError {
    /// Whether delivering the same job again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidChain(_)
            | Self::NotFound(_)
            | Self::DisallowedMimeType(_)
            | Self::UnknownMimeType(_) => false,
            Self::Fetch(e) => e.is_retryable(),
            Self::Store(e) => e.is_retryable(),
            Self::Repository(e) => e.is_retryable(),
            Self::Queue(_) => true,
            Self::Pipeline(e) => e.is_retryable(),
        }
    }
}

/// Everything the service talks to, behind ports.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn ImageRepository>,
    pub store: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn JobQueue>,
    pub notifier: Arc<dyn Notifier>,
    pub fetcher: Arc<dyn SourceFetcher>,
}

pub struct ImageService {
    pipeline: Pipeline,
    ports: Collaborators,
    storage: StorageConfig,
    fetch: FetchConfig,
}

/// A service wired to the filesystem store, JSON records and an in-process
/// queue, plus direct handles to the queue and notifier.
pub struct LocalStack {
    pub service: Arc<ImageService>,
    pub queue: Arc<ChannelQueue>,
    pub notifier: Arc<BroadcastNotifier>,
}

impl ImageService {
    pub fn new(
        pipeline: Pipeline,
        ports: Collaborators,
        storage: StorageConfig,
        fetch: FetchConfig,
    ) -> Self {
        Self {
            pipeline,
            ports,
            storage,
            fetch,
        }
    }

    /// Wire the local implementations from `config`.
    pub fn local(config: &ServiceConfig) -> Result<LocalStack, ServiceError> {
        let repository = JsonImageRepository::open(&config.records_path())?;
        let queue = Arc::new(ChannelQueue::new());
        let notifier = Arc::new(BroadcastNotifier::new());
        let ports = Collaborators {
            repository: Arc::new(repository),
            store: Arc::new(FsObjectStore::new(
                &config.data_path(),
                &config.storage.bucket,
            )),
            queue: queue.clone(),
            notifier: notifier.clone(),
            fetcher: Arc::new(SourceRouter::new(
                FileFetcher::new(),
                HttpFetcher::new(config.fetch.request_timeout())?,
            )),
        };
        let service = Self::new(
            Pipeline::default(),
            ports,
            config.storage.clone(),
            config.fetch.clone(),
        );
        Ok(LocalStack {
            service: Arc::new(service),
            queue,
            notifier,
        })
    }

    pub fn validate_chain(&self, chain: &TransformationChain) -> Result<(), ServiceError> {
        self.pipeline.validate_chain(chain).map_err(|err| {
            error!(%err, "transformation validation failed");
            ServiceError::InvalidChain(err)
        })
    }

    /// Register a new image and queue it for processing.
    pub fn create_image(
        &self,
        url: &str,
        chain: TransformationChain,
    ) -> Result<ImageRecord, ServiceError> {
        if url.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "image URL must not be empty".into(),
            ));
        }
        self.validate_chain(&chain)?;

        let record = ImageRecord::pending(url.trim(), chain);
        self.ports.repository.create(&record)?;
        self.ports.notifier.notify(&record);
        self.ports.queue.publish(&ProcessImageJob::for_record(&record))?;
        info!(image_id = %record.id, url = %record.original_image_url, "image queued");
        Ok(record)
    }

    /// Replace an image's chain and queue it again.
    pub fn update_image(
        &self,
        id: Uuid,
        chain: TransformationChain,
    ) -> Result<ImageRecord, ServiceError> {
        self.validate_chain(&chain)?;

        let mut record = self.ports.repository.find(id)?;
        record.transformations = chain;
        record.status = ImageStatus::Pending;
        record.error_message = None;
        record.touch();
        self.ports.repository.update(&record)?;
        self.ports.notifier.notify(&record);
        self.ports.queue.publish(&ProcessImageJob::for_record(&record))?;
        info!(image_id = %id, "image requeued");
        Ok(record)
    }

    pub fn get_image(&self, id: Uuid) -> Result<ImageRecord, ServiceError> {
        Ok(self.ports.repository.find(id)?)
    }

    pub fn list_images(&self, page: usize, limit: usize) -> Result<ImagePage, ServiceError> {
        Ok(self.ports.repository.list(page, limit)?)
    }

    /// Remove the record and every object stored for it.
    pub fn delete_image(&self, id: Uuid) -> Result<(), ServiceError> {
        let record = self.ports.repository.find(id)?;
        self.ports.repository.delete(id)?;
        for key in [
            &record.object_storage_image_key,
            &record.transformed_image_key,
        ] {
            if !key.is_empty() {
                self.ports.store.delete(key)?;
            }
        }
        info!(image_id = %id, "image deleted successfully");
        Ok(())
    }

    /// Run one queued job to completion.
    ///
    /// Permanent failures are written to the record before returning; the
    /// returned error tells the caller whether a redelivery makes sense.
    pub fn process_image(
        &self,
        job: &ProcessImageJob,
        cancel: &CancellationToken,
    ) -> Result<ImageRecord, ServiceError> {
        let mut record = self.ports.repository.find(job.id)?;

        match self.run_job(&mut record, job, cancel) {
            Ok(()) => Ok(record),
            Err(err) if err.is_retryable() => {
                warn!(image_id = %job.id, attempt = job.attempt, err = %error_report(&err), "image processing failed, will retry");
                Err(err)
            }
            Err(err) => {
                let message = error_report(&err);
                error!(image_id = %job.id, err = %message, "image processing failed permanently");
                self.fail_record(&mut record, &message)?;
                Err(err)
            }
        }
    }

    /// Mark an image `failed`, e.g. once a retryable job runs out of attempts.
    pub fn mark_failed(&self, id: Uuid, message: &str) -> Result<ImageRecord, ServiceError> {
        let mut record = self.ports.repository.find(id)?;
        self.fail_record(&mut record, message)?;
        Ok(record)
    }

    fn fail_record(&self, record: &mut ImageRecord, message: &str) -> Result<(), ServiceError> {
        record.status = ImageStatus::Failed;
        record.error_message = Some(message.to_string());
        record.touch();
        self.ports.repository.update(record)?;
        self.ports.notifier.notify(record);
        Ok(())
    }

    fn run_job(
        &self,
        record: &mut ImageRecord,
        job: &ProcessImageJob,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        self.validate_chain(&job.transformations)?;

        let raw_key = match job.storage_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None if !record.object_storage_image_key.is_empty() => {
                record.object_storage_image_key.clone()
            }
            None => {
                warn!(image_id = %record.id, "image is not stored yet, fetching image");
                self.fetch_and_store(record, job)?
            }
        };
        if record.mime_type.is_empty() {
            record.mime_type = self.ports.store.content_type(&raw_key)?;
        }

        let reader = self.ports.store.get(&raw_key)?;
        let output = self
            .pipeline
            .execute(reader, &job.transformations, cancel)
            .map_err(ServiceError::Pipeline)?;

        let extension = codec::extension_for_mime(&record.mime_type)
            .ok_or_else(|| ServiceError::UnknownMimeType(record.mime_type.clone()))?;
        let transformed_key = self
            .storage
            .transformed_key(&format!("{}{}", record.id, extension));
        self.ports
            .store
            .put(&transformed_key, &output, &record.mime_type)?;

        record.status = ImageStatus::Processed;
        record.transformed_image_key = transformed_key;
        record.checksum = format!("{:x}", Sha256::digest(&output));
        record.transformations = job.transformations.clone();
        record.error_message = None;
        record.touch();
        self.ports.repository.update(record)?;
        self.ports.notifier.notify(record);
        info!(
            image_id = %record.id,
            transformations = job.transformations.len(),
            output_size = output.len(),
            "image processed successfully"
        );
        Ok(())
    }

    /// Fetch the source, store it as the raw object and record its key.
    fn fetch_and_store(
        &self,
        record: &mut ImageRecord,
        job: &ProcessImageJob,
    ) -> Result<String, ServiceError> {
        let fetched = self.ports.fetcher.fetch(&job.original_image_url)?;
        if !self.fetch.is_allowed(&fetched.mime_type) {
            error!(mime_type = %fetched.mime_type, "disallowed MIME type");
            return Err(ServiceError::DisallowedMimeType(fetched.mime_type));
        }
        if fetched.extension.is_empty() {
            return Err(ServiceError::UnknownMimeType(fetched.mime_type));
        }

        let raw_key = self
            .storage
            .raw_key(&format!("{}{}", record.id, fetched.extension));
        self.ports
            .store
            .put(&raw_key, &fetched.bytes, &fetched.mime_type)?;

        record.object_storage_image_key = raw_key.clone();
        record.mime_type = fetched.mime_type;
        record.touch();
        self.ports.repository.update(record)?;
        info!(image_id = %record.id, raw_image_key = %raw_key, "image stored successfully");
        Ok(raw_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransformationStep;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use serde_json::json;
    use std::io::{Cursor, Read};
    use std::path::Path;
    use tempfile::TempDir;

    struct Harness {
        tmp: TempDir,
        src: std::path::PathBuf,
        stack: LocalStack,
    }

    fn harness(config: impl FnOnce(&mut ServiceConfig)) -> Harness {
        let tmp = TempDir::new().unwrap();
        let mut cfg = ServiceConfig {
            data_dir: tmp.path().join("data").display().to_string(),
            ..ServiceConfig::default()
        };
        config(&mut cfg);
        let src = tmp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        let stack = ImageService::local(&cfg).unwrap();
        Harness {
            tmp,
            src,
            stack,
        }
    }

    fn write_image(dir: &Path, name: &str, format: ImageFormat) -> String {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([200, 30, 30])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, buf.into_inner()).unwrap();
        path.display().to_string()
    }

    fn resize_chain(w: u32, h: u32) -> TransformationChain {
        TransformationChain::new(vec![TransformationStep::with_config(
            "resize",
            json!({"width": w, "height": h}),
        )])
    }

    #[test]
    fn create_queues_a_pending_record() {
        let h = harness(|_| {});
        let url = write_image(&h.src, "a.png", ImageFormat::Png);
        let record = h.stack.service.create_image(&url, resize_chain(4, 3)).unwrap();

        assert_eq!(record.status, ImageStatus::Pending);
        assert_eq!(h.stack.queue.len(), 1);
        let job = h.stack.queue.try_next().unwrap().unwrap();
        assert_eq!(job.id, record.id);
        assert_eq!(job.storage_key, None);
    }

    #[test]
    fn invalid_chain_never_reaches_the_queue() {
        let h = harness(|_| {});
        let chain = TransformationChain::new(vec![TransformationStep::new("sharpen")]);
        let err = h.stack.service.create_image("x.png", chain).unwrap_err();

        assert!(matches!(err, ServiceError::InvalidChain(_)));
        assert!(!err.is_retryable());
        assert!(h.stack.queue.is_empty());
        assert_eq!(h.stack.service.list_images(1, 10).unwrap().count, 0);
    }

    #[test]
    fn blank_url_is_rejected() {
        let h = harness(|_| {});
        assert!(matches!(
            h.stack.service.create_image("  ", TransformationChain::default()),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn process_stores_raw_and_transformed_objects() {
        let h = harness(|_| {});
        let url = write_image(&h.src, "a.png", ImageFormat::Png);
        let service = &h.stack.service;
        let record = service.create_image(&url, resize_chain(4, 3)).unwrap();
        let job = h.stack.queue.try_next().unwrap().unwrap();

        let done = service
            .process_image(&job, &CancellationToken::new())
            .unwrap();

        assert_eq!(done.status, ImageStatus::Processed);
        assert_eq!(done.mime_type, "image/png");
        assert_eq!(
            done.object_storage_image_key,
            format!("raw-images/{}.png", record.id)
        );
        assert_eq!(
            done.transformed_image_key,
            format!("transformed-images/{}.png", record.id)
        );
        assert_eq!(service.get_image(record.id).unwrap(), done);

        let store = FsObjectStore::new(&h.tmp.path().join("data"), "images");
        let mut output = Vec::new();
        store
            .get(&done.transformed_image_key)
            .unwrap()
            .read_to_end(&mut output)
            .unwrap();
        assert_eq!(done.checksum, format!("{:x}", Sha256::digest(&output)));
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn disallowed_mime_marks_record_failed() {
        let h = harness(|cfg| cfg.fetch.allowed_mime_types = vec!["image/jpeg".into()]);
        let url = write_image(&h.src, "a.png", ImageFormat::Png);
        let updates = h.stack.notifier.subscribe();
        let record = h
            .stack
            .service
            .create_image(&url, TransformationChain::default())
            .unwrap();
        let job = h.stack.queue.try_next().unwrap().unwrap();

        let err = h
            .stack
            .service
            .process_image(&job, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ServiceError::DisallowedMimeType(ref m) if m == "image/png"));

        let stored = h.stack.service.get_image(record.id).unwrap();
        assert_eq!(stored.status, ImageStatus::Failed);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("disallowed MIME type: image/png")
        );
        let last = updates.try_iter().last().unwrap();
        assert_eq!(last.status, ImageStatus::Failed);
    }

    #[test]
    fn missing_source_fails_permanently() {
        let h = harness(|_| {});
        let url = h.src.join("missing.png").display().to_string();
        h.stack
            .service
            .create_image(&url, TransformationChain::default())
            .unwrap();
        let job = h.stack.queue.try_next().unwrap().unwrap();

        let err = h
            .stack
            .service
            .process_image(&job, &CancellationToken::new())
            .unwrap_err();
        assert!(!err.is_retryable());
        let stored = h.stack.service.get_image(job.id).unwrap();
        assert_eq!(stored.status, ImageStatus::Failed);
        assert_eq!(
            stored.error_message,
            Some(format!("failed to fetch source image: source not found: {url}"))
        );
    }

    #[test]
    fn cancelled_job_stays_pending() {
        let h = harness(|_| {});
        let url = write_image(&h.src, "a.png", ImageFormat::Png);
        h.stack
            .service
            .create_image(&url, resize_chain(2, 2))
            .unwrap();
        let job = h.stack.queue.try_next().unwrap().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = h.stack.service.process_image(&job, &token).unwrap_err();
        assert!(err.is_retryable());
        let stored = h.stack.service.get_image(job.id).unwrap();
        assert_eq!(stored.status, ImageStatus::Pending);
        // The source was still fetched and recorded, so a retry skips the fetch.
        assert!(!stored.object_storage_image_key.is_empty());
    }

    #[test]
    fn update_requeues_with_stored_source() {
        let h = harness(|_| {});
        let url = write_image(&h.src, "a.jpg", ImageFormat::Jpeg);
        let service = &h.stack.service;
        let record = service.create_image(&url, resize_chain(4, 4)).unwrap();
        let job = h.stack.queue.try_next().unwrap().unwrap();
        service.process_image(&job, &CancellationToken::new()).unwrap();

        // The source is gone, but the raw object is reused.
        std::fs::remove_file(&url).unwrap();
        let updated = service
            .update_image(
                record.id,
                TransformationChain::new(vec![TransformationStep::new("grayscale")]),
            )
            .unwrap();
        assert_eq!(updated.status, ImageStatus::Pending);

        let job = h.stack.queue.try_next().unwrap().unwrap();
        assert_eq!(
            job.storage_key.as_deref(),
            Some(format!("raw-images/{}.jpg", record.id).as_str())
        );
        let done = service.process_image(&job, &CancellationToken::new()).unwrap();
        assert_eq!(done.status, ImageStatus::Processed);
        assert_eq!(done.transformations.steps()[0].name, "grayscale");
    }

    #[test]
    fn update_of_unknown_image_is_not_found() {
        let h = harness(|_| {});
        assert!(matches!(
            h.stack
                .service
                .update_image(Uuid::new_v4(), TransformationChain::default()),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn delete_removes_record_and_objects() {
        let h = harness(|_| {});
        let url = write_image(&h.src, "a.png", ImageFormat::Png);
        let service = &h.stack.service;
        let record = service.create_image(&url, resize_chain(2, 2)).unwrap();
        let job = h.stack.queue.try_next().unwrap().unwrap();
        let done = service.process_image(&job, &CancellationToken::new()).unwrap();

        service.delete_image(record.id).unwrap();

        assert!(matches!(
            service.get_image(record.id),
            Err(ServiceError::NotFound(_))
        ));
        let bucket = h.tmp.path().join("data/images");
        assert!(!bucket.join(&done.object_storage_image_key).exists());
        assert!(!bucket.join(&done.transformed_image_key).exists());
    }

    #[test]
    fn records_persist_to_data_dir() {
        let h = harness(|_| {});
        let url = write_image(&h.src, "a.png", ImageFormat::Png);
        h.stack
            .service
            .create_image(&url, TransformationChain::default())
            .unwrap();
        assert!(h.tmp.path().join("data/images.json").exists());
    }

    #[test]
    fn error_report_appends_each_cause_once() {
        use crate::transform::TransformError;

        let fetch = ServiceError::Fetch(FetchError::Io {
            url: "a.png".into(),
            source: std::io::Error::other("disk gone"),
        });
        assert_eq!(
            error_report(&fetch),
            "failed to fetch source image: failed to read a.png: disk gone"
        );

        // The chain error already quotes the transform failure.
        let pipeline = ServiceError::Pipeline(ChainError::TransformFailed {
            step: 1,
            name: "blur".into(),
            source: TransformError::ProcessingFailed {
                operation: "blur",
                message: "boom".into(),
            },
        });
        assert_eq!(
            error_report(&pipeline),
            "failed to process image transformations: transformation failed at step 1 (blur): blur failed: boom"
        );
    }
}
