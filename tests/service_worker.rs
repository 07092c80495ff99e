//! Full image lifecycle through the local stack.
//!
//! Submits sources from a temp directory, drains the queue with a [`Worker`],
//! and checks records, stored objects and status notifications on disk.
//!
//! Run with: cargo test --test service_worker

use henkan::config::ServiceConfig;
use henkan::service::{ImageService, LocalStack, ServiceError};
use henkan::types::ImageStatus;
use henkan::worker::{Worker, WorkerReport};
use henkan::{TransformationChain, TransformationStep};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::PathBuf;
use tempfile::TempDir;

struct Env {
    tmp: TempDir,
    config: ServiceConfig,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = ServiceConfig {
            data_dir: tmp.path().join("data").display().to_string(),
            ..ServiceConfig::default()
        };
        Self { tmp, config }
    }

    fn stack(&self) -> LocalStack {
        ImageService::local(&self.config).unwrap()
    }

    /// Write a `width` x `height` source image and return its path.
    fn source(&self, name: &str, width: u32, height: u32, format: ImageFormat) -> String {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 160, 90])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        let path = self.tmp.path().join(name);
        std::fs::write(&path, buf.into_inner()).unwrap();
        path.display().to_string()
    }

    /// On-disk location of a stored object.
    fn object(&self, key: &str) -> PathBuf {
        self.config
            .data_path()
            .join(&self.config.storage.bucket)
            .join(key)
    }

    fn drain(&self, stack: &LocalStack) -> WorkerReport {
        Worker::new(
            stack.service.clone(),
            stack.queue.clone(),
            &self.config.processing,
        )
        .run_until_idle(None)
        .unwrap()
    }
}

fn rotate(angle: u32) -> TransformationChain {
    TransformationChain::new(vec![TransformationStep::with_config(
        "rotate",
        json!({"angle": angle}),
    )])
}

#[test]
fn submit_process_and_read_back() {
    let env = Env::new();
    let stack = env.stack();
    let updates = stack.notifier.subscribe();
    let url = env.source("cat.png", 30, 10, ImageFormat::Png);

    let created = stack.service.create_image(&url, rotate(90)).unwrap();
    assert_eq!(created.status, ImageStatus::Pending);
    assert_eq!(stack.queue.len(), 1);

    let report = env.drain(&stack);
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);

    let record = stack.service.get_image(created.id).unwrap();
    assert_eq!(record.status, ImageStatus::Processed);
    assert_eq!(record.mime_type, "image/png");
    assert_eq!(
        record.object_storage_image_key,
        format!("raw-images/{}.png", record.id)
    );
    assert_eq!(
        record.transformed_image_key,
        format!("transformed-images/{}.png", record.id)
    );
    assert!(record.error_message.is_none());

    let output = std::fs::read(env.object(&record.transformed_image_key)).unwrap();
    assert_eq!(
        image::load_from_memory(&output).unwrap().dimensions(),
        (10, 30)
    );
    assert_eq!(record.checksum, format!("{:x}", Sha256::digest(&output)));

    let statuses: Vec<_> = updates.try_iter().map(|r| r.status).collect();
    assert_eq!(statuses, [ImageStatus::Pending, ImageStatus::Processed]);
}

#[test]
fn reprocess_reuses_stored_source() {
    let env = Env::new();
    let stack = env.stack();
    let url = env.source("wide.png", 40, 20, ImageFormat::Png);
    let id = stack.service.create_image(&url, rotate(90)).unwrap().id;
    env.drain(&stack);

    // The raw object is all that is needed from here on.
    std::fs::remove_file(&url).unwrap();

    let chain = TransformationChain::new(vec![
        TransformationStep::with_config("resize", json!({"width": 8, "height": 4})),
        TransformationStep::new("grayscale"),
    ]);
    let requeued = stack.service.update_image(id, chain.clone()).unwrap();
    assert_eq!(requeued.status, ImageStatus::Pending);

    let report = env.drain(&stack);
    assert_eq!(report.processed, 1);

    let record = stack.service.get_image(id).unwrap();
    assert_eq!(record.status, ImageStatus::Processed);
    assert_eq!(record.transformations, chain);
    let output = std::fs::read(env.object(&record.transformed_image_key)).unwrap();
    let decoded = image::load_from_memory(&output).unwrap();
    assert_eq!(decoded.dimensions(), (8, 4));
    assert_eq!(decoded.color(), image::ColorType::L8);
}

#[test]
fn jpeg_source_stays_jpeg() {
    let env = Env::new();
    let stack = env.stack();
    let url = env.source("photo.jpg", 16, 16, ImageFormat::Jpeg);
    let id = stack.service.create_image(&url, rotate(180)).unwrap().id;
    env.drain(&stack);

    let record = stack.service.get_image(id).unwrap();
    assert_eq!(record.mime_type, "image/jpeg");
    assert!(record.transformed_image_key.ends_with(".jpg"));
    let output = std::fs::read(env.object(&record.transformed_image_key)).unwrap();
    assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Jpeg);
}

#[test]
fn invalid_chain_is_rejected_before_anything_is_recorded() {
    let env = Env::new();
    let stack = env.stack();
    let url = env.source("a.png", 4, 4, ImageFormat::Png);

    let err = stack
        .service
        .create_image(&url, rotate(45))
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidChain(_)));
    assert!(!err.is_retryable());
    assert!(
        err.to_string().starts_with("invalid config at step 1 (rotate):"),
        "{err}"
    );

    assert!(stack.queue.is_empty());
    assert_eq!(stack.service.list_images(1, 10).unwrap().count, 0);
}

#[test]
fn disallowed_source_type_fails_the_record() {
    let env = Env::new();
    let stack = env.stack();
    let url = env.source("scan.tiff", 4, 4, ImageFormat::Tiff);
    let id = stack.service.create_image(&url, rotate(90)).unwrap().id;

    let report = env.drain(&stack);
    assert_eq!(
        report,
        WorkerReport {
            processed: 0,
            failed: 1,
            retried: 0
        }
    );

    let record = stack.service.get_image(id).unwrap();
    assert_eq!(record.status, ImageStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("disallowed MIME type: image/tiff")
    );
    assert!(record.object_storage_image_key.is_empty());
}

#[test]
fn missing_source_fails_without_retry() {
    let env = Env::new();
    let stack = env.stack();
    let url = env.tmp.path().join("gone.png").display().to_string();
    let id = stack.service.create_image(&url, rotate(90)).unwrap().id;

    let report = env.drain(&stack);
    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 0);
    assert_eq!(
        stack.service.get_image(id).unwrap().status,
        ImageStatus::Failed
    );
}

#[test]
fn records_survive_a_restart() {
    let env = Env::new();
    let id = {
        let stack = env.stack();
        let url = env.source("keep.png", 6, 6, ImageFormat::Png);
        let id = stack.service.create_image(&url, rotate(270)).unwrap().id;
        env.drain(&stack);
        id
    };

    let reopened = env.stack();
    let record = reopened.service.get_image(id).unwrap();
    assert_eq!(record.status, ImageStatus::Processed);
    assert_eq!(record.transformations, rotate(270));
}

#[test]
fn list_pages_newest_first() {
    let env = Env::new();
    let stack = env.stack();
    let ids: Vec<_> = (0..5)
        .map(|i| {
            let url = env.source(&format!("{i}.png"), 4, 4, ImageFormat::Png);
            stack.service.create_image(&url, rotate(90)).unwrap().id
        })
        .collect();

    let first = stack.service.list_images(1, 2).unwrap();
    assert_eq!(first.count, 5);
    assert_eq!(first.data.len(), 2);
    assert_eq!(first.data[0].id, ids[4]);
    assert_eq!(first.data[1].id, ids[3]);

    let last = stack.service.list_images(3, 2).unwrap();
    assert_eq!(last.data.len(), 1);
    assert_eq!(last.data[0].id, ids[0]);
}

#[test]
fn delete_removes_record_and_objects() {
    let env = Env::new();
    let stack = env.stack();
    let url = env.source("bye.png", 5, 5, ImageFormat::Png);
    let id = stack.service.create_image(&url, rotate(90)).unwrap().id;
    env.drain(&stack);

    let record = stack.service.get_image(id).unwrap();
    let raw = env.object(&record.object_storage_image_key);
    let transformed = env.object(&record.transformed_image_key);
    assert!(raw.exists());
    assert!(transformed.exists());

    stack.service.delete_image(id).unwrap();
    assert!(!raw.exists());
    assert!(!transformed.exists());
    assert!(matches!(
        stack.service.get_image(id),
        Err(ServiceError::NotFound(missing)) if missing == id
    ));
    assert!(matches!(
        stack.service.delete_image(id),
        Err(ServiceError::NotFound(_))
    ));
}
