//! Queue consumer.
//!
//! The [`Worker`] drains everything currently waiting on the queue into a
//! batch and processes the batch in parallel with [rayon](https://docs.rs/rayon)
//! on the global pool (sized from `[processing] max_processes` by the binary).
//! Each job gets its own [`CancellationToken`] with the configured deadline.
//!
//! Retryable failures go back on the queue with `attempt + 1` and are picked
//! up by the next batch. Once a job has used `max_attempts` deliveries the
//! image is marked `failed`. Draining stops when a batch comes back empty.
//!
//! Progress is reported through an optional channel of [`WorkerEvent`]s so
//! the caller decides how (and whether) to print it.

use crate::cancel::CancellationToken;
use crate::config::ProcessingConfig;
use crate::messaging::{JobQueue, QueueError};
use crate::service::{ImageService, ServiceError, error_report};
use crate::types::{ImageRecord, ProcessImageJob};
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Progress events emitted while draining the queue.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Processed {
        record: ImageRecord,
        attempt: u32,
    },
    Retrying {
        id: Uuid,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    Failed {
        id: Uuid,
        attempt: u32,
        error: String,
    },
}

/// Totals for one [`Worker::run_until_idle`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: usize,
    pub failed: usize,
    pub retried: usize,
}

enum Outcome {
    Processed,
    Failed,
    Retry(ProcessImageJob),
}

pub struct Worker {
    service: Arc<ImageService>,
    queue: Arc<dyn JobQueue>,
    max_attempts: u32,
    timeout: Option<Duration>,
}

impl Worker {
    pub fn new(
        service: Arc<ImageService>,
        queue: Arc<dyn JobQueue>,
        config: &ProcessingConfig,
    ) -> Self {
        Self {
            service,
            queue,
            max_attempts: config.max_attempts.max(1),
            timeout: config.timeout(),
        }
    }

    /// Process jobs until the queue is empty, retries included.
    pub fn run_until_idle(
        &self,
        events: Option<Sender<WorkerEvent>>,
    ) -> Result<WorkerReport, QueueError> {
        let mut report = WorkerReport::default();

        loop {
            let batch = self.drain()?;
            if batch.is_empty() {
                break;
            }
            info!(jobs = batch.len(), "processing batch");

            let outcomes: Vec<Outcome> = batch
                .par_iter()
                .map(|job| self.handle(job, events.as_ref()))
                .collect();

            for outcome in outcomes {
                match outcome {
                    Outcome::Processed => report.processed += 1,
                    Outcome::Failed => report.failed += 1,
                    Outcome::Retry(job) => {
                        self.queue.publish(&job)?;
                        report.retried += 1;
                    }
                }
            }
        }

        info!(
            processed = report.processed,
            failed = report.failed,
            retried = report.retried,
            "queue drained"
        );
        Ok(report)
    }

    fn drain(&self) -> Result<Vec<ProcessImageJob>, QueueError> {
        let mut batch = Vec::new();
        while let Some(job) = self.queue.try_next()? {
            batch.push(job);
        }
        Ok(batch)
    }

    fn handle(&self, job: &ProcessImageJob, events: Option<&Sender<WorkerEvent>>) -> Outcome {
        let emit = |event| {
            if let Some(tx) = events {
                tx.send(event).ok();
            }
        };
        let cancel = CancellationToken::from_timeout(self.timeout);

        match self.service.process_image(job, &cancel) {
            Ok(record) => {
                emit(WorkerEvent::Processed {
                    record,
                    attempt: job.attempt,
                });
                Outcome::Processed
            }
            Err(err) if err.is_retryable() && job.attempt < self.max_attempts => {
                emit(WorkerEvent::Retrying {
                    id: job.id,
                    attempt: job.attempt,
                    max_attempts: self.max_attempts,
                    error: error_report(&err),
                });
                Outcome::Retry(job.next_attempt())
            }
            Err(err) => {
                let message = self.final_message(job, &err);
                if err.is_retryable() {
                    // Permanent failures are already recorded by the service.
                    if let Err(mark_err) = self.service.mark_failed(job.id, &message) {
                        warn!(image_id = %job.id, err = %mark_err, "failed to mark image as failed");
                    }
                }
                emit(WorkerEvent::Failed {
                    id: job.id,
                    attempt: job.attempt,
                    error: message,
                });
                Outcome::Failed
            }
        }
    }

    fn final_message(&self, job: &ProcessImageJob, err: &ServiceError) -> String {
        if err.is_retryable() {
            format!("giving up after {} attempts: {}", job.attempt, error_report(err))
        } else {
            error_report(err)
        }
    }
}
