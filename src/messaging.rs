//! Job queue and status notifications.
//!
//! [`ChannelQueue`] carries [`ProcessImageJob`]s as JSON payloads over a
//! `std::sync::mpsc` channel, so jobs cross the queue in the same shape they
//! would on a broker. [`BroadcastNotifier`] fans record snapshots out to any
//! number of subscribers.

use crate::types::{ImageRecord, ProcessImageJob};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("failed to encode job")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode job")]
    Decode(#[source] serde_json::Error),
    #[error("queue is closed")]
    Closed,
    #[error("queue lock poisoned")]
    Poisoned,
}

pub trait JobQueue: Send + Sync {
    fn publish(&self, job: &ProcessImageJob) -> Result<(), QueueError>;

    /// Next job if one is waiting; never blocks.
    fn try_next(&self) -> Result<Option<ProcessImageJob>, QueueError>;
}

pub struct ChannelQueue {
    sender: Sender<Vec<u8>>,
    receiver: Mutex<Receiver<Vec<u8>>>,
    depth: AtomicUsize,
}

impl ChannelQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            depth: AtomicUsize::new(0),
        }
    }

    /// Jobs published and not yet taken.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for ChannelQueue {
    fn publish(&self, job: &ProcessImageJob) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(job).map_err(QueueError::Encode)?;
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(payload).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        debug!(image_id = %job.id, attempt = job.attempt, "published process job");
        Ok(())
    }

    fn try_next(&self) -> Result<Option<ProcessImageJob>, QueueError> {
        let payload = {
            let receiver = self.receiver.lock().map_err(|_| QueueError::Poisoned)?;
            match receiver.try_recv() {
                Ok(payload) => payload,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(QueueError::Closed),
            }
        };
        self.depth.fetch_sub(1, Ordering::SeqCst);
        let job = serde_json::from_slice(&payload).map_err(QueueError::Decode)?;
        Ok(Some(job))
    }
}

/// Receives a snapshot every time a record changes.
pub trait Notifier: Send + Sync {
    fn notify(&self, record: &ImageRecord);
}

struct Subscriber {
    image: Option<Uuid>,
    sender: Sender<ImageRecord>,
}

#[derive(Default)]
pub struct BroadcastNotifier {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates for every image.
    pub fn subscribe(&self) -> Receiver<ImageRecord> {
        self.add(None)
    }

    /// Updates for one image only.
    pub fn subscribe_to(&self, id: Uuid) -> Receiver<ImageRecord> {
        self.add(Some(id))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn add(&self, image: Option<Uuid>) -> Receiver<ImageRecord> {
        let (sender, receiver) = mpsc::channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(Subscriber { image, sender }),
            // The receiver is returned already disconnected.
            Err(_) => warn!("notifier lock poisoned; subscription dropped"),
        }
        receiver
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, record: &ImageRecord) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            warn!(image_id = %record.id, "notifier lock poisoned; update dropped");
            return;
        };
        subscribers.retain(|s| match s.image {
            Some(id) if id != record.id => true,
            _ => s.sender.send(record.clone()).is_ok(),
        });
        debug!(
            image_id = %record.id,
            status = %record.status,
            subscribers = subscribers.len(),
            "broadcast image update"
        );
    }
}
