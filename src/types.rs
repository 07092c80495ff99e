//! Shared types passed between the service, the queue, and the pipeline.
//!
//! These are serialized to JSON when a record is persisted and when a job
//! crosses the queue, so field names are part of the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Untyped per-step configuration as it arrives at the boundary.
///
/// Each operation decodes this into its own typed config; the map never
/// travels further than `validate_config` / `transform`.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// One `(name, config)` entry of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationStep {
    pub name: String,
    /// Absent and `null` configs both decode to `None` and are treated as
    /// an empty map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMap>,
}

impl TransformationStep {
    /// A step with no config.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
        }
    }

    /// A step with the given config entries.
    pub fn with_config(name: impl Into<String>, config: serde_json::Value) -> Self {
        let config = match config {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        };
        Self {
            name: name.into(),
            config,
        }
    }

    /// Trimmed, lowercased name used for factory lookup.
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_lowercase()
    }
}

/// Ordered list of steps. Step `i`'s output is step `i + 1`'s input.
///
/// Serializes as a bare JSON array so stored chains can be replayed as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformationChain(pub Vec<TransformationStep>);

impl TransformationChain {
    pub fn new(steps: Vec<TransformationStep>) -> Self {
        Self(steps)
    }

    pub fn steps(&self) -> &[TransformationStep] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a chain from its JSON array form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl From<Vec<TransformationStep>> for TransformationChain {
    fn from(steps: Vec<TransformationStep>) -> Self {
        Self(steps)
    }
}

/// Lifecycle of an image record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Processed,
    Failed,
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persistent record of one image and the chain applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: Uuid,
    pub original_image_url: String,
    /// Key of the raw bytes in the object store; empty until fetched.
    #[serde(default)]
    pub object_storage_image_key: String,
    #[serde(default)]
    pub mime_type: String,
    pub status: ImageStatus,
    #[serde(default)]
    pub transformed_image_key: String,
    /// SHA-256 (hex) of the transformed bytes.
    #[serde(default)]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub transformations: TransformationChain,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// A fresh `pending` record for a source URL.
    pub fn pending(original_image_url: impl Into<String>, chain: TransformationChain) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            original_image_url: original_image_url.into(),
            object_storage_image_key: String::new(),
            mime_type: String::new(),
            status: ImageStatus::Pending,
            transformed_image_key: String::new(),
            checksum: String::new(),
            error_message: None,
            transformations: chain,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One page of records, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePage {
    pub page: usize,
    pub limit: usize,
    /// Total number of records across all pages.
    pub count: usize,
    pub data: Vec<ImageRecord>,
}

/// "Process this image" message carried by the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessImageJob {
    pub id: Uuid,
    pub original_image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    pub transformations: TransformationChain,
    /// 1-based delivery attempt.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl ProcessImageJob {
    pub fn for_record(record: &ImageRecord) -> Self {
        let storage_key = Some(record.object_storage_image_key.clone()).filter(|k| !k.is_empty());
        Self {
            id: record.id,
            original_image_url: record.original_image_url.clone(),
            storage_key,
            transformations: record.transformations.clone(),
            attempt: 1,
        }
    }

    /// The same job scheduled for its next delivery.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}
