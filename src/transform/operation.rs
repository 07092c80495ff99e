//! The operation trait and its error type.
//!
//! An [`Operation`] is one named image transformation. It owns the decoding of
//! its config and the pixel work; the pipeline only sees bytes in and bytes
//! out. Built-in kinds live in [`operations`](super::operations).

use super::params::ConfigError;
use crate::cancel::{CancellationToken, Cancelled};
use crate::types::ConfigMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("invalid {operation} config")]
    Config {
        operation: &'static str,
        #[source]
        source: ConfigError,
    },
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("failed to load image")]
    Decode(#[source] image::ImageError),
    #[error("failed to export image")]
    Encode(#[source] image::ImageError),
    #[error("{operation} failed: {message}")]
    ProcessingFailed {
        operation: &'static str,
        message: String,
    },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl TransformError {
    pub fn config(operation: &'static str, source: ConfigError) -> Self {
        Self::Config { operation, source }
    }
}

/// One named, independently testable image operation.
///
/// Implementations must be stateless: the same bytes and config always give
/// the same output, and one instance is shared by every pipeline run.
pub trait Operation: Send + Sync {
    /// Canonical lowercase kind, matching the factory's dispatch key.
    fn name(&self) -> &'static str;

    /// Decode and range-check `config` without touching image bytes.
    fn validate_config(&self, config: &ConfigMap) -> Result<(), ConfigError>;

    /// Decode `image`, apply the operation, and re-encode in the source format.
    fn transform(
        &self,
        image: &[u8],
        config: &ConfigMap,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransformError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Operation that records calls instead of touching pixels.
    ///
    /// `transform` appends its name to the input, so a chain of mocks leaves
    /// a readable trace in the output bytes.
    pub struct MockOperation {
        pub name: &'static str,
        pub reject_config: bool,
        pub fail_transform: bool,
        pub calls: Mutex<Vec<RecordedCall>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedCall {
        Validate(ConfigMap),
        Transform { input_len: usize },
    }

    impl MockOperation {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                reject_config: false,
                fail_transform: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn rejecting_config(name: &'static str) -> Self {
            Self {
                reject_config: true,
                ..Self::new(name)
            }
        }

        pub fn failing(name: &'static str) -> Self {
            Self {
                fail_transform: true,
                ..Self::new(name)
            }
        }

        pub fn get_calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn transform_count(&self) -> usize {
            self.get_calls()
                .iter()
                .filter(|c| matches!(c, RecordedCall::Transform { .. }))
                .count()
        }
    }

    impl Operation for MockOperation {
        fn name(&self) -> &'static str {
            self.name
        }

        fn validate_config(&self, config: &ConfigMap) -> Result<(), ConfigError> {
            self.calls
                .lock()
                .unwrap()
                .push(RecordedCall::Validate(config.clone()));
            if self.reject_config {
                return Err(ConfigError::Invalid("missing field `mock`".into()));
            }
            Ok(())
        }

        fn transform(
            &self,
            image: &[u8],
            _config: &ConfigMap,
            cancel: &CancellationToken,
        ) -> Result<Vec<u8>, TransformError> {
            self.calls.lock().unwrap().push(RecordedCall::Transform {
                input_len: image.len(),
            });
            cancel.check()?;
            if self.fail_transform {
                return Err(TransformError::ProcessingFailed {
                    operation: self.name,
                    message: "mock failure".into(),
                });
            }
            let mut out = image.to_vec();
            out.extend_from_slice(self.name.as_bytes());
            Ok(out)
        }
    }

    #[test]
    fn mock_records_validate_and_transform() {
        let op = MockOperation::new("resize");
        op.validate_config(&ConfigMap::new()).unwrap();
        let out = op
            .transform(b"img:", &ConfigMap::new(), &CancellationToken::new())
            .unwrap();

        assert_eq!(out, b"img:resize");
        assert_eq!(
            op.get_calls(),
            vec![
                RecordedCall::Validate(ConfigMap::new()),
                RecordedCall::Transform { input_len: 4 }
            ]
        );
        assert_eq!(op.transform_count(), 1);
    }

    #[test]
    fn mock_transform_honours_cancellation() {
        let op = MockOperation::new("blur");
        let token = CancellationToken::new();
        token.cancel();
        let err = op.transform(b"x", &ConfigMap::new(), &token).unwrap_err();
        assert!(matches!(err, TransformError::Cancelled(Cancelled::Signalled)));
    }

    #[test]
    fn config_error_keeps_its_source() {
        use std::error::Error as _;
        let err = TransformError::config(
            "blur",
            ConfigError::Invalid("missing field `sigma`".into()),
        );
        assert_eq!(err.to_string(), "invalid blur config");
        assert_eq!(
            err.source().map(|s| s.to_string()).as_deref(),
            Some("missing field `sigma`")
        );
    }
}
