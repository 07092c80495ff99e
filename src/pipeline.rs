//! The transformation pipeline.
//!
//! A [`Pipeline`] turns a declarative [`TransformationChain`] into a run of
//! concrete operations. It has two entry points:
//!
//! - [`Pipeline::validate_chain`] resolves every step and checks its config
//!   without touching image bytes. Callers use it to reject a request before
//!   anything is stored or queued.
//! - [`Pipeline::execute`] reads the source image into memory, resolves and
//!   validates every step again, then threads the bytes through each
//!   operation in declared order.
//!
//! ## Fail-fast, with attribution
//!
//! Both modes stop at the first failing step. Every error names the 1-based
//! step position and the operation, and wraps the underlying cause so
//! [`std::error::Error::source`] still reaches it:
//!
//! ```text
//! invalid transformation at step 2 (sharpen): unknown transformation: sharpen
//! invalid config at step 1 (rotate): field `angle` must be one of 90, 180, 270, got 45
//! transformation failed at step 3 (blur): unsupported image format
//! ```
//!
//! ## Execution plan
//!
//! Execution builds the whole plan (resolve + validate each step) before the
//! first `transform` runs. A chain that is broken at step k therefore never
//! spends CPU on steps 1..k-1.
//!
//! ## Buffers
//!
//! Each step is a complete decode → mutate → encode round trip over an owned
//! buffer. The previous buffer is dropped as soon as the next one exists, so
//! at most two encoded buffers (plus one decoded image) are alive at a time.
//!
//! ## Concurrency
//!
//! `Pipeline` holds only the read-only [`OperationFactory`]. It is `Send +
//! Sync`, and one instance serves any number of concurrent runs.

use crate::cancel::{CancellationToken, Cancelled};
use crate::transform::{
    ConfigError, Operation, OperationFactory, TransformError, UnknownOperationError,
};
use crate::types::{ConfigMap, TransformationChain, TransformationStep};
use std::borrow::Cow;
use std::io::Read;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("invalid transformation at step {step} ({name}): {source}")]
    InvalidTransformation {
        step: usize,
        name: String,
        source: UnknownOperationError,
    },
    #[error("invalid config at step {step} ({name}): {source}")]
    InvalidConfig {
        step: usize,
        name: String,
        source: ConfigError,
    },
    #[error("config validation failed at step {step} ({name}): {source}")]
    ConfigValidationFailed {
        step: usize,
        name: String,
        source: ConfigError,
    },
    #[error("transformation failed at step {step} ({name}): {source}")]
    TransformFailed {
        step: usize,
        name: String,
        source: TransformError,
    },
    #[error("cancelled at step {step} ({name}): {source}")]
    Cancelled {
        step: usize,
        name: String,
        source: Cancelled,
    },
    #[error("failed to read initial image data: {0}")]
    Read(#[source] std::io::Error),
}

/// Coarse category of a [`ChainError`], for control-flow decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainErrorKind {
    UnknownOperation,
    Config,
    Transform,
    Cancelled,
    Io,
}

impl ChainError {
    pub fn kind(&self) -> ChainErrorKind {
        match self {
            Self::InvalidTransformation { .. } => ChainErrorKind::UnknownOperation,
            Self::InvalidConfig { .. } | Self::ConfigValidationFailed { .. } => {
                ChainErrorKind::Config
            }
            Self::TransformFailed { .. } => ChainErrorKind::Transform,
            Self::Cancelled { .. } => ChainErrorKind::Cancelled,
            Self::Read(_) => ChainErrorKind::Io,
        }
    }

    /// 1-based position of the failing step, if the failure belongs to one.
    pub fn step(&self) -> Option<usize> {
        match self {
            Self::InvalidTransformation { step, .. }
            | Self::InvalidConfig { step, .. }
            | Self::ConfigValidationFailed { step, .. }
            | Self::TransformFailed { step, .. }
            | Self::Cancelled { step, .. } => Some(*step),
            Self::Read(_) => None,
        }
    }

    /// Operation name as attributed in the message.
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::InvalidTransformation { name, .. }
            | Self::InvalidConfig { name, .. }
            | Self::ConfigValidationFailed { name, .. }
            | Self::TransformFailed { name, .. }
            | Self::Cancelled { name, .. } => Some(name),
            Self::Read(_) => None,
        }
    }

    /// Whether running the same chain again later could succeed.
    ///
    /// Bad names and configs are caller errors. Transform failures are
    /// deterministic for the same bytes and config. Cancellation and read
    /// failures are circumstantial.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ChainErrorKind::Cancelled | ChainErrorKind::Io)
    }
}

/// Which error variant a config failure maps to.
#[derive(Clone, Copy)]
enum Mode {
    Validate,
    Execute,
}

/// One resolved, validated step ready to run.
struct PlannedStep<'a> {
    position: usize,
    op: &'a dyn Operation,
    config: Cow<'a, ConfigMap>,
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    factory: OperationFactory,
}

impl Pipeline {
    pub fn new(factory: OperationFactory) -> Self {
        Self { factory }
    }

    /// Resolve and validate every step without touching image bytes.
    ///
    /// Pure function of `chain`: calling it twice gives the same answer.
    pub fn validate_chain(&self, chain: &TransformationChain) -> Result<(), ChainError> {
        info!(count = chain.len(), "validating transformations");
        self.plan(chain, Mode::Validate)?;
        info!(
            total_steps = chain.len(),
            "all transformations validated successfully"
        );
        Ok(())
    }

    /// Read `image` fully, then run it through every step of `chain` in order.
    ///
    /// Returns the final buffer, which is the input unchanged when the chain is
    /// empty. On error no partial output is returned. The reader is only read,
    /// never closed; the caller keeps ownership of it.
    pub fn execute(
        &self,
        mut image: impl Read,
        chain: &TransformationChain,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ChainError> {
        info!(steps = chain.len(), "starting image transformation pipeline");

        let mut data = Vec::new();
        image.read_to_end(&mut data).map_err(|err| {
            error!(%err, "failed to read initial image data");
            ChainError::Read(err)
        })?;

        self.execute_bytes(data, chain, cancel)
    }

    /// [`execute`](Self::execute) for a buffer already in memory.
    pub fn execute_bytes(
        &self,
        image: Vec<u8>,
        chain: &TransformationChain,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ChainError> {
        let plan = self.plan(chain, Mode::Execute)?;
        let mut current = image;

        for step in &plan {
            let name = step.op.name();
            cancel.check().map_err(|source| {
                info!(step = step.position, transformation = name, "pipeline cancelled");
                ChainError::Cancelled {
                    step: step.position,
                    name: name.to_string(),
                    source,
                }
            })?;

            info!(step = step.position, transformation = name, "applying transformation");
            let next = step
                .op
                .transform(&current, &step.config, cancel)
                .map_err(|err| {
                    error!(step = step.position, transformation = name, %err, "transformation failed");
                    match err {
                        TransformError::Cancelled(source) => ChainError::Cancelled {
                            step: step.position,
                            name: name.to_string(),
                            source,
                        },
                        source => ChainError::TransformFailed {
                            step: step.position,
                            name: name.to_string(),
                            source,
                        },
                    }
                })?;

            // The previous buffer is no longer needed once the next one exists.
            current = next;
            debug!(
                step = step.position,
                transformation = name,
                output_size = current.len(),
                "transformation completed successfully"
            );
        }

        info!(
            total_steps = plan.len(),
            final_size = current.len(),
            "image transformation pipeline completed successfully"
        );
        Ok(current)
    }

    /// Resolve and validate each step in order, stopping at the first failure.
    fn plan<'a>(
        &'a self,
        chain: &'a TransformationChain,
        mode: Mode,
    ) -> Result<Vec<PlannedStep<'a>>, ChainError> {
        chain
            .steps()
            .iter()
            .enumerate()
            .map(|(index, step)| self.plan_step(index + 1, step, mode))
            .collect()
    }

    fn plan_step<'a>(
        &'a self,
        position: usize,
        step: &'a TransformationStep,
        mode: Mode,
    ) -> Result<PlannedStep<'a>, ChainError> {
        debug!(step = position, transformation = %step.name, "resolving transformation step");

        let op = self.factory.create(step).map_err(|source| {
            error!(step = position, transformation = %step.name, err = %source, "failed to create transformer");
            ChainError::InvalidTransformation {
                step: position,
                name: step.name.clone(),
                source,
            }
        })?;

        let config = match &step.config {
            Some(map) => Cow::Borrowed(map),
            None => Cow::Owned(ConfigMap::new()),
        };

        op.validate_config(&config).map_err(|source| {
            error!(step = position, transformation = op.name(), err = %source, "config validation failed");
            let name = op.name().to_string();
            match mode {
                Mode::Validate => ChainError::InvalidConfig {
                    step: position,
                    name,
                    source,
                },
                Mode::Execute => ChainError::ConfigValidationFailed {
                    step: position,
                    name,
                    source,
                },
            }
        })?;

        debug!(step = position, transformation = op.name(), "transformation step is valid");
        Ok(PlannedStep {
            position,
            op,
            config,
        })
    }
}
