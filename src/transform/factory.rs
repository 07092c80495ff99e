//! Name → operation lookup.
//!
//! The kind set is closed, so dispatch is a plain `match` over the normalized
//! name. Each slot holds a shared, stateless [`Operation`]; the factory never
//! changes after construction and can be shared across threads freely.

use super::operation::Operation;
use super::operations::{Blur, Grayscale, Resize, Rotate, Trim};
use crate::types::TransformationStep;
use std::sync::Arc;
use thiserror::Error;

/// Every name the factory resolves, in canonical form.
pub const OPERATION_NAMES: [&str; 5] = ["resize", "grayscale", "trim", "blur", "rotate"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnknownOperationError {
    #[error("transformation name cannot be empty")]
    EmptyName,
    #[error("unknown transformation: {0}")]
    Unknown(String),
}

#[derive(Clone)]
pub struct OperationFactory {
    resize: Arc<dyn Operation>,
    grayscale: Arc<dyn Operation>,
    trim: Arc<dyn Operation>,
    blur: Arc<dyn Operation>,
    rotate: Arc<dyn Operation>,
}

impl OperationFactory {
    /// Build a factory from explicit implementations, one per kind.
    pub fn new(
        resize: Arc<dyn Operation>,
        grayscale: Arc<dyn Operation>,
        trim: Arc<dyn Operation>,
        blur: Arc<dyn Operation>,
        rotate: Arc<dyn Operation>,
    ) -> Self {
        Self {
            resize,
            grayscale,
            trim,
            blur,
            rotate,
        }
    }

    /// Resolve a step to its operation.
    pub fn create(
        &self,
        step: &TransformationStep,
    ) -> Result<&dyn Operation, UnknownOperationError> {
        let name = step.normalized_name();
        let op = match name.as_str() {
            "" => return Err(UnknownOperationError::EmptyName),
            "resize" => &self.resize,
            "grayscale" => &self.grayscale,
            "trim" => &self.trim,
            "blur" => &self.blur,
            "rotate" => &self.rotate,
            _ => return Err(UnknownOperationError::Unknown(step.name.clone())),
        };
        Ok(op.as_ref())
    }
}

impl Default for OperationFactory {
    /// The built-in `image`-crate operations.
    fn default() -> Self {
        Self::new(
            Arc::new(Resize),
            Arc::new(Grayscale),
            Arc::new(Trim),
            Arc::new(Blur),
            Arc::new(Rotate),
        )
    }
}

impl std::fmt::Debug for OperationFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationFactory")
            .field("operations", &OPERATION_NAMES)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(name: &str) -> Result<&'static str, UnknownOperationError> {
        let factory = OperationFactory::default();
        factory
            .create(&TransformationStep::new(name))
            .map(|op| op.name())
    }

    #[test]
    fn resolves_every_builtin() {
        for name in OPERATION_NAMES {
            assert_eq!(resolve(name), Ok(name));
        }
    }

    #[test]
    fn matching_is_case_and_whitespace_insensitive() {
        assert_eq!(resolve("ROTATE"), Ok("rotate"));
        assert_eq!(resolve(" Rotate "), Ok("rotate"));
        assert_eq!(resolve("rotate"), Ok("rotate"));
    }

    #[test]
    fn near_miss_is_unknown() {
        assert_eq!(
            resolve("rotates"),
            Err(UnknownOperationError::Unknown("rotates".into()))
        );
    }

    #[test]
    fn unknown_error_keeps_original_spelling() {
        let err = resolve(" Sharpen").unwrap_err();
        assert_eq!(err.to_string(), "unknown transformation:  Sharpen");
    }

    #[test]
    fn blank_name_is_rejected_before_lookup() {
        assert_eq!(resolve("   "), Err(UnknownOperationError::EmptyName));
        assert_eq!(resolve(""), Err(UnknownOperationError::EmptyName));
    }

    #[test]
    fn same_instance_for_every_spelling() {
        let factory = OperationFactory::default();
        let a = factory.create(&TransformationStep::new("BLUR")).unwrap();
        let b = factory.create(&TransformationStep::new("blur")).unwrap();
        assert!(std::ptr::addr_eq(a, b));
    }
}
