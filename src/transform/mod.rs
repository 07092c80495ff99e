//! Image operations, backed by the pure-Rust `image` crate.
//!
//! | Kind | Config | Engine call |
//! |---|---|---|
//! | **resize** | `width`, `height` | Lanczos3 `resize_exact` (upscale) / `resize_to_fill` |
//! | **grayscale** | none | `grayscale` |
//! | **trim** | `threshold` (default 10) | border scan against white + `crop_imm` |
//! | **blur** | `sigma` | Gaussian `blur` |
//! | **rotate** | `angle` ∈ {90, 180, 270} | `rotate90` / `rotate180` / `rotate270` |
//!
//! The module is split into:
//! - **Params**: typed per-kind configs decoded from the untyped step map
//! - **Calculations**: pure geometry (resize branch selection, trim bounds)
//! - **Codec**: format sniffing, decode, encode-in-source-format
//! - **Operation**: the [`Operation`] trait every kind implements
//! - **Operations**: the five built-in kinds
//! - **Factory**: [`OperationFactory`], name → operation

pub mod calculations;
pub mod codec;
pub mod factory;
pub mod operation;
pub mod operations;
pub mod params;

pub use factory::{OPERATION_NAMES, OperationFactory, UnknownOperationError};
pub use operation::{Operation, TransformError};
pub use operations::{Blur, Grayscale, Resize, Rotate, Trim};
pub use params::{BlurConfig, ConfigError, ResizeConfig, RotateConfig, Rotation, TrimConfig};
