//! # Henkan
//!
//! A declarative image transformation pipeline. A request names an ordered
//! chain of operations (`resize`, `grayscale`, `trim`, `blur`, `rotate`), each
//! with a small JSON config, and the pipeline threads the image bytes through
//! them in order.
//!
//! # Architecture
//!
//! ```text
//! chain JSON ──► Pipeline::validate_chain          (no pixels touched)
//!
//! bytes ──► Pipeline::execute
//!             plan:  resolve + validate every step
//!             run:   step 1 → step 2 → … → step n   (decode, mutate, encode)
//!         ──► bytes in the source format
//! ```
//!
//! Around the pipeline sits a small job system: [`service::ImageService`]
//! records each request, fetches and stores the source once, and queues a
//! job; [`worker::Worker`] drains the queue in parallel, retrying transient
//! failures.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`transform`] | The [`Operation`](transform::Operation) trait, the five built-in operations, and the name → operation factory |
//! | [`pipeline`] | Validation and execution of a chain, with step-attributed errors |
//! | [`cancel`] | Cooperative cancellation token with optional deadline |
//! | [`types`] | Chain, step, record and job types shared across modules |
//! | [`config`] | `henkan.toml` loading, merging and validation |
//! | [`store`] | Object storage port + filesystem implementation |
//! | [`repository`] | Image record port + JSON-file implementation |
//! | [`messaging`] | Job queue and status notification ports + in-process implementations |
//! | [`fetch`] | Source retrieval port + local-file and HTTP implementations |
//! | [`service`] | Create / update / process / list / delete orchestration |
//! | [`worker`] | Parallel queue consumer with retries |
//! | [`logging`] | `tracing` subscriber setup for the binary |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Bytes In, Bytes Out
//!
//! Every step is a full decode → mutate → encode round trip in the source
//! format. Steps never share decoded state, so any operation can be tested on
//! its own with plain encoded buffers, and a chain's intermediate results are
//! always valid images.
//!
//! ## Closed Operation Set
//!
//! The factory dispatches with a `match` over the five known names. Each slot
//! holds an `Arc<dyn Operation>`, so tests swap in recording mocks without
//! touching the dispatch.
//!
//! ## Validate Everything First
//!
//! Execution resolves and validates the whole chain before the first
//! transform runs. A chain broken at step k fails without spending CPU on
//! steps 1..k-1, and the error still names step k.
//!
//! ## Pure-Rust Imaging
//!
//! All pixel work goes through the `image` crate: Lanczos3 resampling,
//! Gaussian blur, lossless rotation. No system libraries are required.

pub mod cancel;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod messaging;
pub mod output;
pub mod pipeline;
pub mod repository;
pub mod service;
pub mod store;
pub mod transform;
pub mod types;
pub mod worker;

pub use cancel::CancellationToken;
pub use pipeline::{ChainError, ChainErrorKind, Pipeline};
pub use types::{TransformationChain, TransformationStep};
