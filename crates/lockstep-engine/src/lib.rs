#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod binding;
pub mod config;
pub mod context;
pub mod engine;
mod error;
pub mod graph;
pub mod metrics;
pub mod op;
pub mod pipeline;
pub mod pool;
mod projector;
mod scheduler;

#[doc(hidden)]
pub mod prelude;

pub use engine::{ActivationOutcome, Engine};
pub use error::{EngineError, EngineResult};
