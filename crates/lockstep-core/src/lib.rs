#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;
pub mod sink;
pub mod source;
pub mod value;

#[doc(hidden)]
pub mod prelude;

pub use error::{BoxedError, Error, ErrorKind, Result};
pub use sink::{ConsoleSink, Effect, EffectSink, MemorySink};
pub use source::{ElementSource, JsonLinesSource, VecSource};
pub use value::{Value, ValueKind};

/// Tracing target for core operations.
pub const TRACING_TARGET: &str = "lockstep_core";
