//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types for ergonomic imports:
//!
//! ```rust
//! use lockstep_core::prelude::*;
//! ```

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::sink::{Effect, EffectSink, MemorySink};
pub use crate::source::{ElementSource, VecSource};
pub use crate::value::{Value, ValueKind};
