//! Externally observable effects and the sink capability that delivers them.
//!
//! The engine buffers effects per operation and releases them in source
//! order; a sink only ever sees an already-ordered sequence, so it needs no
//! reordering logic of its own.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::Value;

/// An externally observable effect produced by an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// A line appended to the console.
    Console {
        /// The rendered line.
        line: String,
    },
    /// A record stored in a named repository.
    Store {
        /// Repository the record is appended to.
        repository: String,
        /// The stored record.
        record: Value,
    },
    /// A named event emission.
    Event {
        /// Event name.
        name: String,
        /// Event payload.
        payload: Value,
    },
    /// The activation's returned payload.
    Response {
        /// The returned value.
        value: Value,
    },
}

impl Effect {
    /// Creates a console effect.
    pub fn console(line: impl Into<String>) -> Self {
        Effect::Console { line: line.into() }
    }

    /// Creates a store effect.
    pub fn store(repository: impl Into<String>, record: Value) -> Self {
        Effect::Store {
            repository: repository.into(),
            record,
        }
    }

    /// Creates an event effect.
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Effect::Event {
            name: name.into(),
            payload,
        }
    }

    /// Creates a response effect.
    pub fn response(value: Value) -> Self {
        Effect::Response { value }
    }
}

/// An abstract sink for ordered effect delivery.
///
/// Implementations are called strictly in release order and may suspend;
/// delivery of effect *k+1* begins only after delivery of effect *k*
/// returned.
#[async_trait]
pub trait EffectSink: Send + Sync {
    /// Delivers one effect to the outside world.
    async fn deliver(&self, effect: Effect) -> Result<()>;
}

/// A sink that collects effects in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    collected: Mutex<Vec<Effect>>,
}

impl MemorySink {
    /// Creates an empty collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything delivered so far, in delivery order.
    pub fn collected(&self) -> Vec<Effect> {
        self.collected.lock().expect("sink lock poisoned").clone()
    }

    /// Returns the number of delivered effects.
    pub fn len(&self) -> usize {
        self.collected.lock().expect("sink lock poisoned").len()
    }

    /// Returns whether nothing has been delivered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EffectSink for MemorySink {
    async fn deliver(&self, effect: Effect) -> Result<()> {
        self.collected.lock().expect("sink lock poisoned").push(effect);
        Ok(())
    }
}

/// A sink that renders effects through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    /// Creates a console sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EffectSink for ConsoleSink {
    async fn deliver(&self, effect: Effect) -> Result<()> {
        match effect {
            Effect::Console { line } => {
                tracing::info!(target: crate::TRACING_TARGET, "{line}");
            }
            Effect::Store { repository, record } => {
                tracing::info!(
                    target: crate::TRACING_TARGET,
                    repository = %repository,
                    record = %record,
                    "store"
                );
            }
            Effect::Event { name, payload } => {
                tracing::info!(
                    target: crate::TRACING_TARGET,
                    event = %name,
                    payload = %payload,
                    "emit"
                );
            }
            Effect::Response { value } => {
                tracing::info!(target: crate::TRACING_TARGET, value = %value, "response");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_preserves_delivery_order() {
        let sink = MemorySink::new();
        sink.deliver(Effect::console("a")).await.unwrap();
        sink.deliver(Effect::event("e", Value::Int(1))).await.unwrap();
        sink.deliver(Effect::response(Value::Null)).await.unwrap();

        let collected = sink.collected();
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0], Effect::console("a"));
        assert_eq!(collected[2], Effect::response(Value::Null));
    }

    #[test]
    fn test_effect_serde_shape() {
        let effect = Effect::store("users", Value::Int(7));
        let json = serde_json::to_string(&effect).unwrap();
        assert_eq!(json, r#"{"type":"store","repository":"users","record":7}"#);
    }
}
