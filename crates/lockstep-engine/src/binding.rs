//! Per-activation single-assignment binding store.
//!
//! Each binding is a write-once slot backed by a `tokio::sync::watch`
//! channel: awaiting registers a continuation that the resolving write
//! wakes, so `await_value` never busy-spins, and reading an already
//! resolved slot is a single O(1) borrow that never suspends.

use std::collections::HashMap;
use std::sync::Arc;

use lockstep_core::Value;
use tokio::sync::watch;

use crate::error::{EngineError, EngineResult};
use crate::op::OpIndex;

/// Tracing target for binding store operations.
const TRACING_TARGET: &str = "lockstep_engine::binding";

/// Lifecycle of a binding slot.
///
/// Transitions are one-way: `Unbound → Pending → Resolved | Failed`.
/// Once resolved or failed a binding never changes state or value.
#[derive(Debug, Clone, Default)]
pub enum BindingState {
    /// Declared, no computation started.
    #[default]
    Unbound,
    /// A computation has started but not completed.
    Pending,
    /// The producing operation completed with a value.
    Resolved(Arc<Value>),
    /// The producing operation failed.
    Failed(Arc<EngineError>),
}

impl BindingState {
    /// Returns whether the slot reached a final state.
    pub fn is_settled(&self) -> bool {
        matches!(self, BindingState::Resolved(_) | BindingState::Failed(_))
    }
}

#[derive(Debug)]
struct Slot {
    producer: OpIndex,
    state: watch::Sender<BindingState>,
}

/// The per-activation namespace of write-once bindings.
#[derive(Debug, Default)]
pub struct BindingStore {
    slots: HashMap<String, Slot>,
}

impl BindingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a binding with its unique producer.
    ///
    /// Declaring the same name twice is a build error: the graph builder
    /// must guarantee each name is produced by exactly one operation.
    pub fn declare(&mut self, name: impl Into<String>, producer: OpIndex) -> EngineResult<()> {
        let name = name.into();
        if let Some(existing) = self.slots.get(&name) {
            return Err(EngineError::DuplicateProducer {
                name,
                first: existing.producer,
                second: producer,
            });
        }
        self.slots.insert(
            name,
            Slot {
                producer,
                state: watch::Sender::new(BindingState::Unbound),
            },
        );
        Ok(())
    }

    /// Returns the number of declared bindings.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns whether no bindings are declared.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns whether `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Returns the producer of `name`, if declared.
    pub fn producer_of(&self, name: &str) -> Option<OpIndex> {
        self.slots.get(name).map(|slot| slot.producer)
    }

    /// Marks a binding as having a started computation.
    ///
    /// No-op if the slot already advanced past `Unbound`.
    pub fn mark_pending(&self, name: &str) -> EngineResult<()> {
        let slot = self.slot(name)?;
        slot.state.send_if_modified(|state| {
            if matches!(state, BindingState::Unbound) {
                *state = BindingState::Pending;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// Resolves a binding with its final value, waking all awaiters.
    pub fn resolve(&self, name: &str, value: Value) -> EngineResult<()> {
        self.settle(name, BindingState::Resolved(Arc::new(value)))
    }

    /// Fails a binding, waking all awaiters with the error.
    pub fn fail(&self, name: &str, error: Arc<EngineError>) -> EngineResult<()> {
        self.settle(name, BindingState::Failed(error))
    }

    /// Returns the current state without suspending.
    pub fn peek(&self, name: &str) -> Option<BindingState> {
        self.slots.get(name).map(|slot| slot.state.borrow().clone())
    }

    /// Waits until the binding settles, returning the value or the failure.
    ///
    /// A failed dependency surfaces as [`EngineError::BindingFailed`] with
    /// the originating cause attached.
    pub async fn await_value(&self, name: &str) -> EngineResult<Arc<Value>> {
        let slot = self.slot(name)?;
        let mut rx = slot.state.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                BindingState::Resolved(value) => return Ok(value),
                BindingState::Failed(cause) => {
                    return Err(EngineError::BindingFailed {
                        binding: name.to_owned(),
                        cause,
                    });
                }
                BindingState::Unbound | BindingState::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(EngineError::Internal(format!(
                    "binding `{name}` dropped before settling"
                )));
            }
        }
    }

    fn slot(&self, name: &str) -> EngineResult<&Slot> {
        self.slots
            .get(name)
            .ok_or_else(|| EngineError::Internal(format!("binding `{name}` not declared")))
    }

    fn settle(&self, name: &str, next: BindingState) -> EngineResult<()> {
        let slot = self.slot(name)?;
        let mut violated = false;
        slot.state.send_if_modified(|state| {
            if state.is_settled() {
                violated = true;
                false
            } else {
                tracing::trace!(
                    target: TRACING_TARGET,
                    binding = %name,
                    failed = matches!(next, BindingState::Failed(_)),
                    "binding settled"
                );
                *state = next.clone();
                true
            }
        });
        if violated {
            return Err(EngineError::Internal(format!(
                "binding `{name}` written twice"
            )));
        }
        Ok(())
    }
}
