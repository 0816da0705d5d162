// src/descriptor/guard.rs

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A boolean condition evaluated right before a command is sent.
///
/// Guards are either fixed values or lazily evaluated predicates; the
/// predicate is only called when the command is about to run.
#[derive(Clone)]
pub struct ExecutionGuard {
    predicate: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl ExecutionGuard {
    /// Lazily evaluated guard.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Guard with a value known up front.
    pub fn fixed(value: bool) -> Self {
        Self::when(move || value)
    }

    /// Guard that reads a shared flag at evaluation time.
    pub fn flag(flag: Arc<AtomicBool>) -> Self {
        Self::when(move || flag.load(Ordering::SeqCst))
    }

    pub fn evaluate(&self) -> bool {
        (self.predicate)()
    }
}

impl From<bool> for ExecutionGuard {
    fn from(value: bool) -> Self {
        ExecutionGuard::fixed(value)
    }
}

impl From<Arc<AtomicBool>> for ExecutionGuard {
    fn from(flag: Arc<AtomicBool>) -> Self {
        ExecutionGuard::flag(flag)
    }
}

impl fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExecutionGuard(..)")
    }
}
