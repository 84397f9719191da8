//! Inline execution on the firing thread.

use crate::handler::{HandlerResult, ResolvedCallable};

use super::{ExecutionStrategy, Invocation, StrategyKind};

/// Runs the handler before `fire` moves on to the next subscription.
///
/// A failing or panicking handler surfaces to the firing loop, which offers
/// it to the extension host and otherwise returns it to whoever raised the
/// event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synchronous;

impl Synchronous {
    /// Create the strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionStrategy for Synchronous {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SYNCHRONOUS
    }

    fn invoke(&self, invocation: Invocation, callable: ResolvedCallable) -> HandlerResult {
        callable.call_guarded(&invocation)
    }
}
