//! Step execution contract.
//!
//! A step is anything implementing [`StepHandler`]: a single async method
//! that reads the shared [`ExecutionContext`], observes a cancellation token,
//! and returns a [`StepResult`]. The engine may call it several times for the
//! same step number, so implementations must be safe to re-invoke.
//!
//! Follows the same pattern as the other async ports in this workspace:
//! 1. `StepHandler` uses RPITIT for ergonomic implementations
//! 2. `StepHandlerDyn` is the object-safe version with boxed futures
//! 3. A blanket impl bridges every `StepHandler` to `StepHandlerDyn`

use std::future::Future;

use futures_util::future::BoxFuture;
use stepwise_types::workflow::StepResult;
use tokio_util::sync::CancellationToken;

use super::context::ExecutionContext;

/// Execution contract for one workflow step.
pub trait StepHandler: Send + Sync {
    /// Run one attempt of the step.
    ///
    /// Long-running implementations should watch `cancel` and return early
    /// once it fires; the engine discards whatever they return in that case.
    fn execute(
        &self,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> impl Future<Output = StepResult> + Send;
}

/// Object-safe version of [`StepHandler`] with boxed futures.
///
/// Exists so a definition can hold heterogeneous steps behind
/// `Arc<dyn StepHandlerDyn>`.
pub trait StepHandlerDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, StepResult>;
}

impl<T: StepHandler> StepHandlerDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(self.execute(ctx, cancel))
    }
}

/// Adapts a closure to [`StepHandler`].
///
/// The closure receives an owned snapshot of the context and a clone of the
/// cancellation token, so the returned future can be `async move`.
pub struct FnStep<F> {
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> StepHandler for FnStep<F>
where
    F: Fn(ExecutionContext, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = StepResult> + Send,
{
    fn execute(
        &self,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> impl Future<Output = StepResult> + Send {
        (self.f)(ctx.clone(), cancel.clone())
    }
}
