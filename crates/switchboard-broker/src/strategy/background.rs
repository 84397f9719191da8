//! Deferred execution on a worker pool.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, trace};

use crate::handler::{HandlerResult, ResolvedCallable};

use super::{
    ExecutionStrategy, FailureReporter, Invocation, StrategyContext, StrategyKind,
    report_deferred,
};

/// Owned runtime that shuts down without blocking when dropped.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Threads that background handlers run on.
///
/// Either borrows a caller's tokio runtime or owns a dedicated one.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    owned: Option<Arc<OwnedRuntime>>,
}

impl WorkerPool {
    /// Use an existing runtime.
    #[must_use]
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
        }
    }

    /// Use the runtime of the calling context, if there is one.
    #[must_use]
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    /// Start a dedicated runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime's threads cannot be spawned.
    pub fn with_threads(worker_threads: usize, thread_name: &str) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name(thread_name)
            .build()?;

        debug!(
            worker_threads = worker_threads,
            thread_name = %thread_name,
            "Started background worker pool"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Queue a blocking job.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn_blocking(job));
    }

    /// Whether this pool owns its runtime.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("owned", &self.is_owned())
            .finish_non_exhaustive()
    }
}

/// Queues the handler onto a [`WorkerPool`] and returns immediately.
///
/// Failures cannot reach the firing thread. They are offered to the
/// extension host; if nobody handles them they are logged and the firing
/// behaves as if the subscription had been skipped.
#[derive(Clone)]
pub struct Background {
    pool: WorkerPool,
    reporter: Option<FailureReporter>,
}

impl Background {
    /// Create the strategy on `pool`.
    #[must_use]
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            reporter: None,
        }
    }
}

impl fmt::Debug for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Background")
            .field("pool", &self.pool)
            .field("initialized", &self.reporter.is_some())
            .finish()
    }
}

impl ExecutionStrategy for Background {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BACKGROUND
    }

    fn initialize(&mut self, context: &StrategyContext<'_>) {
        self.reporter = Some(FailureReporter::new(context, self.kind()));
    }

    fn invoke(&self, invocation: Invocation, callable: ResolvedCallable) -> HandlerResult {
        let reporter = self.reporter.clone();
        trace!(
            topic = %invocation.topic(),
            handler = %callable.handler(),
            "Queueing handler on worker pool"
        );

        self.pool.spawn(move || {
            if let Err(error) = callable.call_guarded(&invocation) {
                report_deferred(
                    reporter.as_ref(),
                    &StrategyKind::BACKGROUND,
                    invocation.topic(),
                    error,
                );
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_owned_pool_runs_jobs_on_named_threads() {
        let pool = WorkerPool::with_threads(2, "sb-test-worker").unwrap();
        assert!(pool.is_owned());

        let (tx, rx) = mpsc::channel();
        pool.spawn(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        });

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("sb-test-worker"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_current_pool_borrows_runtime() {
        let pool = WorkerPool::current().unwrap();
        assert!(!pool.is_owned());

        let (tx, rx) = tokio::sync::oneshot::channel();
        pool.spawn(move || {
            tx.send(7_u32).unwrap();
        });

        assert_eq!(rx.await.unwrap(), 7);
    }

    #[test]
    fn test_no_current_pool_outside_runtime() {
        assert!(WorkerPool::current().is_none());
    }
}
