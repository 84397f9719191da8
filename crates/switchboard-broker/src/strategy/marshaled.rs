//! Execution marshaled onto one designated thread.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::trace;

use crate::handler::{HandlerResult, ResolvedCallable};

use super::{
    ExecutionStrategy, FailureReporter, Invocation, StrategyContext, StrategyKind,
    report_deferred,
};

type Job = Box<dyn FnOnce() + Send>;

/// Posting side of a dispatch queue. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<Job>,
    thread: Arc<OnceLock<ThreadId>>,
}

/// Pumping side of a dispatch queue, owned by the designated thread.
///
/// The first thread that pumps the loop becomes the dispatch thread.
pub struct DispatchLoop {
    receiver: mpsc::UnboundedReceiver<Job>,
    thread: Arc<OnceLock<ThreadId>>,
}

impl Dispatcher {
    /// Create a connected dispatcher and loop.
    #[must_use]
    pub fn channel() -> (Self, DispatchLoop) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let thread = Arc::new(OnceLock::new());
        (
            Self {
                sender,
                thread: Arc::clone(&thread),
            },
            DispatchLoop { receiver, thread },
        )
    }

    /// Queue a job for the dispatch thread. Returns `false` if the loop is gone.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(job)).is_ok()
    }

    /// Whether the calling thread is the dispatch thread.
    #[must_use]
    pub fn is_dispatch_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("thread", &self.thread.get())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl DispatchLoop {
    fn claim(&self) {
        let _ = self.thread.set(thread::current().id());
    }

    /// Run every job queued so far and return how many ran.
    pub fn run_pending(&mut self) -> usize {
        self.claim();
        let mut ran: usize = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            ran = ran.saturating_add(1);
        }
        ran
    }

    /// Run jobs until every [`Dispatcher`] has been dropped.
    ///
    /// Blocks the calling thread; must not be called from within an async
    /// runtime.
    pub fn run(mut self) {
        self.claim();
        while let Some(job) = self.receiver.blocking_recv() {
            job();
        }
    }
}

impl fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("thread", &self.thread.get())
            .finish_non_exhaustive()
    }
}

/// Posts the handler to a [`Dispatcher`]'s thread.
///
/// When fired from the dispatch thread itself the handler runs inline and
/// its failure surfaces like a synchronous one. Otherwise failures follow
/// the [`Background`](super::Background) policy.
#[derive(Clone)]
pub struct Marshaled {
    dispatcher: Dispatcher,
    reporter: Option<FailureReporter>,
}

impl Marshaled {
    /// Create the strategy on `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            reporter: None,
        }
    }
}

impl fmt::Debug for Marshaled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marshaled")
            .field("dispatcher", &self.dispatcher)
            .field("initialized", &self.reporter.is_some())
            .finish()
    }
}

impl ExecutionStrategy for Marshaled {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MARSHALED
    }

    fn initialize(&mut self, context: &StrategyContext<'_>) {
        self.reporter = Some(FailureReporter::new(context, self.kind()));
    }

    fn invoke(&self, invocation: Invocation, callable: ResolvedCallable) -> HandlerResult {
        if self.dispatcher.is_dispatch_thread() {
            return callable.call_guarded(&invocation);
        }

        trace!(
            topic = %invocation.topic(),
            handler = %callable.handler(),
            "Posting handler to dispatch thread"
        );

        let reporter = self.reporter.clone();
        let topic = invocation.topic().to_string();
        let handler = callable.handler().to_string();
        let job_reporter = reporter.clone();
        let posted = self.dispatcher.post(move || {
            if let Err(error) = callable.call_guarded(&invocation) {
                report_deferred(
                    job_reporter.as_ref(),
                    &StrategyKind::MARSHALED,
                    invocation.topic(),
                    error,
                );
            }
        });

        if !posted {
            report_deferred(
                reporter.as_ref(),
                &StrategyKind::MARSHALED,
                &topic,
                anyhow!("dispatch loop for handler '{handler}' is closed"),
            );
        }
        Ok(())
    }
}
