//! Bounded-concurrency runner.
//!
//! Futures run on the calling task (no spawning), gated by a semaphore so at
//! most `max_concurrent` bodies are in flight. Aborting drops every future
//! that has not finished; those that never got a permit never start.

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::future::Future;
use std::num::NonZeroUsize;
use tokio::sync::Semaphore;

/// Whether to keep going after an item finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep running
    Continue,
    /// Drop everything still pending
    Abort,
}

/// Outputs of a run, in item order. `None` for items that never finished.
#[derive(Debug)]
pub struct RunReport<T> {
    /// Per-item output
    pub outputs: Vec<Option<T>>,
    /// Whether `observe` stopped the run
    pub aborted: bool,
}

impl<T> RunReport<T> {
    /// Outputs of the items that finished, in item order.
    pub fn finished(self) -> impl Iterator<Item = (usize, T)> {
        self.outputs
            .into_iter()
            .enumerate()
            .filter_map(|(i, out)| out.map(|o| (i, o)))
    }
}

/// Runs items with at most `max_concurrent` in flight.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRunner {
    max_concurrent: NonZeroUsize,
}

impl BoundedRunner {
    /// Create a runner.
    pub fn new(max_concurrent: NonZeroUsize) -> Self {
        Self { max_concurrent }
    }

    /// Concurrency limit.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.get()
    }

    /// Run `f` over every item. `observe` sees each output as it finishes
    /// and may abort the rest.
    pub async fn run<I, T, F, Fut, O>(&self, items: Vec<I>, f: F, mut observe: O) -> RunReport<T>
    where
        F: Fn(usize, I) -> Fut,
        Fut: Future<Output = T>,
        O: FnMut(usize, &T) -> Flow,
    {
        let sem = Semaphore::new(self.max_concurrent.get());
        let mut outputs: Vec<Option<T>> = (0..items.len()).map(|_| None).collect();
        let mut aborted = false;

        {
            let sem = &sem;
            let f = &f;
            let mut futs: FuturesUnordered<_> = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| async move {
                    // The semaphore is never closed, so acquire cannot fail.
                    let _permit = sem.acquire().await.ok();
                    (i, f(i, item).await)
                })
                .collect();

            while let Some((i, output)) = futs.next().await {
                let flow = observe(i, &output);
                outputs[i] = Some(output);
                if flow == Flow::Abort {
                    aborted = true;
                    break;
                }
            }
        }

        RunReport { outputs, aborted }
    }
}
