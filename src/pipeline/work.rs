//! A work queue drained by a single background task.
//!
//! Work items are handled strictly one at a time, in the order they were
//! submitted. The next item is not even looked at until the previous one has
//! settled, so "never two at once" is a property of the queue itself rather
//! than of whoever submits the work.
//!
//! Submitting never blocks. Callers may either fire and forget with
//! [`WorkQueueHandle::enqueue`], or wait for a result with
//! [`WorkQueueHandle::process_blocking`]. Because processing is ordered,
//! waiting on an item also means every earlier item has settled.

use std::sync::Arc;

use futures::{
    StreamExt as _,
    channel::{mpsc, oneshot},
};

use crate::{
    async_utils::{BoxedFuture, JoinWorker},
    prelude::*,
};

/// Work items contain an input, and optionally a one-shot channel on which to
/// return the result.
#[derive(Debug)]
pub struct WorkItem<Input, Output> {
    /// The input to the work item.
    pub input: Input,

    /// Where to send the result, if anybody is waiting for it.
    pub tx: Option<oneshot::Sender<Result<Output>>>,
}

/// An async work function.
pub type WorkFn<Input, Output> =
    Arc<dyn Fn(Input) -> BoxedFuture<Result<Output>> + Send + Sync + 'static>;

/// A handle to a [`WorkQueue`].
///
/// This is basically just a wrapper around a [`mpsc::UnboundedSender`]. It
/// can be cloned cheaply and passed around.
pub struct WorkQueueHandle<Input, Output> {
    /// Our sender.
    tx: mpsc::UnboundedSender<WorkItem<Input, Output>>,
}

impl<Input, Output> WorkQueueHandle<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// Queue an input without waiting for its result.
    pub fn enqueue(&self, input: Input) -> Result<()> {
        self.tx
            .unbounded_send(WorkItem { input, tx: None })
            .map_err(|_| anyhow!("work queue has shut down"))
    }

    /// Queue an input and wait for its output.
    pub async fn process_blocking(&self, input: Input) -> Result<Output> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .unbounded_send(WorkItem {
                input,
                tx: Some(tx),
            })
            .map_err(|_| anyhow!("work queue has shut down"))?;
        rx.await.context("failed to receive work item result")?
    }
}

// Override `Clone` so that `Input` and `Output` are not required to be `Clone`.
impl<Input, Output> Clone for WorkQueueHandle<Input, Output> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// A queue of work items processed sequentially by one background task.
pub struct WorkQueue<Input, Output> {
    /// Queue for submitting work items.
    tx: mpsc::UnboundedSender<WorkItem<Input, Output>>,
}

impl<Input, Output> WorkQueue<Input, Output>
where
    Input: Send + 'static,
    Output: Send + 'static,
{
    /// Create a new work queue and spawn its worker.
    ///
    /// The worker exits once the queue and every handle have been dropped.
    pub fn new(work_fn: WorkFn<Input, Output>) -> (Self, JoinWorker) {
        let (tx, rx) = mpsc::unbounded::<WorkItem<Input, Output>>();
        let worker = tokio::spawn(async move {
            // `for_each` polls one future to completion before pulling the
            // next item.
            rx.for_each(|item| {
                let work_fn = work_fn.clone();
                async move {
                    let result = work_fn(item.input).await;
                    match item.tx {
                        Some(tx) => {
                            if tx.send(result).is_err() {
                                debug!(
                                    "failed to send work item result because receiver was dropped"
                                );
                            }
                        }
                        None => {
                            if let Err(err) = result {
                                error!("work item failed: {:?}", err);
                            }
                        }
                    }
                }
            })
            .await;
            Ok(())
        });
        (Self { tx }, JoinWorker::from_handle(worker))
    }

    /// Get a handle for submitting items to the work queue.
    pub fn handle(&self) -> WorkQueueHandle<Input, Output> {
        WorkQueueHandle {
            tx: self.tx.clone(),
        }
    }
}
