//! A scanning session: the commands a front end may issue, and the events it
//! may watch.

use std::sync::Arc;

use futures::channel::mpsc;

use crate::{
    async_utils::JoinWorker,
    engines::EngineFactory,
    errors::PipelineError,
    prelude::*,
};

use super::{
    SharedState,
    events::{EventBus, SessionEvent},
    expander::{PageExpander, SubmittedFile},
    item::{ItemId, ItemSnapshot},
    lock_state,
    processor::{ProcessorInput, ProcessorOpts, SequentialProcessor},
    queue::Mode,
    work::{WorkQueue, WorkQueueHandle},
};

/// What happened to a submission.
#[derive(Debug, Default)]
pub struct SubmitReport {
    /// Items queued, in order.
    pub queued: Vec<ItemId>,
    /// Documents which were skipped entirely.
    pub failed_documents: Vec<PipelineError>,
}

/// Owns the queue, the output and the processor.
///
/// Must be created inside a Tokio runtime.
pub struct Session {
    state: SharedState,
    events: EventBus,
    expander: PageExpander,
    work: WorkQueueHandle<ProcessorInput, ()>,
    worker: JoinWorker,
}

impl Session {
    /// Start a session and its processor.
    pub fn new(
        expander: PageExpander,
        engine_factory: Arc<dyn EngineFactory>,
        opts: &ProcessorOpts,
    ) -> Self {
        let state = SharedState::default();
        let events = EventBus::default();
        let processor = Arc::new(SequentialProcessor::new(
            state.clone(),
            events.clone(),
            engine_factory,
            opts,
        ));
        let (queue, worker) = WorkQueue::new(processor.into_work_fn());
        Self {
            state,
            events,
            expander,
            work: queue.handle(),
            worker,
        }
    }

    /// Watch this session's events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn mode(&self) -> Mode {
        lock_state(&self.state).queue.mode()
    }

    /// Change the mode used by later submissions.
    pub fn set_mode(&self, mode: Mode) {
        debug!(?mode, "setting mode");
        lock_state(&self.state).queue.set_mode(mode);
    }

    /// Submit files using the current mode.
    pub async fn submit(&self, files: Vec<SubmittedFile>) -> Result<SubmitReport> {
        let mode = self.mode();
        self.submit_files(files, mode).await
    }

    /// Switch to `mode`, then submit files.
    pub async fn submit_with_mode(
        &self,
        files: Vec<SubmittedFile>,
        mode: Mode,
    ) -> Result<SubmitReport> {
        self.set_mode(mode);
        self.submit_files(files, mode).await
    }

    /// Expand and queue files, one whole document at a time.
    ///
    /// Returns once everything has been queued, without waiting for OCR. A
    /// document which can't be read is skipped and reported, and the rest of
    /// the submission carries on.
    #[instrument(level = "debug", skip_all, fields(mode = ?mode, files = files.len()))]
    async fn submit_files(
        &self,
        mut files: Vec<SubmittedFile>,
        mode: Mode,
    ) -> Result<SubmitReport> {
        if files.is_empty() {
            debug!("nothing submitted");
            return Ok(SubmitReport::default());
        }
        let generation = {
            let mut state = lock_state(&self.state);
            if mode == Mode::Single {
                if files.len() > 1 {
                    warn!(
                        dropped = files.len() - 1,
                        "single mode only uses the first file of a submission"
                    );
                    files.truncate(1);
                }
                state.reset();
                self.emit_cleared();
            }
            state.queue.generation()
        };

        let mut report = SubmitReport::default();
        for file in &files {
            match self.expander.expand_document(file).await {
                Ok(new_items) => {
                    let mut state = lock_state(&self.state);
                    if state.queue.generation() != generation {
                        debug!("session was reset during submission, stopping");
                        return Ok(report);
                    }
                    let ids = state.queue.append(new_items);
                    for &id in &ids {
                        self.work.enqueue(ProcessorInput::Item { id, generation })?;
                    }
                    debug!(name = %file.name, items = ids.len(), "queued document");
                    report.queued.extend(ids);
                    self.events
                        .emit(SessionEvent::QueueChanged(state.queue.snapshot()));
                }
                Err(err) => {
                    warn!("{err}");
                    self.events.emit(SessionEvent::DocumentFailed {
                        name: file.name.clone(),
                        error: err.to_string(),
                    });
                    report.failed_documents.push(err);
                }
            }
        }
        self.work.enqueue(ProcessorInput::EndOfBatch { generation })?;
        Ok(report)
    }

    /// Clear the queue and the output.
    ///
    /// An item being recognized right now finishes, but its result is
    /// dropped. Safe to call at any time, any number of times.
    pub fn reset(&self) {
        let mut state = lock_state(&self.state);
        if state.queue.is_empty() && state.output.is_empty() {
            debug!("resetting an empty session");
        } else {
            debug!(items = state.queue.len(), "resetting session");
        }
        state.reset();
        self.emit_cleared();
    }

    fn emit_cleared(&self) {
        self.events.emit(SessionEvent::QueueChanged(vec![]));
        self.events.emit(SessionEvent::OutputChanged(String::new()));
    }

    /// Wait until everything queued so far has settled.
    pub async fn wait_idle(&self) -> Result<()> {
        self.work.process_blocking(ProcessorInput::Barrier).await
    }

    /// Snapshots of every item, in queue order.
    pub fn items(&self) -> Vec<ItemSnapshot> {
        lock_state(&self.state).queue.snapshot()
    }

    /// The combined text so far.
    pub fn output_text(&self) -> String {
        lock_state(&self.state).output.snapshot()
    }

    /// Let queued work finish, then stop the processor.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.work);
        self.worker.join().await
    }
}
