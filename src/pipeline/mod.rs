//! The scanning pipeline.
//!
//! Submitted files flow through here in one direction:
//!
//! 1. [`expander::PageExpander`] turns each file into one item per page.
//! 2. [`queue::QueueStore`] holds the items in submission order.
//! 3. [`processor::SequentialProcessor`] OCRs them strictly one at a time.
//! 4. [`output::OutputArtifact`] accumulates the recognized text, in queue
//!    order.
//!
//! [`session::Session`] ties these together and is the only thing the command
//! line code talks to.

use std::sync::{Arc, Mutex, MutexGuard};

pub mod events;
pub mod expander;
pub mod item;
pub mod output;
pub mod processor;
pub mod queue;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod work;

/// Everything that must change together when an item settles.
///
/// The queue and the output live behind one lock so that observers never see
/// an item marked `Done` without its text in the output, or vice versa.
#[derive(Debug, Default)]
pub struct PipelineState {
    /// The item queue.
    pub queue: queue::QueueStore,
    /// The combined text.
    pub output: output::OutputArtifact,
}

impl PipelineState {
    /// Clear both the queue and the output.
    pub fn reset(&mut self) {
        self.queue.reset();
        self.output.reset();
    }
}

/// [`PipelineState`] shared between the session and its processor.
pub type SharedState = Arc<Mutex<PipelineState>>;

/// Lock the shared state. Never hold the guard across an `.await`.
pub(crate) fn lock_state(state: &SharedState) -> MutexGuard<'_, PipelineState> {
    state.lock().expect("pipeline state lock poisoned")
}
