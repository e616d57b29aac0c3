//! Sequential OCR of queued items.
//!
//! The [`SequentialProcessor`] is the only consumer of its [`WorkQueue`], so it
//! never sees two items at once. Every queued item carries the queue
//! generation it was appended under. When a reset bumps the generation, any
//! work still in flight is finished but its result is thrown away.
//!
//! [`WorkQueue`]: super::work::WorkQueue

use std::sync::Arc;

use clap::Args;
use futures::FutureExt as _;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    engines::{EngineFactory, OcrEngine, RecognizeOptions},
    errors::PipelineError,
    prelude::*,
};

use super::{
    SharedState,
    events::{EventBus, SessionEvent},
    item::{ItemId, ItemSource, PageImage},
    lock_state,
    output::EntryContent,
    work::WorkFn,
};

/// Options controlling the processor.
#[derive(Args, Clone, Debug, Default)]
pub struct ProcessorOpts {
    /// Stop trying to start the OCR engine after this many consecutive
    /// failures. Later items fail immediately. By default, every item retries.
    #[clap(long)]
    pub max_engine_init_failures: Option<usize>,
}

/// Work for the processor.
#[derive(Debug)]
pub enum ProcessorInput {
    /// OCR one item, unless the queue has been reset since it was appended.
    Item { id: ItemId, generation: u64 },
    /// Every item of a submission has been queued ahead of this marker.
    EndOfBatch { generation: u64 },
    /// Does nothing. Waiting on it waits for everything queued before it.
    Barrier,
}

/// The OCR engine, started on first use.
///
/// Start-up failures are not cached, so the next item tries again, unless
/// `max_failures` consecutive attempts have already failed.
struct LazyEngine {
    factory: Arc<dyn EngineFactory>,
    engine: Option<Arc<dyn OcrEngine>>,
    consecutive_failures: usize,
    max_failures: Option<usize>,
}

impl LazyEngine {
    fn new(factory: Arc<dyn EngineFactory>, max_failures: Option<usize>) -> Self {
        Self {
            factory,
            engine: None,
            consecutive_failures: 0,
            max_failures,
        }
    }

    async fn get(&mut self) -> Result<Arc<dyn OcrEngine>, PipelineError> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }
        if let Some(max_failures) = self.max_failures
            && self.consecutive_failures >= max_failures
        {
            return Err(PipelineError::EngineInit {
                message: format!(
                    "gave up after {} failed attempts (see --max-engine-init-failures)",
                    self.consecutive_failures
                ),
            });
        }

        match self.factory.create().await {
            Ok(engine) => {
                debug!("started OCR engine");
                self.consecutive_failures = 0;
                self.engine = Some(engine.clone());
                Ok(engine)
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    consecutive_failures = self.consecutive_failures,
                    "OCR engine failed to start: {err:#}"
                );
                Err(PipelineError::EngineInit {
                    message: format!("{err:#}"),
                })
            }
        }
    }
}

/// Drains queued items one at a time.
pub struct SequentialProcessor {
    state: SharedState,
    events: EventBus,
    engine: tokio::sync::Mutex<LazyEngine>,
}

impl SequentialProcessor {
    /// Create a processor. The engine is not started until the first item
    /// needs it.
    pub fn new(
        state: SharedState,
        events: EventBus,
        factory: Arc<dyn EngineFactory>,
        opts: &ProcessorOpts,
    ) -> Self {
        Self {
            state,
            events,
            engine: tokio::sync::Mutex::new(LazyEngine::new(
                factory,
                opts.max_engine_init_failures,
            )),
        }
    }

    /// Wrap this processor as the work function of a
    /// [`super::work::WorkQueue`].
    pub fn into_work_fn(self: Arc<Self>) -> WorkFn<ProcessorInput, ()> {
        Arc::new(move |input: ProcessorInput| {
            let processor = self.clone();
            async move { processor.process(input).await }.boxed()
        })
    }

    /// Handle one unit of work.
    ///
    /// OCR failures are recorded on the item and are not errors here. An
    /// error means a bug, such as an illegal status transition.
    pub async fn process(&self, input: ProcessorInput) -> Result<()> {
        match input {
            ProcessorInput::Item { id, generation } => self.process_item(id, generation).await,
            ProcessorInput::EndOfBatch { generation } => {
                let state = lock_state(&self.state);
                if state.queue.generation() == generation {
                    info!(items = state.queue.len(), "batch complete");
                    self.events.emit(SessionEvent::BatchComplete);
                }
                Ok(())
            }
            ProcessorInput::Barrier => Ok(()),
        }
    }

    #[instrument(level = "debug", skip(self), fields(label = tracing::field::Empty))]
    async fn process_item(&self, id: ItemId, generation: u64) -> Result<()> {
        let (source, label) = {
            let mut state = lock_state(&self.state);
            if state.queue.generation() != generation {
                debug!("skipping item discarded by reset");
                return Ok(());
            }
            let source = state.queue.mark_processing(id)?;
            let label = state
                .queue
                .get(id)
                .map(|item| item.display_label().to_owned())
                .unwrap_or_default();
            self.events.emit(SessionEvent::ItemActivated(id));
            self.events
                .emit(SessionEvent::QueueChanged(state.queue.snapshot()));
            (source, label)
        };
        tracing::Span::current().record("label", label.as_str());

        let result = self.recognize(source).await;

        let mut state = lock_state(&self.state);
        if state.queue.generation() != generation {
            debug!("abandoning result for item discarded by reset");
            return Ok(());
        }
        match result {
            Ok(text) => {
                debug!(chars = text.len(), "recognized item");
                state.queue.mark_done(id, text.clone())?;
                state.output.append(label, EntryContent::Text(text));
            }
            Err(err) => {
                let err = PipelineError::item_recognition(&label, &err);
                warn!("{err}");
                state.queue.mark_error(id, err.to_string())?;
                state.output.append(label, EntryContent::Error);
            }
        }
        self.events
            .emit(SessionEvent::QueueChanged(state.queue.snapshot()));
        self.events
            .emit(SessionEvent::OutputChanged(state.output.snapshot()));
        Ok(())
    }

    async fn recognize(&self, source: ItemSource) -> Result<String> {
        let image = match source {
            ItemSource::Image(image) => image,
            ItemSource::File(path) => materialize(&path).await?,
        };
        let engine = self.engine.lock().await.get().await?;
        engine
            .recognize(&image, &RecognizeOptions::default())
            .await
    }
}

/// Read and decode a lazily-loaded image file.
async fn materialize(path: &Path) -> Result<PageImage> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {:?}", path.display()))?;
    spawn_blocking_propagating_panics(move || PageImage::decode(data))
        .await
        .with_context(|| format!("failed to decode {:?}", path.display()))
}

#[cfg(test)]
mod tests {
    use crate::pipeline::{
        item::{ItemOrigin, ItemStatus, NewItem},
        testing::{FakeEngine, FakeFactory},
    };

    use super::*;

    fn processor(
        factory: Arc<FakeFactory>,
        max_engine_init_failures: Option<usize>,
    ) -> (SequentialProcessor, SharedState) {
        let state = SharedState::default();
        let processor = SequentialProcessor::new(
            state.clone(),
            EventBus::default(),
            factory,
            &ProcessorOpts {
                max_engine_init_failures,
            },
        );
        (processor, state)
    }

    /// Queue pre-decoded images of the given widths.
    fn queue_images(state: &SharedState, widths: &[u32]) -> (Vec<ItemId>, u64) {
        let mut state = lock_state(state);
        let new_items = widths
            .iter()
            .map(|&width| NewItem {
                origin: ItemOrigin::Image {
                    name: format!("w{width}.png"),
                },
                source: ItemSource::Image(
                    PageImage::decode(crate::pipeline::item::tests::tiny_png(width, 1))
                        .expect("test image should decode"),
                ),
            })
            .collect();
        (state.queue.append(new_items), state.queue.generation())
    }

    async fn run_all(
        processor: &SequentialProcessor,
        ids: &[ItemId],
        generation: u64,
    ) -> Result<()> {
        for &id in ids {
            processor
                .process(ProcessorInput::Item { id, generation })
                .await?;
        }
        Ok(())
    }

    fn statuses(state: &SharedState) -> Vec<ItemStatus> {
        lock_state(state)
            .queue
            .items()
            .iter()
            .map(|item| item.status())
            .collect()
    }

    #[tokio::test]
    async fn engine_is_started_once_and_reused() -> Result<()> {
        let factory = Arc::new(FakeFactory::new(Arc::new(FakeEngine::default())));
        let (processor, state) = processor(factory.clone(), None);
        let (ids, generation) = queue_images(&state, &[1, 2, 3]);
        run_all(&processor, &ids, generation).await?;
        assert_eq!(factory.create_calls(), 1);
        assert_eq!(statuses(&state), vec![ItemStatus::Done; 3]);
        Ok(())
    }

    #[tokio::test]
    async fn engine_start_failures_are_retried_by_the_next_item() -> Result<()> {
        let factory =
            Arc::new(FakeFactory::new(Arc::new(FakeEngine::default())).failing_first(1));
        let (processor, state) = processor(factory.clone(), None);
        let (ids, generation) = queue_images(&state, &[1, 2, 3]);
        run_all(&processor, &ids, generation).await?;

        assert_eq!(factory.create_calls(), 2);
        assert_eq!(
            statuses(&state),
            vec![ItemStatus::Error, ItemStatus::Done, ItemStatus::Done]
        );
        let state = lock_state(&state);
        let error = state.queue.items()[0].snapshot().error.unwrap_or_default();
        assert!(error.contains("OCR engine failed to start"), "{error}");
        Ok(())
    }

    #[tokio::test]
    async fn engine_start_gives_up_after_max_failures() -> Result<()> {
        let factory = Arc::new(
            FakeFactory::new(Arc::new(FakeEngine::default())).failing_first(usize::MAX),
        );
        let (processor, state) = processor(factory.clone(), Some(2));
        let (ids, generation) = queue_images(&state, &[1, 2, 3, 4]);
        run_all(&processor, &ids, generation).await?;

        assert_eq!(factory.create_calls(), 2);
        assert_eq!(statuses(&state), vec![ItemStatus::Error; 4]);
        let state = lock_state(&state);
        let error = state.queue.items()[3].snapshot().error.unwrap_or_default();
        assert!(error.contains("gave up"), "{error}");
        assert_eq!(
            state.output.snapshot().matches(crate::pipeline::output::ERROR_MARKER).count(),
            4
        );
        Ok(())
    }

    #[tokio::test]
    async fn stale_items_are_skipped() -> Result<()> {
        let engine = Arc::new(FakeEngine::default());
        let factory = Arc::new(FakeFactory::new(engine.clone()));
        let (processor, state) = processor(factory, None);
        let (ids, generation) = queue_images(&state, &[1]);
        lock_state(&state).reset();
        run_all(&processor, &ids, generation).await?;
        assert!(engine.calls().is_empty());
        assert!(lock_state(&state).output.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn processing_an_item_twice_is_a_contract_violation() -> Result<()> {
        let factory = Arc::new(FakeFactory::new(Arc::new(FakeEngine::default())));
        let (processor, state) = processor(factory, None);
        let (ids, generation) = queue_images(&state, &[1]);
        run_all(&processor, &ids, generation).await?;
        let err = run_all(&processor, &ids, generation)
            .await
            .expect_err("second run should fail");
        let err = err
            .downcast_ref::<PipelineError>()
            .expect("should be a PipelineError");
        assert!(err.is_contract_violation());
        Ok(())
    }
}
