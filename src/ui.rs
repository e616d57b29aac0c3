//! Application UI. For now, this is mostly progress bars.
//!
//! This is adapted from `substudy` by Eric Kidd, which is licensed under
//! Apache-2.0 OR MIT. Used with permission.

use std::{borrow::Cow, io, sync::Arc, time::Duration};

use futures::{StreamExt as _, channel::mpsc};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::{
    async_utils::JoinWorker,
    pipeline::{events::SessionEvent, item::ItemStatus},
};

/// Application UI state.
#[derive(Clone)]
pub struct Ui {
    /// Our progress bars. Shared between clones, so that every writer agrees
    /// on what is currently drawn.
    multi_progress: Arc<MultiProgress>,
}

impl Ui {
    /// Create a new UI. This sets up logging and and progress bars.
    pub fn init() -> Ui {
        let multi_progress = Arc::new(MultiProgress::new());
        Ui { multi_progress }
    }

    /// Create a new UI for unit tests.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        let multi_progress =
            Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()));
        Ui { multi_progress }
    }

    /// Hide all our progress bars completely, for when we're writing actual
    /// output to `stdout`.
    pub fn hide_progress_bars(&self) {
        self.multi_progress
            .set_draw_target(ProgressDrawTarget::hidden());
    }

    /// Get a writer than can be used to write to stderr, for use with `tracing`
    /// and other output code.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Get a reference to our progress bars.
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Display a one-line message to the user, without disturbing progress
    /// bars.
    pub fn display_message(&self, emoji: &str, msg: &str) {
        self.multi_progress
            .suspend(|| eprintln!("{emoji:2} {msg}"));
    }

    /// Create a new progress bar with default settings.
    pub fn new_progress_bar(&self, config: &ProgressConfig<'_>, len: u64) -> ProgressBar {
        let pb = ProgressBar::new(len).with_style(default_progress_style());
        let pb = self.multi_progress.add(pb);
        #[cfg(test)]
        pb.set_draw_target(ProgressDrawTarget::hidden());
        pb.set_prefix(config.emoji.to_owned());
        pb.set_message(config.msg.to_owned());
        pb.enable_steady_tick(Duration::from_millis(250));
        pb.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }

    /// Show a progress bar that follows a session's events until the session
    /// shuts down.
    pub fn watch_session(&self, events: mpsc::UnboundedReceiver<SessionEvent>) -> JoinWorker {
        let progress = SessionProgress::new(self);
        JoinWorker::from_handle(tokio::spawn(async move {
            events
                .for_each(|event| {
                    progress.update(&event);
                    futures::future::ready(())
                })
                .await;
            progress.finish();
            Ok(())
        }))
    }
}

/// Configuration for a progress bar.
pub struct ProgressConfig<'a> {
    /// Emoji to display in the progress bar.
    pub emoji: &'a str,
    /// Message to display in a running progress bar.
    pub msg: &'a str,
    /// Message to display in a progress bar when it is done.
    pub done_msg: &'a str,
}

/// A progress bar counting settled items.
pub struct SessionProgress {
    pb: ProgressBar,
}

impl SessionProgress {
    pub fn new(ui: &Ui) -> Self {
        let pb = ui.new_progress_bar(
            &ProgressConfig {
                emoji: "📄",
                msg: "Recognizing pages",
                done_msg: "Recognized pages",
            },
            0,
        );
        Self { pb }
    }

    /// Redraw for one event.
    pub fn update(&self, event: &SessionEvent) {
        match event {
            SessionEvent::QueueChanged(items) => {
                let settled = items.iter().filter(|item| item.status.is_terminal()).count();
                self.pb.set_length(items.len() as u64);
                self.pb.set_position(settled as u64);
                if let Some(active) = items
                    .iter()
                    .find(|item| item.status == ItemStatus::Processing)
                {
                    self.pb.set_message(active.display_label.clone());
                }
            }
            SessionEvent::DocumentFailed { name, .. } => {
                self.pb.println(format!("❌ skipped {name}"));
            }
            SessionEvent::ItemActivated(_)
            | SessionEvent::OutputChanged(_)
            | SessionEvent::BatchComplete => {}
        }
    }

    /// Settled and total item counts.
    #[cfg(test)]
    pub fn counts(&self) -> (u64, Option<u64>) {
        (self.pb.position(), self.pb.length())
    }

    pub fn finish(&self) {
        self.pb.finish_using_style();
    }
}

fn default_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:3}{msg:25} {pos:>4}/{len:4} {elapsed_precise} {wide_bar:.cyan/blue} {eta_precise}")
        .expect("bad progress bar template")
}

/// A writer which can used to write to `stderr`. It will hide and show progress
/// bars as needed, so that they don't interfere with the output.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

// The `tracing-indicatif` crate suggests that we should implement the following
// methods.
impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.multi_progress().suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.multi_progress().suspend(|| io::stderr().flush())
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_vectored(bufs))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_all(buf))
    }

    fn write_fmt(&mut self, fmt: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_fmt(fmt))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::{
        item::{ItemId, ItemOrigin, ItemSnapshot},
        events::EventBus,
    };

    use super::*;

    fn snapshot(id: u64, status: ItemStatus) -> ItemSnapshot {
        let origin = ItemOrigin::Image {
            name: format!("{id}.png"),
        };
        ItemSnapshot {
            id: ItemId(id),
            display_label: origin.display_label(),
            page_info: None,
            origin,
            status,
            text: None,
            error: None,
        }
    }

    #[test]
    fn progress_counts_settled_items() {
        let progress = SessionProgress::new(&Ui::init_for_tests());
        progress.update(&SessionEvent::QueueChanged(vec![
            snapshot(0, ItemStatus::Done),
            snapshot(1, ItemStatus::Error),
            snapshot(2, ItemStatus::Processing),
            snapshot(3, ItemStatus::Pending),
        ]));
        assert_eq!(progress.counts(), (2, Some(4)));
        progress.update(&SessionEvent::QueueChanged(vec![]));
        assert_eq!(progress.counts(), (0, Some(0)));
    }

    #[tokio::test]
    async fn watcher_stops_when_events_end() -> anyhow::Result<()> {
        let bus = EventBus::default();
        let worker = Ui::init_for_tests().watch_session(bus.subscribe());
        bus.emit(SessionEvent::BatchComplete);
        drop(bus);
        worker.join().await
    }
}
