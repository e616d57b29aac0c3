//! Fakes for exercising the pipeline without Poppler or Tesseract installed.
//!
//! Every fake image encodes its identity in its width, so `FakeEngine` can
//! "recognize" `text-<width>` and tests can tell pages apart.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tempfile::TempDir;
use tokio::sync::Notify;

use crate::{
    engines::{EngineFactory, OcrEngine, RecognizeOptions},
    pipeline::{
        expander::SubmittedFile,
        item::{PageImage, tests::tiny_png},
    },
    prelude::*,
    rasterize::{RasterDocument, Rasterizer},
};

/// A scratch directory holding submitted files.
pub(crate) struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self {
            dir: TempDir::with_prefix("scan-queue-test").expect("failed to create tempdir"),
        }
    }

    /// Write a PNG `width` pixels wide.
    pub(crate) fn image(&self, name: &str, width: u32) -> SubmittedFile {
        let path = self.dir.path().join(name);
        std::fs::write(&path, tiny_png(width, 1)).expect("failed to write test image");
        SubmittedFile::from_path(path)
    }

    /// Write a placeholder PDF. Its pages come from [`FakeRasterizer`].
    pub(crate) fn pdf(&self, name: &str) -> SubmittedFile {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"%PDF-1.7\n%fake\n").expect("failed to write test PDF");
        SubmittedFile::from_path(path)
    }

    /// A path in the fixture which does not exist.
    pub(crate) fn missing(&self, name: &str) -> SubmittedFile {
        SubmittedFile::from_path(self.dir.path().join(name))
    }
}

/// How [`FakeRasterizer`] treats one PDF.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakePdf {
    pub(crate) pages: usize,
    /// Page `p` is rendered `width_base + p` pixels wide.
    pub(crate) width_base: u32,
    pub(crate) fail_open: bool,
    pub(crate) fail_page: Option<usize>,
}

impl FakePdf {
    pub(crate) fn pages(pages: usize, width_base: u32) -> Self {
        Self {
            pages,
            width_base,
            ..Self::default()
        }
    }
}

/// A [`Rasterizer`] serving [`FakePdf`]s by file name.
#[derive(Default)]
pub(crate) struct FakeRasterizer {
    pdfs: HashMap<String, FakePdf>,
    gates: HashMap<String, Arc<Gate>>,
    renders: Arc<AtomicUsize>,
}

impl FakeRasterizer {
    pub(crate) fn with_pdf(mut self, name: &str, pdf: FakePdf) -> Self {
        self.pdfs.insert(name.to_owned(), pdf);
        self
    }

    /// Hold `open_document` for `name` until the gate is released.
    pub(crate) fn gated_on(mut self, name: &str, gate: Arc<Gate>) -> Self {
        self.gates.insert(name.to_owned(), gate);
        self
    }

    /// How many pages have been rendered so far?
    pub(crate) fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn open_document(&self, path: &Path) -> Result<Box<dyn RasterDocument>> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(gate) = self.gates.get(&name) {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        let pdf = self
            .pdfs
            .get(&name)
            .cloned()
            .ok_or_else(|| anyhow!("{name} is not a PDF"))?;
        if pdf.fail_open {
            return Err(anyhow!("{name} is corrupt"));
        }
        Ok(Box::new(FakeDocument {
            pdf,
            renders: self.renders.clone(),
        }))
    }
}

struct FakeDocument {
    pdf: FakePdf,
    renders: Arc<AtomicUsize>,
}

#[async_trait]
impl RasterDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.pdf.pages
    }

    async fn render_page(&self, page: usize, _scale: f32) -> Result<PageImage> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.pdf.fail_page == Some(page) {
            return Err(anyhow!("page {page} is damaged"));
        }
        let width = self.pdf.width_base + u32::try_from(page)?;
        PageImage::decode(tiny_png(width, 1))
    }
}

/// Lets a test hold the engine in the middle of a recognition.
#[derive(Default)]
pub(crate) struct Gate {
    pub(crate) started: Notify,
    pub(crate) release: Notify,
}

/// An [`OcrEngine`] which reads the image width back as text.
#[derive(Default)]
pub(crate) struct FakeEngine {
    failing_widths: HashSet<u32>,
    latency: HashMap<u32, Duration>,
    gate: Option<(u32, Arc<Gate>)>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<u32>>,
}

impl FakeEngine {
    pub(crate) fn failing_on(mut self, width: u32) -> Self {
        self.failing_widths.insert(width);
        self
    }

    pub(crate) fn with_latency(mut self, width: u32, latency: Duration) -> Self {
        self.latency.insert(width, latency);
        self
    }

    pub(crate) fn gated_on(mut self, width: u32, gate: Arc<Gate>) -> Self {
        self.gate = Some((width, gate));
        self
    }

    /// The most recognitions we ever saw running at once.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// The widths we were asked to recognize, in order.
    pub(crate) fn calls(&self) -> Vec<u32> {
        self.calls.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl OcrEngine for FakeEngine {
    async fn recognize(
        &self,
        image: &PageImage,
        options: &RecognizeOptions,
    ) -> Result<String> {
        assert!(options.auto_rotate, "pipeline should always auto-rotate");
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(image.width);

        if let Some((width, gate)) = &self.gate
            && *width == image.width
        {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        if let Some(latency) = self.latency.get(&image.width) {
            tokio::time::sleep(*latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing_widths.contains(&image.width) {
            Err(anyhow!("engine choked on width {}", image.width))
        } else {
            Ok(format!("text-{}", image.width))
        }
    }
}

/// An [`EngineFactory`] which can be told to fail a number of times first.
pub(crate) struct FakeFactory {
    engine: Arc<FakeEngine>,
    failures_remaining: AtomicUsize,
    create_calls: AtomicUsize,
}

impl FakeFactory {
    pub(crate) fn new(engine: Arc<FakeEngine>) -> Self {
        Self {
            engine,
            failures_remaining: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_first(self, failures: usize) -> Self {
        self.failures_remaining.store(failures, Ordering::SeqCst);
        self
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for FakeFactory {
    async fn create(&self) -> Result<Arc<dyn OcrEngine>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(anyhow!("engine would not start"))
        } else {
            Ok(self.engine.clone())
        }
    }
}
