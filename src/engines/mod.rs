//! OCR engine interface.
//!
//! The pipeline treats OCR as a black box: one image in, one string out. An
//! [`EngineFactory`] builds the engine lazily, because starting an engine may
//! be slow or may fail, and we want that failure reported against the item
//! that needed it.

use std::sync::Arc;

use clap::{Args, ValueEnum};

use crate::{pipeline::item::PageImage, prelude::*};

pub mod echo;
pub mod tesseract;

/// Options passed to every recognition call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecognizeOptions {
    /// Detect and correct page orientation before recognizing.
    pub auto_rotate: bool,
}

impl Default for RecognizeOptions {
    fn default() -> Self {
        Self { auto_rotate: true }
    }
}

/// Interface to an OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize the text in a single image.
    async fn recognize(&self, image: &PageImage, options: &RecognizeOptions)
    -> Result<String>;
}

/// Builds an [`OcrEngine`] on demand.
#[async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    /// Start a new engine.
    async fn create(&self) -> Result<Arc<dyn OcrEngine>>;
}

/// Our different engine types.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum EngineType {
    /// The `tesseract` CLI tool.
    #[default]
    Tesseract,

    /// Describe each image instead of reading it. For testing without OCR
    /// tools installed.
    Echo,
}

/// OCR engine options.
#[derive(Args, Clone, Debug)]
pub struct EngineOpts {
    /// The OCR engine to use.
    #[clap(long, value_enum, default_value_t = EngineType::Tesseract)]
    pub engine: EngineType,

    /// Tesseract language(s) to recognize, joined with `+`.
    #[clap(short = 'l', long, default_value = "tam")]
    pub language: String,

    /// Directory containing Tesseract `.traineddata` files. Defaults to
    /// Tesseract's own search path (including `TESSDATA_PREFIX`).
    #[clap(long)]
    pub tessdata_dir: Option<PathBuf>,
}

impl EngineOpts {
    /// Get a factory for the configured engine.
    pub fn factory(&self) -> Arc<dyn EngineFactory> {
        match self.engine {
            EngineType::Tesseract => Arc::new(tesseract::TesseractFactory::new(self)),
            EngineType::Echo => Arc::new(echo::EchoFactory),
        }
    }
}
