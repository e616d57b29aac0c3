//! Echo engine for testing.
//!
//! This engine "recognizes" a short description of the image it was given,
//! like `image/png 640x480`. It lets us run the whole pipeline on machines
//! without Tesseract.

use std::sync::Arc;

use crate::{pipeline::item::PageImage, prelude::*};

use super::{EngineFactory, OcrEngine, RecognizeOptions};

/// Factory for [`EchoOcrEngine`].
#[derive(Debug)]
pub struct EchoFactory;

#[async_trait]
impl EngineFactory for EchoFactory {
    async fn create(&self) -> Result<Arc<dyn OcrEngine>> {
        Ok(Arc::new(EchoOcrEngine))
    }
}

/// Echo engine for testing.
#[derive(Debug)]
pub struct EchoOcrEngine;

#[async_trait]
impl OcrEngine for EchoOcrEngine {
    async fn recognize(
        &self,
        image: &PageImage,
        _options: &RecognizeOptions,
    ) -> Result<String> {
        Ok(format!(
            "{} {}x{}",
            image.mime_type, image.width, image.height
        ))
    }
}
