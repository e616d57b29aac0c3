//! Turning submitted files into queue items, one per page.

use std::{fmt, sync::Arc};

use futures::{StreamExt as _, TryStreamExt as _, future::ready, stream};
use mime_guess::mime;

use crate::{
    async_utils::BoxedStream,
    errors::PipelineError,
    prelude::*,
    rasterize::{RasterDocument, Rasterizer},
};

use super::item::{ItemOrigin, ItemSource, NewItem};

/// The declared kind of a submitted file, guessed from its name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaKind {
    Image,
    Pdf,
}

impl MediaKind {
    /// Guess the kind from a file name. Returns `None` for anything we can't
    /// OCR.
    pub fn from_name(name: &str) -> Option<Self> {
        let guessed = mime_guess::from_path(name).first()?;
        if guessed == mime::APPLICATION_PDF {
            Some(Self::Pdf)
        } else if guessed.type_() == mime::IMAGE {
            Some(Self::Image)
        } else {
            None
        }
    }
}

/// A file handed to us by the user.
#[derive(Clone, Debug)]
pub struct SubmittedFile {
    /// Where to read it from.
    pub path: PathBuf,
    /// The name shown to the user.
    pub name: String,
    /// What the file claims to be.
    pub kind: Option<MediaKind>,
}

impl SubmittedFile {
    /// Describe a file on disk. Nothing is read yet.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let kind = MediaKind::from_name(&name);
        Self { path, name, kind }
    }
}

/// Expands submitted files into [`NewItem`]s.
#[derive(Clone)]
pub struct PageExpander {
    rasterizer: Arc<dyn Rasterizer>,
    /// Scale passed to the rasterizer, where 1.0 is 72 DPI.
    scale: f32,
}

impl PageExpander {
    /// Create an expander rendering PDF pages at `scale`.
    pub fn new(rasterizer: Arc<dyn Rasterizer>, scale: f32) -> Self {
        Self { rasterizer, scale }
    }

    /// Lazily expand a file into items, in page order.
    ///
    /// PDF pages are only rendered as the stream is polled. An error means
    /// the rest of the stream is worthless and the document should be
    /// dropped.
    pub fn expand(&self, file: &SubmittedFile) -> BoxedStream<Result<NewItem>> {
        match file.kind {
            Some(MediaKind::Image) => stream::once(ready(Ok(NewItem {
                origin: ItemOrigin::Image {
                    name: file.name.clone(),
                },
                source: ItemSource::File(file.path.clone()),
            })))
            .boxed(),
            Some(MediaKind::Pdf) => self.expand_pdf(file),
            None => stream::once(ready(Err(anyhow!(
                "unsupported file type (expected an image or a PDF)"
            ))))
            .boxed(),
        }
    }

    /// Expand a whole document, or fail without producing anything.
    #[instrument(level = "debug", skip_all, fields(name = %file.name))]
    pub async fn expand_document(
        &self,
        file: &SubmittedFile,
    ) -> Result<Vec<NewItem>, PipelineError> {
        let items = self
            .expand(file)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|err| PipelineError::document_read(&file.name, &err))?;
        debug!(pages = items.len(), "expanded document");
        Ok(items)
    }

    fn expand_pdf(&self, file: &SubmittedFile) -> BoxedStream<Result<NewItem>> {
        let rasterizer = self.rasterizer.clone();
        let scale = self.scale;
        let path = file.path.clone();
        let name = file.name.clone();

        stream::once(async move { rasterizer.open_document(&path).await })
            .map_ok(move |document| {
                let document: Arc<dyn RasterDocument> = Arc::from(document);
                let name = name.clone();
                stream::iter(1..=document.page_count()).then(move |page| {
                    let document = document.clone();
                    let name = name.clone();
                    async move {
                        let image = document
                            .render_page(page, scale)
                            .await
                            .with_context(|| format!("failed to render page {page}"))?;
                        trace!(page, ?image, "rendered page");
                        Ok::<_, anyhow::Error>(NewItem {
                            origin: ItemOrigin::PdfPage {
                                original_name: name,
                                page,
                            },
                            source: ItemSource::Image(image),
                        })
                    }
                })
            })
            .try_flatten()
            .boxed()
    }
}

impl fmt::Debug for PageExpander {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageExpander")
            .field("scale", &self.scale)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::testing::{FakePdf, FakeRasterizer, Fixture};

    use super::*;

    fn labels(items: &[NewItem]) -> Vec<String> {
        items.iter().map(|item| item.origin.display_label()).collect()
    }

    #[test]
    fn media_kind_comes_from_the_name() {
        assert_eq!(MediaKind::from_name("scan.pdf"), Some(MediaKind::Pdf));
        assert_eq!(MediaKind::from_name("photo.jpg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_name("page.png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_name("notes.txt"), None);
        assert_eq!(MediaKind::from_name("README"), None);
    }

    #[tokio::test]
    async fn images_become_one_lazy_item() -> Result<()> {
        let fixture = Fixture::new();
        let expander = PageExpander::new(Arc::new(FakeRasterizer::default()), 1.5);
        let items = expander
            .expand_document(&fixture.image("receipt.png", 3))
            .await?;
        assert_eq!(labels(&items), vec!["receipt.png"]);
        assert!(matches!(items[0].source, ItemSource::File(_)));
        Ok(())
    }

    #[tokio::test]
    async fn pdfs_become_one_item_per_page_in_order() -> Result<()> {
        let fixture = Fixture::new();
        let rasterizer =
            FakeRasterizer::default().with_pdf("report.pdf", FakePdf::pages(3, 10));
        let expander = PageExpander::new(Arc::new(rasterizer), 1.5);
        let items = expander
            .expand_document(&fixture.pdf("report.pdf"))
            .await?;
        assert_eq!(
            labels(&items),
            vec![
                "report.pdf (Page 1)",
                "report.pdf (Page 2)",
                "report.pdf (Page 3)",
            ]
        );
        let widths = items
            .iter()
            .map(|item| match &item.source {
                ItemSource::Image(image) => image.width,
                ItemSource::File(_) => 0,
            })
            .collect::<Vec<_>>();
        assert_eq!(widths, vec![11, 12, 13]);
        assert_eq!(
            items[1].origin.page_info().as_deref(),
            Some("Page 2")
        );
        Ok(())
    }

    #[tokio::test]
    async fn pages_are_rendered_on_demand() -> Result<()> {
        let fixture = Fixture::new();
        let rasterizer = Arc::new(
            FakeRasterizer::default().with_pdf("big.pdf", FakePdf::pages(50, 100)),
        );
        let expander = PageExpander::new(rasterizer.clone(), 1.5);
        let first = expander
            .expand(&fixture.pdf("big.pdf"))
            .take(1)
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(labels(&first), vec!["big.pdf (Page 1)"]);
        assert_eq!(rasterizer.render_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn broken_documents_produce_nothing() {
        let fixture = Fixture::new();
        let rasterizer = FakeRasterizer::default()
            .with_pdf(
                "corrupt.pdf",
                FakePdf {
                    fail_open: true,
                    ..FakePdf::pages(2, 0)
                },
            )
            .with_pdf(
                "torn.pdf",
                FakePdf {
                    fail_page: Some(2),
                    ..FakePdf::pages(3, 0)
                },
            );
        let expander = PageExpander::new(Arc::new(rasterizer), 1.5);

        for name in ["corrupt.pdf", "torn.pdf"] {
            let err = expander
                .expand_document(&fixture.pdf(name))
                .await
                .expect_err("document should fail");
            match err {
                PipelineError::DocumentRead { name: failed, .. } => assert_eq!(failed, name),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn unsupported_files_are_document_errors() {
        let fixture = Fixture::new();
        let expander = PageExpander::new(Arc::new(FakeRasterizer::default()), 1.5);
        let file = fixture.missing("notes.txt");
        assert_eq!(file.kind, None);
        let err = expander.expand_document(&file).await.expect_err("should fail");
        assert!(matches!(err, PipelineError::DocumentRead { .. }));
    }
}
