//! Rasterizing PDF pages to images.
//!
//! The pipeline only sees the [`Rasterizer`] and [`RasterDocument`] traits.
//! The real implementation shells out to Poppler's `pdfinfo` and `pdftocairo`,
//! rendering one page per call so that pages can be queued as soon as they
//! exist.

use std::{collections::BTreeMap, sync::LazyLock};

use clap::Args;
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    cpu_limit::with_cpu_semaphore,
    pipeline::item::PageImage,
    prelude::*,
};

/// Resolution corresponding to a scale of 1.0.
const BASE_DPI: f32 = 72.0;

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Options for rasterizing PDFs.
#[derive(Args, Clone, Debug)]
pub struct RasterOpts {
    /// Scale at which PDF pages are rendered, relative to 72 DPI. The default
    /// of 1.5 is a good tradeoff between OCR quality and speed.
    #[clap(long, default_value = "1.5")]
    pub pdf_scale: f32,

    /// The maximum number of pages to take from each PDF. Later pages are
    /// dropped with a warning.
    #[clap(long)]
    pub max_pages: Option<usize>,

    /// The password used to open encrypted PDFs.
    #[clap(long)]
    pub pdf_password: Option<String>,
}

impl Default for RasterOpts {
    fn default() -> Self {
        Self {
            pdf_scale: 1.5,
            max_pages: None,
            pdf_password: None,
        }
    }
}

/// Opens PDF documents for rendering.
#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    /// Open a document and count its pages.
    async fn open_document(&self, path: &Path) -> Result<Box<dyn RasterDocument>>;
}

/// An open PDF document.
#[async_trait]
pub trait RasterDocument: Send + Sync {
    /// How many pages will this document yield?
    fn page_count(&self) -> usize;

    /// Render a 1-based page to an image at `scale` (1.0 = 72 DPI).
    async fn render_page(&self, page: usize, scale: f32) -> Result<PageImage>;
}

/// A [`Rasterizer`] backed by Poppler's command-line tools.
pub struct PopplerRasterizer {
    max_pages: Option<usize>,
    password: Option<String>,
}

impl PopplerRasterizer {
    /// Create a new rasterizer.
    pub fn new(opts: &RasterOpts) -> Self {
        Self {
            max_pages: opts.max_pages,
            password: opts.pdf_password.clone(),
        }
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    async fn open_document(&self, path: &Path) -> Result<Box<dyn RasterDocument>> {
        let total_pages = get_pdf_page_count(path, self.password.as_deref()).await?;
        let page_count = match self.max_pages {
            Some(max_pages) if total_pages > max_pages => {
                warn!(
                    path = %path.display(),
                    total_pages,
                    max_pages,
                    "Only processing the first {max_pages} pages (because of --max-pages)"
                );
                max_pages
            }
            _ => total_pages,
        };
        Ok(Box::new(PopplerDocument {
            path: path.to_owned(),
            password: self.password.clone(),
            page_count,
        }))
    }
}

/// A PDF opened by [`PopplerRasterizer`].
struct PopplerDocument {
    path: PathBuf,
    password: Option<String>,
    page_count: usize,
}

#[async_trait]
impl RasterDocument for PopplerDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), page))]
    async fn render_page(&self, page: usize, scale: f32) -> Result<PageImage> {
        if page == 0 || page > self.page_count {
            return Err(anyhow!(
                "page {} out of range for {:?} ({} pages)",
                page,
                self.path.display(),
                self.page_count
            ));
        }

        // pdftocairo appends the extension itself when given `-singlefile`.
        let tmpdir = tempfile::TempDir::with_prefix("pages")?;
        let out_stem = tmpdir.path().join("page");
        let out_path = out_stem.with_extension("png");

        let dpi = (BASE_DPI * scale).round().max(1.0) as u32;
        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string());
        if let Some(password) = &self.password {
            cmd.arg("-opw").arg(password);
        }

        // We use `with_cpu_semaphore` because `pdftocairo` will use _at least_
        // 100% of a CPU.
        let output = with_cpu_semaphore(|| async {
            cmd.arg(&self.path)
                .arg(&out_stem)
                .output()
                .await
                .with_context(|| {
                    format!("failed to run pdftocairo on {:?}", self.path.display())
                })
        })
        .await?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        let data = tokio::fs::read(&out_path).await.with_context(|| {
            format!("failed to read rendered page {:?}", out_path.display())
        })?;
        spawn_blocking_propagating_panics(move || PageImage::decode(data))
            .await
            .with_context(|| format!("failed to decode page {page} of {:?}", self.path))
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path, password: Option<&str>) -> Result<usize> {
    // Run pdfinfo to get the number of pages.
    let mut cmd = Command::new("pdfinfo");
    if let Some(password) = password {
        cmd.arg("-opw").arg(password);
    }
    let output = cmd
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output)
        .with_context(|| format!("failed to get page count for {:?}", path.display()))
}

/// Parse the `Pages:` line out of `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<usize> {
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key, value);
    }

    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("no page count in pdfinfo output"))?;
    page_count_str
        .parse::<usize>()
        .with_context(|| format!("invalid page count {page_count_str:?}"))
}
