//! Command-line entry points.

use std::sync::Arc;

use clap::Args;

use crate::{
    async_utils::io::{write_jsonl, write_text},
    engines::EngineOpts,
    pipeline::{
        expander::PageExpander,
        item::ItemStatus,
        processor::ProcessorOpts,
        session::Session,
    },
    prelude::*,
    rasterize::{PopplerRasterizer, RasterOpts},
    ui::Ui,
};

pub mod scan;
pub mod schema;
pub mod session;

/// Options for building a [`Session`].
#[derive(Debug, Clone, Args)]
pub struct SessionOpts {
    #[clap(flatten)]
    pub raster: RasterOpts,

    #[clap(flatten)]
    pub engine: EngineOpts,

    #[clap(flatten)]
    pub processor: ProcessorOpts,
}

impl SessionOpts {
    /// Start a session using Poppler and the configured OCR engine.
    pub fn start_session(&self) -> Session {
        let rasterizer = Arc::new(PopplerRasterizer::new(&self.raster));
        let expander = PageExpander::new(rasterizer, self.raster.pdf_scale);
        Session::new(expander, self.engine.factory(), &self.processor)
    }
}

/// Where results go, and how many failures we tolerate.
#[derive(Debug, Clone, Args)]
pub struct OutputOpts {
    /// Write the combined text to this file instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// Write a JSONL report with the final status of every page.
    #[clap(long = "report")]
    pub report_path: Option<PathBuf>,

    /// What portion of pages and documents should we allow to fail? Specified
    /// as a number between 0.0 and 1.0.
    #[clap(long, default_value = "1.0")]
    pub allowed_failure_rate: f32,
}

/// Shut down a session, then write its output and report.
///
/// `failed_documents` counts documents which never made it into the queue.
#[instrument(level = "debug", skip_all)]
pub async fn finish_session(
    ui: &Ui,
    session: Session,
    failed_documents: usize,
    output_opts: &OutputOpts,
) -> Result<()> {
    session.wait_idle().await?;
    let text = session.output_text();
    let items = session.items();
    session.shutdown().await?;

    write_text(output_opts.output_path.as_deref(), &text).await?;
    if let Some(report_path) = &output_opts.report_path {
        write_jsonl(Some(report_path.as_path()), &items).await?;
    }

    let failed_items = items
        .iter()
        .filter(|item| item.status == ItemStatus::Error)
        .count();
    check_failure_rate(
        ui,
        failed_items + failed_documents,
        items.len() + failed_documents,
        output_opts.allowed_failure_rate,
    )
}

/// Fail if too many things went wrong.
fn check_failure_rate(
    ui: &Ui,
    failure_count: usize,
    total_count: usize,
    allowed_failure_rate: f32,
) -> Result<()> {
    let failure_rate = if total_count == 0 {
        0.0
    } else {
        failure_count as f32 / total_count as f32
    };
    if failure_rate > allowed_failure_rate {
        Err(anyhow!(
            "{}/{} ({:.2}%) of pages and documents failed, but only {:.2}% were allowed",
            failure_count,
            total_count,
            failure_rate * 100.0,
            allowed_failure_rate * 100.0
        ))
    } else {
        if failure_count > 0 {
            ui.display_message(
                "❌",
                &format!("{failure_count} pages or documents could not be processed"),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_rate_is_checked_against_the_limit() {
        let ui = Ui::init_for_tests();
        assert!(check_failure_rate(&ui, 0, 0, 0.0).is_ok());
        assert!(check_failure_rate(&ui, 1, 4, 0.25).is_ok());
        assert!(check_failure_rate(&ui, 2, 4, 0.25).is_err());
        assert!(check_failure_rate(&ui, 4, 4, 1.0).is_ok());
    }
}
