//! The `scan` subcommand.

use clap::Args;

use crate::{
    cmd::{OutputOpts, SessionOpts, finish_session},
    pipeline::{expander::SubmittedFile, queue::Mode},
    prelude::*,
    ui::Ui,
};

/// Scan command line arguments.
#[derive(Debug, Args)]
pub struct ScanOpts {
    /// Images and PDFs to scan, in order.
    #[clap(value_name = "FILE", required = true)]
    pub paths: Vec<PathBuf>,

    /// In `single` mode, only the first file is scanned.
    #[clap(long, value_enum, default_value_t = Mode::Batch)]
    pub mode: Mode,

    #[clap(flatten)]
    pub session: SessionOpts,

    #[clap(flatten)]
    pub output: OutputOpts,
}

/// The `scan` subcommand: one submission, run to completion.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_scan(ui: Ui, opts: &ScanOpts) -> Result<()> {
    let session = opts.session.start_session();
    let progress = ui.watch_session(session.subscribe());

    let files = opts
        .paths
        .iter()
        .map(SubmittedFile::from_path)
        .collect::<Vec<_>>();
    let report = session.submit_with_mode(files, opts.mode).await?;
    info!(
        pages = report.queued.len(),
        failed_documents = report.failed_documents.len(),
        "queued files"
    );

    finish_session(&ui, session, report.failed_documents.len(), &opts.output).await?;
    progress.join().await
}
