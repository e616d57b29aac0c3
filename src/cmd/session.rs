//! The `session` subcommand, which replays a script of front-end commands.

use clap::Args;
use futures::StreamExt as _;
use schemars::JsonSchema;

use crate::{
    async_utils::io::read_jsonl,
    cmd::{OutputOpts, SessionOpts, finish_session},
    pipeline::{expander::SubmittedFile, queue::Mode},
    prelude::*,
    ui::Ui,
};

/// One line of a session script.
#[derive(Debug, Deserialize, JsonSchema, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SessionCommand {
    /// Submit files. Uses the session's current mode unless `mode` is given,
    /// in which case the session switches to it first.
    Submit {
        /// Images and PDFs, in order.
        paths: Vec<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<Mode>,
    },
    /// Change the mode used by later submissions.
    SetMode { mode: Mode },
    /// Discard the queue and the combined text.
    Reset,
    /// Wait for everything submitted so far to finish.
    Wait,
}

/// Session command line arguments.
#[derive(Debug, Args)]
pub struct SessionCmdOpts {
    /// A JSONL file of commands. Defaults to standard input.
    #[clap(value_name = "SCRIPT")]
    pub script: Option<PathBuf>,

    #[clap(flatten)]
    pub session: SessionOpts,

    #[clap(flatten)]
    pub output: OutputOpts,
}

/// The `session` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_session(ui: Ui, opts: &SessionCmdOpts) -> Result<()> {
    let session = opts.session.start_session();
    let progress = ui.watch_session(session.subscribe());

    // Only count skipped documents that are still part of the current run.
    let mut failed_documents = 0;
    let mut commands = read_jsonl::<SessionCommand>(opts.script.as_deref()).await?;
    while let Some(command) = commands.next().await {
        let command = command?;
        debug!(?command, "running command");
        match command {
            SessionCommand::Submit { paths, mode } => {
                let files = paths
                    .into_iter()
                    .map(SubmittedFile::from_path)
                    .collect::<Vec<_>>();
                let replaces = mode.unwrap_or_else(|| session.mode()) == Mode::Single;
                if replaces && !files.is_empty() {
                    failed_documents = 0;
                }
                let report = match mode {
                    Some(mode) => session.submit_with_mode(files, mode).await?,
                    None => session.submit(files).await?,
                };
                failed_documents += report.failed_documents.len();
            }
            SessionCommand::SetMode { mode } => session.set_mode(mode),
            SessionCommand::Reset => {
                session.reset();
                failed_documents = 0;
            }
            SessionCommand::Wait => session.wait_idle().await?,
        }
    }

    finish_session(&ui, session, failed_documents, &opts.output).await?;
    progress.join().await
}
