//! Tesseract OCR engine.

use std::{ffi::OsString, sync::Arc};

use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, pipeline::item::PageImage, prelude::*};

use super::{EngineFactory, EngineOpts, OcrEngine, RecognizeOptions};

/// Page segmentation mode with orientation and script detection.
const AUTO_ROTATE_PSM: u8 = 1;

/// Fully automatic page segmentation, without orientation detection.
const FIXED_ORIENTATION_PSM: u8 = 3;

/// Language data needed by [`AUTO_ROTATE_PSM`].
const OSD_LANGUAGE: &str = "osd";

/// Starts [`TesseractOcrEngine`]s.
pub struct TesseractFactory {
    language: String,
    tessdata_dir: Option<PathBuf>,
}

impl TesseractFactory {
    /// Create a new factory.
    pub fn new(opts: &EngineOpts) -> Self {
        Self {
            language: opts.language.clone(),
            tessdata_dir: opts.tessdata_dir.clone(),
        }
    }

    /// Build a `tesseract` command with our shared arguments.
    fn command(&self) -> Command {
        let mut cmd = Command::new("tesseract");
        if let Some(dir) = &self.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd
    }
}

#[async_trait]
impl EngineFactory for TesseractFactory {
    #[instrument(level = "debug", skip_all, fields(language = %self.language))]
    async fn create(&self) -> Result<Arc<dyn OcrEngine>> {
        let output = Command::new("tesseract")
            .arg("--version")
            .output()
            .await
            .context("cannot run tesseract (is it installed?)")?;
        check_for_command_failure("tesseract", &output, None)?;

        let output = self
            .command()
            .arg("--list-langs")
            .output()
            .await
            .context("cannot run tesseract --list-langs")?;
        check_for_command_failure("tesseract", &output, None)?;

        // Depending on the version, the list goes to stdout or stderr.
        let mut listing = String::from_utf8_lossy(&output.stdout).into_owned();
        listing.push_str(&String::from_utf8_lossy(&output.stderr));
        let available = available_languages(&listing);
        check_languages(&available, &self.language)?;

        let osd_available = available.contains(&OSD_LANGUAGE);
        if !osd_available {
            warn!(
                "tesseract {:?} data is not installed, so pages will not be auto-rotated",
                OSD_LANGUAGE
            );
        }

        info!(language = %self.language, osd_available, "Tesseract engine started");
        Ok(Arc::new(TesseractOcrEngine {
            language: self.language.clone(),
            tessdata_dir: self.tessdata_dir.clone(),
            osd_available,
        }))
    }
}

/// Parse the output of `tesseract --list-langs`.
fn available_languages(listing: &str) -> Vec<&str> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available"))
        .collect()
}

/// Make sure every language in a `+`-joined list is installed.
fn check_languages(available: &[&str], language: &str) -> Result<()> {
    for language in language.split('+') {
        if !available.contains(&language) {
            return Err(anyhow!(
                "tesseract language {:?} is not installed (available: {})",
                language,
                available.join(", ")
            ));
        }
    }
    Ok(())
}

/// OCR engine wrapping the `tesseract` CLI tool.
pub struct TesseractOcrEngine {
    language: String,
    tessdata_dir: Option<PathBuf>,
    /// Can we detect orientation?
    osd_available: bool,
}

impl TesseractOcrEngine {
    /// Arguments for recognizing `input`. Tesseract adds `.txt` to
    /// `output_base`.
    fn args(&self, input: &Path, output_base: &Path, options: &RecognizeOptions) -> Vec<OsString> {
        let psm = if options.auto_rotate && self.osd_available {
            AUTO_ROTATE_PSM
        } else {
            FIXED_ORIENTATION_PSM
        };
        let mut args = vec![input.into(), output_base.into()];
        if let Some(dir) = &self.tessdata_dir {
            args.push("--tessdata-dir".into());
            args.push(dir.into());
        }
        args.extend([
            "-l".into(),
            OsString::from(&self.language),
            "--psm".into(),
            psm.to_string().into(),
        ]);
        args
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(mime_type = %image.mime_type))]
    async fn recognize(
        &self,
        image: &PageImage,
        options: &RecognizeOptions,
    ) -> Result<String> {
        let extension = image.extension()?;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{}", extension));
        let output_path = tmpdir.path().join("output.txt");
        tokio::fs::write(&input_path, &image.data)
            .await
            .context("cannot write tesseract input file")?;

        let output = Command::new("tesseract")
            .args(self.args(&input_path, &output_path.with_extension(""), options))
            .output()
            .await
            .context("cannot run tesseract")?;
        check_for_command_failure("tesseract", &output, None)?;

        tokio::fs::read_to_string(&output_path)
            .await
            .context("cannot read tesseract output file")
    }
}
