//! Queue items: one page waiting for, or finished with, OCR.

use std::{fmt, io::Cursor};

use image::ImageReader;
use schemars::JsonSchema;

use crate::prelude::*;

/// Image types we can hand to an OCR engine as-is.
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "image/tiff",
    "image/bmp",
];

/// Unique ID of an [`Item`]. IDs are allocated in creation order and never
/// reused, even across resets.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Processing status of an item.
///
/// The only legal path is `Pending → Processing → {Done, Error}`.
#[derive(Clone, Copy, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for OCR.
    Pending,
    /// Currently being recognized. At most one item is ever in this state.
    Processing,
    /// Recognized successfully.
    Done,
    /// Recognition failed.
    Error,
}

impl ItemStatus {
    /// Is this a final state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Where an item came from.
#[derive(Clone, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemOrigin {
    /// A standalone image file.
    Image {
        /// The file name as submitted.
        name: String,
    },
    /// One page of a PDF.
    PdfPage {
        /// The name of the PDF the page came from.
        original_name: String,
        /// 1-based page number.
        page: usize,
    },
}

impl ItemOrigin {
    /// The human-readable label for this item.
    pub fn display_label(&self) -> String {
        match self {
            Self::Image { name } => name.clone(),
            Self::PdfPage {
                original_name,
                page,
            } => format!("{original_name} (Page {page})"),
        }
    }

    /// `"Page N"` for PDF pages.
    pub fn page_info(&self) -> Option<String> {
        match self {
            Self::Image { .. } => None,
            Self::PdfPage { page, .. } => Some(format!("Page {page}")),
        }
    }
}

/// Decoded pixel data for a page.
#[derive(Clone)]
pub struct PageImage {
    /// The MIME type of `data`. One of [`SUPPORTED_IMAGE_TYPES`].
    pub mime_type: String,
    /// Encoded image bytes.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PageImage {
    /// Decode raw file bytes, sniffing the real MIME type and reading the
    /// image header for dimensions.
    ///
    /// This is CPU-bound for large images, so async callers should run it via
    /// [`crate::async_utils::spawn_blocking_propagating_panics`].
    pub fn decode(data: Vec<u8>) -> Result<Self> {
        let mime_type = infer::get(&data)
            .ok_or_else(|| anyhow!("cannot determine image type"))?
            .mime_type()
            .to_owned();
        if !SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
            return Err(anyhow!(
                "unsupported image type {} (supported: PNG, JPEG, WebP, GIF, TIFF, BMP)",
                mime_type
            ));
        }
        let (width, height) = ImageReader::new(Cursor::new(&data))
            .with_guessed_format()
            .context("cannot guess image format")?
            .into_dimensions()
            .context("cannot read image dimensions")?;
        Ok(Self {
            mime_type,
            data,
            width,
            height,
        })
    }

    /// A file extension suitable for tools that sniff by name.
    pub fn extension(&self) -> Result<&'static str> {
        mime_guess::get_mime_extensions_str(&self.mime_type)
            .and_then(|exts| exts.first())
            .copied()
            .ok_or_else(|| anyhow!("cannot determine extension for {}", self.mime_type))
    }
}

// Don't dump megabytes of pixels into our logs.
impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// The pixel source of an item.
#[derive(Debug)]
pub enum ItemSource {
    /// A raw file which has not been read or decoded yet.
    File(PathBuf),
    /// Already-decoded pixels, e.g. a rasterized PDF page.
    Image(PageImage),
}

/// An item produced by the expander, before the queue gives it an ID.
#[derive(Debug)]
pub struct NewItem {
    /// Where this item came from.
    pub origin: ItemOrigin,
    /// The pixels to recognize.
    pub source: ItemSource,
}

/// One page in the queue.
#[derive(Debug)]
pub struct Item {
    pub(crate) id: ItemId,
    pub(crate) origin: ItemOrigin,
    pub(crate) display_label: String,
    pub(crate) status: ItemStatus,
    pub(crate) recognized_text: Option<String>,
    pub(crate) error: Option<String>,
    /// Owned by the item until the processor takes it.
    pub(crate) source: Option<ItemSource>,
}

impl Item {
    /// Wrap a [`NewItem`] with an ID.
    pub(crate) fn new(id: ItemId, new_item: NewItem) -> Self {
        Self {
            id,
            display_label: new_item.origin.display_label(),
            origin: new_item.origin,
            status: ItemStatus::Pending,
            recognized_text: None,
            error: None,
            source: Some(new_item.source),
        }
    }

    pub fn display_label(&self) -> &str {
        &self.display_label
    }

    #[cfg(test)]
    pub fn status(&self) -> ItemStatus {
        self.status
    }

    /// Only present once the item is [`ItemStatus::Done`].
    #[cfg(test)]
    pub fn recognized_text(&self) -> Option<&str> {
        self.recognized_text.as_deref()
    }

    /// A read-only copy for observers.
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id,
            display_label: self.display_label.clone(),
            origin: self.origin.clone(),
            page_info: self.origin.page_info(),
            status: self.status,
            text: self.recognized_text.clone(),
            error: self.error.clone(),
        }
    }
}

/// Serializable view of an [`Item`], used for events and reports.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ItemSnapshot {
    /// The item ID.
    pub id: ItemId,

    /// Human-readable origin of the item.
    pub display_label: String,

    /// Where the item came from.
    pub origin: ItemOrigin,

    /// `"Page N"` for PDF pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_info: Option<String>,

    /// Current status.
    pub status: ItemStatus,

    /// Recognized text, for finished items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Why recognition failed, for failed items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
