//! Error taxonomy for the scanning pipeline.
//!
//! Plumbing code uses [`anyhow`]. These errors are the ones the pipeline
//! itself reasons about: they decide whether a document is skipped, whether an
//! item is marked as failed, or whether we've hit a bug.

use thiserror::Error;

use crate::pipeline::item::ItemId;

/// Errors with pipeline-level meaning.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A submitted document could not be opened or rasterized. None of its
    /// pages are queued.
    #[error("failed to read document {name:?}: {message}")]
    DocumentRead { name: String, message: String },

    /// OCR failed for a single item. The batch continues.
    #[error("failed to recognize {label:?}: {message}")]
    ItemRecognition { label: String, message: String },

    /// The OCR engine could not be started.
    #[error("OCR engine failed to start: {message}")]
    EngineInit { message: String },

    /// Somebody asked for an illegal status transition. This is a bug in the
    /// caller, not a user-facing condition.
    #[error("contract violation on item {id}: {message}")]
    ContractViolation { id: ItemId, message: String },
}

impl PipelineError {
    /// Build a [`PipelineError::DocumentRead`] from an arbitrary error.
    pub fn document_read(name: &str, err: &anyhow::Error) -> Self {
        Self::DocumentRead {
            name: name.to_owned(),
            message: format!("{err:#}"),
        }
    }

    /// Build a [`PipelineError::ItemRecognition`] from an arbitrary error.
    pub fn item_recognition(label: &str, err: &anyhow::Error) -> Self {
        Self::ItemRecognition {
            label: label.to_owned(),
            message: format!("{err:#}"),
        }
    }

    /// Is this a bug rather than a runtime failure?
    #[cfg(test)]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }
}
