//! The ordered item queue.

use clap::ValueEnum;
use schemars::JsonSchema;

use crate::{errors::PipelineError, prelude::*};

use super::item::{Item, ItemId, ItemSnapshot, ItemSource, ItemStatus, NewItem};

/// How new submissions interact with the existing queue.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    JsonSchema,
    PartialEq,
    Serialize,
    ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum Mode {
    /// Each submission replaces the queue and output, and only its first file
    /// is used.
    #[default]
    Single,

    /// Each submission is appended to the queue and output.
    Batch,
}

/// Ordered list of [`Item`]s. Insertion order is processing order is display
/// order.
///
/// All status changes go through the `mark_*` methods, which only allow
/// `Pending → Processing → {Done, Error}`, with at most one item processing
/// at a time.
#[derive(Debug, Default)]
pub struct QueueStore {
    items: Vec<Item>,
    mode: Mode,
    next_id: u64,
    /// Bumped on every reset, so late results can tell they're stale.
    generation: u64,
}

impl QueueStore {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Change the mode. Items already in the queue are unaffected.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Append items at the tail, in order, returning their new IDs.
    pub fn append(&mut self, new_items: Vec<NewItem>) -> Vec<ItemId> {
        let mut ids = Vec::with_capacity(new_items.len());
        for new_item in new_items {
            let id = ItemId(self.next_id);
            self.next_id += 1;
            self.items.push(Item::new(id, new_item));
            ids.push(id);
        }
        ids
    }

    /// Discard every item, finished or not.
    pub fn reset(&mut self) {
        self.items.clear();
        self.generation += 1;
    }

    /// Start processing an item, handing its pixel source to the caller.
    pub fn mark_processing(&mut self, id: ItemId) -> Result<ItemSource, PipelineError> {
        if let Some(active) = self.current_active_id() {
            return Err(PipelineError::ContractViolation {
                id,
                message: format!("item {active} is already processing"),
            });
        }
        let item = self.item_mut(id)?;
        if item.status != ItemStatus::Pending {
            return Err(illegal_transition(item, ItemStatus::Processing));
        }
        let source = item.source.take().ok_or_else(|| PipelineError::ContractViolation {
            id,
            message: "pending item has no pixel source".to_owned(),
        })?;
        item.status = ItemStatus::Processing;
        Ok(source)
    }

    /// Record recognized text for a processing item.
    pub fn mark_done(&mut self, id: ItemId, text: String) -> Result<(), PipelineError> {
        let item = self.processing_item_mut(id, ItemStatus::Done)?;
        item.status = ItemStatus::Done;
        item.recognized_text = Some(text);
        Ok(())
    }

    /// Record a recognition failure for a processing item.
    pub fn mark_error(&mut self, id: ItemId, message: String) -> Result<(), PipelineError> {
        let item = self.processing_item_mut(id, ItemStatus::Error)?;
        item.status = ItemStatus::Error;
        item.error = Some(message);
        Ok(())
    }

    /// The item currently being processed, if any.
    pub fn current_active_id(&self) -> Option<ItemId> {
        self.items
            .iter()
            .find(|item| item.status == ItemStatus::Processing)
            .map(|item| item.id)
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    #[cfg(test)]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Read-only copies of every item, in order.
    pub fn snapshot(&self) -> Vec<ItemSnapshot> {
        self.items.iter().map(Item::snapshot).collect()
    }

    fn item_mut(&mut self, id: ItemId) -> Result<&mut Item, PipelineError> {
        self.items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| PipelineError::ContractViolation {
                id,
                message: "no such item in the queue".to_owned(),
            })
    }

    fn processing_item_mut(
        &mut self,
        id: ItemId,
        to: ItemStatus,
    ) -> Result<&mut Item, PipelineError> {
        let item = self.item_mut(id)?;
        if item.status != ItemStatus::Processing {
            return Err(illegal_transition(item, to));
        }
        Ok(item)
    }
}

fn illegal_transition(item: &Item, to: ItemStatus) -> PipelineError {
    PipelineError::ContractViolation {
        id: item.id,
        message: format!("illegal transition {:?} -> {:?}", item.status, to),
    }
}
