use std::collections::BTreeSet;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ItemId;

/// Errors from progress-state transitions.
#[derive(Debug, Error, Diagnostic)]
pub enum ProgressError {
    #[error("item not pending: {item}")]
    #[diagnostic(
        code(crawlweave::progress::not_pending),
        help("items can only be started from the pending set; `{item}` is already completed, failed, or unknown")
    )]
    NotPending { item: ItemId },

    #[error("no item in flight")]
    #[diagnostic(code(crawlweave::progress::no_current))]
    NoCurrent,
}

/// The job's item ledger: completed, failed, and pending sets plus the item
/// currently in flight.
///
/// Owned exclusively by the job runner; everyone else gets read-only views
/// or serialized copies inside checkpoints. The three sets are pairwise
/// disjoint and always sum to the job's full item set — every transition
/// goes through [`begin`](Self::begin)/[`complete_current`](Self::complete_current)/
/// [`fail_current`](Self::fail_current), which is the only place the
/// partition is touched.
///
/// Sets are `BTreeSet`s so serialization order is deterministic, which the
/// checkpoint hash depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<ItemId>,
    completed: BTreeSet<ItemId>,
    failed: BTreeSet<ItemId>,
    pending: BTreeSet<ItemId>,
}

impl ProgressState {
    /// Fresh state: every item pending, none in flight.
    pub fn new(items: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            current: None,
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            pending: items.into_iter().collect(),
        }
    }

    /// Rebuild state for a resumed job: the caller's full item list with the
    /// checkpointed completed/failed sets carved out. Items the checkpoint
    /// knows but the caller no longer submits are dropped; an item that was
    /// in flight at checkpoint time goes back to pending (at-least-once).
    pub fn resumed(
        items: impl IntoIterator<Item = ItemId>,
        completed: impl IntoIterator<Item = ItemId>,
        failed: impl IntoIterator<Item = ItemId>,
    ) -> Self {
        let all: BTreeSet<ItemId> = items.into_iter().collect();
        let completed: BTreeSet<ItemId> = completed
            .into_iter()
            .filter(|item| all.contains(item))
            .collect();
        let failed: BTreeSet<ItemId> = failed
            .into_iter()
            .filter(|item| all.contains(item) && !completed.contains(item))
            .collect();
        let pending: BTreeSet<ItemId> = all
            .iter()
            .filter(|item| !completed.contains(*item) && !failed.contains(*item))
            .cloned()
            .collect();
        Self {
            current: None,
            completed,
            failed,
            pending,
        }
    }

    /// Move an item from pending into flight.
    pub fn begin(&mut self, item: &str) -> Result<(), ProgressError> {
        if !self.pending.remove(item) {
            return Err(ProgressError::NotPending {
                item: item.to_string(),
            });
        }
        self.current = Some(item.to_string());
        Ok(())
    }

    /// Mark the in-flight item completed.
    pub fn complete_current(&mut self) -> Result<ItemId, ProgressError> {
        let item = self.current.take().ok_or(ProgressError::NoCurrent)?;
        self.completed.insert(item.clone());
        Ok(item)
    }

    /// Mark the in-flight item failed.
    pub fn fail_current(&mut self) -> Result<ItemId, ProgressError> {
        let item = self.current.take().ok_or(ProgressError::NoCurrent)?;
        self.failed.insert(item.clone());
        Ok(item)
    }

    /// Put the in-flight item back into pending (cancellation, handler
    /// re-enqueue after a Restart decision).
    pub fn release_current(&mut self) -> Result<ItemId, ProgressError> {
        let item = self.current.take().ok_or(ProgressError::NoCurrent)?;
        self.pending.insert(item.clone());
        Ok(item)
    }

    pub fn completed(&self) -> &BTreeSet<ItemId> {
        &self.completed
    }

    pub fn failed(&self) -> &BTreeSet<ItemId> {
        &self.failed
    }

    pub fn pending(&self) -> &BTreeSet<ItemId> {
        &self.pending
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len() + self.pending.len() + usize::from(self.current.is_some())
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }

    /// Verify the partition invariant against a known full item set:
    /// pairwise disjoint, union equals the total.
    pub fn partition_holds(&self, all_items: &BTreeSet<ItemId>) -> bool {
        let disjoint = self.completed.is_disjoint(&self.failed)
            && self.completed.is_disjoint(&self.pending)
            && self.failed.is_disjoint(&self.pending);
        let mut union: BTreeSet<ItemId> = BTreeSet::new();
        union.extend(self.completed.iter().cloned());
        union.extend(self.failed.iter().cloned());
        union.extend(self.pending.iter().cloned());
        if let Some(current) = &self.current {
            if union.contains(current) {
                return false;
            }
            union.insert(current.clone());
        }
        disjoint && union == *all_items
    }
}
