use std::sync::{Arc, OnceLock};

use crate::model::RunResult;

/// One write-once slot per work item, addressed by cross-product index.
pub(crate) struct ResultSlots {
    slots: Vec<OnceLock<RunResult>>,
}

impl ResultSlots {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Returns false if the slot was already written or does not exist.
    pub(crate) fn fill(&self, index: usize, result: RunResult) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.set(result).is_ok())
    }

    /// Results in slot order; `placeholder` stands in for every slot nobody wrote.
    pub(crate) fn take(
        self: Arc<Self>,
        mut placeholder: impl FnMut(usize) -> RunResult,
    ) -> Vec<RunResult> {
        match Arc::try_unwrap(self) {
            Ok(owned) => owned
                .slots
                .into_iter()
                .enumerate()
                .map(|(i, slot)| slot.into_inner().unwrap_or_else(|| placeholder(i)))
                .collect(),
            Err(shared) => shared
                .slots
                .iter()
                .enumerate()
                .map(|(i, slot)| slot.get().cloned().unwrap_or_else(|| placeholder(i)))
                .collect(),
        }
    }
}
