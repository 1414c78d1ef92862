use anyhow::Error as AnyError;
use std::sync::{Arc, RwLock};

/// Single-slot latch for the pipeline's most recent round error.
///
/// The runner is the only writer; `Pipeline::error` reads from any task.
/// Only the latest error is retained, and a fully successful round clears
/// the slot.
#[derive(Clone, Default)]
pub struct ErrorLatch {
    slot: Arc<RwLock<Option<Arc<AnyError>>>>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, error: AnyError) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(error));
    }

    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    pub fn get(&self) -> Option<Arc<AnyError>> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }
}
