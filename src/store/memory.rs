use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{JobTable, StateStore};
use crate::error::Result;
use crate::state_machine::{ImportId, RenderJob, Stage};

/// Non-durable store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<JobTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn register(&self, import_id: ImportId, source_path: &Path) -> Result<RenderJob> {
        self.table().register(import_id, source_path)
    }

    fn get(&self, import_id: ImportId) -> Result<RenderJob> {
        self.table().get(import_id)
    }

    fn list(&self) -> Result<Vec<RenderJob>> {
        Ok(self.table().list())
    }

    fn set_stage(&self, import_id: ImportId, stage: Stage) -> Result<()> {
        self.table().set_stage(import_id, stage)
    }

    fn set_in_progress(&self, import_id: ImportId, in_progress: bool) -> Result<()> {
        self.table().set_in_progress(import_id, in_progress)
    }

    fn mark_rendered(&self, import_id: ImportId) -> Result<()> {
        self.table().mark_rendered(import_id)
    }

    fn release(&self, import_id: ImportId) -> Result<()> {
        self.table().release(import_id)
    }

    fn reset_stale(&self) -> Result<Vec<ImportId>> {
        Ok(self.table().reset_stale())
    }
}
