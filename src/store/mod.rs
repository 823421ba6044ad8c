//! Durable render state, one record per import id.
//!
//! [`StateStore`] is the only way the orchestrator and the recovery sweep
//! touch job state. Every method is atomic on its own; an unknown import id
//! fails with [`RenderError::NotFound`] and mutates nothing.

mod json_file;
mod memory;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::{RenderError, Result};
use crate::state_machine::{ImportId, RenderJob, Stage, validate_import_id};

pub trait StateStore: Send + Sync + 'static {
    /// Creates an idle, unrendered job for a newly uploaded artifact.
    fn register(&self, import_id: ImportId, source_path: &Path) -> Result<RenderJob>;

    fn get(&self, import_id: ImportId) -> Result<RenderJob>;

    /// All jobs, ordered by import id.
    fn list(&self) -> Result<Vec<RenderJob>>;

    /// Moves the stage marker. A stage other than `None` requires the job
    /// to be in progress.
    fn set_stage(&self, import_id: ImportId, stage: Stage) -> Result<()>;

    /// Claims (`true`) or clears (`false`) the job's in-progress flag.
    ///
    /// Claiming is a compare-and-set: a job that is already in progress
    /// fails with [`RenderError::Conflict`], so two renders cannot share a
    /// job even when they run in different processes. Clearing requires the
    /// stage to be `None` already; use [`release`](Self::release) to do
    /// both at once.
    fn set_in_progress(&self, import_id: ImportId, in_progress: bool) -> Result<()>;

    fn mark_rendered(&self, import_id: ImportId) -> Result<()>;

    /// Clears `in_progress` and resets the stage to `None` in one step.
    fn release(&self, import_id: ImportId) -> Result<()>;

    /// Idles every job left in progress, returning the ids that were reset.
    /// `rendered` is left untouched.
    fn reset_stale(&self) -> Result<Vec<ImportId>>;
}

/// In-memory job table shared by the store implementations.
#[derive(Debug, Clone, Default)]
struct JobTable {
    jobs: BTreeMap<ImportId, RenderJob>,
}

impl JobTable {
    fn register(&mut self, import_id: ImportId, source_path: &Path) -> Result<RenderJob> {
        validate_import_id(import_id)?;
        if self.jobs.contains_key(&import_id) {
            return Err(RenderError::AlreadyRegistered(import_id));
        }
        let job = RenderJob::new(import_id, source_path.to_path_buf());
        self.jobs.insert(import_id, job.clone());
        Ok(job)
    }

    fn get(&self, import_id: ImportId) -> Result<RenderJob> {
        self.jobs
            .get(&import_id)
            .cloned()
            .ok_or(RenderError::NotFound(import_id))
    }

    fn list(&self) -> Vec<RenderJob> {
        self.jobs.values().cloned().collect()
    }

    fn update(
        &mut self,
        import_id: ImportId,
        f: impl FnOnce(&mut RenderJob) -> Result<()>,
    ) -> Result<()> {
        let job = self
            .jobs
            .get_mut(&import_id)
            .ok_or(RenderError::NotFound(import_id))?;
        let mut next = job.clone();
        f(&mut next)?;
        next.updated_at = Utc::now();
        *job = next;
        Ok(())
    }

    fn set_stage(&mut self, import_id: ImportId, stage: Stage) -> Result<()> {
        self.update(import_id, |job| {
            if stage != Stage::None && !job.in_progress {
                return Err(RenderError::Validation(format!(
                    "cannot enter stage '{stage}' for import id {import_id}: no render in progress"
                )));
            }
            job.stage = stage;
            Ok(())
        })
    }

    fn set_in_progress(&mut self, import_id: ImportId, in_progress: bool) -> Result<()> {
        self.update(import_id, |job| {
            if in_progress && job.in_progress {
                return Err(RenderError::Conflict(import_id));
            }
            if !in_progress && job.stage != Stage::None {
                return Err(RenderError::Validation(format!(
                    "cannot clear in-progress for import id {import_id} while at stage '{}', release the job instead",
                    job.stage
                )));
            }
            job.in_progress = in_progress;
            Ok(())
        })
    }

    fn mark_rendered(&mut self, import_id: ImportId) -> Result<()> {
        self.update(import_id, |job| {
            job.rendered = true;
            Ok(())
        })
    }

    fn release(&mut self, import_id: ImportId) -> Result<()> {
        self.update(import_id, |job| {
            job.in_progress = false;
            job.stage = Stage::None;
            Ok(())
        })
    }

    fn reset_stale(&mut self) -> Vec<ImportId> {
        let now = Utc::now();
        self.jobs
            .values_mut()
            .filter(|job| job.in_progress)
            .map(|job| {
                job.in_progress = false;
                job.stage = Stage::None;
                job.updated_at = now;
                job.import_id
            })
            .collect()
    }
}
