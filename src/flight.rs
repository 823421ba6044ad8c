//! Single-flight registry: at most one render per import id at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{RenderError, Result};
use crate::state_machine::ImportId;

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<ImportId>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `import_id`, or fails with [`RenderError::Conflict`] if another
    /// render holds it. The claim lasts until the returned guard is dropped.
    pub fn acquire(&self, import_id: ImportId) -> Result<FlightGuard> {
        if !lock(&self.active).insert(import_id) {
            tracing::warn!(import_id, "render already in progress, rejecting trigger");
            return Err(RenderError::Conflict(import_id));
        }
        Ok(FlightGuard {
            import_id,
            active: Arc::clone(&self.active),
        })
    }

    #[cfg(test)]
    pub fn is_active(&self, import_id: ImportId) -> bool {
        lock(&self.active).contains(&import_id)
    }
}

/// Releases its import id when dropped, including during unwinding.
#[derive(Debug)]
pub struct FlightGuard {
    import_id: ImportId,
    active: Arc<Mutex<HashSet<ImportId>>>,
}

impl FlightGuard {
    pub fn import_id(&self) -> ImportId {
        self.import_id
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.import_id);
    }
}

fn lock(active: &Mutex<HashSet<ImportId>>) -> MutexGuard<'_, HashSet<ImportId>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
