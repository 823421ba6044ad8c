//! Startup sweep for renders interrupted by a previous shutdown.

use crate::error::Result;
use crate::state_machine::ImportId;
use crate::store::StateStore;

/// Returns every job still marked in progress to the idle shape so it can be
/// triggered again. Files the dead process left behind are not inspected.
pub fn sweep<S: StateStore + ?Sized>(store: &S) -> Result<Vec<ImportId>> {
    let reset = store.reset_stale()?;
    if reset.is_empty() {
        tracing::debug!("no interrupted renders found");
    }
    for import_id in &reset {
        tracing::warn!(import_id, "reset render interrupted by previous shutdown");
    }
    Ok(reset)
}
