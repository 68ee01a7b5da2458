// ============================================================================
// strongroom - Debug Snapshots
// Plain projections of stores for logging and devtools
// ============================================================================

use crate::core::types::StoreId;

/// A read-only projection of one store: its identity, `Debug`-formatted
/// state, and the current values of its initialized computed entries.
/// For diagnostics only; it carries no handles back into the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub id: StoreId,
    pub name: &'static str,
    pub state: String,
    /// `(label, value)` per computed entry that has been read at least
    /// once.
    pub computed: Vec<(&'static str, String)>,
}
