// ============================================================================
// strongroom - Error Taxonomy
// ============================================================================
//
// Three classes of failure, handled differently:
//
// - Configuration errors (vault capacity, missing required instance) are
//   programming errors: fatal, raised as panics with the EngineError text.
// - Action errors are the user's own failures inside a coordinated action:
//   recoverable, routed to the runner's error handler and returned to the
//   caller as a Result.
// - Consistency warnings (computed side effects, unknown identifiers) are
//   advisory: routed to the coordinator's error handler, which logs by
//   default.
// ============================================================================

use thiserror::Error;

use crate::core::types::StoreId;

/// Error raised by a user action, carried opaquely through the runner.
pub type ActionError = Box<dyn std::error::Error>;

/// Internal engine conditions: fatal configuration errors and the advisory
/// inconsistencies routed to the configured error handler.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A 33rd distinct identifier was registered with one bank.
    #[error(
        "bank: a total of 32 vaults are supported for a given coordinator; cannot create another vault"
    )]
    VaultCapacity,

    /// `single` was called for a store type with no live instance.
    #[error("no live instance of store type `{0}` is registered with this coordinator")]
    NoInstance(&'static str),

    /// `single` was called for a store type with several live instances.
    #[error("several instances of store type `{0}` are registered with this coordinator")]
    AmbiguousInstance(&'static str),

    /// A publish referenced an identifier with no registered store.
    #[error("store `{0}` is not registered with this coordinator")]
    UnknownStore(StoreId),

    /// A computed getter mutated its own store while recomputing.
    #[error("a change in `{store}` state was detected during the computation of `{getter}`")]
    ComputedSideEffect {
        store: &'static str,
        getter: &'static str,
    },

    /// A publish fired while the store's state was borrowed; skipped.
    #[error("store `{0}` published while its state was borrowed; publish skipped")]
    ReentrantPublish(StoreId),

    /// The coordinator was dropped while a store handle still staged updates.
    #[error("coordinator dropped before store `{0}`; update left pending")]
    CoordinatorGone(StoreId),
}

// =============================================================================
// TESTS
// =============================================================================
