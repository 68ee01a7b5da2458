// ============================================================================
// strongroom - Transactional Reactive Stores
// ============================================================================
//
// Named state containers with staged writes, batched publishes, and
// memoized derived values, coordinated by a bitmask lock bank: any set of
// stores composes into a single lock, actions reference-count against it,
// and covered stores flush as one batch when the last action completes.
//
// Strictly single-threaded and cooperative: handles are Rc-backed,
// "concurrent" actions are temporally overlapping async operations on one
// scheduler, and locks are held across suspension points.
// ============================================================================

pub mod bank;
pub mod compare;
pub mod core;
pub mod coordinator;
mod macros;
pub mod registry;
pub mod store;

// Re-export the working surface at the crate root
pub use crate::core::config::{CoordinatorConfig, ErrorHandler};
pub use crate::core::constants;
pub use crate::core::error::{ActionError, EngineError};
pub use crate::core::types::{EqualsFn, StoreId, Subscription};

pub use bank::{ActionRunner, Bank, Lock, LockKey};
pub use coordinator::Coordinator;
pub use registry::PublishBatch;
pub use store::computed::{computed, computed_with, Computed};
pub use store::group::StoreGroup;
pub use store::snapshot::StoreSnapshot;
pub use store::{StateUpdate, Store, StoreHandle, StoreOptions, StoreState};

// =============================================================================
// TESTS
// =============================================================================
