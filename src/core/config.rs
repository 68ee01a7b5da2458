// ============================================================================
// strongroom - Coordinator Configuration
// Pluggable identifier assignment, error handling, and warning control
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::core::error::EngineError;
use crate::core::types::StoreId;

/// Handler receiving fatal-adjacent and advisory engine conditions.
pub type ErrorHandler = Rc<dyn Fn(&EngineError)>;

/// Identifier-assignment function: store type name in, unique id out.
pub type AssignId = Box<dyn FnMut(&str) -> StoreId>;

/// Construction-time configuration for a [`Coordinator`].
///
/// Every field is optional; the defaults are a per-coordinator
/// `{name}-{counter}` identifier scheme, an error handler that logs
/// through `tracing`, and warnings enabled.
///
/// [`Coordinator`]: crate::Coordinator
#[derive(Default)]
pub struct CoordinatorConfig {
    /// Replaces the default identifier-assignment function.
    pub assign_id: Option<AssignId>,
    /// Replaces the default (logging) error handler.
    pub on_error: Option<ErrorHandler>,
    /// `Some(false)` suppresses the early (24-slot) capacity warning and
    /// the per-invocation no-lock warning. Defaults to enabled.
    pub warnings: Option<bool>,
}

// =============================================================================
// RESOLVED CONFIGURATION
// =============================================================================

/// Configuration with all defaults filled in, shared across the
/// coordinator's components.
pub(crate) struct ResolvedConfig {
    assign_id: RefCell<AssignId>,
    pub(crate) on_error: ErrorHandler,
    pub(crate) warnings: bool,
}

impl ResolvedConfig {
    pub(crate) fn resolve(config: CoordinatorConfig) -> Rc<Self> {
        Rc::new(Self {
            assign_id: RefCell::new(config.assign_id.unwrap_or_else(default_assign_id)),
            on_error: config.on_error.unwrap_or_else(default_error_handler),
            warnings: config.warnings.unwrap_or(true),
        })
    }

    pub(crate) fn next_id(&self, name: &str) -> StoreId {
        (self.assign_id.borrow_mut())(name)
    }
}

fn default_assign_id() -> AssignId {
    let counter = Cell::new(0u64);
    Box::new(move |name| {
        counter.set(counter.get() + 1);
        StoreId::from(format!("{name}-{}", counter.get()))
    })
}

fn default_error_handler() -> ErrorHandler {
    Rc::new(|error| tracing::warn!(error = %error, "store engine inconsistency"))
}

// =============================================================================
// TESTS
// =============================================================================
