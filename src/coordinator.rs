// ============================================================================
// strongroom - Coordinator
// One bank + one registry + configuration, as an explicit value object
// ============================================================================
//
// Never ambient global state: every store and action factory receives the
// coordinator by reference, and independent coordinators coexist freely
// (test isolation, embedded sub-applications). Dropping the coordinator
// drops the registry; outstanding store handles keep their own state but
// can no longer publish.
// ============================================================================

use std::rc::Rc;

use crate::bank::{ActionRunner, Bank};
use crate::core::config::{CoordinatorConfig, ResolvedConfig};
use crate::core::error::EngineError;
use crate::core::types::{StoreId, Subscription};
use crate::registry::{PublishBatch, Registry};
use crate::store::group::StoreGroup;
use crate::store::snapshot::StoreSnapshot;
use crate::store::{Store, StoreHandle, StoreOptions, StoreState};

/// The shared namespace for a family of stores: creates them, locks them
/// together, and batches their publishes. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    bank: Bank,
    registry: Rc<Registry>,
    config: Rc<ResolvedConfig>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        let config = ResolvedConfig::resolve(config);
        let bank = Bank::with_warnings(config.warnings);
        let registry = Registry::new(config.on_error.clone());

        // Unlock flush: identifiers released by a completed action publish
        // their staged state as one batch. Weak, so the bank (held by
        // every store) never keeps the registry alive.
        let flush_target = Rc::downgrade(&registry);
        bank.set_on_release(move |ids| {
            if let Some(registry) = flush_target.upgrade() {
                registry.flush(ids);
            }
        });

        Self {
            bank,
            registry,
            config,
        }
    }

    // =========================================================================
    // STORE CREATION
    // =========================================================================

    /// Create a store of type `S` with its default state.
    pub fn create<S: StoreState>(&self) -> Store<S> {
        self.create_with(StoreOptions::default())
    }

    /// Create a store of type `S`, applying the given options.
    ///
    /// Assigns the store's identifier and registers its lock key.
    ///
    /// # Panics
    ///
    /// Panics when the bank's 32-identifier capacity is exhausted.
    pub fn create_with<S: StoreState>(&self, options: StoreOptions<S>) -> Store<S> {
        let id = self.config.next_id(S::NAME);
        self.bank.register(std::slice::from_ref(&id));
        Store::create(
            id,
            self.bank.clone(),
            &self.registry,
            self.config.on_error.clone(),
            options,
        )
    }

    // =========================================================================
    // LOCKING AND ACTIONS
    // =========================================================================

    /// The underlying lock coordinator.
    pub fn bank(&self) -> &Bank {
        &self.bank
    }

    pub fn is_locked(&self, id: &StoreId) -> bool {
        self.bank.is_locked(id)
    }

    pub fn are_locked<'a>(&self, ids: impl IntoIterator<Item = &'a StoreId>) -> bool {
        self.bank.are_locked(ids)
    }

    /// An action runner over an arbitrary identifier set; mutations to the
    /// covered stores flush as one batch when the action completes.
    pub fn actions(&self, ids: &[StoreId]) -> ActionRunner {
        self.bank.actions(ids)
    }

    /// Group stores so they can be subscribed and locked as one unit.
    pub fn group(&self, stores: &[StoreHandle]) -> StoreGroup {
        StoreGroup::new(self.bank.clone(), stores.to_vec())
    }

    // =========================================================================
    // GLOBAL SUBSCRIPTIONS
    // =========================================================================

    /// Listen to every publish batch, after computed refreshes and before
    /// per-store listeners.
    pub fn subscribe(&self, listener: impl Fn(&PublishBatch<'_>) + 'static) -> Subscription {
        self.registry.subscribe(Rc::new(listener))
    }

    /// Listen to every publish batch during the refresh phase, ahead of
    /// [`subscribe`](Self::subscribe) listeners.
    pub fn subscribe_getters(
        &self,
        listener: impl Fn(&PublishBatch<'_>) + 'static,
    ) -> Subscription {
        self.registry.subscribe_getters(Rc::new(listener))
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    /// The identifier registered under `name`, if any. On name collision
    /// the most recently created instance wins.
    pub fn id_of(&self, name: &str) -> Option<StoreId> {
        self.registry.id_of(name)
    }

    /// Every live instance of store type `S`, in creation order.
    pub fn instances<S: StoreState>(&self) -> Vec<Store<S>> {
        self.registry
            .all()
            .into_iter()
            .filter_map(Store::downcast)
            .collect()
    }

    /// The sole instance of store type `S`.
    ///
    /// # Panics
    ///
    /// Panics when no instance (or more than one) exists - requesting a
    /// store that was never created is a configuration error.
    pub fn single<S: StoreState>(&self) -> Store<S> {
        let mut instances = self.instances::<S>();
        match instances.len() {
            1 => instances.swap_remove(0),
            0 => panic!("{}", EngineError::NoInstance(S::NAME)),
            _ => panic!("{}", EngineError::AmbiguousInstance(S::NAME)),
        }
    }

    /// Snapshots of every store, in creation order.
    pub fn snapshot(&self) -> Vec<StoreSnapshot> {
        self.registry
            .all()
            .into_iter()
            .map(|store| store.snapshot())
            .collect()
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================
