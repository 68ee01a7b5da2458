// ============================================================================
// strongroom - Registry
// Process-wide store table and the publish protocol
// ============================================================================
//
// One registry per coordinator. Holds every store created through the
// coordinator (strongly, for the coordinator's lifetime), the name -> id
// table, and the two global listener lists.
//
// Publish order, per batch:
//   1. per store: rotate (previous := current, current := pending), then
//      refresh that store's computed entries - derived values are never
//      observed stale by any listener,
//   2. global getter listeners, then global listeners, each receiving the
//      whole batch - cross-store views see one consistent snapshot,
//   3. per store: its own general listeners.
// ============================================================================

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::config::ErrorHandler;
use crate::core::error::EngineError;
use crate::core::types::{Listeners, StoreId, Subscription};
use crate::store::snapshot::StoreSnapshot;
use crate::store::{Store, StoreState};

// =============================================================================
// TYPE-ERASED STORE INTERFACE
// =============================================================================

/// Type-erased store interface for the publish path.
///
/// The registry and the lock coordinator never need the state type: only
/// reading and writing values does. `StoreInner<S>` implements this so
/// stores of different state types share one table.
pub(crate) trait AnyStore {
    fn id(&self) -> &StoreId;
    fn name(&self) -> &'static str;
    fn has_pending(&self) -> bool;
    /// Commit pending into current; false when nothing was staged.
    fn rotate(&self) -> bool;
    /// Refresh computed entries, then clear `previous` (and, when a purge
    /// was requested, stray pending state).
    fn refresh_getters(&self);
    fn notify_subscribers(self: Rc<Self>);
    fn add_listener_erased(&self, listener: Rc<dyn Fn()>) -> Subscription;
    fn snapshot(&self) -> StoreSnapshot;
    fn as_rc_any(self: Rc<Self>) -> Rc<dyn Any>;
}

// =============================================================================
// PUBLISH BATCH
// =============================================================================

/// The set of stores committed by one publish, as seen by global
/// listeners.
pub struct PublishBatch<'a> {
    stores: &'a [Rc<dyn AnyStore>],
    ids: &'a [StoreId],
}

impl PublishBatch<'_> {
    /// The identifiers that originated this publish.
    pub fn ids(&self) -> &[StoreId] {
        self.ids
    }

    /// Number of stores committed in this batch.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Names of the committed stores, in batch order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.iter().map(|store| store.name())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.iter().any(|store| store.name() == name)
    }

    /// Typed access to a committed store by name.
    pub fn store<S: StoreState>(&self, name: &str) -> Option<Store<S>> {
        self.stores
            .iter()
            .find(|store| store.name() == name)
            .and_then(|store| Store::downcast(store.clone()))
    }
}

/// Listener receiving every publish batch.
pub(crate) type BatchListener = dyn Fn(&PublishBatch<'_>);

// =============================================================================
// REGISTRY
// =============================================================================

pub(crate) struct Registry {
    /// Every store created through the coordinator, in creation order.
    stores: RefCell<IndexMap<StoreId, Rc<dyn AnyStore>>>,
    /// Name -> id; on name collision the most recent instance wins.
    names: RefCell<HashMap<&'static str, StoreId>>,
    /// Global refresh-phase listeners, notified before global listeners.
    global_getters: Listeners<BatchListener>,
    /// Global listeners, notified between computed refreshes and
    /// per-store listeners.
    global_listeners: Listeners<BatchListener>,
    on_error: ErrorHandler,
}

impl Registry {
    pub(crate) fn new(on_error: ErrorHandler) -> Rc<Self> {
        Rc::new(Self {
            stores: RefCell::new(IndexMap::new()),
            names: RefCell::new(HashMap::new()),
            global_getters: Listeners::new(),
            global_listeners: Listeners::new(),
            on_error,
        })
    }

    pub(crate) fn insert(&self, store: Rc<dyn AnyStore>) {
        self.names.borrow_mut().insert(store.name(), store.id().clone());
        self.stores.borrow_mut().insert(store.id().clone(), store);
    }

    pub(crate) fn id_of(&self, name: &str) -> Option<StoreId> {
        self.names.borrow().get(name).cloned()
    }

    pub(crate) fn get(&self, id: &StoreId) -> Option<Rc<dyn AnyStore>> {
        self.stores.borrow().get(id).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Rc<dyn AnyStore>> {
        self.stores.borrow().values().cloned().collect()
    }

    pub(crate) fn subscribe_getters(&self, listener: Rc<BatchListener>) -> Subscription {
        self.global_getters.push(listener)
    }

    pub(crate) fn subscribe(&self, listener: Rc<BatchListener>) -> Subscription {
        self.global_listeners.push(listener)
    }

    // =========================================================================
    // PUBLISH
    // =========================================================================

    /// Commit and notify the given stores as one batch.
    pub(crate) fn publish(&self, ids: &[StoreId]) {
        let stores: Vec<Rc<dyn AnyStore>> = {
            let table = self.stores.borrow();
            ids.iter()
                .filter_map(|id| match table.get(id) {
                    Some(store) => Some(store.clone()),
                    None => {
                        (self.on_error)(&EngineError::UnknownStore(id.clone()));
                        None
                    }
                })
                .collect()
        };

        let mut batch = Vec::with_capacity(stores.len());
        for store in stores {
            if store.rotate() {
                store.refresh_getters();
                batch.push(store);
            }
        }
        if batch.is_empty() {
            return;
        }
        tracing::debug!(stores = batch.len(), "publish");

        let view = PublishBatch {
            stores: &batch,
            ids,
        };
        for listener in self.global_getters.snapshot() {
            listener(&view);
        }
        for listener in self.global_listeners.snapshot() {
            listener(&view);
        }

        for store in &batch {
            store.clone().notify_subscribers();
        }
    }

    /// Publish the subset of `ids` with staged state, as a single batch.
    /// This is the unlock path: identifiers released by a completed
    /// action land here.
    pub(crate) fn flush(&self, ids: &[StoreId]) {
        let pending: Vec<StoreId> = {
            let table = self.stores.borrow();
            ids.iter()
                .filter(|id| table.get(*id).is_some_and(|store| store.has_pending()))
                .cloned()
                .collect()
        };
        if !pending.is_empty() {
            self.publish(&pending);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
//
// The publish protocol is exercised end-to-end (with real stores) in the
// store and coordinator tests; here only the bookkeeping around unknown
// identifiers is covered.
// =============================================================================
