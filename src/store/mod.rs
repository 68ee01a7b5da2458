// ============================================================================
// strongroom - Store Engine
// Transactional state containers with staged writes and ordered listeners
// ============================================================================
//
// A store owns three state slots:
//
//   current  - the committed state, always defined,
//   pending  - staged by mutations, at most one between publishes;
//              overlapping writes coalesce onto it (merge or overwrite,
//              last write wins),
//   previous - the state replaced at the last publish, alive only until
//              that publish's computed-refresh pass ends.
//
// A mutation stages pending state and requests a publish. While the
// store's identifier is locked at the bank the update stays pending; the
// unlock flush commits it. Otherwise the publish happens synchronously.
// ============================================================================

pub mod computed;
pub mod group;
pub mod snapshot;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::bank::{ActionRunner, Bank};
use crate::core::config::ErrorHandler;
use crate::core::error::EngineError;
use crate::core::types::{Listeners, StoreId, Subscription};
use crate::registry::{AnyStore, Registry};
use crate::store::computed::GetterEntry;
use crate::store::snapshot::StoreSnapshot;

// =============================================================================
// STATE DECLARATION
// =============================================================================

/// Declarative manifest of a store's state type.
///
/// `Patch` and [`apply_patch`](Self::apply_patch) define the merge
/// semantics of partial updates; the conventional shape is a struct of
/// `Option` fields applied over the state. `default_state` seeds new
/// instances and drives [`Store::reset`].
pub trait StoreState: Clone + fmt::Debug + 'static {
    /// Partial-update type merged over the state.
    type Patch: 'static;

    /// Store name: the registry key and the prefix of assigned ids.
    const NAME: &'static str;

    /// The state a fresh (or reset) store starts from.
    fn default_state() -> Self;

    /// Merge a partial update into the state.
    fn apply_patch(&mut self, patch: Self::Patch);
}

/// A staged mutation: a partial patch or a full replacement, each either
/// by value or computed from the current-or-pending state.
pub enum StateUpdate<S: StoreState> {
    /// Merge a patch over the current-or-pending state.
    Patch(S::Patch),
    /// Merge a patch computed from the current-or-pending state.
    PatchWith(Box<dyn FnOnce(&S) -> S::Patch>),
    /// Replace the state wholesale.
    Replace(S),
    /// Replace with a value computed from the current-or-pending state.
    ReplaceWith(Box<dyn FnOnce(&S) -> S>),
}

// =============================================================================
// CONSTRUCTION OPTIONS
// =============================================================================

/// Options for [`Coordinator::create_with`](crate::Coordinator::create_with).
pub struct StoreOptions<S: StoreState> {
    initial: Option<Box<dyn Fn() -> S::Patch>>,
    apply_on_reset: bool,
}

impl<S: StoreState> StoreOptions<S> {
    pub fn new() -> Self {
        Self {
            initial: None,
            apply_on_reset: false,
        }
    }

    /// Merge `patch` over the default state at construction.
    pub fn initial(mut self, patch: S::Patch) -> Self
    where
        S::Patch: Clone,
    {
        self.initial = Some(Box::new(move || patch.clone()));
        self
    }

    /// Merge a freshly computed patch over the default state at
    /// construction.
    pub fn initial_with(mut self, initial: impl Fn() -> S::Patch + 'static) -> Self {
        self.initial = Some(Box::new(initial));
        self
    }

    /// Re-run the initial-state merge on every [`Store::reset`], instead
    /// of resetting to the bare default state.
    pub fn apply_on_reset(mut self) -> Self {
        self.apply_on_reset = true;
        self
    }
}

impl<S: StoreState> Default for StoreOptions<S> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// STORE INNER
// =============================================================================

pub(crate) struct StoreInner<S: StoreState> {
    id: StoreId,
    current: RefCell<S>,
    pending: RefCell<Option<S>>,
    previous: RefCell<Option<S>>,
    /// Default-state factory; re-applies the initial merge when the store
    /// was created with `apply_on_reset`.
    default_state: Box<dyn Fn() -> S>,
    /// Publish counter; the computed cache's side-effect check.
    version: Cell<u64>,
    /// Set by purging updates: drop stray pending state right after the
    /// next computed-refresh pass.
    purge_after_refresh: Cell<bool>,
    /// Computed entries, held weakly: dropping a Computed handle retires
    /// its refresh work.
    getters: RefCell<Vec<Weak<dyn GetterEntry>>>,
    listeners: Listeners<dyn Fn(&Store<S>)>,
    bank: Bank,
    registry: Weak<Registry>,
    on_error: ErrorHandler,
}

impl<S: StoreState> StoreInner<S> {
    fn base(&self) -> S {
        if let Some(pending) = &*self.pending.borrow() {
            return pending.clone();
        }
        self.current.borrow().clone()
    }

    fn stage(&self, update: StateUpdate<S>, purge: bool) {
        let next = match update {
            StateUpdate::Patch(patch) => {
                let mut next = self.base();
                next.apply_patch(patch);
                next
            }
            StateUpdate::PatchWith(make) => {
                let mut next = self.base();
                let patch = make(&next);
                next.apply_patch(patch);
                next
            }
            StateUpdate::Replace(next) => next,
            StateUpdate::ReplaceWith(make) => make(&self.base()),
        };

        *self.pending.borrow_mut() = Some(next);
        if purge {
            self.purge_after_refresh.set(true);
        }
        self.queue();
    }

    /// Publish now, unless the bank holds this identifier - then the
    /// staged state waits for the unlock flush.
    fn queue(&self) {
        if self.bank.is_locked(&self.id) {
            return;
        }
        match self.registry.upgrade() {
            Some(registry) => registry.publish(std::slice::from_ref(&self.id)),
            None => (self.on_error)(&EngineError::CoordinatorGone(self.id.clone())),
        }
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.get()
    }

    pub(crate) fn current_clone(&self) -> S {
        self.current.borrow().clone()
    }

    pub(crate) fn previous_clone(&self) -> Option<S> {
        self.previous.borrow().clone()
    }

    pub(crate) fn report(&self, error: &EngineError) {
        (self.on_error)(error);
    }

    pub(crate) fn register_getter(&self, entry: Weak<dyn GetterEntry>) {
        self.getters.borrow_mut().push(entry);
    }
}

impl<S: StoreState> AnyStore for StoreInner<S> {
    fn id(&self) -> &StoreId {
        &self.id
    }

    fn name(&self) -> &'static str {
        S::NAME
    }

    fn has_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }

    fn rotate(&self) -> bool {
        let Some(next) = self.pending.borrow_mut().take() else {
            return false;
        };
        let Ok(mut current) = self.current.try_borrow_mut() else {
            // State is borrowed by a caller further up the stack; restage
            // the update and skip this publish rather than poisoning it.
            *self.pending.borrow_mut() = Some(next);
            (self.on_error)(&EngineError::ReentrantPublish(self.id.clone()));
            return false;
        };
        let previous = std::mem::replace(&mut *current, next);
        drop(current);
        *self.previous.borrow_mut() = Some(previous);
        self.version.set(self.version.get() + 1);
        true
    }

    fn refresh_getters(&self) {
        let pass: Vec<Rc<dyn GetterEntry>> = {
            let mut getters = self.getters.borrow_mut();
            getters.retain(|entry| entry.strong_count() > 0);
            getters.iter().filter_map(Weak::upgrade).collect()
        };
        for entry in pass {
            entry.refresh();
        }

        // `previous` only feeds the dependency checks above; drop it here
        // so no listener ever derives from a stale snapshot.
        *self.previous.borrow_mut() = None;
        if self.purge_after_refresh.replace(false) {
            *self.pending.borrow_mut() = None;
        }
    }

    fn notify_subscribers(self: Rc<Self>) {
        let pass = self.listeners.snapshot();
        let store = Store { inner: self };
        for listener in pass {
            listener(&store);
        }
    }

    fn add_listener_erased(&self, listener: Rc<dyn Fn()>) -> Subscription {
        self.listeners.push(Rc::new(move |_: &Store<S>| listener()))
    }

    fn snapshot(&self) -> StoreSnapshot {
        let computed = self
            .getters
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|entry| entry.describe())
            .collect();
        StoreSnapshot {
            id: self.id.clone(),
            name: S::NAME,
            state: format!("{:?}", self.current.borrow()),
            computed,
        }
    }

    fn as_rc_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

// =============================================================================
// STORE HANDLE
// =============================================================================

/// Handle to a store instance. Cheap to clone; all clones address the
/// same state container.
pub struct Store<S: StoreState> {
    pub(crate) inner: Rc<StoreInner<S>>,
}

impl<S: StoreState> Store<S> {
    pub(crate) fn create(
        id: StoreId,
        bank: Bank,
        registry: &Rc<Registry>,
        on_error: ErrorHandler,
        options: StoreOptions<S>,
    ) -> Self {
        let StoreOptions {
            initial,
            apply_on_reset,
        } = options;

        let make: Rc<dyn Fn() -> S> = Rc::new(move || {
            let mut state = S::default_state();
            if let Some(initial) = &initial {
                state.apply_patch(initial());
            }
            state
        });
        let current = make();
        let default_state: Box<dyn Fn() -> S> = if apply_on_reset {
            Box::new(move || make())
        } else {
            Box::new(S::default_state)
        };

        let inner = Rc::new(StoreInner {
            id,
            current: RefCell::new(current),
            pending: RefCell::new(None),
            previous: RefCell::new(None),
            default_state,
            version: Cell::new(0),
            purge_after_refresh: Cell::new(false),
            getters: RefCell::new(Vec::new()),
            listeners: Listeners::new(),
            bank,
            registry: Rc::downgrade(registry),
            on_error,
        });
        registry.insert(inner.clone());
        Self { inner }
    }

    pub(crate) fn downcast(store: Rc<dyn AnyStore>) -> Option<Self> {
        store
            .as_rc_any()
            .downcast::<StoreInner<S>>()
            .ok()
            .map(|inner| Self { inner })
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// A clone of the committed state.
    pub fn state(&self) -> S {
        self.inner.current_clone()
    }

    /// Read the committed state without cloning. The closure must not
    /// mutate the store.
    pub fn with_state<R>(&self, read: impl FnOnce(&S) -> R) -> R {
        read(&self.inner.current.borrow())
    }

    pub fn id(&self) -> &StoreId {
        &self.inner.id
    }

    pub fn name(&self) -> &'static str {
        S::NAME
    }

    /// Whether the bank currently holds this store's identifier.
    pub fn is_locked(&self) -> bool {
        self.inner.bank.is_locked(&self.inner.id)
    }

    /// Plain projection of the store for logging and devtools.
    pub fn snapshot(&self) -> StoreSnapshot {
        AnyStore::snapshot(&*self.inner)
    }

    /// Type-erased handle, for grouping stores of different state types.
    pub fn handle(&self) -> StoreHandle {
        StoreHandle {
            inner: self.inner.clone(),
        }
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Stage an update and request a publish.
    pub fn update(&self, update: StateUpdate<S>) {
        self.inner.stage(update, false);
    }

    /// Stage an update that also clears `previous` and any stray pending
    /// state right after the next computed-refresh pass.
    pub fn update_and_purge(&self, update: StateUpdate<S>) {
        self.inner.stage(update, true);
    }

    /// Merge a patch over the current-or-pending state.
    pub fn set_state(&self, patch: S::Patch) {
        self.update(StateUpdate::Patch(patch));
    }

    /// Merge a patch computed from the current-or-pending state.
    pub fn set_state_with(&self, make: impl FnOnce(&S) -> S::Patch + 'static) {
        self.update(StateUpdate::PatchWith(Box::new(make)));
    }

    /// Replace the state wholesale.
    pub fn replace_state(&self, next: S) {
        self.update(StateUpdate::Replace(next));
    }

    /// Replace the state with a value computed from the current-or-pending
    /// state.
    pub fn replace_state_with(&self, make: impl FnOnce(&S) -> S + 'static) {
        self.update(StateUpdate::ReplaceWith(Box::new(make)));
    }

    /// Mutate a draft of the current-or-pending state and commit it as a
    /// replacement.
    pub fn produce(&self, draft: impl FnOnce(&mut S)) {
        let mut next = self.inner.base();
        draft(&mut next);
        self.update(StateUpdate::Replace(next));
    }

    /// Reset to the default state (re-running the initial merge when the
    /// store was created with `apply_on_reset`). Idempotent.
    pub fn reset(&self) {
        let next = (self.inner.default_state)();
        self.inner.stage(StateUpdate::Replace(next), true);
    }

    /// Reset, letting `reinitialize` carry fields from the outgoing state
    /// into the fresh default.
    pub fn reset_with(&self, reinitialize: impl FnOnce(&mut S, &S)) {
        let last = self.inner.base();
        let mut next = (self.inner.default_state)();
        reinitialize(&mut next, &last);
        self.inner.stage(StateUpdate::Replace(next), true);
    }

    // =========================================================================
    // SUBSCRIPTIONS AND ACTIONS
    // =========================================================================

    /// Register a listener invoked after every publish that committed this
    /// store, once computed entries are refreshed.
    pub fn subscribe(&self, listener: impl Fn(&Store<S>) + 'static) -> Subscription {
        self.inner.listeners.push(Rc::new(listener))
    }

    /// An action runner keyed by this store's own identifier: mutations
    /// inside the action coalesce into one publish on completion. Actions
    /// spanning several stores come from
    /// [`Coordinator::actions`](crate::Coordinator::actions).
    pub fn action(&self) -> ActionRunner {
        self.inner.bank.actions(std::slice::from_ref(&self.inner.id))
    }
}

impl<S: StoreState> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: StoreState> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("name", &S::NAME)
            .field("state", &self.inner.current.borrow())
            .finish()
    }
}

/// Type-erased store handle, usable across state types (store groups,
/// coordinator-wide snapshots).
#[derive(Clone)]
pub struct StoreHandle {
    pub(crate) inner: Rc<dyn AnyStore>,
}

impl StoreHandle {
    pub fn id(&self) -> &StoreId {
        self.inner.id()
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.snapshot()
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("id", self.inner.id())
            .field("name", &self.inner.name())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinator;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};

    #[derive(Clone, Debug, PartialEq)]
    struct CounterState {
        count: i64,
        label: String,
    }

    #[derive(Default, Clone)]
    struct CounterPatch {
        count: Option<i64>,
        label: Option<String>,
    }

    impl StoreState for CounterState {
        type Patch = CounterPatch;
        const NAME: &'static str = "counter";

        fn default_state() -> Self {
            Self {
                count: 0,
                label: "fresh".into(),
            }
        }

        fn apply_patch(&mut self, patch: Self::Patch) {
            if let Some(count) = patch.count {
                self.count = count;
            }
            if let Some(label) = patch.label {
                self.label = label;
            }
        }
    }

    fn counter() -> (Coordinator, Store<CounterState>) {
        let stores = Coordinator::new();
        let store = stores.create::<CounterState>();
        (stores, store)
    }

    #[test]
    fn set_state_merges_over_current() {
        let (_stores, store) = counter();
        store.set_state(CounterPatch {
            count: Some(3),
            ..CounterPatch::default()
        });

        assert_eq!(store.state().count, 3);
        assert_eq!(store.state().label, "fresh");
    }

    #[test]
    fn replace_state_overwrites() {
        let (_stores, store) = counter();
        store.replace_state(CounterState {
            count: 9,
            label: "replaced".into(),
        });

        assert_eq!(
            store.state(),
            CounterState {
                count: 9,
                label: "replaced".into()
            }
        );
    }

    #[test]
    fn functional_updates_see_current_or_pending() {
        let (_stores, store) = counter();

        // Unlocked: each call publishes, the second sees the first.
        store.set_state(CounterPatch {
            count: Some(1),
            ..CounterPatch::default()
        });
        store.set_state_with(|state| CounterPatch {
            count: Some(state.count + 1),
            ..CounterPatch::default()
        });

        assert_eq!(store.state().count, 2);
    }

    #[test]
    fn staged_updates_coalesce_under_a_lock() {
        let (_stores, store) = counter();
        let publishes = Rc::new(Cell::new(0));

        let publishes_in = publishes.clone();
        let _subscription = store.subscribe(move |_| publishes_in.set(publishes_in.get() + 1));

        let store_in = store.clone();
        store.action().run(|| {
            store_in.set_state(CounterPatch {
                count: Some(1),
                ..CounterPatch::default()
            });
            store_in.set_state_with(|state| CounterPatch {
                count: Some(state.count + 1),
                ..CounterPatch::default()
            });
            // Nothing committed while the lock is held.
            assert_eq!(store_in.state().count, 0);
            assert_eq!(publishes.get(), 0);
        });

        assert_eq!(store.state().count, 2);
        assert_eq!(publishes.get(), 1);
    }

    #[test]
    fn produce_drafts_on_top_of_pending() {
        let (_stores, store) = counter();
        let store_in = store.clone();
        store.action().run(|| {
            store_in.set_state(CounterPatch {
                count: Some(10),
                ..CounterPatch::default()
            });
            store_in.produce(|draft| draft.count *= 3);
        });

        assert_eq!(store.state().count, 30);
    }

    #[test]
    fn reset_is_idempotent() {
        let (_stores, store) = counter();
        store.produce(|draft| {
            draft.count = 42;
            draft.label = "dirty".into();
        });

        store.reset();
        let once = store.state();
        store.reset();

        assert_eq!(once, CounterState::default_state());
        assert_eq!(store.state(), once);
    }

    #[test]
    fn reset_with_carries_fields_over() {
        let (_stores, store) = counter();
        store.produce(|draft| {
            draft.count = 7;
            draft.label = "kept".into();
        });

        store.reset_with(|next, last| {
            next.label = last.label.clone();
        });

        assert_eq!(store.state().count, 0);
        assert_eq!(store.state().label, "kept");
    }

    #[test]
    fn reset_reapplies_initial_state_when_asked() {
        let stores = Coordinator::new();
        let plain = stores.create_with::<CounterState>(
            StoreOptions::new().initial(CounterPatch {
                count: Some(5),
                ..CounterPatch::default()
            }),
        );
        let sticky = stores.create_with::<CounterState>(
            StoreOptions::new()
                .initial(CounterPatch {
                    count: Some(5),
                    ..CounterPatch::default()
                })
                .apply_on_reset(),
        );

        plain.produce(|draft| draft.count = 99);
        sticky.produce(|draft| draft.count = 99);
        plain.reset();
        sticky.reset();

        assert_eq!(plain.state().count, 0);
        assert_eq!(sticky.state().count, 5);
    }

    #[test]
    fn purging_updates_commit_like_plain_ones() {
        let (_stores, store) = counter();
        store.update_and_purge(StateUpdate::Replace(CounterState {
            count: 8,
            label: "purged".into(),
        }));
        assert_eq!(store.state().count, 8);

        // The purge is one-shot; later updates stage and commit normally.
        store.set_state(CounterPatch {
            count: Some(9),
            ..CounterPatch::default()
        });
        assert_eq!(store.state().count, 9);
    }

    #[test]
    fn subscribers_observe_committed_state() {
        let (_stores, store) = counter();
        let seen = Rc::new(Cell::new(-1));

        let seen_in = seen.clone();
        let _subscription = store.subscribe(move |store| seen_in.set(store.state().count));

        store.set_state(CounterPatch {
            count: Some(4),
            ..CounterPatch::default()
        });
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn dropped_subscription_stops_delivery() {
        let (_stores, store) = counter();
        let hits = Rc::new(Cell::new(0));

        let hits_in = hits.clone();
        let subscription = store.subscribe(move |_| hits_in.set(hits_in.get() + 1));

        store.produce(|draft| draft.count += 1);
        subscription.unsubscribe();
        store.produce(|draft| draft.count += 1);

        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn unsubscribing_inside_a_callback_keeps_the_current_pass_intact() {
        let (_stores, store) = counter();
        let second_fired = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let slot_in = slot.clone();
        let _first = store.subscribe(move |_| {
            if let Some(subscription) = slot_in.borrow_mut().take() {
                subscription.unsubscribe();
            }
        });
        let second_in = second_fired.clone();
        let second = store.subscribe(move |_| second_in.set(second_in.get() + 1));
        *slot.borrow_mut() = Some(second);

        // First publish: listener one removes listener two mid-pass, yet
        // listener two still receives this publish.
        store.produce(|draft| draft.count += 1);
        assert_eq!(second_fired.get(), 1);

        store.produce(|draft| draft.count += 1);
        assert_eq!(second_fired.get(), 1);
    }

    #[test]
    fn store_outliving_its_coordinator_reports_instead_of_panicking() {
        let seen = Rc::new(Cell::new(0));
        let seen_in = seen.clone();
        let stores = Coordinator::with_config(crate::CoordinatorConfig {
            on_error: Some(Rc::new(move |_| seen_in.set(seen_in.get() + 1))),
            ..crate::CoordinatorConfig::default()
        });
        let store = stores.create::<CounterState>();
        drop(stores);

        store.produce(|draft| draft.count += 1);
        assert_eq!(seen.get(), 1);
    }
}
