// ============================================================================
// strongroom - Computed Cache
// Memoized derived values refreshed ahead of listeners
// ============================================================================
//
// A computed entry wraps a getter over a store's state. The value is
// evaluated on first read and cached; from then on the store's publish
// path refreshes it before any listener runs, so derived values are never
// observed stale. Two gates keep the work minimal:
//
//   - the dependency predicate compares previous against current state
//     and skips the recomputation entirely when the watched fields are
//     unchanged (cheapest path),
//   - the result predicate compares the recomputed value against the
//     cache and keeps the cache untouched when they match.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::compare::equals;
use crate::core::error::EngineError;
use crate::core::types::EqualsFn;
use crate::store::{Store, StoreInner, StoreState};

// =============================================================================
// GETTER ENTRIES
// =============================================================================

/// A refreshable entry in a store's getter list.
pub(crate) trait GetterEntry {
    fn refresh(&self);
    /// Label and current value for snapshots; `None` until first read.
    fn describe(&self) -> Option<(&'static str, String)>;
}

// =============================================================================
// COMPUTED
// =============================================================================

/// A memoized derived value over one store's state.
///
/// Created by [`computed`] or [`computed_with`]; read with
/// [`get`](Self::get). Dropping the handle retires the entry from the
/// store's refresh pass.
pub struct Computed<S: StoreState, T> {
    inner: Rc<ComputedInner<S, T>>,
}

pub(crate) struct ComputedInner<S: StoreState, T> {
    store: Weak<StoreInner<S>>,
    label: &'static str,
    getter: Box<dyn Fn(&S) -> T>,
    /// `None` recomputes on every publish.
    deps_equal: Option<EqualsFn<S>>,
    result_equal: EqualsFn<T>,
    value: RefCell<Option<T>>,
    initialized: Cell<bool>,
}

/// Wrap a getter with the default gates: whole-state equality as the
/// dependency predicate and `PartialEq` on the result.
pub fn computed<S, T>(
    store: &Store<S>,
    label: &'static str,
    getter: impl Fn(&S) -> T + 'static,
) -> Computed<S, T>
where
    S: StoreState + PartialEq,
    T: Clone + PartialEq + fmt::Debug + 'static,
{
    computed_with(store, label, Some(equals::<S>), equals::<T>, getter)
}

/// Wrap a getter with explicit gates. `deps_equal` is the dependency
/// predicate (`None` = always recompute; use [`watch!`](crate::watch) for
/// field subsets); `result_equal` decides whether a recomputed value
/// replaces the cache.
pub fn computed_with<S, T>(
    store: &Store<S>,
    label: &'static str,
    deps_equal: Option<EqualsFn<S>>,
    result_equal: EqualsFn<T>,
    getter: impl Fn(&S) -> T + 'static,
) -> Computed<S, T>
where
    S: StoreState,
    T: Clone + fmt::Debug + 'static,
{
    Computed {
        inner: Rc::new(ComputedInner {
            store: Rc::downgrade(&store.inner),
            label,
            getter: Box::new(getter),
            deps_equal,
            result_equal,
            value: RefCell::new(None),
            initialized: Cell::new(false),
        }),
    }
}

impl<S, T> Computed<S, T>
where
    S: StoreState,
    T: Clone + fmt::Debug + 'static,
{
    /// The cached value, computing it (and joining the store's refresh
    /// pass) on first read.
    pub fn get(&self) -> T {
        if !self.inner.initialized.get() {
            ComputedInner::initialize(&self.inner);
        }
        self.inner
            .value
            .borrow()
            .as_ref()
            .expect("computed value present after initialization")
            .clone()
    }

    pub fn label(&self) -> &'static str {
        self.inner.label
    }
}

impl<S: StoreState, T> Clone for Computed<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, T> fmt::Debug for Computed<S, T>
where
    S: StoreState,
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("label", &self.inner.label)
            .field("value", &self.inner.value.borrow())
            .finish()
    }
}

impl<S, T> ComputedInner<S, T>
where
    S: StoreState,
    T: Clone + fmt::Debug + 'static,
{
    fn initialize(this: &Rc<Self>) {
        let store = this
            .store
            .upgrade()
            .expect("computed read after its store was dropped");

        *this.value.borrow_mut() = Some((this.getter)(&store.current_clone()));
        this.initialized.set(true);

        let entry: Rc<dyn GetterEntry> = this.clone();
        store.register_getter(Rc::downgrade(&entry));
    }
}

impl<S, T> GetterEntry for ComputedInner<S, T>
where
    S: StoreState,
    T: Clone + fmt::Debug + 'static,
{
    fn refresh(&self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };

        let version = store.version();
        let current = store.current_clone();

        // Cheapest path: watched dependencies unchanged, skip outright.
        if let (Some(deps_equal), Some(previous)) = (self.deps_equal, store.previous_clone()) {
            if deps_equal(&current, &previous) {
                return;
            }
        }

        let next = (self.getter)(&current);
        let unchanged = self
            .value
            .borrow()
            .as_ref()
            .is_some_and(|cached| (self.result_equal)(cached, &next));
        if unchanged {
            return;
        }
        *self.value.borrow_mut() = Some(next);

        // A getter must be pure: a publish during its own evaluation means
        // it wrote back into the store.
        if store.version() != version {
            store.report(&EngineError::ComputedSideEffect {
                store: S::NAME,
                getter: self.label,
            });
        }
    }

    fn describe(&self) -> Option<(&'static str, String)> {
        if !self.initialized.get() {
            return None;
        }
        Some((self.label, format!("{:?}", self.value.borrow().as_ref()?)))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StoreId;
    use crate::{watch, Coordinator, CoordinatorConfig};
    use std::cell::Cell;

    #[derive(Clone, Debug, PartialEq)]
    struct ProfileState {
        first: String,
        last: String,
        visits: u64,
    }

    #[derive(Default)]
    struct ProfilePatch {
        first: Option<String>,
        last: Option<String>,
        visits: Option<u64>,
    }

    impl StoreState for ProfileState {
        type Patch = ProfilePatch;
        const NAME: &'static str = "profile";

        fn default_state() -> Self {
            Self {
                first: "Ada".into(),
                last: "Lovelace".into(),
                visits: 0,
            }
        }

        fn apply_patch(&mut self, patch: Self::Patch) {
            if let Some(first) = patch.first {
                self.first = first;
            }
            if let Some(last) = patch.last {
                self.last = last;
            }
            if let Some(visits) = patch.visits {
                self.visits = visits;
            }
        }
    }

    fn profile() -> (Coordinator, Store<ProfileState>) {
        let stores = Coordinator::new();
        let store = stores.create::<ProfileState>();
        (stores, store)
    }

    #[test]
    fn caches_until_a_publish_invalidates() {
        let (_stores, store) = profile();
        let evaluations = Rc::new(Cell::new(0));

        let evaluations_in = evaluations.clone();
        let full_name = computed_with(&store, "full_name", None, equals, move |state| {
            evaluations_in.set(evaluations_in.get() + 1);
            format!("{} {}", state.first, state.last)
        });

        assert_eq!(full_name.get(), "Ada Lovelace");
        assert_eq!(full_name.get(), "Ada Lovelace");
        assert_eq!(evaluations.get(), 1);

        store.set_state(ProfilePatch {
            first: Some("Grace".into()),
            ..ProfilePatch::default()
        });
        assert_eq!(full_name.get(), "Grace Lovelace");
        assert_eq!(evaluations.get(), 2);
    }

    #[test]
    fn dependency_list_gates_recomputation() {
        let (_stores, store) = profile();
        let evaluations = Rc::new(Cell::new(0));

        let evaluations_in = evaluations.clone();
        let full_name = computed_with(
            &store,
            "full_name",
            Some(watch!(ProfileState { first, last })),
            equals,
            move |state| {
                evaluations_in.set(evaluations_in.get() + 1);
                format!("{} {}", state.first, state.last)
            },
        );
        assert_eq!(full_name.get(), "Ada Lovelace");

        // Mutating an unwatched field never recomputes.
        store.set_state(ProfilePatch {
            visits: Some(10),
            ..ProfilePatch::default()
        });
        assert_eq!(evaluations.get(), 1);

        // Mutating a watched field does.
        store.set_state(ProfilePatch {
            last: Some("Hopper".into()),
            ..ProfilePatch::default()
        });
        assert_eq!(evaluations.get(), 2);
        assert_eq!(full_name.get(), "Ada Hopper");
    }

    #[test]
    fn equal_results_leave_the_cache_untouched() {
        let (_stores, store) = profile();

        let initials = computed_with(&store, "initials", None, equals, |state: &ProfileState| {
            format!(
                "{}{}",
                state.first.chars().next().unwrap_or('?'),
                state.last.chars().next().unwrap_or('?')
            )
        });
        assert_eq!(initials.get(), "AL");

        // "Ada" -> "Augusta": same initial, comparator-equal result.
        store.set_state(ProfilePatch {
            first: Some("Augusta".into()),
            ..ProfilePatch::default()
        });
        assert_eq!(initials.get(), "AL");
    }

    #[test]
    fn refresh_happens_before_subscribers_run() {
        let (_stores, store) = profile();
        let full_name = computed(&store, "full_name", |state| {
            format!("{} {}", state.first, state.last)
        });
        assert_eq!(full_name.get(), "Ada Lovelace");

        let observed = Rc::new(RefCell::new(String::new()));
        let observed_in = observed.clone();
        let full_name_in = full_name.clone();
        let _subscription = store.subscribe(move |_| {
            // The cache was refreshed before this listener ran.
            *observed_in.borrow_mut() = full_name_in.get();
        });

        store.set_state(ProfilePatch {
            last: Some("Hopper".into()),
            ..ProfilePatch::default()
        });
        assert_eq!(&*observed.borrow(), "Ada Hopper");
    }

    #[test]
    fn dropping_the_handle_retires_the_entry() {
        let (_stores, store) = profile();
        let evaluations = Rc::new(Cell::new(0));

        let evaluations_in = evaluations.clone();
        let full_name = computed_with(&store, "full_name", None, equals, move |state| {
            evaluations_in.set(evaluations_in.get() + 1);
            state.first.clone()
        });
        assert_eq!(full_name.get(), "Ada");
        drop(full_name);

        store.set_state(ProfilePatch {
            first: Some("Grace".into()),
            ..ProfilePatch::default()
        });
        assert_eq!(evaluations.get(), 1);
    }

    #[test]
    fn side_effecting_getter_is_reported() {
        let reported = Rc::new(Cell::new(0));
        let reported_in = reported.clone();
        let stores = Coordinator::with_config(CoordinatorConfig {
            on_error: Some(Rc::new(move |error| {
                if matches!(error, EngineError::ComputedSideEffect { .. }) {
                    reported_in.set(reported_in.get() + 1);
                }
            })),
            ..CoordinatorConfig::default()
        });
        let store = stores.create::<ProfileState>();

        let store_in = store.clone();
        let poisoned = computed_with(&store, "poisoned", None, never_equal, move |state| {
            if state.visits == 1 && state.first != "Mutated" {
                // Illegal: the getter writes back into its own store.
                store_in.set_state(ProfilePatch {
                    first: Some("Mutated".into()),
                    ..ProfilePatch::default()
                });
            }
            state.visits
        });
        assert_eq!(poisoned.get(), 0);

        store.set_state(ProfilePatch {
            visits: Some(1),
            ..ProfilePatch::default()
        });
        assert_eq!(reported.get(), 1);
    }

    fn never_equal(_: &u64, _: &u64) -> bool {
        false
    }

    #[test]
    fn snapshot_lists_initialized_entries_only() {
        let (_stores, store) = profile();
        let idle = computed(&store, "idle", |state| state.visits);
        let full_name = computed(&store, "full_name", |state| {
            format!("{} {}", state.first, state.last)
        });
        let _ = full_name.get();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.computed.len(), 1);
        assert_eq!(snapshot.computed[0].0, "full_name");
        assert!(snapshot.computed[0].1.contains("Ada Lovelace"));

        let _keep_alive = (idle, full_name);
    }

    #[test]
    fn computed_survives_by_id_lookup() {
        // Guards the Weak plumbing: the registry keeps the store alive, so
        // a computed built from a transient handle still refreshes.
        let (stores, store) = profile();
        let id: StoreId = store.id().clone();
        let full_name = computed(&store, "full_name", |state| state.first.clone());
        assert_eq!(full_name.get(), "Ada");
        drop(store);

        let again: Store<ProfileState> = stores.single();
        assert_eq!(again.id(), &id);
        again.set_state(ProfilePatch {
            first: Some("Grace".into()),
            ..ProfilePatch::default()
        });
        assert_eq!(full_name.get(), "Grace");
    }
}
