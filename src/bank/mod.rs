// ============================================================================
// strongroom - Bank
// Bitmask lock coordinator: keys, vaults, and composite-lock refcounts
// ============================================================================
//
// Each lockable identifier gets a disjoint power-of-two bit ("key") in
// registration order. Any set of identifiers then composes into a single
// u32 ("lock") by OR-ing the keys: O(1) composition, O(1) membership via
// `(lock & key) == key`, no set allocations per combination. The price is
// the 32-identifier ceiling, which is a deliberate hard limit.
//
// Per key, a "vault" tracks the composite locks currently active over it.
// An identifier is locked exactly while its vault is non-empty. Locks are
// reference-counted per composite value, so nested or temporally
// overlapping runs under the same lock release it only once the last run
// completes.
// ============================================================================

pub mod action;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::constants::{MAX_VAULTS, VAULTS_FINAL_WARNING, VAULTS_SOFT_WARNING};
use crate::core::error::EngineError;
use crate::core::types::{StoreId, Subscription};

pub use action::{ActionError, ActionRunner};

// =============================================================================
// LOCK VALUES
// =============================================================================

/// A single identifier's lock bit: a power of two assigned in
/// registration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey(u32);

impl LockKey {
    pub fn bit(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockKey({:#b})", self.0)
    }
}

/// A composite lock: the bitwise union of the keys for a set of
/// identifiers, reference-counted as one unit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Lock(u32);

impl Lock {
    /// The sentinel lock of the zero-identifier action path.
    pub const ZERO: Lock = Lock(0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, key: LockKey) -> bool {
        self.0 & key.0 == key.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    fn with(self, key: LockKey) -> Lock {
        Lock(self.0 | key.0)
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock({:#b})", self.0)
    }
}

// =============================================================================
// BANK
// =============================================================================

/// The lock coordinator. Cheap to clone; all clones share one key table.
#[derive(Clone)]
pub struct Bank {
    inner: Rc<BankInner>,
}

struct BankInner {
    /// Key per identifier, in registration order (`key = 1 << position`).
    keys: RefCell<IndexMap<StoreId, LockKey>>,
    /// Reference count per active composite lock.
    locks: RefCell<HashMap<Lock, usize>>,
    /// Active composite locks per key.
    vaults: RefCell<HashMap<LockKey, HashSet<Lock>>>,
    /// Per-identifier listeners, independent of locking.
    listeners: RefCell<HashMap<StoreId, Vec<Rc<dyn Fn()>>>>,
    /// Gates the soft capacity warning and the no-lock warning.
    warnings: Cell<bool>,
    /// Flush path invoked with the identifiers released by a completed
    /// action; wired up by the coordinator.
    on_release: RefCell<Option<Box<dyn Fn(&[StoreId])>>>,
}

impl Bank {
    pub fn new() -> Self {
        Self::with_warnings(true)
    }

    pub(crate) fn with_warnings(warnings: bool) -> Self {
        Self {
            inner: Rc::new(BankInner {
                keys: RefCell::new(IndexMap::new()),
                locks: RefCell::new(HashMap::new()),
                vaults: RefCell::new(HashMap::new()),
                listeners: RefCell::new(HashMap::new()),
                warnings: Cell::new(warnings),
                on_release: RefCell::new(None),
            }),
        }
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Ensure every identifier has an assigned key. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics if a 33rd distinct identifier would be registered: the
    /// composite lock is a single `u32` and has no fallback encoding.
    pub fn register(&self, ids: &[StoreId]) {
        for id in ids {
            self.key(id);
        }
    }

    /// Number of registered identifiers.
    pub fn registered(&self) -> usize {
        self.inner.keys.borrow().len()
    }

    /// The key assigned to `id`, if any. Never assigns.
    pub fn key_of(&self, id: &StoreId) -> Option<LockKey> {
        self.inner.keys.borrow().get(id).copied()
    }

    fn key(&self, id: &StoreId) -> LockKey {
        if let Some(key) = self.inner.keys.borrow().get(id) {
            return *key;
        }
        self.assign(id)
    }

    fn assign(&self, id: &StoreId) -> LockKey {
        let mut keys = self.inner.keys.borrow_mut();
        let assigned = keys.len();

        if assigned >= MAX_VAULTS {
            panic!("{}", EngineError::VaultCapacity);
        } else if assigned == VAULTS_FINAL_WARNING {
            tracing::warn!(
                id = %id,
                "bank: a total of 32 vaults are supported for a given coordinator; this is the final vault"
            );
        } else if assigned == VAULTS_SOFT_WARNING && self.inner.warnings.get() {
            tracing::warn!(
                id = %id,
                "bank: a total of 32 vaults are supported for a given coordinator; this is only a warning and may be ignored"
            );
        }

        let key = LockKey(1 << assigned);
        keys.insert(id.clone(), key);
        self.inner.vaults.borrow_mut().insert(key, HashSet::new());
        key
    }

    // =========================================================================
    // LOCK STATE
    // =========================================================================

    /// True iff at least one active composite lock covers `id`.
    /// An unregistered identifier is never locked.
    pub fn is_locked(&self, id: &StoreId) -> bool {
        let Some(key) = self.key_of(id) else {
            return false;
        };
        self.inner
            .vaults
            .borrow()
            .get(&key)
            .is_some_and(|vault| !vault.is_empty())
    }

    /// True iff every identifier in the set is locked.
    pub fn are_locked<'a>(&self, ids: impl IntoIterator<Item = &'a StoreId>) -> bool {
        ids.into_iter().all(|id| self.is_locked(id))
    }

    /// Compose the identifiers into one lock value, assigning keys for any
    /// first-seen identifiers.
    pub fn compose(&self, ids: &[StoreId]) -> Lock {
        ids.iter().fold(Lock::ZERO, |lock, id| lock.with(self.key(id)))
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Build a reusable action runner bound to the composite lock for
    /// `ids`. With an empty set, the runner executes actions immediately
    /// under the sentinel zero lock, warning per invocation.
    pub fn actions(&self, ids: &[StoreId]) -> ActionRunner {
        ActionRunner::new(self.clone(), ids)
    }

    pub(crate) fn increment(&self, lock: Lock) {
        let first = {
            let mut locks = self.inner.locks.borrow_mut();
            let count = locks.entry(lock).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first {
            let mut vaults = self.inner.vaults.borrow_mut();
            for (key, vault) in vaults.iter_mut() {
                if lock.contains(*key) {
                    vault.insert(lock);
                }
            }
        }
    }

    /// Decrement the lock's reference count; on the final decrement,
    /// remove the lock from every vault and report `true`.
    pub(crate) fn decrement(&self, lock: Lock) -> bool {
        {
            let mut locks = self.inner.locks.borrow_mut();
            let Some(count) = locks.get_mut(&lock) else {
                return false;
            };
            *count -= 1;
            if *count > 0 {
                return false;
            }
            locks.remove(&lock);
        }

        let mut vaults = self.inner.vaults.borrow_mut();
        for (key, vault) in vaults.iter_mut() {
            if lock.contains(*key) {
                vault.remove(&lock);
            }
        }
        true
    }

    pub(crate) fn warnings(&self) -> bool {
        self.inner.warnings.get()
    }

    pub(crate) fn set_on_release(&self, on_release: impl Fn(&[StoreId]) + 'static) {
        *self.inner.on_release.borrow_mut() = Some(Box::new(on_release));
    }

    pub(crate) fn emit_release(&self, ids: &[StoreId]) {
        if let Some(on_release) = &*self.inner.on_release.borrow() {
            on_release(ids);
        }
    }

    // =========================================================================
    // LISTENERS
    // =========================================================================

    /// Register a per-identifier listener, driven by [`notify`](Self::notify).
    /// The identifier's list entry is removed once its last listener is
    /// unsubscribed.
    pub fn add_listener(&self, id: &StoreId, listener: impl Fn() + 'static) -> Subscription {
        let listener: Rc<dyn Fn()> = Rc::new(listener);
        self.inner
            .listeners
            .borrow_mut()
            .entry(id.clone())
            .or_default()
            .push(listener.clone());

        let inner = Rc::downgrade(&self.inner);
        let id = id.clone();
        Subscription::new(move || {
            let Some(bank) = inner.upgrade() else {
                return;
            };
            let mut listeners = bank.listeners.borrow_mut();
            if let Some(list) = listeners.get_mut(&id) {
                list.retain(|entry| !Rc::ptr_eq(entry, &listener));
                if list.is_empty() {
                    listeners.remove(&id);
                }
            }
        })
    }

    /// Invoke every listener registered for `id`.
    pub fn notify(&self, id: &StoreId) {
        let pass = self.inner.listeners.borrow().get(id).cloned();
        if let Some(pass) = pass {
            for listener in pass {
                listener();
            }
        }
    }

    /// Whether any listener is registered for `id`.
    pub fn has_listeners(&self, id: &StoreId) -> bool {
        self.inner.listeners.borrow().contains_key(id)
    }
}

impl Default for Bank {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bank")
            .field("registered", &self.registered())
            .field("active_locks", &self.inner.locks.borrow().len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
