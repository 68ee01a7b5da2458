// ============================================================================
// strongroom - Type Definitions
// Identifiers, equality strategy pointers, and subscription handles
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

// =============================================================================
// EQUALITY STRATEGY
// =============================================================================

/// Equality function type used by computed entries and dependency
/// predicates. See [`crate::compare`] for the stock strategies.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

// =============================================================================
// STORE IDENTIFIERS
// =============================================================================

/// Opaque identifier for a single store instance.
///
/// Assigned once at store construction by the coordinator's
/// identifier-assignment function and used as the bank's atomic lockable
/// unit. Cheap to clone (`Rc<str>` internally) and usable as a map key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StoreId(Rc<str>);

impl StoreId {
    pub fn new(id: impl Into<Rc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", self.0)
    }
}

impl From<&str> for StoreId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StoreId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Handle to a registered listener.
///
/// Dropping the handle removes the listener; call [`forget`](Self::forget)
/// to keep the listener registered for the life of its owner instead.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Combine several subscriptions into one handle that removes them all.
    pub fn merge(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let subscriptions: Vec<Subscription> = subscriptions.into_iter().collect();
        Self::new(move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Detach the handle, leaving the listener registered.
    pub fn forget(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// =============================================================================
// LISTENER LISTS
// =============================================================================

/// An ordered list of shared listeners with snapshot-stable notification.
///
/// Notification passes iterate over a snapshot of the list, so a listener
/// that unsubscribes itself (or a sibling) mid-pass does not affect
/// delivery for the pass already in flight.
pub(crate) struct Listeners<F: ?Sized> {
    entries: Rc<RefCell<Vec<Rc<F>>>>,
}

impl<F: ?Sized + 'static> Listeners<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub(crate) fn push(&self, listener: Rc<F>) -> Subscription {
        self.entries.borrow_mut().push(listener.clone());

        let entries = Rc::downgrade(&self.entries);
        Subscription::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries
                    .borrow_mut()
                    .retain(|entry| !Rc::ptr_eq(entry, &listener));
            }
        })
    }

    pub(crate) fn snapshot(&self) -> Vec<Rc<F>> {
        self.entries.borrow().clone()
    }
}

impl<F: ?Sized> Clone for Listeners<F> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
