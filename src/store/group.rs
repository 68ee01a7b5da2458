// ============================================================================
// strongroom - Store Groups
// Named sets of stores subscribed and locked as one unit
// ============================================================================

use std::fmt;
use std::rc::Rc;

use crate::bank::{ActionRunner, Bank};
use crate::core::types::{StoreId, Subscription};
use crate::store::snapshot::StoreSnapshot;
use crate::store::{Store, StoreHandle, StoreState};

/// A fixed set of stores addressed together: group-wide subscriptions
/// (gated off while every member is locked) and group-wide actions.
///
/// Built by [`Coordinator::group`](crate::Coordinator::group). Cheap to
/// clone.
#[derive(Clone)]
pub struct StoreGroup {
    core: Rc<GroupCore>,
}

struct GroupCore {
    members: Vec<StoreHandle>,
    ids: Rc<[StoreId]>,
    bank: Bank,
}

impl StoreGroup {
    pub(crate) fn new(bank: Bank, members: Vec<StoreHandle>) -> Self {
        let ids: Rc<[StoreId]> = members
            .iter()
            .map(|member| member.id().clone())
            .collect::<Vec<_>>()
            .into();
        Self {
            core: Rc::new(GroupCore {
                members,
                ids,
                bank,
            }),
        }
    }

    /// The member identifiers, in group order.
    pub fn ids(&self) -> &[StoreId] {
        &self.core.ids
    }

    /// The member names, in group order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.core.members.iter().map(|member| member.name())
    }

    pub fn len(&self) -> usize {
        self.core.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.members.is_empty()
    }

    /// Typed access to a member by name.
    pub fn store<S: StoreState>(&self, name: &str) -> Option<Store<S>> {
        self.core
            .members
            .iter()
            .find(|member| member.name() == name)
            .and_then(|member| Store::downcast(member.inner.clone()))
    }

    /// True while every member is locked.
    pub fn are_locked(&self) -> bool {
        self.core.bank.are_locked(self.core.ids.iter())
    }

    /// Listen on every member; the listener is suppressed while the whole
    /// group is locked (a group-wide action is still in flight).
    pub fn subscribe(&self, listener: impl Fn(&StoreGroup) + 'static) -> Subscription {
        let listener: Rc<dyn Fn(&StoreGroup)> = Rc::new(listener);

        let subscriptions = self.core.members.iter().map(|member| {
            let core = Rc::downgrade(&self.core);
            let listener = listener.clone();
            member.inner.add_listener_erased(Rc::new(move || {
                let Some(core) = core.upgrade() else {
                    return;
                };
                if core.bank.are_locked(core.ids.iter()) {
                    return;
                }
                listener(&StoreGroup { core });
            }))
        });
        Subscription::merge(subscriptions.collect::<Vec<_>>())
    }

    /// An action runner over every member's identifier: mutations inside
    /// the action flush as one batched publish when the action completes.
    pub fn action(&self) -> ActionRunner {
        self.core.bank.actions(&self.core.ids)
    }

    /// Snapshots of every member, in group order.
    pub fn snapshot(&self) -> Vec<StoreSnapshot> {
        self.core
            .members
            .iter()
            .map(|member| member.snapshot())
            .collect()
    }
}

impl fmt::Debug for StoreGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreGroup")
            .field("ids", &self.core.ids)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
//
// Group behavior against live stores is covered in tests/actions.rs; the
// coordinator tests cover construction.
// =============================================================================
