// ============================================================================
// strongroom - Action Runner
// Coordinated execution of user callbacks under a composite lock
// ============================================================================
//
// One runner per call-site, reusable across invocations. Every invocation
// follows the same flow: increment the lock's refcount, execute (awaiting
// asynchronous actions, so the lock is held across suspension points),
// route any error, decrement, and - only when the refcount reached zero -
// run the completion path. A drop guard keeps the decrement exactly-once
// even if the action unwinds.
//
// No cancellation or timeout exists: an action that never resolves holds
// its lock indefinitely.
// ============================================================================

use std::future::Future;
use std::rc::Rc;

use crate::bank::{Bank, Lock};
use crate::core::types::StoreId;

pub use crate::core::error::ActionError;

/// A callable bound to one composite lock.
///
/// Built via [`Bank::actions`], [`Store::action`], or
/// [`Coordinator::actions`]. Cloning shares the lock binding and the
/// configured handlers.
///
/// [`Store::action`]: crate::Store::action
/// [`Coordinator::actions`]: crate::Coordinator::actions
#[derive(Clone)]
pub struct ActionRunner {
    bank: Bank,
    lock: Lock,
    ids: Rc<[StoreId]>,
    on_error: Option<Rc<dyn Fn(&ActionError)>>,
    on_done: Option<Rc<dyn Fn(&[StoreId])>>,
}

impl ActionRunner {
    pub(crate) fn new(bank: Bank, ids: &[StoreId]) -> Self {
        let lock = bank.compose(ids);
        Self {
            bank,
            lock,
            ids: ids.into(),
            on_error: None,
            on_done: None,
        }
    }

    /// The composite lock this runner holds while executing.
    pub fn lock(&self) -> Lock {
        self.lock
    }

    /// The identifiers covered by this runner.
    pub fn ids(&self) -> &[StoreId] {
        &self.ids
    }

    /// Route action errors to `handler` (in addition to returning them).
    pub fn on_error(mut self, handler: impl Fn(&ActionError) + 'static) -> Self {
        self.on_error = Some(Rc::new(handler));
        self
    }

    /// Replace the default completion path. The callback receives the
    /// runner's identifiers and runs only when the lock's reference count
    /// reaches zero (immediately, for the zero-lock runner).
    pub fn on_done(mut self, on_done: impl Fn(&[StoreId]) + 'static) -> Self {
        self.on_done = Some(Rc::new(on_done));
        self
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Run an infallible action under the lock.
    pub fn run(&self, action: impl FnOnce()) {
        let _ = self.try_run(|| {
            action();
            Ok(())
        });
    }

    /// Run a fallible action under the lock. The error is routed to the
    /// configured handler and returned; lock bookkeeping and completion
    /// run regardless of the outcome.
    pub fn try_run(&self, action: impl FnOnce() -> Result<(), ActionError>) -> Result<(), ActionError> {
        if self.lock.is_empty() {
            self.warn_unbound();
            let result = action();
            return self.conclude_unbound(result);
        }

        self.bank.increment(self.lock);
        let guard = ReleaseGuard::new(&self.bank, self.lock);
        let result = action();
        self.settle(guard, result)
    }

    /// Run an infallible asynchronous action, holding the lock across
    /// every suspension point until the future resolves.
    pub async fn run_async<Fut>(&self, action: impl FnOnce() -> Fut)
    where
        Fut: Future<Output = ()>,
    {
        let _ = self
            .try_run_async(|| {
                let fut = action();
                async move {
                    fut.await;
                    Ok(())
                }
            })
            .await;
    }

    /// Run a fallible asynchronous action, holding the lock until the
    /// future resolves.
    pub async fn try_run_async<Fut>(
        &self,
        action: impl FnOnce() -> Fut,
    ) -> Result<(), ActionError>
    where
        Fut: Future<Output = Result<(), ActionError>>,
    {
        if self.lock.is_empty() {
            self.warn_unbound();
            let result = action().await;
            return self.conclude_unbound(result);
        }

        self.bank.increment(self.lock);
        let guard = ReleaseGuard::new(&self.bank, self.lock);
        let result = action().await;
        self.settle(guard, result)
    }

    // =========================================================================
    // COMPLETION
    // =========================================================================

    fn settle(
        &self,
        guard: ReleaseGuard,
        result: Result<(), ActionError>,
    ) -> Result<(), ActionError> {
        if let Err(error) = &result {
            if let Some(handler) = &self.on_error {
                handler(error);
            }
        }
        if guard.finish() {
            self.complete();
        }
        result
    }

    fn conclude_unbound(&self, result: Result<(), ActionError>) -> Result<(), ActionError> {
        if let Err(error) = &result {
            if let Some(handler) = &self.on_error {
                handler(error);
            }
        }
        self.complete();
        result
    }

    fn complete(&self) {
        match &self.on_done {
            Some(on_done) => on_done(&self.ids),
            None => {
                let released: Vec<StoreId> = self
                    .ids
                    .iter()
                    .filter(|id| !self.bank.is_locked(id))
                    .cloned()
                    .collect();
                if !released.is_empty() {
                    self.bank.emit_release(&released);
                }
            }
        }
    }

    fn warn_unbound(&self) {
        if self.bank.warnings() {
            tracing::warn!("bank: no ids provided; running action without a lock");
        }
    }
}

// =============================================================================
// RELEASE GUARD
// =============================================================================

/// Decrements the lock exactly once: on `finish` for the normal paths, or
/// on drop if the action unwound. The completion path is skipped while
/// unwinding; the lock itself is always released.
struct ReleaseGuard {
    bank: Bank,
    lock: Lock,
    armed: bool,
}

impl ReleaseGuard {
    fn new(bank: &Bank, lock: Lock) -> Self {
        Self {
            bank: bank.clone(),
            lock,
            armed: true,
        }
    }

    fn finish(mut self) -> bool {
        self.armed = false;
        self.bank.decrement(self.lock)
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.armed {
            self.bank.decrement(self.lock);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
