// Integration tests for the store engine: staging, publishing, resetting.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pretty_assertions::assert_eq;
use strongroom::{cloned, Coordinator, StoreOptions, StoreState, Subscription};

#[derive(Clone, Debug, PartialEq)]
struct CounterState {
    count: i64,
}

impl StoreState for CounterState {
    type Patch = i64;
    const NAME: &'static str = "counter";

    fn default_state() -> Self {
        Self { count: 0 }
    }

    fn apply_patch(&mut self, patch: Self::Patch) {
        self.count = patch;
    }
}

#[derive(Clone, Debug, PartialEq)]
struct TodoState {
    entries: Vec<String>,
    filter: String,
}

#[derive(Default)]
struct TodoPatch {
    entries: Option<Vec<String>>,
    filter: Option<String>,
}

impl StoreState for TodoState {
    type Patch = TodoPatch;
    const NAME: &'static str = "todos";

    fn default_state() -> Self {
        Self {
            entries: Vec::new(),
            filter: "all".into(),
        }
    }

    fn apply_patch(&mut self, patch: Self::Patch) {
        if let Some(entries) = patch.entries {
            self.entries = entries;
        }
        if let Some(filter) = patch.filter {
            self.filter = filter;
        }
    }
}

#[test]
fn staged_writes_apply_in_call_order_with_one_publish() {
    let stores = Coordinator::new();
    let counter = stores.create::<CounterState>();
    let publishes = Rc::new(Cell::new(0));

    let _subscription = counter.subscribe(cloned!(publishes => move |_| {
        publishes.set(publishes.get() + 1);
    }));

    counter.action().run(cloned!(counter => move || {
        counter.set_state(1);
        counter.set_state_with(|state| state.count + 1);
    }));

    assert_eq!(counter.state().count, 2);
    assert_eq!(publishes.get(), 1);
}

#[test]
fn nested_actions_on_one_store_publish_at_the_outermost_completion() {
    let stores = Coordinator::new();
    let counter = stores.create::<CounterState>();
    let publishes = Rc::new(Cell::new(0));

    let _subscription = counter.subscribe(cloned!(publishes => move |_| {
        publishes.set(publishes.get() + 1);
    }));

    counter.action().run(cloned!(counter, publishes => move || {
        counter.action().run(cloned!(counter => move || {
            counter.set_state(5);
        }));
        // The inner action completed, but the outer still holds the lock.
        assert_eq!(publishes.get(), 0);
        assert_eq!(counter.state().count, 0);
    }));

    assert_eq!(publishes.get(), 1);
    assert_eq!(counter.state().count, 5);
}

#[test]
fn reset_restores_the_default_deeply() {
    let stores = Coordinator::new();
    let todos = stores.create::<TodoState>();

    todos.produce(|draft| {
        draft.entries.push("write tests".into());
        draft.entries.push("trim dead code".into());
        draft.filter = "open".into();
    });
    assert_eq!(todos.state().entries.len(), 2);

    todos.reset();
    assert_eq!(todos.state(), TodoState::default_state());

    todos.reset();
    assert_eq!(todos.state(), TodoState::default_state());
}

#[test]
fn reset_with_initial_state_honors_apply_on_reset() {
    let stores = Coordinator::new();
    let seeded = stores.create_with::<TodoState>(
        StoreOptions::new()
            .initial_with(|| TodoPatch {
                entries: Some(vec!["seeded".into()]),
                ..TodoPatch::default()
            })
            .apply_on_reset(),
    );

    seeded.produce(|draft| draft.entries.clear());
    seeded.reset();

    assert_eq!(seeded.state().entries, ["seeded"]);
}

#[test]
fn listener_removal_mid_pass_spares_the_current_delivery() {
    let stores = Coordinator::new();
    let counter = stores.create::<CounterState>();

    let log = Rc::new(RefCell::new(Vec::new()));
    let doomed_slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

    let _first = counter.subscribe(cloned!(log, doomed_slot => move |_| {
        log.borrow_mut().push("first");
        if let Some(doomed) = doomed_slot.borrow_mut().take() {
            doomed.unsubscribe();
        }
    }));
    let doomed = counter.subscribe(cloned!(log => move |_| {
        log.borrow_mut().push("second");
    }));
    *doomed_slot.borrow_mut() = Some(doomed);

    counter.set_state(1);
    counter.set_state(2);

    // Delivery for the first publish was snapshotted before the removal.
    assert_eq!(log.borrow().as_slice(), ["first", "second", "first"]);
}

#[test]
fn subscribers_added_during_a_pass_start_with_the_next_publish() {
    let stores = Coordinator::new();
    let counter = stores.create::<CounterState>();

    let late_hits = Rc::new(Cell::new(0));
    let late_slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

    let _first = counter.subscribe(cloned!(late_hits, late_slot => move |store| {
        if late_slot.borrow().is_none() {
            *late_slot.borrow_mut() = Some(store.subscribe(cloned!(late_hits => move |_| {
                late_hits.set(late_hits.get() + 1);
            })));
        }
    }));

    counter.set_state(1);
    assert_eq!(late_hits.get(), 0);

    counter.set_state(2);
    assert_eq!(late_hits.get(), 1);
}

#[test]
fn produce_with_an_untouched_draft_commits_cleanly() {
    let stores = Coordinator::new();
    let todos = stores.create::<TodoState>();
    todos.produce(|draft| draft.entries.push("only".into()));

    todos.produce(|_| {});
    assert_eq!(todos.state().entries, ["only"]);
}
