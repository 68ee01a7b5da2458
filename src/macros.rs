// ============================================================================
// strongroom - Ergonomic Macros
// ============================================================================

/// Build a dependency predicate over a subset of state fields.
///
/// Expands to a plain [`EqualsFn`](crate::EqualsFn) comparing only the
/// named fields, for use as the dependency check of a computed entry:
/// the entry recomputes only when one of the watched fields changed
/// between the previous and current state.
///
/// # Usage
///
/// ```rust
/// use strongroom::{watch, EqualsFn};
///
/// #[derive(Clone)]
/// struct Profile { first: String, last: String, visits: u64 }
///
/// let deps: EqualsFn<Profile> = watch!(Profile { first, last });
///
/// let a = Profile { first: "Ada".into(), last: "Lovelace".into(), visits: 1 };
/// let mut b = a.clone();
/// b.visits = 2;
/// assert!(deps(&a, &b)); // only `visits` differs: dependencies unchanged
///
/// b.last = "Byron".into();
/// assert!(!deps(&a, &b));
/// ```
#[macro_export]
macro_rules! watch {
    ($state:ty { $($field:ident),+ $(,)? }) => {{
        fn fields_equal(a: &$state, b: &$state) -> bool {
            $(a.$field == b.$field)&&+
        }
        fields_equal as $crate::EqualsFn<$state>
    }};
}

/// Helper macro to clone variables into a move closure.
///
/// Store handles, computed handles, and coordinators are all cheap
/// `Rc`-backed clones, and listeners are `move` closures; this trims the
/// manual clone-before-move boilerplate.
///
/// # Usage
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use strongroom::cloned;
///
/// let hits = Rc::new(Cell::new(0));
///
/// let bump = cloned!(hits => move || hits.set(hits.get() + 1));
/// bump();
/// assert_eq!(hits.get(), 1);
/// ```
#[macro_export]
macro_rules! cloned {
    ($($n:ident),+ => $e:expr) => {
        {
            $( let $n = $n.clone(); )+
            $e
        }
    };
}
