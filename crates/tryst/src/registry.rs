// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Opt-in diagnostics registry of live fibers.
//!
//! Disabled by default, and enabled explicitly per thread: [`enable`]
//! starts recording fibers created on the current thread, [`disable`]
//! stops and clears. Fibers add themselves on construction and remove
//! themselves on drop; [`live_fibers`] takes an insertion-ordered snapshot
//! for inspection, including from inside a running body.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::fiber::{FiberState, Shared};

/// Opaque handle identifying a fiber in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(u64);

/// One registry entry, as observed at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiberSnapshot {
    pub id: FiberId,
    pub state: FiberState,
}

thread_local! {
    static NEXT_ID: Cell<u64> = Cell::new(1);
    static LIVE: RefCell<Option<IndexMap<u64, Weak<RefCell<Shared>>>>> = RefCell::new(None);
}

/// Start recording fibers created on this thread.
pub fn enable() {
    LIVE.with(|live| {
        let mut live = live.borrow_mut();
        if live.is_none() {
            *live = Some(IndexMap::new());
        }
    });
}

/// Stop recording and drop all entries.
pub fn disable() {
    LIVE.with(|live| *live.borrow_mut() = None);
}

pub fn is_enabled() -> bool {
    LIVE.with(|live| live.borrow().is_some())
}

/// Insertion-ordered snapshot of the registered fibers still alive.
pub fn live_fibers() -> Vec<FiberSnapshot> {
    LIVE.with(|live| {
        let live = live.borrow();
        let Some(map) = live.as_ref() else {
            return Vec::new();
        };
        map.iter()
            .filter_map(|(&id, weak)| {
                let shared = weak.upgrade()?;
                let state = shared.borrow().state;
                Some(FiberSnapshot {
                    id: FiberId(id),
                    state,
                })
            })
            .collect()
    })
}

/// Allocate an id for a new fiber and record it if the registry is on.
pub(crate) fn register(shared: &Rc<RefCell<Shared>>) -> FiberId {
    let id = NEXT_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    });
    LIVE.with(|live| {
        if let Some(map) = live.borrow_mut().as_mut() {
            map.insert(id, Rc::downgrade(shared));
        }
    });
    FiberId(id)
}

/// Drop a fiber's entry, if it was recorded.
pub(crate) fn unregister(id: FiberId) {
    LIVE.with(|live| {
        if let Some(map) = live.borrow_mut().as_mut() {
            map.shift_remove(&id.0);
        }
    });
}
