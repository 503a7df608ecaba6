// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler Tests
//!
//! # Test Categories
//!
//! - **Run tests**: dispatch loop start, completion and reclamation
//! - **Yield tests**: FIFO round-robin between cooperating threads
//! - **Block tests**: block, direct hand-off on unblock, stale handles
//! - **Exit tests**: explicit exit and panic containment
//! - **Config tests**: explicit settings and nesting

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use uthread::{
    block, create, current, exit, run, run_with, stats, thread_state, unblock, yield_now, Error,
    SchedulerConfig, ThreadRef, ThreadState,
};

type Trace = Rc<RefCell<Vec<&'static str>>>;

fn trace() -> Trace {
    Rc::new(RefCell::new(Vec::new()))
}

fn push(trace: &Trace, event: &'static str) {
    trace.borrow_mut().push(event);
}

// ============================================================================
// Run Tests
// ============================================================================

#[test]
fn run_returns_after_spawned_threads_finish() {
    let counter = Rc::new(Cell::new(0));
    let shared = counter.clone();

    run(false, move || {
        for _ in 0..8 {
            let c = shared.clone();
            create(move || c.set(c.get() + 1)).unwrap();
        }
    })
    .unwrap();

    assert_eq!(counter.get(), 8);
}

#[test]
fn threads_spawned_by_threads_run() {
    let counter = Rc::new(Cell::new(0));
    let shared = counter.clone();

    run(false, move || {
        let c = shared.clone();
        create(move || {
            let inner = c.clone();
            create(move || inner.set(inner.get() + 10)).unwrap();
            c.set(c.get() + 1);
        })
        .unwrap();
    })
    .unwrap();

    assert_eq!(counter.get(), 11);
}

#[test]
fn zombies_are_reclaimed_while_running() {
    run(false, || {
        for _ in 0..4 {
            create(|| {}).unwrap();
        }

        // Let every child run and exit, then let the dispatch loop reap them
        for _ in 0..3 {
            yield_now().unwrap();
        }
        assert_eq!(stats().unwrap().zombie, 0);
    })
    .unwrap();
}

#[test]
fn many_threads() {
    let counter = Rc::new(Cell::new(0usize));
    let shared = counter.clone();

    run(false, move || {
        for _ in 0..200 {
            let c = shared.clone();
            create(move || {
                yield_now().unwrap();
                c.set(c.get() + 1);
            })
            .unwrap();
        }
    })
    .unwrap();

    assert_eq!(counter.get(), 200);
}

// ============================================================================
// Yield Tests
// ============================================================================

#[test]
fn yield_round_robin() {
    let events = trace();
    let out = events.clone();

    run(false, move || {
        let (ta, tb) = (out.clone(), out.clone());
        create(move || {
            push(&ta, "a1");
            yield_now().unwrap();
            push(&ta, "a2");
        })
        .unwrap();
        create(move || {
            push(&tb, "b1");
            yield_now().unwrap();
            push(&tb, "b2");
        })
        .unwrap();
    })
    .unwrap();

    assert_eq!(*events.borrow(), ["a1", "b1", "a2", "b2"]);
}

#[test]
fn yield_alone_returns_immediately() {
    run(false, || {
        for _ in 0..10 {
            yield_now().unwrap();
        }
    })
    .unwrap();
}

#[test]
fn created_thread_waits_for_its_turn() {
    let events = trace();
    let out = events.clone();

    run(false, move || {
        let child = out.clone();
        create(move || push(&child, "child")).unwrap();
        push(&out, "parent");
    })
    .unwrap();

    assert_eq!(*events.borrow(), ["parent", "child"]);
}

// ============================================================================
// Block Tests
// ============================================================================

#[test]
fn unblock_runs_target_immediately() {
    let events = trace();
    let out = events.clone();

    run(false, move || {
        let sleeper: Rc<Cell<Option<ThreadRef>>> = Rc::new(Cell::new(None));

        let (slot, t) = (sleeper.clone(), out.clone());
        create(move || {
            slot.set(Some(current().unwrap()));
            push(&t, "blocking");
            block().unwrap();
            push(&t, "woken");
        })
        .unwrap();

        while sleeper.get().is_none() {
            yield_now().unwrap();
        }
        let target = sleeper.get().unwrap();
        assert_eq!(thread_state(target), Ok(ThreadState::Blocked));
        assert_eq!(stats().unwrap().blocked, 1);

        push(&out, "unblocking");
        unblock(target).unwrap();
        push(&out, "back");
    })
    .unwrap();

    assert_eq!(
        *events.borrow(),
        ["blocking", "unblocking", "woken", "back"]
    );
}

#[test]
fn unblock_of_non_blocked_thread_fails() {
    run(false, || {
        let me = current().unwrap();
        assert_eq!(unblock(me), Err(Error::NotFound));

        let child = create(|| {}).unwrap();
        assert_eq!(unblock(child), Err(Error::NotFound));
        assert_eq!(thread_state(child), Ok(ThreadState::Ready));
    })
    .unwrap();
}

#[test]
fn stale_handle_is_not_found() {
    run(false, || {
        let child = create(|| {}).unwrap();
        while thread_state(child).is_ok() {
            yield_now().unwrap();
        }
        assert_eq!(unblock(child), Err(Error::NotFound));
        assert_eq!(thread_state(child), Err(Error::NotFound));
    })
    .unwrap();
}

#[test]
fn deadlocked_threads_are_reclaimed() {
    let finished = Rc::new(Cell::new(0));
    let shared = finished.clone();

    run(false, move || {
        for _ in 0..3 {
            let f = shared.clone();
            create(move || {
                block().unwrap();
                f.set(f.get() + 1);
            })
            .unwrap();
        }
    })
    .unwrap();

    assert_eq!(finished.get(), 0);
}

#[test]
fn thread_ids_are_unique() {
    let ids = Rc::new(RefCell::new(Vec::new()));
    let out = ids.clone();

    run(false, move || {
        out.borrow_mut().push(current().unwrap().tid());
        for _ in 0..5 {
            let o = out.clone();
            create(move || o.borrow_mut().push(current().unwrap().tid())).unwrap();
        }
    })
    .unwrap();

    let mut ids = ids.borrow().clone();
    assert_eq!(ids.len(), 6);
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 6);
    assert!(!ids.contains(&uthread::thread::TID_BOOTSTRAP));
}

// ============================================================================
// Exit Tests
// ============================================================================

#[test]
fn exit_skips_rest_of_thread() {
    let events = trace();
    let out = events.clone();

    run(false, move || {
        push(&out, "before");
        exit();
    })
    .unwrap();

    assert_eq!(*events.borrow(), ["before"]);
}

#[test]
fn panic_is_resumed_after_teardown() {
    let survivor = Rc::new(Cell::new(false));
    let flag = survivor.clone();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        run(false, move || {
            create(move || flag.set(true)).unwrap();
            panic!("thread failure");
        })
    }));

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"thread failure"));
    // Other threads still ran to completion
    assert!(survivor.get());
}

#[test]
#[should_panic(expected = "outside a running scheduler")]
fn exit_outside_run_panics() {
    exit();
}

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn run_with_small_stacks() {
    let config = SchedulerConfig::new().stack_size(32 * 1024);
    let done = Rc::new(Cell::new(false));
    let flag = done.clone();

    run_with(config, move || flag.set(true)).unwrap();
    assert!(done.get());
}

#[test]
fn nested_run_is_rejected() {
    let nested = Rc::new(Cell::new(None));
    let out = nested.clone();

    run(false, move || out.set(Some(run(false, || {})))).unwrap();
    assert_eq!(nested.get(), Some(Err(Error::BadState)));
}

#[test]
fn schedulers_on_separate_os_threads() {
    let workers: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(|| {
                let counter = Rc::new(Cell::new(0));
                let shared = counter.clone();
                run(false, move || {
                    for _ in 0..10 {
                        let c = shared.clone();
                        create(move || c.set(c.get() + 1)).unwrap();
                    }
                })
                .unwrap();
                counter.get()
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), 10);
    }
}
