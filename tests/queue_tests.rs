// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Queue Tests
//!
//! # Test Categories
//!
//! - **Order tests**: FIFO enqueue/dequeue and length accounting
//! - **Delete tests**: identity removal at head, tail, middle and singleton
//! - **Iterate tests**: callbacks that delete and modify elements

use std::ptr::NonNull;

use uthread::queue::Queue;
use uthread::Error;

fn snapshot(queue: &Queue<i32>) -> Vec<i32> {
    queue.iter().map(|p| unsafe { *p.as_ref() }).collect()
}

fn filled(data: &mut [i32]) -> Queue<i32> {
    let mut queue = Queue::new();
    for item in data.iter_mut() {
        queue.enqueue(item).unwrap();
    }
    queue
}

// ============================================================================
// Order Tests
// ============================================================================

#[test]
fn fifo_order_and_length() {
    let mut data: Vec<i32> = (0..10).collect();
    let mut queue = filled(&mut data);
    assert_eq!(queue.len(), 10);

    for expected in 0..10 {
        let item = queue.dequeue().unwrap();
        assert_eq!(unsafe { *item.as_ref() }, expected);
        assert_eq!(queue.len(), 9 - expected as usize);
    }

    assert_eq!(queue.dequeue(), Err(Error::NotFound));
}

#[test]
fn dequeue_returns_same_reference() {
    let mut value = 3;
    let ptr: *mut i32 = &mut value;

    let mut queue = Queue::new();
    queue.enqueue(ptr).unwrap();
    assert_eq!(queue.dequeue().unwrap(), NonNull::new(ptr).unwrap());
}

#[test]
fn interleaved_enqueue_dequeue() {
    let mut data = [1, 2, 3, 4];
    let [a, b, c, d] = &mut data;

    let mut queue = Queue::new();
    queue.enqueue(a).unwrap();
    queue.enqueue(b).unwrap();
    assert_eq!(unsafe { *queue.dequeue().unwrap().as_ref() }, 1);
    queue.enqueue(c).unwrap();
    assert_eq!(unsafe { *queue.dequeue().unwrap().as_ref() }, 2);
    queue.enqueue(d).unwrap();
    assert_eq!(snapshot(&queue), vec![3, 4]);
}

// ============================================================================
// Delete Tests
// ============================================================================

#[test]
fn delete_head() {
    let mut data = [1, 2, 3];
    let head: *mut i32 = &mut data[0];
    let mut queue = filled(&mut data);

    queue.delete(head).unwrap();
    assert_eq!(snapshot(&queue), vec![2, 3]);
    assert_eq!(unsafe { *queue.dequeue().unwrap().as_ref() }, 2);
}

#[test]
fn delete_tail() {
    let mut data = [1, 2, 3];
    let tail: *mut i32 = &mut data[2];
    let mut extra = 4;
    let mut queue = filled(&mut data);

    queue.delete(tail).unwrap();
    queue.enqueue(&mut extra).unwrap();
    assert_eq!(snapshot(&queue), vec![1, 2, 4]);
}

#[test]
fn delete_middle() {
    let mut data = [1, 2, 3];
    let middle: *mut i32 = &mut data[1];
    let mut queue = filled(&mut data);

    queue.delete(middle).unwrap();
    assert_eq!(snapshot(&queue), vec![1, 3]);
    assert_eq!(queue.len(), 2);
}

#[test]
fn delete_singleton() {
    let mut value = 9;
    let mut again = 10;
    let mut queue = Queue::new();
    queue.enqueue(&mut value).unwrap();

    queue.delete(&mut value).unwrap();
    assert!(queue.is_empty());
    assert_eq!(queue.dequeue(), Err(Error::NotFound));

    // Head and tail were both reset
    queue.enqueue(&mut again).unwrap();
    assert_eq!(snapshot(&queue), vec![10]);
}

#[test]
fn delete_absent_has_no_effect() {
    let mut data = [1, 2, 3];
    let mut stranger = 2;
    let mut queue = filled(&mut data);

    assert_eq!(queue.delete(&mut stranger), Err(Error::NotFound));
    assert_eq!(snapshot(&queue), vec![1, 2, 3]);
    assert_eq!(queue.len(), 3);
}

#[test]
fn delete_removes_oldest_duplicate() {
    let mut value = 5;
    let mut other = 6;
    let ptr: *mut i32 = &mut value;

    let mut queue = Queue::new();
    queue.enqueue(ptr).unwrap();
    queue.enqueue(&mut other).unwrap();
    queue.enqueue(ptr).unwrap();

    queue.delete(ptr).unwrap();
    assert_eq!(snapshot(&queue), vec![6, 5]);
}

// ============================================================================
// Iterate Tests
// ============================================================================

#[test]
fn iterate_deletes_current_and_modifies_rest() {
    let mut data = [1, 2, 3, 4, 5, 42, 6, 7, 8, 9];
    let mut queue = filled(&mut data);

    let mut visited = 0;
    queue.iterate(|q, item| {
        visited += 1;
        let value = unsafe { &mut *item.as_ptr() };
        if *value == 42 {
            q.delete(item.as_ptr()).unwrap();
        } else {
            *value += 1;
        }
    });

    assert_eq!(visited, 10);
    assert_eq!(queue.len(), 9);
    assert_eq!(unsafe { *queue.dequeue().unwrap().as_ref() }, 2);
    assert_eq!(snapshot(&queue), vec![3, 4, 5, 6, 7, 8, 9, 10]);
}

#[test]
fn iterate_visits_elements_enqueued_by_callback() {
    let mut data = [1, 2];
    let mut late = 3;
    let late_ptr: *mut i32 = &mut late;
    let mut queue = filled(&mut data);

    let mut seen = Vec::new();
    queue.iterate(|q, item| {
        let value = unsafe { *item.as_ref() };
        seen.push(value);
        if value == 2 {
            q.enqueue(late_ptr).unwrap();
        }
    });

    assert_eq!(seen, vec![1, 2, 3]);
}

#[test]
fn iterate_empty_queue() {
    let mut queue: Queue<i32> = Queue::new();
    let mut calls = 0;
    queue.iterate(|_, _| calls += 1);
    assert_eq!(calls, 0);
}
