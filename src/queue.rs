// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! FIFO Queue
//!
//! This module provides the queue used for the scheduler's ready, blocked
//! and zombie lists and for semaphore waiters.
//!
//! # Design
//!
//! - **Reference queue**: stores raw element pointers, never owns the elements
//! - **O(1) ends**: enqueue at the tail, dequeue from the head
//! - **Identity delete**: [`Queue::delete`] matches by address, O(n)
//! - **Safe iteration**: [`Queue::iterate`] tolerates the callback deleting
//!   the current element, or any other element
//! - **Fallible**: node allocation failure is reported, not aborted on
//! - **Node recycling**: unlinked nodes go to a spare list that `enqueue`
//!   draws from first, so a dequeue followed by an enqueue never touches
//!   the allocator
//!
//! # Usage
//!
//! ```rust
//! use uthread::queue::Queue;
//!
//! let mut a = 1u32;
//! let mut b = 2u32;
//!
//! let mut queue = Queue::new();
//! queue.enqueue(&mut a).unwrap();
//! queue.enqueue(&mut b).unwrap();
//!
//! let head = queue.dequeue().unwrap();
//! assert_eq!(unsafe { *head.as_ref() }, 1);
//! assert_eq!(queue.len(), 1);
//! ```

use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::err::{Error, Result};
use crate::mm::try_box;

/// ============================================================================
/// Queue
/// ============================================================================

type Link<T> = Option<NonNull<Node<T>>>;

/// One queued element reference
struct Node<T> {
    data: NonNull<T>,
    prev: Link<T>,
    next: Link<T>,
}

/// FIFO queue of element references
///
/// The queue owns its nodes. Elements are borrowed by address: the caller
/// keeps each element alive while it is queued.
pub struct Queue<T> {
    head: Link<T>,
    tail: Link<T>,
    len: usize,

    /// Node the running `iterate` visits next; unlinking it advances this
    cursor: Link<T>,

    /// Unlinked nodes kept for reuse, chained through `next`
    spare: Link<T>,
    spares: usize,

    _nodes: PhantomData<Box<Node<T>>>,
}

impl<T> Queue<T> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            cursor: None,
            spare: None,
            spares: 0,
            _nodes: PhantomData,
        }
    }

    /// Number of queued elements
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Nodes held by the queue, linked or spare
    pub fn capacity(&self) -> usize {
        self.len + self.spares
    }

    /// Make sure `additional` enqueues can proceed without allocating
    ///
    /// # Returns
    ///
    /// - Ok(()) on success
    /// - Err(NoMemory) if a node cannot be allocated; nodes already
    ///   reserved are kept
    pub fn reserve(&mut self, additional: usize) -> Result {
        while self.spares < additional {
            let node = Self::alloc_node(Node {
                data: NonNull::dangling(),
                prev: None,
                next: None,
            })?;
            self.push_spare(node);
        }
        Ok(())
    }

    /// Append an element at the tail
    ///
    /// # Returns
    ///
    /// - Ok(()) on success
    /// - Err(InvalidArgs) if `data` is null
    /// - Err(NoMemory) if the node cannot be allocated
    pub fn enqueue(&mut self, data: *mut T) -> Result {
        let data = NonNull::new(data).ok_or(Error::InvalidArgs)?;

        let node = Node {
            data,
            prev: self.tail,
            next: None,
        };
        let node = match self.spare {
            Some(spare) => {
                // SAFETY: spare nodes are owned by this queue and unlinked.
                unsafe {
                    self.spare = (*spare.as_ptr()).next;
                    self.spares -= 1;
                    spare.as_ptr().write(node);
                }
                spare
            }
            None => Self::alloc_node(node)?,
        };

        match self.tail {
            // SAFETY: tail is a live node owned by this queue.
            Some(tail) => unsafe { (*tail.as_ptr()).next = Some(node) },
            None => self.head = Some(node),
        }
        self.tail = Some(node);
        self.len += 1;

        Ok(())
    }

    /// Remove and return the element at the head
    ///
    /// # Returns
    ///
    /// - Ok(element) on success
    /// - Err(NotFound) if the queue is empty
    pub fn dequeue(&mut self) -> Result<NonNull<T>> {
        let head = self.head.ok_or(Error::NotFound)?;
        // SAFETY: head is a live node owned by this queue.
        Ok(unsafe { self.unlink(head) })
    }

    /// Remove the oldest occurrence of `data`
    ///
    /// Elements are compared by address only.
    ///
    /// # Returns
    ///
    /// - Ok(()) on success
    /// - Err(InvalidArgs) if `data` is null
    /// - Err(NotFound) if `data` is not queued; the queue is unchanged
    pub fn delete(&mut self, data: *mut T) -> Result {
        if data.is_null() {
            return Err(Error::InvalidArgs);
        }

        let node = self.find(data).ok_or(Error::NotFound)?;
        // SAFETY: find only returns live nodes owned by this queue.
        unsafe { self.unlink(node) };

        Ok(())
    }

    /// Check whether `data` is queued
    pub fn contains(&self, data: *const T) -> bool {
        self.find(data).is_some()
    }

    /// Iterate over the queued element references, head to tail
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            next: self.head,
            _queue: PhantomData,
        }
    }

    /// Call `func` once for every element, head to tail
    ///
    /// The successor of each node is fixed before `func` runs, so the
    /// callback may delete the element it was handed. Elements enqueued by
    /// the callback are visited too, once the walk reaches them.
    pub fn iterate<F>(&mut self, mut func: F)
    where
        F: FnMut(&mut IterQueue<'_, T>, NonNull<T>),
    {
        let mut current = self.head;

        while let Some(node) = current {
            // SAFETY: node is live; it was either the head or the cursor,
            // and unlink moves the cursor off any node it frees.
            let (data, next) = unsafe { ((*node.as_ptr()).data, (*node.as_ptr()).next) };
            self.cursor = next;

            func(&mut IterQueue { queue: self }, data);

            current = self.cursor;
        }

        self.cursor = None;
    }

    fn alloc_node(node: Node<T>) -> Result<NonNull<Node<T>>> {
        let node = try_box(node)?;
        // SAFETY: Box::into_raw never returns null.
        Ok(unsafe { NonNull::new_unchecked(Box::into_raw(node)) })
    }

    fn push_spare(&mut self, link: NonNull<Node<T>>) {
        // SAFETY: link is owned by this queue and no longer linked.
        unsafe { (*link.as_ptr()).next = self.spare };
        self.spare = Some(link);
        self.spares += 1;
    }

    fn find(&self, data: *const T) -> Link<T> {
        let mut current = self.head;

        while let Some(node) = current {
            // SAFETY: every linked node is live.
            let node_ref = unsafe { &*node.as_ptr() };
            if core::ptr::eq(node_ref.data.as_ptr(), data) {
                return Some(node);
            }
            current = node_ref.next;
        }

        None
    }

    /// Detach `node`, keep it as a spare and return its element
    ///
    /// # Safety
    ///
    /// `node` must be a live node of this queue.
    unsafe fn unlink(&mut self, link: NonNull<Node<T>>) -> NonNull<T> {
        let node = link.as_ptr().read();

        match node.prev {
            Some(prev) => (*prev.as_ptr()).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => (*next.as_ptr()).prev = node.prev,
            None => self.tail = node.prev,
        }

        if self.cursor == Some(link) {
            self.cursor = node.next;
        }

        self.len -= 1;
        self.push_spare(link);
        node.data
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        while let Some(head) = self.head {
            // SAFETY: head is a live node owned by this queue.
            unsafe { self.unlink(head) };
        }
        while let Some(spare) = self.spare {
            // SAFETY: spare nodes were allocated by alloc_node and are
            // reachable from nowhere else.
            let node = unsafe { Box::from_raw(spare.as_ptr()) };
            self.spare = node.next;
        }
    }
}

/// ============================================================================
/// Iteration
/// ============================================================================

/// Borrowing iterator over element references
pub struct Iter<'a, T> {
    next: Link<T>,
    _queue: PhantomData<&'a Queue<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next.map(|node| {
            // SAFETY: the queue is borrowed shared, so no node is freed
            // while the iterator is alive.
            let node = unsafe { &*node.as_ptr() };
            self.next = node.next;
            node.data
        })
    }
}

/// View of a queue handed to [`Queue::iterate`] callbacks
///
/// Supports the queue operations but cannot replace or drop the queue.
pub struct IterQueue<'a, T> {
    queue: &'a mut Queue<T>,
}

impl<T> IterQueue<'_, T> {
    pub fn enqueue(&mut self, data: *mut T) -> Result {
        self.queue.enqueue(data)
    }

    pub fn dequeue(&mut self) -> Result<NonNull<T>> {
        self.queue.dequeue()
    }

    pub fn delete(&mut self, data: *mut T) -> Result {
        self.queue.delete(data)
    }

    pub fn contains(&self, data: *const T) -> bool {
        self.queue.contains(data)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
