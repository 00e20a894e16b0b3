use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use itertools::Itertools;

const ORDER_TYPE: Ordering = Ordering::Relaxed;

/// A cursor handing out indices in rotation.
///
/// The cursor is advanced atomically and kept below the length it was last
/// used with, so the rotation never ends and never repeats an index.
#[derive(Debug, Default)]
pub(crate) struct RoundRobinIndex {
    cursor: AtomicUsize,
}

impl RoundRobinIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn starting_at(cursor: usize) -> Self {
        Self {
            cursor: AtomicUsize::new(cursor),
        }
    }

    /// Returns the next index in `0..length`, or `None` if `length` is 0.
    pub(crate) fn next(&self, length: usize) -> Option<usize> {
        if length == 0 {
            return None;
        }
        let (Ok(cursor) | Err(cursor)) = self
            .cursor
            .fetch_update(ORDER_TYPE, ORDER_TYPE, |cursor| {
                Some((cursor % length + 1) % length)
            });
        Some(cursor % length)
    }

    /// Moves the cursor back by one if it currently points past `removed_pos`
    /// in a sequence of `old_length` elements, so that the element which was
    /// going to be returned next is still returned next.
    fn on_removed(&self, removed_pos: usize, old_length: usize) {
        if old_length == 0 {
            return;
        }
        let _ = self.cursor.fetch_update(ORDER_TYPE, ORDER_TYPE, |cursor| {
            let position = cursor % old_length;
            Some(if position > removed_pos {
                position - 1
            } else {
                position
            })
        });
    }
}

/// An insertion-ordered set with round-robin selection over its members.
///
/// Reads (`try_next`, `snapshot`) are lock-free: they work on an immutable snapshot
/// of the members. Mutations build a new snapshot and swap it in under a small lock,
/// which serializes writers only.
#[derive(Debug)]
pub(crate) struct ConcurrentRoundRobinSet<T> {
    members: ArcSwap<Vec<T>>,
    mutation_lock: Mutex<()>,
    index: RoundRobinIndex,
}

impl<T> Default for ConcurrentRoundRobinSet<T> {
    fn default() -> Self {
        Self {
            members: ArcSwap::from_pointee(Vec::new()),
            mutation_lock: Mutex::new(()),
            index: RoundRobinIndex::new(),
        }
    }
}

impl<T: Clone + PartialEq> ConcurrentRoundRobinSet<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds `item` at the end, unless it is already present.
    #[cfg(test)]
    pub(crate) fn add(&self, item: T) {
        self.add_all(std::iter::once(item));
    }

    /// Adds the items in order, skipping the ones already present.
    pub(crate) fn add_all(&self, items: impl IntoIterator<Item = T>) {
        self.mutate(|members| {
            for item in items {
                if !members.contains(&item) {
                    members.push(item);
                }
            }
        });
    }

    /// Puts the items in front of the current members.
    ///
    /// Current members which are among `items` are moved to the front with them,
    /// the remaining ones keep their relative order after them.
    pub(crate) fn prepend_all(&self, items: impl IntoIterator<Item = T>) {
        self.mutate(|members| {
            let mut prepended: Vec<T> = Vec::with_capacity(members.len());
            for item in items {
                if !prepended.contains(&item) {
                    prepended.push(item);
                }
            }
            let rest: Vec<T> = members
                .drain(..)
                .filter(|m| !prepended.contains(m))
                .collect();
            prepended.extend(rest);
            *members = prepended;
        });
        // The rotation starts over with the prepended items.
        self.index.cursor.store(0, ORDER_TYPE);
    }

    /// Removes `item`. Returns whether it was present.
    pub(crate) fn remove(&self, item: &T) -> bool {
        let _guard = self
            .mutation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = self.members.load_full();
        let Some(position) = current.iter().position(|m| m == item) else {
            return false;
        };
        let mut members = Vec::clone(&current);
        members.remove(position);
        self.members.store(Arc::new(members));
        self.index.on_removed(position, current.len());
        true
    }

    /// Removes all members.
    pub(crate) fn clear(&self) {
        let _guard = self
            .mutation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.members.store(Arc::new(Vec::new()));
    }

    /// Returns the next member in rotation, or `None` if the set is empty.
    pub(crate) fn try_next(&self) -> Option<T> {
        let members = self.members.load();
        let index = self.index.next(members.len())?;
        members.get(index).cloned()
    }

    /// Returns the current members, in insertion order.
    pub(crate) fn snapshot(&self) -> Arc<Vec<T>> {
        self.members.load_full()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.members.load().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.load().is_empty()
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<T>)) {
        let _guard = self
            .mutation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut members = Vec::clone(&self.members.load());
        f(&mut members);
        self.members.store(Arc::new(members));
    }
}

impl<T: Clone + PartialEq> FromIterator<T> for ConcurrentRoundRobinSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let set = Self::new();
        set.add_all(iter);
        set
    }
}

impl<T: Display> Display for ConcurrentRoundRobinSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.members.load().iter().join(", "))
    }
}
