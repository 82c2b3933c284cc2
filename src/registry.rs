//! Task identity registry: maps an opaque per-task handle to a small dense
//! identifier, assigning a new one on first sight.
//!
//! Grounded on MabuTrace's `get_current_task_id` (linear scan over a fixed
//! `task_handles` array, inserting on miss under a lock), generalized per
//! `spec.md` §4.6 into a reader/writer-locked table so reads (the common
//! case, taken on every writer call) don't serialize against each other.

use std::sync::RwLock;

use arrayvec::ArrayVec;

use crate::platform::TaskHandle;

/// Identifier 0 is reserved for "interrupt / no task" and is never assigned
/// to a real task. The 4-bit `task_id` header field caps real tasks at 15.
pub const RESERVED_ID: u8 = 0;
pub const MAX_TASKS: usize = 15;

struct Inner<T: TaskHandle> {
    handles: ArrayVec<T, MAX_TASKS>,
}

/// Append-only, fixed-capacity task identity table.
pub struct TaskRegistry<T: TaskHandle> {
    inner: RwLock<Inner<T>>,
}

impl<T: TaskHandle> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TaskHandle> TaskRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                handles: ArrayVec::new(),
            }),
        }
    }

    /// Returns the dense id for `handle`, assigning a fresh one on first
    /// sight. Identifiers are handed out in `1..=MAX_TASKS`; 0 is never
    /// returned by this path (callers in interrupt context should not call
    /// this at all — see [`crate::writer`]).
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_TASKS`] distinct tasks are ever seen. Per
    /// the design's error taxonomy this is a programmer error (a hard
    /// resource limit), not a recoverable condition — the same contract the
    /// original implementation enforces with `assert(false)`.
    pub fn get_or_assign(&self, handle: T) -> u8 {
        // Fast path: shared read lock, the common case once all tasks seen.
        if let Some(id) = self.lookup(handle) {
            return id;
        }

        let mut inner = self.inner.write().unwrap();
        // Re-check under the write lock: another writer may have raced us.
        if let Some(pos) = inner.handles.iter().position(|h| *h == handle) {
            return (pos + 1) as u8;
        }
        assert!(
            !inner.handles.is_full(),
            "tracecore: more than {MAX_TASKS} distinct tasks seen; \
             the registry's dense-id width is a hard resource limit"
        );
        inner.handles.push(handle);
        inner.handles.len() as u8
    }

    fn lookup(&self, handle: T) -> Option<u8> {
        let inner = self.inner.read().unwrap();
        inner
            .handles
            .iter()
            .position(|h| *h == handle)
            .map(|pos| (pos + 1) as u8)
    }

    /// Reverse lookup used only by the snapshot pipeline to resolve a
    /// human-readable task label. `id == 0` (or out of range) is the
    /// "interrupt" sentinel and has no handle.
    pub fn handle_for_id(&self, id: u8) -> Option<T> {
        if id == RESERVED_ID {
            return None;
        }
        let inner = self.inner.read().unwrap();
        inner.handles.get((id - 1) as usize).copied()
    }

    /// Number of distinct tasks seen so far.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_seen_order_assigns_1_through_n() {
        let reg: TaskRegistry<u32> = TaskRegistry::new();
        assert_eq!(reg.get_or_assign(100), 1);
        assert_eq!(reg.get_or_assign(200), 2);
        assert_eq!(reg.get_or_assign(100), 1); // stable
        assert_eq!(reg.get_or_assign(300), 3);
    }

    #[test]
    fn reverse_lookup_resolves_handle() {
        let reg: TaskRegistry<u32> = TaskRegistry::new();
        let id = reg.get_or_assign(42);
        assert_eq!(reg.handle_for_id(id), Some(42));
        assert_eq!(reg.handle_for_id(RESERVED_ID), None);
    }

    #[test]
    #[should_panic(expected = "hard resource limit")]
    fn registry_full_panics() {
        let reg: TaskRegistry<u32> = TaskRegistry::new();
        for i in 0..MAX_TASKS as u32 {
            reg.get_or_assign(i);
        }
        reg.get_or_assign(9999);
    }
}
