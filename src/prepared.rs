//! The per-worker mapping from source-side prepared-statement handles to
//! the handles the target server actually assigned.
//!
//! Accessed only from the worker's own task, including its recursive
//! retries, so it needs no locking.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct PreparedStatementMap {
    inner: HashMap<i32, i32>,
}

impl PreparedStatementMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, source_handle_id: i32) -> Option<i32> {
        self.inner.get(&source_handle_id).copied()
    }

    /// Records `source → server` unless an entry for `source` already
    /// exists. A successful re-Prepare of an already-known handle silently
    /// keeps the old server handle (matches the original behavior, which
    /// may or may not be intentional).
    pub(crate) fn insert_if_absent(&mut self, source_handle_id: i32, server_handle: i32) {
        self.inner.entry(source_handle_id).or_insert(server_handle);
    }

    pub(crate) fn remove(&mut self, source_handle_id: i32) {
        self.inner.remove(&source_handle_id);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_handle() {
        let mut map = PreparedStatementMap::new();
        map.insert_if_absent(7, 42);
        assert_eq!(map.get(7), Some(42));
        map.remove(7);
        assert_eq!(map.get(7), None);
        assert!(map.is_empty());
    }

    #[test]
    fn re_prepare_of_known_handle_keeps_old_server_handle() {
        let mut map = PreparedStatementMap::new();
        map.insert_if_absent(7, 42);
        map.insert_if_absent(7, 99);
        assert_eq!(map.get(7), Some(42));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn unknown_handle_is_absent() {
        let map = PreparedStatementMap::new();
        assert_eq!(map.get(9), None);
    }
}
