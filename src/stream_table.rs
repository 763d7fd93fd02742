//! Id-keyed registry of in-flight streams.

use std::collections::HashMap;

use crate::error::{Error, Result};

pub type StreamId = u32;

/// Map from stream id to per-stream state.
///
/// Iteration order is unspecified. Mutating the table while an iterator from
/// [`StreamTable::iter`] is alive is rejected by the borrow checker; bulk
/// teardown walks a snapshot from [`StreamTable::ids`] instead.
#[derive(Debug)]
pub struct StreamTable<V> {
    entries: HashMap<StreamId, V>,
}

impl<V> Default for StreamTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> StreamTable<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Insert `value` under `id`; an id already present is an error.
    pub fn put(&mut self, id: StreamId, value: V) -> Result<()> {
        if self.entries.contains_key(&id) {
            return Err(Error::DuplicateId(id.into()));
        }
        self.entries.insert(id, value);
        Ok(())
    }

    /// Remove and return the value under `id`.
    pub fn pop(&mut self, id: StreamId) -> Result<V> {
        self.entries.remove(&id).ok_or(Error::UnknownId(id.into()))
    }

    pub fn get(&self, id: StreamId) -> Option<&V> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut V> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Lazy walk over `(id, value)`; calling again restarts from the beginning.
    pub fn iter(&self) -> impl Iterator<Item = (StreamId, &V)> + '_ {
        self.entries.iter().map(|(id, v)| (*id, v))
    }

    /// Snapshot of the ids currently present.
    pub fn ids(&self) -> Vec<StreamId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> impl Iterator<Item = (StreamId, V)> + '_ {
        self.entries.drain()
    }
}
