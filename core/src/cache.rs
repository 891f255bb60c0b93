//! Read cache owned by the client.
//!
//! Entries are keyed by table and query fingerprint and expire after a fixed
//! TTL. Any mutation of a table drops every entry for that table and bumps its
//! generation, so a read that started before the mutation cannot store its
//! now stale rows afterwards.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::query::Row;

struct Entry {
    rows: Vec<Row>,
    stored_at: Instant,
}

/// Snapshot of a table's invalidation count, taken before a read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    table: u64,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, HashMap<String, Entry>>,
    generations: HashMap<String, u64>,
    /// Bumped by `clear`, which invalidates every table at once.
    epoch: u64,
}

impl State {
    fn generation(&self, table: &str) -> Generation {
        Generation {
            epoch: self.epoch,
            table: self.generations.get(table).copied().unwrap_or(0),
        }
    }
}

pub struct QueryCache {
    ttl: Duration,
    state: Mutex<State>,
}

impl QueryCache {
    /// A zero TTL disables caching.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(State::default()),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Take this before reading `table` and hand it back to [`put`](Self::put).
    #[must_use]
    pub fn generation(&self, table: &str) -> Generation {
        self.state.lock().generation(table)
    }

    pub fn get(&self, table: &str, fingerprint: &str) -> Option<Vec<Row>> {
        if !self.is_enabled() {
            return None;
        }
        let mut state = self.state.lock();
        let entries = state.tables.get_mut(table)?;
        let fresh = entries
            .get(fingerprint)
            .map(|e| e.stored_at.elapsed() < self.ttl)?;
        if fresh {
            trace!(table, "cache hit");
            entries.get(fingerprint).map(|e| e.rows.clone())
        } else {
            entries.remove(fingerprint);
            None
        }
    }

    /// Stores `rows` unless `table` was invalidated since `seen` was taken.
    /// Expired entries of every table are dropped on the way.
    pub fn put(&self, table: &str, fingerprint: &str, rows: &[Row], seen: Generation) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock();
        if state.generation(table) != seen {
            trace!(table, "stale read not cached");
            return;
        }

        let ttl = self.ttl;
        state.tables.retain(|_, entries| {
            entries.retain(|_, e| e.stored_at.elapsed() < ttl);
            !entries.is_empty()
        });
        state.tables.entry(table.to_string()).or_default().insert(
            fingerprint.to_string(),
            Entry {
                rows: rows.to_vec(),
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, table: &str) {
        let mut state = self.state.lock();
        *state.generations.entry(table.to_string()).or_default() += 1;
        if state.tables.remove(table).is_some() {
            trace!(table, "cache invalidated");
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.tables.clear();
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tables.values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
