// src/proxy/pool.rs
//! Fixed backend pool with round-robin selection.
//!
//! Locking: the pool owns one mutex guarding the rotation cursor, and each
//! [`Backend`] owns the lock on its status. A thread holding the cursor lock
//! may take a backend lock (to read `alive`); code holding a backend lock must
//! never reach back into the pool. Neither lock is held across an `.await`.

use super::backend::Backend;
use crate::config::ConfigError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

#[derive(Debug)]
pub struct ServerPool {
    backends: Vec<Arc<Backend>>,
    cursor: Mutex<usize>,
}

impl ServerPool {
    pub fn new(backends: Vec<Backend>) -> Result<Self, ConfigError> {
        Self::with_cursor(backends, 0)
    }

    /// Build a pool whose first selection lands on `start + 1`.
    pub fn with_cursor(backends: Vec<Backend>, start: usize) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        if start >= backends.len() {
            return Err(ConfigError::CursorOutOfRange {
                start,
                len: backends.len(),
            });
        }

        let mut seen = HashSet::new();
        if let Some(dup) = backends.iter().find(|b| !seen.insert(b.base_url())) {
            return Err(ConfigError::DuplicateBackend(dup.base_url().to_string()));
        }

        Ok(Self {
            backends: backends.into_iter().map(Arc::new).collect(),
            cursor: Mutex::new(start),
        })
    }

    pub fn from_urls(urls: Vec<Url>) -> Result<Self, ConfigError> {
        let backends = urls
            .into_iter()
            .map(Backend::new)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(backends)
    }

    /// Advance-then-read: move the cursor one slot, return that backend if it
    /// is alive, otherwise keep stepping for at most one full lap. The cursor
    /// moves past dead backends too, so rotation resumes from a consistent
    /// point once they recover.
    pub fn next_available(&self) -> Option<Arc<Backend>> {
        let len = self.backends.len();
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);

        for _ in 0..len {
            *cursor = (*cursor + 1) % len;
            let backend = &self.backends[*cursor];
            if backend.is_alive() {
                return Some(backend.clone());
            }
        }

        None
    }

    pub fn cursor(&self) -> usize {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_alive()).count()
    }
}
