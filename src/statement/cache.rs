use hashlink::lru_cache::LruCache;

use crate::error::Result;
use crate::statement::Statement;

/// A cache of compiled statements keyed by their SQL text. When full, the
/// least recently used statement is finalized and evicted.
///
/// Each connection keeps two of these: one for user SQL and one for
/// library-issued SQL, so `PRAGMA` traffic never evicts user statements.
pub(crate) struct StatementCache {
    inner: LruCache<String, Statement>,
}

impl StatementCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Returns the cached statement for `query`, compiling and inserting a
    /// new container on a miss.
    pub(crate) fn get_or_prepare(&mut self, query: &str) -> Result<&mut Statement> {
        if !self.inner.contains_key(query) {
            let statement = Statement::new(query, true)?;

            // evict explicitly so the finalize happens before the insert
            if self.inner.len() >= self.inner.capacity() {
                self.inner.remove_lru();
            }

            self.inner.insert(query.to_owned(), statement);
        }

        Ok(self
            .inner
            .get_mut(query)
            .expect("statement was just inserted"))
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    /// Finalizes every cached statement.
    pub(crate) fn clear(&mut self) {
        self.inner.clear();
    }
}
