//! Atomic publication of the current rate table.

use std::sync::Arc;

use parking_lot::RwLock;
use ratewire_common::Currency;
use tracing::debug;

use crate::error::RateResult;
use crate::table::RateTable;

/// Holds the currently published rate table.
///
/// Readers take an `Arc` to the table and read it without any further
/// locking; the lock only guards the pointer itself and is never held
/// while a table is read or built. Replacing the table never touches the
/// previous one, so an older snapshot keeps reporting the rates it was
/// taken with.
pub struct RateStore {
    current: RwLock<Arc<RateTable>>,
}

impl RateStore {
    /// Create a store publishing `table`.
    pub fn new(table: RateTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// Create a store holding only the pivot until the first refresh.
    pub fn empty(pivot: Currency) -> Self {
        Self::new(RateTable::empty(pivot))
    }

    /// Get the table in effect right now.
    pub fn snapshot(&self) -> Arc<RateTable> {
        self.current.read().clone()
    }

    /// Publish a new table, returning its generation.
    ///
    /// Generations increase by one per replacement.
    pub fn replace(&self, mut table: RateTable) -> u64 {
        let mut current = self.current.write();
        let generation = current.generation() + 1;
        table.set_generation(generation);
        *current = Arc::new(table);
        drop(current);

        debug!(generation, "Published new rate table");
        generation
    }

    /// Rate between two currencies in the current table.
    pub fn get(&self, base: Currency, destination: Currency) -> RateResult<f64> {
        self.snapshot().get(base, destination)
    }

    /// Generation of the current table.
    pub fn generation(&self) -> u64 {
        self.current.read().generation()
    }
}
