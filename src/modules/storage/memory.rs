use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Records, Store};
use crate::error::StoreError;

/// In-memory store (useful for testing and single-process embedding)
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Records) -> Self {
        Self {
            records: Mutex::new(records),
            commits: AtomicUsize::new(0),
        }
    }

    /// Number of committed (persisted) transactions so far
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl Store for MemoryStore {
    fn transaction(&self, f: &mut dyn FnMut(&mut Records) -> bool) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;

        // Work on a copy so a rolled-back body leaves no trace
        let mut draft = records.clone();
        if f(&mut draft) {
            *records = draft;
            self.commits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn view(&self, f: &mut dyn FnMut(&Records)) -> Result<(), StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        f(&*records);
        Ok(())
    }
}
