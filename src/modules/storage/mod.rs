//! Persistence seam for the lifecycle core.
//!
//! Every read-modify-write goes through [`Store::transaction`], so a backend
//! only has to make that one call atomic.

pub mod file;
pub mod memory;
pub mod records;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use records::Records;

use crate::error::StoreError;

/// Transactional access to the account and token records.
pub trait Store: Send + Sync {
    /// Run `f` over the records as one atomic unit.
    ///
    /// Changes made by `f` are persisted only when it returns `true`;
    /// otherwise they are discarded and nothing is written.
    fn transaction(&self, f: &mut dyn FnMut(&mut Records) -> bool) -> Result<(), StoreError>;

    /// Run `f` over a consistent snapshot of the records without writing.
    fn view(&self, f: &mut dyn FnMut(&Records)) -> Result<(), StoreError>;
}

/// How a transaction closure finished
#[derive(Debug)]
pub enum Txn<T> {
    Commit(T),
    Rollback(T),
}

/// Typed helpers over [`Store::transaction`]
pub trait StoreExt: Store {
    fn write<T>(&self, f: impl FnOnce(&mut Records) -> Txn<T>) -> Result<T, StoreError> {
        let mut f = Some(f);
        let mut out = None;
        self.transaction(&mut |records| match f.take() {
            Some(f) => match f(records) {
                Txn::Commit(value) => {
                    out = Some(value);
                    true
                }
                Txn::Rollback(value) => {
                    out = Some(value);
                    false
                }
            },
            None => false,
        })?;
        out.ok_or_else(|| StoreError::conflict("transaction body did not run"))
    }

    fn read<T>(&self, f: impl FnOnce(&Records) -> T) -> Result<T, StoreError> {
        let mut f = Some(f);
        let mut out = None;
        self.view(&mut |records| {
            if let Some(f) = f.take() {
                out = Some(f(records));
            }
        })?;
        out.ok_or_else(|| StoreError::conflict("view body did not run"))
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
