//! Transactional key-value store contract the authority persists through.

use async_trait::async_trait;

mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The named table was never created.
    NoSuchTable(String),
    /// Backend-specific failure.
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NoSuchTable(t) => write!(f, "no such table '{}'", t),
            StoreError::Backend(msg) => write!(f, "store backend error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

/// CRUD with compare-and-swap over named tables.
///
/// All record mutation in the authority goes through [`Store::cas`];
/// plain [`Store::put`] is reserved for freshly generated keys.
#[async_trait]
pub trait Store: Send + Sync {
    /// Idempotent table creation.
    async fn create_table(&self, table: &str) -> StoreResult<()>;

    async fn get(&self, table: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    async fn put(&self, table: &str, key: &[u8], value: Vec<u8>) -> StoreResult<()>;

    /// Atomic compare-and-swap. `old == None` succeeds only when the key
    /// is absent (insert-if-absent). Returns whether the swap happened.
    async fn cas(
        &self,
        table: &str,
        key: &[u8],
        old: Option<&[u8]>,
        new: Vec<u8>,
    ) -> StoreResult<bool>;

    /// Atomic delete; returns whether a value was present.
    async fn delete(&self, table: &str, key: &[u8]) -> StoreResult<bool>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn list(&self, table: &str, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;
}
