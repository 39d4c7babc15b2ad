use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{Store, StoreError, StoreResult};

/// In-memory [`Store`] with real compare-and-swap semantics.
///
/// Backs tests and single-process embedders; everything else should sit
/// on a durable backend implementing the same trait.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_table(&self, table: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().unwrap();
        tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn get(&self, table: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let tables = self.tables.read().unwrap();
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;
        Ok(t.get(key).cloned())
    }

    async fn put(&self, table: &str, key: &[u8], value: Vec<u8>) -> StoreResult<()> {
        let mut tables = self.tables.write().unwrap();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;
        t.insert(key.to_vec(), value);
        Ok(())
    }

    async fn cas(
        &self,
        table: &str,
        key: &[u8],
        old: Option<&[u8]>,
        new: Vec<u8>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().unwrap();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;
        let current = t.get(key).map(|v| v.as_slice());
        if current != old {
            return Ok(false);
        }
        t.insert(key.to_vec(), new);
        Ok(true)
    }

    async fn delete(&self, table: &str, key: &[u8]) -> StoreResult<bool> {
        let mut tables = self.tables.write().unwrap();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;
        Ok(t.remove(key).is_some())
    }

    async fn list(&self, table: &str, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let tables = self.tables.read().unwrap();
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::NoSuchTable(table.to_string()))?;
        Ok(t.iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
