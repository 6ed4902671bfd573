use std::collections::HashMap;
use std::sync::RwLock;
use anyhow::{anyhow, Result};
use super::Storage;

/// In-memory storage, lost on restart.
pub struct VolatileStorage<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> VolatileStorage<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Default for VolatileStorage<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Storage<V> for VolatileStorage<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Result<Option<V>> {
        let entries = self.entries.read().map_err(|_| anyhow!("storage lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &V) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| anyhow!("storage lock poisoned"))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<V>> {
        let mut entries = self.entries.write().map_err(|_| anyhow!("storage lock poisoned"))?;
        Ok(entries.remove(key))
    }

    fn values(&self) -> Result<Vec<V>> {
        let entries = self.entries.read().map_err(|_| anyhow!("storage lock poisoned"))?;
        Ok(entries.values().cloned().collect())
    }
}
