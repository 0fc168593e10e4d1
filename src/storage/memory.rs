//! In-memory key-value store

use super::KeyValueStore;
use crate::errors::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.records.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let records = self.records.read();
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list() {
        let store = MemoryStore::new();
        store.put("/registry/secrets/a/x", b"1".to_vec()).await.unwrap();
        store.put("/registry/secrets/b/y", b"2".to_vec()).await.unwrap();
        store.put("/registry/configmaps/a/z", b"3".to_vec()).await.unwrap();

        assert_eq!(store.get("/registry/secrets/a/x").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("/registry/secrets/a/missing").await.unwrap(), None);

        let secrets = store.list("/registry/secrets/").await.unwrap();
        let keys: Vec<_> = secrets.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["/registry/secrets/a/x", "/registry/secrets/b/y"]);
        assert_eq!(store.len(), 3);
    }
}
