//! Secret and config map storage.
//!
//! Holds credentials the client factory resolves, agent token values the
//! operator writes for the worker fleet, and collected workspace outputs.
//! Both object classes are string maps keyed by namespace and name.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::StoreResult;

pub type SecretData = BTreeMap<String, String>;

/// Which of the two object classes an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    /// Sensitive values.
    Secret,
    /// Plain configuration values.
    Config,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(
        &self,
        class: ObjectClass,
        namespace: &str,
        name: &str,
    ) -> StoreResult<Option<SecretData>>;

    /// Create or replace an entry.
    async fn put(
        &self,
        class: ObjectClass,
        namespace: &str,
        name: &str,
        data: SecretData,
    ) -> StoreResult<()>;

    /// Merge keys into an entry, creating it if needed.
    async fn merge(
        &self,
        class: ObjectClass,
        namespace: &str,
        name: &str,
        data: SecretData,
    ) -> StoreResult<()> {
        let mut merged = self.get(class, namespace, name).await?.unwrap_or_default();
        merged.extend(data);
        self.put(class, namespace, name, merged).await
    }

    /// Remove an entry; absent entries are not an error.
    async fn delete(&self, class: ObjectClass, namespace: &str, name: &str) -> StoreResult<()>;

    /// Convenience lookup of a single secret key.
    async fn secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> StoreResult<Option<String>> {
        Ok(self
            .get(ObjectClass::Secret, namespace, name)
            .await?
            .and_then(|mut data| data.remove(key)))
    }
}

type EntryKey = (ObjectClass, String, String);

/// In-process [`SecretStore`].
#[derive(Default)]
pub struct MemorySecretStore {
    entries: RwLock<HashMap<EntryKey, SecretData>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(
        &self,
        class: ObjectClass,
        namespace: &str,
        name: &str,
    ) -> StoreResult<Option<SecretData>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(class, namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn put(
        &self,
        class: ObjectClass,
        namespace: &str,
        name: &str,
        data: SecretData,
    ) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert((class, namespace.to_string(), name.to_string()), data);
        Ok(())
    }

    async fn delete(&self, class: ObjectClass, namespace: &str, name: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(&(class, namespace.to_string(), name.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> SecretData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_classes_are_separate() {
        let store = MemorySecretStore::new();
        store
            .put(ObjectClass::Secret, "ns", "outputs", data(&[("a", "1")]))
            .await
            .unwrap();

        assert!(store
            .get(ObjectClass::Config, "ns", "outputs")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.secret_value("ns", "outputs", "a").await.unwrap(),
            Some("1".to_string())
        );
    }

    #[tokio::test]
    async fn test_merge_keeps_existing_keys() {
        let store = MemorySecretStore::new();
        store
            .put(ObjectClass::Secret, "ns", "tokens", data(&[("first", "x")]))
            .await
            .unwrap();
        store
            .merge(ObjectClass::Secret, "ns", "tokens", data(&[("second", "y")]))
            .await
            .unwrap();

        let merged = store
            .get(ObjectClass::Secret, "ns", "tokens")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged, data(&[("first", "x"), ("second", "y")]));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = MemorySecretStore::new();
        store.delete(ObjectClass::Config, "ns", "nope").await.unwrap();
    }
}
