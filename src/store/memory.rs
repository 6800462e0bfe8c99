use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use super::{ResourceStore, StoreError, merge_update};
use crate::resources::labels::{self, Labels};
use crate::resources::{Kind, Object, WorkloadStatus};
use crate::spec::Sandbox;

type Key = (Kind, String, String);

fn key_of(object: &Object) -> Key {
    let meta = object.metadata();
    (object.kind(), meta.namespace.clone(), meta.name.clone())
}

/// In-process store. Uids are sequential so runs are reproducible.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Key, Object>>,
    next_uid: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `object` as-is, bypassing create semantics.
    pub async fn insert(&self, object: Object) {
        self.objects.lock().await.insert(key_of(&object), object);
    }

    /// Every stored object in key order.
    pub async fn snapshot(&self) -> Vec<Object> {
        self.objects.lock().await.values().cloned().collect()
    }

    /// Record replica counts for a workload, as the cluster would.
    pub async fn set_workload_status(
        &self,
        namespace: &str,
        name: &str,
        status: WorkloadStatus,
    ) -> Result<(), StoreError> {
        let key = (Kind::Workload, namespace.to_string(), name.to_string());
        match self.objects.lock().await.get_mut(&key) {
            Some(Object::Workload(workload)) => {
                workload.status = status;
                Ok(())
            }
            _ => Err(StoreError::not_found(Kind::Workload, namespace, name)),
        }
    }

    async fn write(&self, object: Object, status_only: bool) -> Result<Object, StoreError> {
        let key = key_of(&object);
        let mut objects = self.objects.lock().await;
        let stored = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key.0, &key.1, &key.2))?;

        match merge_update(&stored, object, status_only)? {
            Some(merged) => {
                debug!(kind = %key.0, name = %key.2, "updated");
                objects.insert(key, merged.clone());
                Ok(merged)
            }
            None => Ok(stored),
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Object, StoreError> {
        let key = (kind, namespace.to_string(), name.to_string());
        self.objects
            .lock()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, namespace, name))
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<Object>, StoreError> {
        Ok(self
            .objects
            .lock()
            .await
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .filter(|(_, o)| labels::selector_matches(selector, &o.metadata().labels))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, mut object: Object) -> Result<Object, StoreError> {
        let key = key_of(&object);
        let mut objects = self.objects.lock().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.0,
                namespace: key.1,
                name: key.2,
            });
        }

        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed) + 1;
        let meta = object.metadata_mut();
        meta.uid = Some(format!("uid-{uid}"));
        meta.resource_version = Some("1".to_string());

        debug!(kind = %key.0, name = %key.2, "created");
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(&self, object: Object) -> Result<Object, StoreError> {
        self.write(object, false).await
    }

    async fn update_status(&self, sandbox: Sandbox) -> Result<Sandbox, StoreError> {
        let written = self.write(Object::Sandbox(sandbox), true).await?;
        super::expect_kind(written)
    }

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = (kind, namespace.to_string(), name.to_string());
        self.objects
            .lock()
            .await
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(kind, namespace, name))
    }
}
