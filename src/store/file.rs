//! JSON-on-disk store: `<root>/<namespace>/<kind>/<name>.json`.

use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ResourceStore, StoreError, merge_update};
use crate::resources::labels::{self, Labels};
use crate::resources::{Kind, Object};
use crate::spec::Sandbox;

/// File-backed store used by the CLI.
///
/// Writes are serialized by an in-process lock and land through a
/// temp-file rename, so a crash never leaves a half-written document.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    lock: Mutex<()>,
    counter: AtomicU64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every `kind` document of `namespace`.
    pub fn kind_dir(&self, kind: Kind, namespace: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(path_component(namespace)?).join(kind.plural()))
    }

    fn object_path(&self, kind: Kind, namespace: &str, name: &str) -> Result<PathBuf, StoreError> {
        let file = format!("{}.json", path_component(name)?);
        Ok(self.kind_dir(kind, namespace)?.join(file))
    }

    fn next_uid(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("{nanos:x}-{seq:x}")
    }

    async fn read(&self, kind: Kind, namespace: &str, name: &str) -> Result<Object, StoreError> {
        let path = self.object_path(kind, namespace, name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(kind.decode(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::not_found(kind, namespace, name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, object: &Object) -> Result<(), StoreError> {
        let meta = object.metadata();
        let dir = self.kind_dir(object.kind(), &meta.namespace)?;
        let path = self.object_path(object.kind(), &meta.namespace, &meta.name)?;
        fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".{}.json.tmp", meta.name));
        let bytes = serde_json::to_vec_pretty(object)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn write(&self, object: Object, status_only: bool) -> Result<Object, StoreError> {
        let _guard = self.lock.lock().await;
        let meta = object.metadata();
        let stored = self.read(object.kind(), &meta.namespace, &meta.name).await?;

        match merge_update(&stored, object, status_only)? {
            Some(merged) => {
                self.persist(&merged).await?;
                Ok(merged)
            }
            None => Ok(stored),
        }
    }
}

/// Names and namespaces become path segments; refuse any that could
/// leave the store root or collide with temp files.
fn path_component(part: &str) -> Result<&str, StoreError> {
    if part.is_empty() || part.starts_with('.') || part.contains(['/', '\\']) {
        return Err(StoreError::Rejected(format!(
            "{part:?} cannot be used as an object name or namespace"
        )));
    }
    Ok(part)
}

#[async_trait]
impl ResourceStore for FileStore {
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Object, StoreError> {
        self.read(kind, namespace, name).await
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<Object>, StoreError> {
        let dir = self.kind_dir(kind, namespace)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match kind.decode(&bytes) {
                Ok(object) if labels::selector_matches(selector, &object.metadata().labels) => {
                    objects.push(object);
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), "skipping malformed document: {e}"),
            }
        }

        objects.sort_by(|a, b| a.metadata().name.cmp(&b.metadata().name));
        Ok(objects)
    }

    async fn create(&self, mut object: Object) -> Result<Object, StoreError> {
        let _guard = self.lock.lock().await;
        let kind = object.kind();
        let meta = object.metadata();
        let path = self.object_path(kind, &meta.namespace, &meta.name)?;
        if fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists {
                kind,
                namespace: meta.namespace.clone(),
                name: meta.name.clone(),
            });
        }

        let uid = self.next_uid();
        let meta = object.metadata_mut();
        meta.uid = Some(uid);
        meta.resource_version = Some("1".to_string());

        self.persist(&object).await?;
        debug!(path = %path.display(), "created");
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
        let _guard = self.lock.lock().await;
        match fs::remove_file(self.object_path(kind, namespace, name)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::not_found(kind, namespace, name))
            }
            Err(e) => Err(e.into()),
        }
    }
}
