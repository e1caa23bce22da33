//! Versioned persistence of the active source set.
//!
//! Atomic file writes, no database, plus `catalog_core::config_model::load_configs`
//! for parsing. Versions are content hashes (`sha2`, content-addressed) so
//! `Save` can implement optimistic CAS: a caller's `expected_version` must
//! match the store's current hash or the write is rejected with `Conflict`.
//!
//! Two stores are provided: `FileConfigStore` (atomic temp-and-rename
//! write, `.history/` ring of ≤20 prior revisions) and `K8sConfigStore` (a
//! directory that stands in for a mounted ConfigMap volume, watched the way
//! a ConfigMap would be projected into a pod, with a smaller ring of 10).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use catalog_core::config_model::{load_configs, CatalogSourcesConfig};
use catalog_core::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRevision {
    pub version: String,
    pub content: CatalogSourcesConfig,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub version: String,
}

fn content_hash(config: &CatalogSourcesConfig) -> Result<String, CoreError> {
    let bytes = serde_json::to_vec(config)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<(CatalogSourcesConfig, String), CoreError>;
    async fn save(&self, config: CatalogSourcesConfig, expected_version: &str) -> Result<String, CoreError>;
    async fn list_revisions(&self) -> Result<Vec<ConfigRevision>, CoreError>;
    async fn rollback(&self, version: &str) -> Result<(CatalogSourcesConfig, String), CoreError>;
    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Re-read whatever external source this store stands in for, applying
    /// the result as a new revision if it changed. A no-op for stores where
    /// every write already goes through `save` (`FileConfigStore`); only
    /// `K8sConfigStore`'s mounted-volume stand-in needs this, since nothing
    /// else observes edits made directly to the mounted directory.
    async fn poll_external_edits(&self) -> Result<Option<ChangeEvent>, CoreError> {
        Ok(None)
    }
}

struct Inner {
    current: CatalogSourcesConfig,
    version: String,
    revisions: Vec<ConfigRevision>,
}

/// File-backed config store: the active document lives at `path`, prior
/// revisions in `{path}.history/{version}.yaml`, ring size 20.
pub struct FileConfigStore {
    path: PathBuf,
    history_dir: PathBuf,
    ring_size: usize,
    inner: RwLock<Inner>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl FileConfigStore {
    pub fn load_from_sources(source_paths: &[String]) -> Result<Self, CoreError> {
        let config = load_configs(source_paths)?;
        let version = content_hash(&config)?;
        let path = PathBuf::from(
            source_paths
                .first()
                .cloned()
                .unwrap_or_else(|| "catalog-sources.yaml".to_string()),
        );
        let history_dir = history_dir_for(&path);
        let (tx, _rx) = broadcast::channel(16);
        // Seed the revision ring with the pre-first-save version so a
        // rollback to it works even before anything has been saved.
        let initial_revision = ConfigRevision {
            version: version.clone(),
            content: config.clone(),
            author: "catalog-server".to_string(),
            created_at: Utc::now(),
        };
        Ok(Self {
            path,
            history_dir,
            ring_size: 20,
            inner: RwLock::new(Inner {
                current: config,
                version,
                revisions: vec![initial_revision],
            }),
            changes: tx,
        })
    }

    async fn write_revision(&self, revision: ConfigRevision) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.history_dir)?;
        let file = self.history_dir.join(format!("{}.yaml", revision.version));
        let yaml = serde_yaml::to_string(&revision.content)?;
        let tmp = file.with_extension("tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, &file)?;
        Ok(())
    }
}

fn history_dir_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(".history")
}

#[async_trait::async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<(CatalogSourcesConfig, String), CoreError> {
        let inner = self.inner.read().await;
        Ok((inner.current.clone(), inner.version.clone()))
    }

    async fn save(&self, config: CatalogSourcesConfig, expected_version: &str) -> Result<String, CoreError> {
        let mut inner = self.inner.write().await;
        if inner.version != expected_version {
            return Err(CoreError::Conflict {
                message: format!(
                    "config version mismatch: expected {}, store is at {}",
                    expected_version, inner.version
                ),
            });
        }
        let new_version = content_hash(&config)?;
        if new_version == inner.version {
            return Ok(inner.version.clone());
        }

        let yaml = serde_yaml::to_string(&config)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, &self.path)?;

        let revision = ConfigRevision {
            version: new_version.clone(),
            content: config.clone(),
            author: "catalog-server".to_string(),
            created_at: Utc::now(),
        };
        self.write_revision(revision.clone()).await?;

        inner.revisions.push(revision);
        if inner.revisions.len() > self.ring_size {
            let overflow = inner.revisions.len() - self.ring_size;
            inner.revisions.drain(0..overflow);
        }
        inner.current = config;
        inner.version = new_version.clone();

        let _ = self.changes.send(ChangeEvent {
            version: new_version.clone(),
        });
        Ok(new_version)
    }

    async fn list_revisions(&self) -> Result<Vec<ConfigRevision>, CoreError> {
        Ok(self.inner.read().await.revisions.clone())
    }

    async fn rollback(&self, version: &str) -> Result<(CatalogSourcesConfig, String), CoreError> {
        let mut inner = self.inner.write().await;
        let revision = inner
            .revisions
            .iter()
            .find(|r| r.version == version)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no such config revision: {version}")))?;

        let yaml = serde_yaml::to_string(&revision.content)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, &self.path)?;

        inner.current = revision.content.clone();
        inner.version = revision.version.clone();
        let _ = self.changes.send(ChangeEvent {
            version: revision.version.clone(),
        });
        Ok((revision.content, revision.version))
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

/// Directory-backed store standing in for a Kubernetes ConfigMap volume
/// mount. Ring size 10.
pub struct K8sConfigStore {
    watch_dir: PathBuf,
    inner: RwLock<Inner>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl K8sConfigStore {
    pub fn new(watch_dir: impl Into<PathBuf>, initial: CatalogSourcesConfig) -> Result<Self, CoreError> {
        let version = content_hash(&initial)?;
        let initial_revision = ConfigRevision {
            version: version.clone(),
            content: initial.clone(),
            author: "catalog-server".to_string(),
            created_at: Utc::now(),
        };
        let (tx, _rx) = broadcast::channel(16);
        Ok(Self {
            watch_dir: watch_dir.into(),
            inner: RwLock::new(Inner {
                current: initial,
                version,
                revisions: vec![initial_revision],
            }),
            changes: tx,
        })
    }
}

#[async_trait::async_trait]
impl ConfigStore for K8sConfigStore {
    async fn load(&self) -> Result<(CatalogSourcesConfig, String), CoreError> {
        let inner = self.inner.read().await;
        Ok((inner.current.clone(), inner.version.clone()))
    }

    async fn save(&self, config: CatalogSourcesConfig, expected_version: &str) -> Result<String, CoreError> {
        // Optimistic update with retry-on-conflict; the retry loop lives in
        // the caller (the management handler), this just enforces the CAS
        // check once.
        let mut inner = self.inner.write().await;
        if inner.version != expected_version {
            return Err(CoreError::Conflict {
                message: format!(
                    "config version mismatch: expected {}, store is at {}",
                    expected_version, inner.version
                ),
            });
        }
        let new_version = content_hash(&config)?;
        inner.revisions.push(ConfigRevision {
            version: new_version.clone(),
            content: config.clone(),
            author: "catalog-server".to_string(),
            created_at: Utc::now(),
        });
        if inner.revisions.len() > 10 {
            let overflow = inner.revisions.len() - 10;
            inner.revisions.drain(0..overflow);
        }
        inner.current = config;
        inner.version = new_version.clone();
        let _ = self.changes.send(ChangeEvent {
            version: new_version.clone(),
        });
        Ok(new_version)
    }

    async fn list_revisions(&self) -> Result<Vec<ConfigRevision>, CoreError> {
        Ok(self.inner.read().await.revisions.clone())
    }

    async fn rollback(&self, version: &str) -> Result<(CatalogSourcesConfig, String), CoreError> {
        let mut inner = self.inner.write().await;
        let revision = inner
            .revisions
            .iter()
            .find(|r| r.version == version)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no such config revision: {version}")))?;
        inner.current = revision.content.clone();
        inner.version = revision.version.clone();
        let _ = self.changes.send(ChangeEvent {
            version: revision.version.clone(),
        });
        Ok((revision.content, revision.version))
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Re-read the mounted directory's `catalog-sources.yaml`, if present,
    /// and apply it as an external edit.
    async fn poll_external_edits(&self) -> Result<Option<ChangeEvent>, CoreError> {
        let file = self.watch_dir.join("catalog-sources.yaml");
        if !file.is_file() {
            return Ok(None);
        }
        let config = load_configs(&[file.to_string_lossy().to_string()])?;
        let new_version = content_hash(&config)?;
        let mut inner = self.inner.write().await;
        if new_version == inner.version {
            return Ok(None);
        }
        inner.revisions.push(ConfigRevision {
            version: new_version.clone(),
            content: config.clone(),
            author: "external-edit".to_string(),
            created_at: Utc::now(),
        });
        if inner.revisions.len() > 10 {
            let overflow = inner.revisions.len() - 10;
            inner.revisions.drain(0..overflow);
        }
        inner.current = config;
        inner.version = new_version.clone();
        let event = ChangeEvent {
            version: new_version,
        };
        let _ = self.changes.send(event.clone());
        Ok(Some(event))
    }
}

pub fn shared(store: impl ConfigStore + 'static) -> Arc<dyn ConfigStore> {
    Arc::new(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::config_model::{CatalogSourcesConfig, Section, Source};
    use std::collections::HashMap;

    fn sample_config(enabled: bool) -> CatalogSourcesConfig {
        let mut catalogs = HashMap::new();
        catalogs.insert(
            "models".to_string(),
            Section {
                sources: vec![Source {
                    id: "org_models".to_string(),
                    display_name: Some("Org Models".to_string()),
                    source_type: "yaml".to_string(),
                    enabled,
                    labels: vec![],
                    properties: HashMap::new(),
                    include_patterns: vec![],
                    exclude_patterns: vec![],
                    origin: String::new(),
                }],
                labels: None,
                named_queries: None,
            },
        );
        CatalogSourcesConfig {
            api_version: "v1alpha1".to_string(),
            kind: "CatalogSources".to_string(),
            catalogs,
        }
    }

    #[tokio::test]
    async fn save_rejects_stale_version() {
        let dir = std::env::temp_dir().join(format!("catalog-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog-sources.yaml");
        std::fs::write(&path, serde_yaml::to_string(&sample_config(true)).unwrap()).unwrap();

        let store = FileConfigStore::load_from_sources(&[path.to_string_lossy().to_string()]).unwrap();
        let (_config, version) = store.load().await.unwrap();

        let err = store.save(sample_config(false), "stale-version").await;
        assert!(err.is_err());

        let ok = store.save(sample_config(false), &version).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn rollback_restores_prior_revision() {
        let dir = std::env::temp_dir().join(format!("catalog-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog-sources.yaml");
        std::fs::write(&path, serde_yaml::to_string(&sample_config(true)).unwrap()).unwrap();

        let store = FileConfigStore::load_from_sources(&[path.to_string_lossy().to_string()]).unwrap();
        let (_config, v1) = store.load().await.unwrap();
        let v2 = store.save(sample_config(false), &v1).await.unwrap();
        assert_ne!(v1, v2);

        let (restored, version) = store.rollback(&v1).await.unwrap();
        assert_eq!(version, v1);
        assert!(restored.catalogs["models"].sources[0].enabled);
    }

    #[tokio::test]
    async fn k8s_store_picks_up_external_edit() {
        let dir = std::env::temp_dir().join(format!("catalog-k8s-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let store = K8sConfigStore::new(dir.clone(), sample_config(true)).unwrap();
        let (_config, v1) = store.load().await.unwrap();

        assert!(store.poll_external_edits().await.unwrap().is_none());

        let path = dir.join("catalog-sources.yaml");
        std::fs::write(&path, serde_yaml::to_string(&sample_config(false)).unwrap()).unwrap();

        let event = store.poll_external_edits().await.unwrap().expect("external edit detected");
        assert_ne!(event.version, v1);
        let (reloaded, v2) = store.load().await.unwrap();
        assert_eq!(event.version, v2);
        assert!(!reloaded.catalogs["models"].sources[0].enabled);
    }
}
