//! Local YAML catalog provider.
//!
//! Required property: `yamlCatalogPath`. Optional: `watch`,
//! `pollingIntervalSeconds`, `includeGlobs`, `excludeGlobs`,
//! `allowUnknownFields`, `strictSchemaValidation`.
//!
//! `yamlCatalogPath` may point either at a single YAML document (a mapping
//! of entity name -> payload) or at a directory of `*.yaml`/`*.yml` files,
//! one entity per file named by its stem. The directory form is where
//! `includeGlobs`/`excludeGlobs` apply, matched against the path relative to
//! `yamlCatalogPath`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::config_model::Source;
use crate::entity::EntityRecord;
use crate::error::CoreError;
use crate::globmatch;

use super::{Diagnostics, EnumerateResult, Provider, ProviderContext};

pub struct YamlProvider {
    diagnostics: AsyncMutex<Diagnostics>,
    /// mtime of the path observed on the previous enumerate, used by the
    /// file-watch poller in `catalog-server::reconcile` to decide whether a
    /// re-fetch is needed (`watch=true` takes precedence over
    /// `pollingIntervalSeconds` per the pinned open question).
    last_mtime: Mutex<Option<std::time::SystemTime>>,
}

impl Default for YamlProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl YamlProvider {
    pub fn new() -> Self {
        Self {
            diagnostics: AsyncMutex::new(Diagnostics::default()),
            last_mtime: Mutex::new(None),
        }
    }

    /// Returns the path's current mtime, used to decide whether a
    /// `watch=true` source needs re-enumeration.
    pub fn observed_mtime(path: &Path) -> std::io::Result<std::time::SystemTime> {
        std::fs::metadata(path)?.modified()
    }

    fn read_records(source: &Source) -> Result<Vec<EntityRecord>, CoreError> {
        let path_str = source
            .properties
            .get("yamlCatalogPath")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::config("yaml source missing yamlCatalogPath"))?;
        let path = PathBuf::from(path_str);

        let include: Vec<String> = source
            .properties
            .get("includeGlobs")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let exclude: Vec<String> = source
            .properties
            .get("excludeGlobs")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        if path.is_dir() {
            Self::read_directory(&path, &include, &exclude, &source.id)
        } else {
            Self::read_single_file(&path, &source.id)
        }
    }

    fn read_directory(
        dir: &Path,
        include: &[String],
        exclude: &[String],
        source_id: &str,
    ) -> Result<Vec<EntityRecord>, CoreError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let ext_ok = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if !path.is_file() || !ext_ok {
                continue;
            }
            let rel = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            if !globmatch::is_included(&rel, include, exclude) {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let raw = std::fs::read_to_string(&path)?;
            let payload: Value = serde_yaml::from_str(&raw)?;
            out.push(EntityRecord {
                name,
                source_id: source_id.to_string(),
                payload,
                digest: None,
                revision_id: None,
                observed_at: Utc::now(),
            });
        }
        Ok(out)
    }

    fn read_single_file(path: &Path, source_id: &str) -> Result<Vec<EntityRecord>, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        let doc: Value = serde_yaml::from_str(&raw)?;
        let mut out = Vec::new();
        let Value::Mapping(map) = doc else {
            return Err(CoreError::validation(
                "yaml catalog file must be a mapping of name -> entity",
            ));
        };
        for (key, payload) in map {
            let Value::String(name) = key else {
                continue;
            };
            out.push(EntityRecord {
                name,
                source_id: source_id.to_string(),
                payload,
                digest: None,
                revision_id: None,
                observed_at: Utc::now(),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Provider for YamlProvider {
    fn kind(&self) -> &'static str {
        "yaml"
    }

    async fn enumerate(
        &self,
        _ctx: &ProviderContext,
        source: &Source,
    ) -> Result<EnumerateResult, CoreError> {
        let mut diag = self.diagnostics.lock().await;
        diag.last_attempt_at = Some(Utc::now());

        let records = Self::read_records(source);

        match &records {
            Ok(items) => {
                diag.last_success_at = Some(Utc::now());
                diag.item_counts.observed = items.len() as u64;
                diag.item_counts.emitted = items.len() as u64;
                diag.last_error = None;
            }
            Err(e) => {
                diag.last_error = Some(e.to_string());
            }
        }
        drop(diag);

        let items = records?;
        Ok(EnumerateResult::Records(Box::pin(futures::stream::iter(
            items.into_iter().map(Ok),
        ))))
    }

    async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::collections::HashMap;

    fn source_for(path: &str) -> Source {
        let mut properties = HashMap::new();
        properties.insert("yamlCatalogPath".to_string(), Value::String(path.to_string()));
        Source {
            id: "test".into(),
            display_name: None,
            source_type: "yaml".into(),
            enabled: true,
            labels: vec![],
            properties,
            include_patterns: vec![],
            exclude_patterns: vec![],
            origin: "test.yaml".into(),
        }
    }

    #[tokio::test]
    async fn repeated_enumerate_is_idempotent() {
        let mut path = std::env::temp_dir();
        path.push(format!("catalog-yaml-test-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "llama3:\n  description: test model\n").unwrap();

        let provider = YamlProvider::new();
        let source = source_for(path.to_str().unwrap());
        let ctx = ProviderContext::default();

        let EnumerateResult::Records(stream) = provider.enumerate(&ctx, &source).await.unwrap() else {
            panic!("expected records on first enumerate");
        };
        let first: Vec<_> = stream.map(|r| r.unwrap().name).collect().await;

        let EnumerateResult::Records(stream) = provider.enumerate(&ctx, &source).await.unwrap() else {
            panic!("expected records on second enumerate");
        };
        let second: Vec<_> = stream.map(|r| r.unwrap().name).collect().await;

        assert_eq!(first, second);
        assert_eq!(first, vec!["llama3".to_string()]);

        std::fs::remove_file(&path).ok();
    }
}
