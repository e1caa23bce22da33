//! Typed representation of the source-set config (`CatalogSourcesConfig`)
//! and the field-level override merge used by `load_configs`.
//!
//! The wire format here is strict YAML (see `catalog-server::config` for
//! the process-level TOML config).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// A filter preset: `{operator, value}` for one field, stored under a name
/// in `Section::named_queries` and referenced from list endpoints via
/// `?namedQuery=`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPreset {
    pub operator: String,
    pub value: Value,
}

/// One configured asset source: `id`, `displayName`, `type`, `enabled`,
/// `labels`, `properties`, `includePatterns`/`excludePatterns`, and the
/// `origin` file path it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Config file path this source was read from; stamped by `load_configs`,
    /// never set by the document author.
    #[serde(skip_deserializing, default)]
    pub origin: String,
}

fn default_true() -> bool {
    true
}

/// One `catalogs.<pluginKey>` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub named_queries: Option<HashMap<String, QueryPreset>>,
}

/// Root document: `{apiVersion, kind, catalogs: map<pluginKey, Section>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSourcesConfig {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub catalogs: HashMap<String, Section>,
}

impl Default for CatalogSourcesConfig {
    fn default() -> Self {
        Self {
            api_version: "catalog.example.com/v1alpha1".to_string(),
            kind: "CatalogSources".to_string(),
            catalogs: HashMap::new(),
        }
    }
}

/// Loads and folds one or more YAML documents: each path is parsed as
/// strict YAML, every source's `origin` is stamped with the path it came
/// from, and later files override earlier ones with field-level
/// merge keyed by source `id`. Missing `apiVersion`/`kind` in an override
/// leaves the base value untouched.
pub fn load_configs(paths: &[impl AsRef<Path>]) -> Result<CatalogSourcesConfig, CoreError> {
    let mut merged: Option<CatalogSourcesConfig> = None;

    for path in paths {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut doc: CatalogSourcesConfig = serde_yaml::from_str(&raw)?;
        let origin = path.to_string_lossy().to_string();
        for section in doc.catalogs.values_mut() {
            for source in &mut section.sources {
                source.origin = origin.clone();
            }
        }

        merged = Some(match merged {
            None => doc,
            Some(base) => merge_config(base, doc),
        });
    }

    merged.ok_or_else(|| CoreError::config("no config paths supplied to load_configs"))
}

fn merge_config(
    mut base: CatalogSourcesConfig,
    override_doc: CatalogSourcesConfig,
) -> CatalogSourcesConfig {
    if !override_doc.api_version.is_empty() {
        base.api_version = override_doc.api_version;
    }
    if !override_doc.kind.is_empty() {
        base.kind = override_doc.kind;
    }

    for (plugin_key, override_section) in override_doc.catalogs {
        base.catalogs
            .entry(plugin_key)
            .and_modify(|base_section| merge_section(base_section, &override_section))
            .or_insert(override_section);
    }

    base
}

fn merge_section(base: &mut Section, override_section: &Section) {
    if let Some(labels) = &override_section.labels {
        base.labels = Some(labels.clone());
    }
    if let Some(nq) = &override_section.named_queries {
        base.named_queries = Some(nq.clone());
    }

    for override_source in &override_section.sources {
        if let Some(existing) = base
            .sources
            .iter_mut()
            .find(|s| s.id == override_source.id)
        {
            merge_source(existing, override_source);
        } else {
            base.sources.push(override_source.clone());
        }
    }
}

/// Field-level override: every field set in `override_source` replaces the
/// base value. Because YAML deserialization fills in defaults (`enabled` is
/// always present as `true`/`false`, never "unset"), this implementation
/// treats the override's `Source` struct as fully authoritative for every
/// overridable field (e.g. a later file setting only `enabled: false` still
/// replaces that one field while leaving the rest of the base source
/// intact).
fn merge_source(base: &mut Source, override_source: &Source) {
    base.enabled = override_source.enabled;
    if override_source.display_name.is_some() {
        base.display_name = override_source.display_name.clone();
    }
    if !override_source.source_type.is_empty() {
        base.source_type = override_source.source_type.clone();
    }
    if !override_source.labels.is_empty() {
        base.labels = override_source.labels.clone();
    }
    if !override_source.properties.is_empty() {
        for (k, v) in &override_source.properties {
            base.properties.insert(k.clone(), v.clone());
        }
    }
    if !override_source.include_patterns.is_empty() {
        base.include_patterns = override_source.include_patterns.clone();
    }
    if !override_source.exclude_patterns.is_empty() {
        base.exclude_patterns = override_source.exclude_patterns.clone();
    }
    base.origin = override_source.origin.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile_path::TempYaml {
        tempfile_path::TempYaml::new(contents)
    }

    mod tempfile_path {
        use std::io::Write;
        pub struct TempYaml {
            pub path: std::path::PathBuf,
        }
        impl TempYaml {
            pub fn new(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("catalog-core-test-{}.yaml", uuid::Uuid::new_v4()));
                let mut f = std::fs::File::create(&path).unwrap();
                f.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }
        impl Drop for TempYaml {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn two_file_merge_matches_scenario_one() {
        let base = write_temp(
            r#"
apiVersion: catalog.example.com/v1alpha1
kind: CatalogSources
catalogs:
  models:
    sources:
      - id: org_models
        displayName: "Org Models"
        type: yaml
        enabled: true
"#,
        );
        let override_doc = write_temp(
            r#"
catalogs:
  models:
    sources:
      - id: org_models
        type: yaml
        enabled: false
      - id: hf_models
        displayName: "HF Models"
        type: hf
"#,
        );

        let merged = load_configs(&[&base.path, &override_doc.path]).unwrap();
        let sources = &merged.catalogs["models"].sources;
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "org_models");
        assert!(!sources[0].enabled);
        assert_eq!(sources[0].display_name.as_deref(), Some("Org Models"));
        assert_eq!(sources[1].id, "hf_models");
        assert_eq!(sources[1].source_type, "hf");
    }
}
