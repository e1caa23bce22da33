//! Generic `CatalogPlugin` implementation shared by every built-in asset
//! kind (models, MCP servers, prompt templates, agents, guardrails,
//! policies, datasets, evaluators, benchmarks, notebooks, skills, knowledge
//! sources).
//!
//! Each kind is the *same* plugin type parameterised by identity and kind
//! name — plugin-specific schema is treated as opaque (`spec{}` stays
//! `serde_json::Value`), so there is nothing kind-specific left to
//! implement beyond what `EntityRecord -> AssetResource` projection
//! already captures. One factory function builds every registered instance
//! from a small descriptor, rather than one hand-written type per kind.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use catalog_core::config_model::Source;
use catalog_core::entity::{
    ActionDescriptor, ActionScope, AssetMetadata, AssetResource, AssetStatus, CapabilitiesDocument,
    FilterField, KindCapabilities, SourceRef,
};
use catalog_core::error::CoreError;
use catalog_core::globmatch;
use catalog_core::providers::{create_provider, Diagnostics, EnumerateResult, ProviderContext};
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;

use crate::plugin::{CatalogPlugin, ListPage, ListQuery, PluginConfig, PluginIdentity};
use crate::request_context::TenantContext;

/// Static descriptor for one of the twelve built-in asset kinds.
pub struct KindDescriptor {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

pub const BUILTIN_KINDS: &[KindDescriptor] = &[
    KindDescriptor { name: "model", version: "v1", description: "Language and embedding models", kind: "Model", plural: "models" },
    KindDescriptor { name: "mcpserver", version: "v1", description: "MCP servers", kind: "McpServer", plural: "mcpservers" },
    KindDescriptor { name: "prompt", version: "v1", description: "Prompt templates", kind: "PromptTemplate", plural: "prompts" },
    KindDescriptor { name: "agent", version: "v1", description: "Agents", kind: "Agent", plural: "agents" },
    KindDescriptor { name: "guardrail", version: "v1", description: "Guardrail bundles", kind: "Guardrail", plural: "guardrails" },
    KindDescriptor { name: "policy", version: "v1", description: "Policies", kind: "Policy", plural: "policies" },
    KindDescriptor { name: "dataset", version: "v1", description: "Datasets", kind: "Dataset", plural: "datasets" },
    KindDescriptor { name: "evaluator", version: "v1", description: "Evaluators", kind: "Evaluator", plural: "evaluators" },
    KindDescriptor { name: "benchmark", version: "v1", description: "Benchmarks", kind: "Benchmark", plural: "benchmarks" },
    KindDescriptor { name: "notebook", version: "v1", description: "Notebooks", kind: "Notebook", plural: "notebooks" },
    KindDescriptor { name: "skill", version: "v1", description: "Skills", kind: "Skill", plural: "skills" },
    KindDescriptor { name: "knowledgesource", version: "v1", description: "Knowledge sources", kind: "KnowledgeSource", plural: "knowledgesources" },
];

struct StoredEntity {
    resource: AssetResource,
    source_id: String,
}

pub struct GenericPlugin {
    identity: PluginIdentity,
    kind: String,
    plural: String,
    entities: DashMap<String, StoredEntity>,
    diagnostics: DashMap<String, Diagnostics>,
    init_lock: Mutex<()>,
}

impl GenericPlugin {
    pub fn new(descriptor: &KindDescriptor) -> Self {
        Self {
            identity: PluginIdentity {
                name: descriptor.name.to_string(),
                version: descriptor.version.to_string(),
                description: descriptor.description.to_string(),
                source_key: format!("{}s", descriptor.name),
            },
            kind: descriptor.kind.to_string(),
            plural: descriptor.plural.to_string(),
            entities: DashMap::new(),
            diagnostics: DashMap::new(),
            init_lock: Mutex::new(()),
        }
    }

    fn record_error(&self, source_id: &str, error: String) {
        let mut diag = self.diagnostics.entry(source_id.to_string()).or_default();
        diag.last_attempt_at = Some(chrono::Utc::now());
        diag.last_error = Some(error);
    }

    fn record_success(&self, source_id: &str, observed: u64, emitted: u64) {
        let mut diag = self.diagnostics.entry(source_id.to_string()).or_default();
        let now = chrono::Utc::now();
        diag.last_attempt_at = Some(now);
        diag.last_success_at = Some(now);
        diag.item_counts.observed += observed;
        diag.item_counts.emitted += emitted;
        diag.item_counts.dropped += observed.saturating_sub(emitted);
    }

    fn project(&self, record: &catalog_core::entity::EntityRecord, source: &Source) -> AssetResource {
        let description = record
            .payload
            .get("description")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let labels: HashMap<String, String> = source
            .labels
            .iter()
            .map(|label| (label.clone(), "true".to_string()))
            .collect();
        AssetResource {
            api_version: format!("catalog/{}", self.identity.version),
            kind: self.kind.clone(),
            metadata: AssetMetadata {
                name: record.name.clone(),
                description,
                labels,
                tags: Vec::new(),
                source_ref: SourceRef {
                    source_id: source.id.clone(),
                },
            },
            spec: record.payload.clone(),
            status: AssetStatus {
                lifecycle: None,
                health: Some("healthy".to_string()),
            },
        }
    }

    pub fn diagnostics_for(&self, source_id: &str) -> Option<Diagnostics> {
        self.diagnostics.get(source_id).map(|d| d.clone())
    }
}

#[async_trait]
impl CatalogPlugin for GenericPlugin {
    fn identity(&self) -> &PluginIdentity {
        &self.identity
    }

    /// Re-syncs sources sequentially: this keeps overlapping calls (startup
    /// plus a reconcile-triggered refresh) from racing on the same entity
    /// map, keeping a load per-section transactional at the per-plugin
    /// granularity the trait exposes.
    async fn init(&self, config: PluginConfig<'_>) -> Result<(), CoreError> {
        let _guard = self.init_lock.lock().unwrap_or_else(|e| e.into_inner());
        let section = config.section;

        if config.source_id.is_none() {
            let configured_ids: std::collections::HashSet<&str> =
                section.sources.iter().map(|s| s.id.as_str()).collect();
            self.entities
                .retain(|_, entity| configured_ids.contains(entity.source_id.as_str()));
        }

        let targets: Vec<&Source> = section
            .sources
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| {
                config
                    .source_id
                    .as_deref()
                    .map(|sid| sid == s.id)
                    .unwrap_or(true)
            })
            .collect();

        let ctx = ProviderContext::default();
        for source in targets {
            let provider = match create_provider(&source.source_type) {
                Ok(p) => p,
                Err(e) => {
                    self.record_error(&source.id, e.to_string());
                    continue;
                }
            };

            // A provider reporting `Unchanged` means upstream hasn't moved
            // since the last fetch; leave this source's existing entities
            // untouched rather than clearing them ahead of a re-population
            // that never happens.
            let mut stream = match provider.enumerate(&ctx, source).await {
                Ok(EnumerateResult::Unchanged) => {
                    self.record_success(&source.id, 0, 0);
                    continue;
                }
                Ok(EnumerateResult::Records(s)) => s,
                Err(e) => {
                    self.record_error(&source.id, e.to_string());
                    continue;
                }
            };

            self.entities.retain(|_, entity| entity.source_id != source.id);

            let mut observed = 0u64;
            let mut emitted = 0u64;
            let mut last_error = None;
            while let Some(item) = stream.next().await {
                observed += 1;
                match item {
                    Ok(record) => {
                        if !globmatch::is_included(&record.name, &source.include_patterns, &source.exclude_patterns) {
                            continue;
                        }
                        let resource = self.project(&record, source);
                        self.entities.insert(
                            record.name.clone(),
                            StoredEntity {
                                resource,
                                source_id: source.id.clone(),
                            },
                        );
                        emitted += 1;
                    }
                    Err(e) => {
                        last_error = Some(e.to_string());
                        break;
                    }
                }
            }
            if let Some(err) = last_error {
                self.record_error(&source.id, err);
            } else {
                self.record_success(&source.id, observed, emitted);
            }
        }
        Ok(())
    }

    fn capabilities(&self) -> CapabilitiesDocument {
        let base = self.identity.base_path();
        CapabilitiesDocument {
            plugin: self.identity.name.clone(),
            version: self.identity.version.clone(),
            kinds: vec![KindCapabilities {
                kind: self.kind.clone(),
                list_endpoint: format!("{base}/{}", self.plural),
                get_endpoint: format!("{base}/{}/{{name}}", self.plural),
                action_endpoint: format!("{base}/{}/{{name}}:action", self.plural),
                columns: vec!["name".to_string(), "description".to_string(), "lifecycle".to_string()],
                filter_fields: vec![FilterField {
                    field: "name".to_string(),
                    operators: vec!["eq".to_string(), "contains".to_string()],
                }],
                detail_groups: vec!["metadata".to_string(), "spec".to_string(), "status".to_string()],
                action_ids: vec![
                    "tag".to_string(),
                    "annotate".to_string(),
                    "deprecate".to_string(),
                    "promote".to_string(),
                    "rollback".to_string(),
                ],
            }],
            actions: vec![
                ActionDescriptor { id: "tag".to_string(), scope: ActionScope::Asset, supports_dry_run: true, idempotent: true, destructive: false },
                ActionDescriptor { id: "annotate".to_string(), scope: ActionScope::Asset, supports_dry_run: true, idempotent: true, destructive: false },
                ActionDescriptor { id: "deprecate".to_string(), scope: ActionScope::Asset, supports_dry_run: true, idempotent: false, destructive: false },
                ActionDescriptor { id: "refresh".to_string(), scope: ActionScope::Source, supports_dry_run: false, idempotent: true, destructive: false },
                ActionDescriptor { id: "promote".to_string(), scope: ActionScope::Asset, supports_dry_run: true, idempotent: true, destructive: false },
                ActionDescriptor { id: "rollback".to_string(), scope: ActionScope::Asset, supports_dry_run: true, idempotent: true, destructive: false },
            ],
            source_manageable: true,
        }
    }

    async fn list(&self, _kind: &str, _tenant: &TenantContext, query: &ListQuery) -> Result<ListPage, CoreError> {
        let mut items: Vec<AssetResource> = self
            .entities
            .iter()
            .map(|e| e.value().resource.clone())
            .collect();

        if let Some(q) = &query.filter_query {
            items.retain(|item| item.metadata.name.contains(q.as_str()));
        }

        items.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        if query.sort_order.as_deref() == Some("desc") {
            items.reverse();
        }

        let offset: usize = query
            .next_page_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let page_size = query.page_size.unwrap_or(items.len().max(1));

        let next_page_token = if offset + page_size < items.len() {
            Some((offset + page_size).to_string())
        } else {
            None
        };
        let page = items.into_iter().skip(offset).take(page_size).collect();

        Ok(ListPage {
            items: page,
            next_page_token,
        })
    }

    async fn get(&self, _kind: &str, _tenant: &TenantContext, name: &str) -> Result<AssetResource, CoreError> {
        self.entities
            .get(name)
            .map(|e| e.value().resource.clone())
            .ok_or_else(|| CoreError::not_found(format!("{name} not found")))
    }

    async fn health_check(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn diagnostics(&self) -> HashMap<String, Diagnostics> {
        self.diagnostics
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::config_model::Section;

    fn descriptor() -> KindDescriptor {
        KindDescriptor {
            name: "model",
            version: "v1",
            description: "models",
            kind: "Model",
            plural: "models",
        }
    }

    #[tokio::test]
    async fn init_with_no_sources_leaves_empty_store() {
        let plugin = GenericPlugin::new(&descriptor());
        let section = Section {
            sources: vec![],
            labels: None,
            named_queries: None,
        };
        plugin
            .init(PluginConfig {
                section: &section,
                base_path: plugin.identity().base_path(),
                source_id: None,
            })
            .await
            .unwrap();

        let tenant = TenantContext::single("default");
        let page = plugin.list("model", &tenant, &ListQuery::default()).await.unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn capabilities_exposes_built_in_actions() {
        let plugin = GenericPlugin::new(&descriptor());
        let caps = plugin.capabilities();
        assert_eq!(caps.kinds.len(), 1);
        assert!(caps.actions.iter().any(|a| a.id == "tag"));
    }
}
