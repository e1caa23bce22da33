//! Generic `{resource}:action` dispatch.
//!
//! Every plugin gets `tag`, `annotate`, and `deprecate` for free against the
//! overlay store; a plugin may also claim an action id via
//! `CatalogPlugin::dispatch_action` to run its own logic (e.g. a `rotate-key`
//! action a credential-like asset kind might need). The dispatcher tries the
//! plugin first so a plugin can override a built-in name if it needs
//! different semantics, then falls back to the built-ins.
//!
//! Follows the same request/response envelope idiom used elsewhere in this
//! crate's handlers: deserialize params, run, wrap errors via `ApiError`.

use catalog_core::error::CoreError;
use catalog_core::overlay::{LifecycleState, LifecycleTransition, OverlayKey};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::governance::GovernanceStore;
use crate::overlay_store::OverlayStore;
use crate::plugin::CatalogPlugin;

#[derive(Debug, Clone)]
pub struct ActionRequest<'a> {
    pub plugin: &'a str,
    pub kind: &'a str,
    pub name: &'a str,
    pub action_id: &'a str,
    pub actor: &'a str,
    pub params: Value,
    pub dry_run: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ActionResult {
    pub action_id: String,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct TagParams {
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateParams {
    #[serde(default)]
    annotations: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
struct DeprecateParams {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromoteParams {
    from_env: String,
    to_env: String,
}

#[derive(Debug, Deserialize)]
struct RollbackParams {
    environment: String,
    version_id: String,
}

/// Runs one action. `plugin` is the already-resolved plugin instance (the
/// caller looks it up in the registry); this function owns the
/// plugin-vs-built-in precedence and dry-run short-circuiting.
pub async fn dispatch(
    plugin: &dyn CatalogPlugin,
    overlays: &OverlayStore,
    governance: &GovernanceStore,
    req: ActionRequest<'_>,
) -> Result<ActionResult, CoreError> {
    if let Some(result) = plugin
        .dispatch_action(req.kind, req.name, req.action_id, &req.params, req.dry_run)
        .await?
    {
        return Ok(ActionResult {
            action_id: req.action_id.to_string(),
            dry_run: req.dry_run,
            result: Some(result),
        });
    }

    let key = OverlayKey {
        plugin: req.plugin.to_string(),
        kind: req.kind.to_string(),
        name: req.name.to_string(),
    };

    match req.action_id {
        "tag" => {
            let params: TagParams = serde_json::from_value(req.params.clone())?;
            if req.params.get("tags").is_none() || params.tags.is_empty() {
                return Err(CoreError::validation("tag action requires a non-empty tags list"));
            }
            if req.dry_run {
                return Ok(ActionResult {
                    action_id: "tag".to_string(),
                    dry_run: true,
                    result: None,
                });
            }
            let record = overlays.tag(&key, req.actor, params.tags).await?;
            Ok(ActionResult {
                action_id: "tag".to_string(),
                dry_run: false,
                result: Some(serde_json::to_value(record)?),
            })
        }
        "annotate" => {
            let params: AnnotateParams = serde_json::from_value(req.params.clone())?;
            if params.annotations.is_empty() {
                return Err(CoreError::validation(
                    "annotate action requires a non-empty annotations map",
                ));
            }
            if req.dry_run {
                return Ok(ActionResult {
                    action_id: "annotate".to_string(),
                    dry_run: true,
                    result: None,
                });
            }
            let record = overlays.annotate(&key, req.actor, params.annotations).await?;
            Ok(ActionResult {
                action_id: "annotate".to_string(),
                dry_run: false,
                result: Some(serde_json::to_value(record)?),
            })
        }
        "deprecate" => {
            let params: DeprecateParams = serde_json::from_value(req.params.clone())?;
            if req.dry_run {
                return Ok(ActionResult {
                    action_id: "deprecate".to_string(),
                    dry_run: true,
                    result: None,
                });
            }
            let transition = LifecycleTransition {
                state: LifecycleState::Deprecated,
                reason: params.reason,
                changed_by: req.actor.to_string(),
                changed_at: Utc::now(),
            };
            let record = overlays
                .transition_lifecycle(&key, req.actor, "deprecate", transition)
                .await?;
            Ok(ActionResult {
                action_id: "deprecate".to_string(),
                dry_run: false,
                result: Some(serde_json::to_value(record)?),
            })
        }
        "promote" => {
            let params: PromoteParams = serde_json::from_value(req.params.clone())?;
            if req.dry_run {
                return Ok(ActionResult {
                    action_id: "promote".to_string(),
                    dry_run: true,
                    result: None,
                });
            }
            let binding = governance.promote(&key, &params.from_env, &params.to_env, req.actor)?;
            Ok(ActionResult {
                action_id: "promote".to_string(),
                dry_run: false,
                result: Some(serde_json::to_value(binding)?),
            })
        }
        "rollback" => {
            let params: RollbackParams = serde_json::from_value(req.params.clone())?;
            if req.dry_run {
                return Ok(ActionResult {
                    action_id: "rollback".to_string(),
                    dry_run: true,
                    result: None,
                });
            }
            let binding = governance.rollback(&key, &params.environment, &params.version_id, req.actor);
            Ok(ActionResult {
                action_id: "rollback".to_string(),
                dry_run: false,
                result: Some(serde_json::to_value(binding)?),
            })
        }
        other => Err(CoreError::NotFound {
            message: format!("unknown action id: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use catalog_core::entity::{AssetResource, CapabilitiesDocument};

    use super::*;
    use crate::plugin::{ListPage, ListQuery, PluginConfig, PluginIdentity};
    use crate::request_context::TenantContext;

    struct NoopPlugin(PluginIdentity);

    #[async_trait]
    impl CatalogPlugin for NoopPlugin {
        fn identity(&self) -> &PluginIdentity {
            &self.0
        }

        async fn init(&self, _config: PluginConfig<'_>) -> Result<(), CoreError> {
            Ok(())
        }

        fn capabilities(&self) -> CapabilitiesDocument {
            CapabilitiesDocument {
                plugin: self.0.name.clone(),
                version: self.0.version.clone(),
                kinds: vec![],
                actions: vec![],
                source_manageable: false,
            }
        }

        async fn list(
            &self,
            _kind: &str,
            _tenant: &TenantContext,
            _query: &ListQuery,
        ) -> Result<ListPage, CoreError> {
            Ok(ListPage::default())
        }

        async fn get(
            &self,
            _kind: &str,
            _tenant: &TenantContext,
            _name: &str,
        ) -> Result<AssetResource, CoreError> {
            Err(CoreError::not_found("no entities"))
        }
    }

    fn plugin() -> NoopPlugin {
        NoopPlugin(PluginIdentity {
            name: "model".to_string(),
            version: "v1".to_string(),
            description: "stub".to_string(),
            source_key: "models".to_string(),
        })
    }

    #[tokio::test]
    async fn dry_run_tag_does_not_mutate_overlay() {
        let overlays = OverlayStore::new(chrono::Duration::days(30));
        let governance = GovernanceStore::new();
        let plugin = plugin();
        let req = ActionRequest {
            plugin: "model",
            kind: "model",
            name: "gpt",
            action_id: "tag",
            actor: "alice",
            params: serde_json::json!({"tags": ["prod"]}),
            dry_run: true,
        };
        let result = dispatch(&plugin, &overlays, &governance, req).await.unwrap();
        assert!(result.dry_run);
        let key = OverlayKey {
            plugin: "model".to_string(),
            kind: "model".to_string(),
            name: "gpt".to_string(),
        };
        assert!(overlays.get(&key).is_none());
    }

    #[tokio::test]
    async fn tag_without_tags_is_rejected() {
        let overlays = OverlayStore::new(chrono::Duration::days(30));
        let governance = GovernanceStore::new();
        let plugin = plugin();
        let req = ActionRequest {
            plugin: "model",
            kind: "model",
            name: "gpt",
            action_id: "tag",
            actor: "alice",
            params: serde_json::json!({}),
            dry_run: false,
        };
        assert!(dispatch(&plugin, &overlays, &governance, req).await.is_err());
    }

    #[tokio::test]
    async fn unknown_action_id_is_not_found() {
        let overlays = OverlayStore::new(chrono::Duration::days(30));
        let governance = GovernanceStore::new();
        let plugin = plugin();
        let req = ActionRequest {
            plugin: "model",
            kind: "model",
            name: "gpt",
            action_id: "explode",
            actor: "alice",
            params: serde_json::json!({}),
            dry_run: false,
        };
        assert!(dispatch(&plugin, &overlays, &governance, req).await.is_err());
    }

    #[tokio::test]
    async fn promote_then_rollback_restores_prior_binding() {
        let overlays = OverlayStore::new(chrono::Duration::days(30));
        let governance = GovernanceStore::new();
        let key = OverlayKey {
            plugin: "model".to_string(),
            kind: "model".to_string(),
            name: "gpt".to_string(),
        };
        governance.set_binding(catalog_core::governance::Binding {
            plugin: "model".to_string(),
            kind: "model".to_string(),
            name: "gpt".to_string(),
            environment: "staging".to_string(),
            version_id: "v2".to_string(),
            bound_by: "alice".to_string(),
            bound_at: Utc::now(),
            previous_version_id: None,
        });
        governance.set_binding(catalog_core::governance::Binding {
            plugin: "model".to_string(),
            kind: "model".to_string(),
            name: "gpt".to_string(),
            environment: "prod".to_string(),
            version_id: "v1".to_string(),
            bound_by: "alice".to_string(),
            bound_at: Utc::now(),
            previous_version_id: None,
        });
        let plugin = plugin();

        let promoted = dispatch(
            &plugin,
            &overlays,
            &governance,
            ActionRequest {
                plugin: "model",
                kind: "model",
                name: "gpt",
                action_id: "promote",
                actor: "alice",
                params: serde_json::json!({"from_env": "staging", "to_env": "prod"}),
                dry_run: false,
            },
        )
        .await
        .unwrap();
        let promoted_binding: catalog_core::governance::Binding = serde_json::from_value(promoted.result.unwrap()).unwrap();
        assert_eq!(promoted_binding.version_id, "v2");
        assert_eq!(promoted_binding.previous_version_id.as_deref(), Some("v1"));

        let rolled_back = dispatch(
            &plugin,
            &overlays,
            &governance,
            ActionRequest {
                plugin: "model",
                kind: "model",
                name: "gpt",
                action_id: "rollback",
                actor: "alice",
                params: serde_json::json!({"environment": "prod", "version_id": "v1"}),
                dry_run: false,
            },
        )
        .await
        .unwrap();
        let rolled_back_binding: catalog_core::governance::Binding =
            serde_json::from_value(rolled_back.result.unwrap()).unwrap();
        assert_eq!(rolled_back_binding.version_id, "v1");
        assert_eq!(governance.get_binding(&key, "prod").unwrap().version_id, "v1");
    }
}
