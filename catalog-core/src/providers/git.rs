//! Git repository provider.
//!
//! Required properties: `repoUrl`, `ref` (`{branch|tag|commit}`). Optional:
//! `auth{none|ssh|httpsToken}`, `paths{include,exclude,globs}`,
//! `sync{pollSeconds, shallow=true}`, `manifestFile`.
//!
//! Rather than pull in a `git2`-style binding, this shells out to the
//! system `git` binary via `tokio::process::Command`. Each clone is a
//! shallow checkout into a per-source scratch directory under the OS temp
//! dir, re-synced on every enumerate (idempotent: an unchanged ref produces
//! an unchanged working tree and thus an unchanged record set).

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;

use crate::config_model::Source;
use crate::entity::EntityRecord;
use crate::error::CoreError;
use crate::globmatch;

use super::{Diagnostics, EnumerateResult, Provider, ProviderContext};

pub struct GitProvider {
    diagnostics: AsyncMutex<Diagnostics>,
    /// Commit SHA observed on the previous `enumerate`, used to report
    /// `EnumerateResult::Unchanged` when the checked-out ref hasn't moved.
    last_commit: Mutex<Option<String>>,
}

impl Default for GitProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GitProvider {
    pub fn new() -> Self {
        Self {
            diagnostics: AsyncMutex::new(Diagnostics::default()),
            last_commit: Mutex::new(None),
        }
    }

    fn checkout_dir(source_id: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push("catalog-server-git-cache");
        dir.push(source_id);
        dir
    }

    async fn run_git(args: &[&str], cwd: Option<&std::path::Path>) -> Result<String, CoreError> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| CoreError::TransientError {
                message: format!("failed to spawn git: {e}"),
            })?;
        if !output.status.success() {
            return Err(CoreError::TransientError {
                message: format!(
                    "git {:?} failed: {}",
                    args,
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn sync(source: &Source) -> Result<(PathBuf, String), CoreError> {
        let repo_url = source
            .properties
            .get("repoUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::config("git source missing repoUrl"))?;
        let git_ref = source
            .properties
            .get("ref")
            .and_then(|v| v.as_object())
            .and_then(|m| {
                m.get("branch")
                    .or_else(|| m.get("tag"))
                    .or_else(|| m.get("commit"))
            })
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::config("git source missing ref"))?;
        let shallow = source
            .properties
            .get("sync")
            .and_then(|v| v.get("shallow"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let dir = Self::checkout_dir(&source.id);

        if dir.join(".git").is_dir() {
            Self::run_git(&["fetch", "--all"], Some(&dir)).await?;
        } else {
            std::fs::create_dir_all(&dir)?;
            let mut args = vec!["clone"];
            if shallow {
                args.push("--depth=1");
            }
            args.push(repo_url);
            args.push(".");
            Self::run_git(&args, Some(&dir)).await?;
        }

        Self::run_git(&["checkout", git_ref], Some(&dir)).await?;
        let commit_sha = Self::run_git(&["rev-parse", "HEAD"], Some(&dir)).await?;

        Ok((dir, commit_sha))
    }
}

#[async_trait]
impl Provider for GitProvider {
    fn kind(&self) -> &'static str {
        "git"
    }

    async fn enumerate(
        &self,
        _ctx: &ProviderContext,
        source: &Source,
    ) -> Result<EnumerateResult, CoreError> {
        let mut diag = self.diagnostics.lock().await;
        diag.last_attempt_at = Some(Utc::now());
        drop(diag);

        let result = async {
            let (dir, commit_sha) = Self::sync(source).await?;

            if self.last_commit.lock().unwrap_or_else(|e| e.into_inner()).as_deref() == Some(commit_sha.as_str()) {
                return Ok::<_, CoreError>(None);
            }

            let include: Vec<String> = source
                .properties
                .get("paths")
                .and_then(|v| v.get("include"))
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            let exclude: Vec<String> = source
                .properties
                .get("paths")
                .and_then(|v| v.get("exclude"))
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();

            let mut items = Vec::new();
            collect_yaml_files(&dir, &dir, &include, &exclude, &mut items)?;

            let records = items
                .into_iter()
                .map(|(name, payload)| EntityRecord {
                    name,
                    source_id: source.id.clone(),
                    payload,
                    digest: None,
                    revision_id: Some(commit_sha.clone()),
                    observed_at: Utc::now(),
                })
                .collect::<Vec<_>>();
            *self.last_commit.lock().unwrap_or_else(|e| e.into_inner()) = Some(commit_sha);
            Ok(Some(records))
        }
        .await;

        let mut diag = self.diagnostics.lock().await;
        match &result {
            Ok(Some(items)) => {
                diag.last_success_at = Some(Utc::now());
                diag.item_counts.observed = items.len() as u64;
                diag.item_counts.emitted = items.len() as u64;
                diag.last_error = None;
            }
            Ok(None) => {
                diag.last_success_at = Some(Utc::now());
                diag.last_error = None;
            }
            Err(e) => diag.last_error = Some(e.to_string()),
        }
        drop(diag);

        match result? {
            Some(items) => Ok(EnumerateResult::Records(Box::pin(futures::stream::iter(
                items.into_iter().map(Ok),
            )))),
            None => Ok(EnumerateResult::Unchanged),
        }
    }

    async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.lock().await.clone()
    }
}

fn collect_yaml_files(
    root: &std::path::Path,
    dir: &std::path::Path,
    include: &[String],
    exclude: &[String],
    out: &mut Vec<(String, Value)>,
) -> Result<(), CoreError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
            continue;
        }
        if path.is_dir() {
            collect_yaml_files(root, &path, include, exclude, out)?;
            continue;
        }
        let ext_ok = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if !ext_ok {
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().to_string();
        if !globmatch::is_included(&rel, include, exclude) {
            continue;
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let raw = std::fs::read_to_string(&path)?;
        let payload: Value = serde_yaml::from_str(&raw)?;
        out.push((name, payload));
    }
    Ok(())
}
