//! Dashboard migration, including gadgets and their configuration.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use tenantmove_client::{ApiClient, PageSpec, fetch_all};
use tenantmove_shared::{MigrationError, Result};

use crate::context::MigrationContext;
use crate::reference::{TargetReferences, deserialize_id, scalar_string};
use crate::remap::{PermissionScope, SourcePermission, remap_permissions};
use crate::transfer::{ArtifactPipeline, Created, ProgressReporter, TransferSummary, run_with_report};

const DASHBOARD_PATH: &str = "/rest/api/3/dashboard";

/// Name of the per-user system dashboard, which every instance already has.
const DEFAULT_DASHBOARD: &str = "Default dashboard";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDashboard {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub share_permissions: Vec<SourcePermission>,
    #[serde(default)]
    pub edit_permissions: Vec<SourcePermission>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Gadget {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    position: Option<Value>,
    #[serde(default)]
    module_key: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GadgetList {
    #[serde(default)]
    gadgets: Vec<Gadget>,
}

/// Copies dashboards with remapped permissions, then recreates their gadgets.
pub struct DashboardPipeline<'a> {
    ctx: &'a MigrationContext,
    refs: TargetReferences,
}

impl<'a> DashboardPipeline<'a> {
    /// Load the target reference tables needed for permission remapping.
    pub async fn prepare(ctx: &'a MigrationContext) -> Result<Self> {
        let refs = TargetReferences::fetch(&ctx.target, ctx.page_size).await?;
        Ok(Self { ctx, refs })
    }

    async fn list(&self, client: &ApiClient) -> Result<Vec<Value>> {
        let spec = PageSpec::jira(DASHBOARD_PATH, "dashboards");
        fetch_all(client, &spec, self.ctx.page_size).await
    }

    /// Recreate every gadget of `source_id` on `target_id`. Each failure is a
    /// warning on `created`; the dashboard itself stays.
    async fn copy_gadgets(&self, source_id: &str, target_id: &str, created: &mut Created) {
        let list: GadgetList = match self
            .ctx
            .source
            .get(&format!("{DASHBOARD_PATH}/{source_id}/gadget"), &[])
            .await
        {
            Ok(list) => list,
            Err(e) => {
                created.warn(format!("could not list gadgets: {e}"));
                return;
            }
        };

        for gadget in &list.gadgets {
            if let Err(e) = self.copy_gadget(source_id, target_id, gadget).await {
                let label = gadget.title.as_deref().unwrap_or(&gadget.id);
                created.warn(format!("gadget '{label}' not copied: {e}"));
            }
        }
    }

    async fn copy_gadget(&self, source_id: &str, target_id: &str, gadget: &Gadget) -> Result<()> {
        let properties = self.gadget_config(source_id, &gadget.id).await;
        let config = merge_gadget_config(gadget, properties);

        let mut payload = Map::new();
        if let Some(color) = &gadget.color {
            payload.insert("color".into(), json!(color));
        }
        if let Some(position) = &gadget.position {
            payload.insert("position".into(), position.clone());
        }
        if let Some(module_key) = gadget.module_key.as_deref().filter(|s| !s.is_empty()) {
            payload.insert("moduleKey".into(), json!(module_key));
        }
        if let Some(uri) = gadget.uri.as_deref().filter(|s| !s.is_empty()) {
            payload.insert("uri".into(), json!(uri));
        }

        let response = self
            .ctx
            .target
            .post_json(&format!("{DASHBOARD_PATH}/{target_id}/gadget"), &Value::Object(payload))
            .await?;
        let item_id = scalar_string(response.get("id"))
            .ok_or_else(|| MigrationError::parse("gadget create response has no id"))?;

        if !config.is_empty() {
            self.ctx
                .target
                .put_json(
                    &format!("{DASHBOARD_PATH}/{target_id}/items/{item_id}/properties/config"),
                    &stringify_values(&config),
                )
                .await?;
        }
        debug!(source_item = %gadget.id, target_item = %item_id, "gadget copied");
        Ok(())
    }

    /// The gadget's `config` item property, or empty when it has none.
    async fn gadget_config(&self, dashboard_id: &str, item_id: &str) -> Map<String, Value> {
        let path = format!("{DASHBOARD_PATH}/{dashboard_id}/items/{item_id}/properties/config");
        match self.ctx.source.get_json(&path, &[]).await {
            Ok(property) => match property.get("value") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            },
            Err(e) => {
                warn!(dashboard_id, item_id, error = %e, "no config found for gadget");
                Map::new()
            }
        }
    }
}

impl ArtifactPipeline for DashboardPipeline<'_> {
    type Item = SourceDashboard;

    fn kind(&self) -> &'static str {
        "dashboard"
    }

    async fn fetch_source(&self) -> Result<Vec<SourceDashboard>> {
        self.list(&self.ctx.source)
            .await?
            .into_iter()
            .map(|raw| {
                serde_json::from_value(raw)
                    .map_err(|e| MigrationError::parse(format!("dashboard record: {e}")))
            })
            .collect()
    }

    async fn fetch_target_names(&self) -> Result<HashSet<String>> {
        Ok(self
            .list(&self.ctx.target)
            .await?
            .iter()
            .filter_map(|d| d.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    fn item_name(&self, item: &SourceDashboard) -> String {
        item.name.clone()
    }

    fn exclusion(&self, item: &SourceDashboard) -> Option<String> {
        item.name
            .eq_ignore_ascii_case(DEFAULT_DASHBOARD)
            .then(|| "system default dashboard".to_string())
    }

    async fn create(&self, item: &SourceDashboard) -> Result<Created> {
        let share = remap_permissions(&item.share_permissions, &self.refs, PermissionScope::Share);
        let edit = remap_permissions(&item.edit_permissions, &self.refs, PermissionScope::Edit);

        let body = json!({
            "name": item.name,
            "description": item.description.as_deref().unwrap_or_default(),
            "sharePermissions": share.permissions,
            "editPermissions": edit.permissions,
        });
        let response = self.ctx.target.post_json(DASHBOARD_PATH, &body).await?;
        let target_id = scalar_string(response.get("id"))
            .ok_or_else(|| MigrationError::parse("dashboard create response has no id"))?;

        let mut created = Created::new(target_id.clone());
        self.copy_gadgets(&item.id, &target_id, &mut created).await;
        Ok(created)
    }
}

/// Gadget config to send to the target: `moduleKey`/`uri` from the gadget,
/// overlaid with the source config property. Only one of `moduleKey` and
/// `uri` may be present; `uri` is dropped when both are.
fn merge_gadget_config(gadget: &Gadget, properties: Map<String, Value>) -> Map<String, Value> {
    let mut config = Map::new();
    if let Some(module_key) = gadget.module_key.as_deref().filter(|s| !s.is_empty()) {
        config.insert("moduleKey".into(), json!(module_key));
    }
    if let Some(uri) = gadget.uri.as_deref().filter(|s| !s.is_empty()) {
        config.insert("uri".into(), json!(uri));
    }
    config.extend(properties);

    if config.contains_key("moduleKey") && config.remove("uri").is_some() {
        warn!(item_id = %gadget.id, "both uri and moduleKey present, dropping uri");
    }
    config
}

/// The config property stores every value as a string.
fn stringify_values(config: &Map<String, Value>) -> Map<String, Value> {
    config
        .iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), Value::String(s))
        })
        .collect()
}

/// Migrate every dashboard; errors go to `dashboard_transfer_errors.csv`.
#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn migrate_dashboards(
    ctx: &MigrationContext,
    progress: &dyn ProgressReporter,
) -> Result<TransferSummary> {
    progress.phase("Loading target projects and groups");
    let pipeline = DashboardPipeline::prepare(ctx).await?;
    run_with_report(&pipeline, ctx, progress).await
}
