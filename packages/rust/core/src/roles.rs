//! Cleanup of duplicated `<Role> (migrated)` project roles.
//!
//! After an import the target can hold both `Developers` and
//! `Developers (migrated)`. These passes copy what the migrated role grants
//! (permission scheme grants, project role actors) onto the plain role so the
//! migrated duplicate can be retired by hand afterwards.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use tenantmove_client::{ApiClient, PageSpec, fetch_all};
use tenantmove_shared::{MigrationError, Result};

use crate::reference::{deserialize_id, fetch_roles, scalar_string};

const MIGRATED_SUFFIX: &str = " (migrated)";

/// What the cleanup passes changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub schemes_checked: usize,
    pub grants_added: usize,
    pub projects_checked: usize,
    pub actors_added: usize,
    /// One line per grant or actor that could not be added.
    pub failures: Vec<String>,
}

/// `Developers (migrated)` → `Developers`.
pub fn base_role_name(name: &str) -> Option<&str> {
    name.split_once(MIGRATED_SUFFIX).map(|(base, _)| base)
}

// ---------------------------------------------------------------------------
// Permission schemes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemeList {
    #[serde(default)]
    permission_schemes: Vec<SchemeRef>,
}

#[derive(Debug, Deserialize)]
struct SchemeRef {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct SchemeDetails {
    #[serde(default)]
    permissions: Vec<Grant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Grant {
    #[serde(default)]
    holder: Option<Holder>,
    permission: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Holder {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    parameter: Option<Value>,
    #[serde(default)]
    project_role: Option<RoleRef>,
}

#[derive(Debug, Deserialize)]
struct RoleRef {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    id: Option<String>,
    name: String,
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(scalar_string(value.as_ref()))
}

impl Holder {
    /// Role id this holder grants to, when it is a project role holder.
    fn role_id(&self) -> Option<String> {
        if self.kind != "projectRole" {
            return None;
        }
        scalar_string(self.value.as_ref())
            .or_else(|| scalar_string(self.parameter.as_ref()))
            .or_else(|| self.project_role.as_ref().and_then(|r| r.id.clone()))
    }
}

/// Grant every permission held by a `X (migrated)` role to role `X` as well,
/// in the schemes listed in `scheme_ids` (every scheme when empty).
#[instrument(skip_all, fields(host = client.instance().host()))]
pub async fn clean_permission_schemes(
    client: &ApiClient,
    scheme_ids: &[String],
    summary: &mut CleanupSummary,
) -> Result<()> {
    let roles = fetch_roles(client).await?;
    let list: SchemeList = client.get("/rest/api/3/permissionscheme", &[]).await?;

    for scheme in list
        .permission_schemes
        .iter()
        .filter(|s| scheme_ids.is_empty() || scheme_ids.contains(&s.id))
    {
        info!(scheme = %scheme.name, id = %scheme.id, "checking permission scheme");
        summary.schemes_checked += 1;

        let details: SchemeDetails = match client
            .get(
                &format!("/rest/api/3/permissionscheme/{}", scheme.id),
                &[("expand", "all".to_string())],
            )
            .await
        {
            Ok(details) => details,
            Err(e) => {
                error!(scheme = %scheme.name, id = %scheme.id, error = %e, "scheme not readable");
                summary.failures.push(format!("scheme {}: {e}", scheme.id));
                continue;
            }
        };

        let mut granted: HashSet<(String, String)> = details
            .permissions
            .iter()
            .filter_map(|g| {
                let role_id = g.holder.as_ref()?.role_id()?;
                Some((role_id, g.permission.clone()))
            })
            .collect();

        for grant in &details.permissions {
            let Some(role_name) = grant
                .holder
                .as_ref()
                .filter(|h| h.kind == "projectRole")
                .and_then(|h| h.project_role.as_ref())
                .map(|r| r.name.as_str())
            else {
                continue;
            };
            let Some(base) = base_role_name(role_name) else {
                continue;
            };
            let Some(base_id) = roles.lookup(base) else {
                warn!(role = base, "no plain role for migrated role, skipping grant");
                continue;
            };
            let key = (base_id.to_string(), grant.permission.clone());
            if granted.contains(&key) {
                continue;
            }

            let payload = json!({
                "holder": {"type": "projectRole", "value": base_id},
                "permission": grant.permission,
            });
            match client
                .post_json(
                    &format!("/rest/api/3/permissionscheme/{}/permission", scheme.id),
                    &payload,
                )
                .await
            {
                Ok(_) => {
                    info!(scheme = %scheme.name, role = base, permission = %grant.permission, "grant added");
                    granted.insert(key);
                    summary.grants_added += 1;
                }
                Err(e) => {
                    error!(scheme = %scheme.name, role = base, permission = %grant.permission, error = %e, "grant not added");
                    summary.failures.push(format!(
                        "scheme '{}': {} for role '{base}': {e}",
                        scheme.name, grant.permission
                    ));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Project roles
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProjectRecord {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    key: String,
    #[serde(default)]
    style: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoleDetails {
    #[serde(default)]
    actors: Vec<Actor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Actor {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    actor_group: Option<ActorGroup>,
    #[serde(default)]
    actor_user: Option<ActorUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorGroup {
    #[serde(default)]
    group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorUser {
    #[serde(default)]
    account_id: Option<String>,
}

/// Payload that adds `actor` to a project role, if it is a group or user actor.
fn actor_payload(actor: &Actor) -> Option<Value> {
    match actor.kind.as_str() {
        "atlassian-group-role-actor" => {
            let id = actor.actor_group.as_ref()?.group_id.as_deref()?;
            Some(json!({ "groupId": [id] }))
        }
        "atlassian-user-role-actor" => {
            let id = actor.actor_user.as_ref()?.account_id.as_deref()?;
            Some(json!({ "user": [id] }))
        }
        _ => None,
    }
}

async fn role_pair(
    client: &ApiClient,
    migrated_path: &str,
    base_path: &str,
) -> Result<(RoleDetails, RoleDetails)> {
    let migrated = client.get(migrated_path, &[]).await?;
    let base = client.get(base_path, &[]).await?;
    Ok((migrated, base))
}

/// Role id from a project role URL (`.../project/10000/role/10002`).
fn role_id_from_url(url: &str) -> Option<&str> {
    url.rsplit_once("role/").map(|(_, id)| id.trim_end_matches('/'))
}

/// In classic projects, add every actor of role `X (migrated)` to role `X`.
/// `project_keys` limits the projects (every project when empty).
#[instrument(skip_all, fields(host = client.instance().host()))]
pub async fn clean_project_roles(
    client: &ApiClient,
    project_keys: &[String],
    page_size: u32,
    summary: &mut CleanupSummary,
) -> Result<()> {
    let spec = PageSpec::jira("/rest/api/3/project/search", "values");
    let projects: Vec<ProjectRecord> = fetch_all(client, &spec, page_size)
        .await?
        .into_iter()
        .map(|raw| {
            serde_json::from_value(raw)
                .map_err(|e| MigrationError::parse(format!("project record: {e}")))
        })
        .collect::<Result<_>>()?;

    for project in projects
        .iter()
        .filter(|p| project_keys.is_empty() || project_keys.contains(&p.key))
    {
        if project.style.as_deref() != Some("classic") {
            info!(project = %project.key, "not a classic project, skipping");
            continue;
        }
        info!(project = %project.key, "checking project roles");
        summary.projects_checked += 1;

        let role_urls: HashMap<String, String> = match client
            .get(&format!("/rest/api/3/project/{}/role", project.id), &[])
            .await
        {
            Ok(urls) => urls,
            Err(e) => {
                error!(project = %project.key, error = %e, "project roles not readable");
                summary.failures.push(format!("project {}: {e}", project.key));
                continue;
            }
        };

        for (name, url) in &role_urls {
            let Some(base) = base_role_name(name) else {
                continue;
            };
            let (Some(migrated_id), Some(base_id)) = (
                role_id_from_url(url),
                role_urls.get(base).and_then(|u| role_id_from_url(u)),
            ) else {
                warn!(project = %project.key, role = base, "no plain role for migrated role");
                continue;
            };

            let role_path = |id: &str| format!("/rest/api/3/project/{}/role/{id}", project.id);
            let pair = role_pair(client, &role_path(migrated_id), &role_path(base_id)).await;
            let (migrated, current) = match pair {
                Ok(pair) => pair,
                Err(e) => {
                    error!(project = %project.key, role = base, error = %e, "role actors not readable");
                    summary.failures.push(format!("project {} role '{base}': {e}", project.key));
                    continue;
                }
            };
            let present: HashSet<String> = current
                .actors
                .iter()
                .filter_map(actor_payload)
                .map(|p| p.to_string())
                .collect();

            for actor in &migrated.actors {
                let Some(payload) = actor_payload(actor) else {
                    continue;
                };
                if present.contains(&payload.to_string()) {
                    continue;
                }
                let label = actor.display_name.as_deref().unwrap_or(actor.kind.as_str());
                match client.post_json(&role_path(base_id), &payload).await {
                    Ok(_) => {
                        info!(project = %project.key, role = base, actor = label, "actor added");
                        summary.actors_added += 1;
                    }
                    Err(e) => {
                        error!(project = %project.key, role = base, actor = label, error = %e, "actor not added");
                        summary.failures.push(format!(
                            "project {}: '{label}' to role '{base}': {e}",
                            project.key
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Run both cleanup passes against `client`.
#[instrument(skip_all)]
pub async fn clean_migrated_roles(
    client: &ApiClient,
    project_keys: &[String],
    scheme_ids: &[String],
    page_size: u32,
) -> Result<CleanupSummary> {
    let mut summary = CleanupSummary::default();
    clean_permission_schemes(client, scheme_ids, &mut summary).await?;
    clean_project_roles(client, project_keys, page_size, &mut summary).await?;
    info!(
        grants = summary.grants_added,
        actors = summary.actors_added,
        failures = summary.failures.len(),
        "role cleanup complete"
    );
    Ok(summary)
}
