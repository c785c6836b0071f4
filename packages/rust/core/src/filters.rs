//! Filter migration: create with remapped permissions, then hand ownership
//! back to the source owner.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use tenantmove_client::{ApiClient, PageSpec, fetch_all};
use tenantmove_shared::{MigrationError, Result};

use crate::context::MigrationContext;
use crate::reference::{TargetReferences, deserialize_id, scalar_string};
use crate::remap::{PermissionScope, SourcePermission, UserRef, remap_permissions};
use crate::transfer::{ArtifactPipeline, Created, ProgressReporter, TransferSummary, run_with_report};

const FILTER_PATH: &str = "/rest/api/3/filter";
const FILTER_EXPAND: &str = "description,owner,jql,sharePermissions,editPermissions";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFilter {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub jql: String,
    #[serde(default)]
    pub owner: Option<UserRef>,
    #[serde(default)]
    pub share_permissions: Vec<SourcePermission>,
    #[serde(default)]
    pub edit_permissions: Vec<SourcePermission>,
}

impl SourceFilter {
    fn owner_account(&self) -> Option<&str> {
        self.owner
            .as_ref()
            .and_then(|o| o.account_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// Creating a filter makes the API user its owner, so every create is
/// followed by an owner reassignment. A failed reassignment leaves the filter
/// in place and becomes a warning.
pub struct FilterPipeline<'a> {
    ctx: &'a MigrationContext,
    refs: TargetReferences,
}

impl<'a> FilterPipeline<'a> {
    pub async fn prepare(ctx: &'a MigrationContext) -> Result<Self> {
        let refs = TargetReferences::fetch(&ctx.target, ctx.page_size).await?;
        Ok(Self { ctx, refs })
    }

    async fn search(&self, client: &ApiClient) -> Result<Vec<Value>> {
        let spec = PageSpec::jira(format!("{FILTER_PATH}/search"), "values")
            .with_query("expand", FILTER_EXPAND);
        fetch_all(client, &spec, self.ctx.page_size).await
    }
}

impl ArtifactPipeline for FilterPipeline<'_> {
    type Item = SourceFilter;

    fn kind(&self) -> &'static str {
        "filter"
    }

    async fn fetch_source(&self) -> Result<Vec<SourceFilter>> {
        self.search(&self.ctx.source)
            .await?
            .into_iter()
            .map(|raw| {
                serde_json::from_value(raw)
                    .map_err(|e| MigrationError::parse(format!("filter record: {e}")))
            })
            .collect()
    }

    async fn fetch_target_names(&self) -> Result<HashSet<String>> {
        Ok(self
            .search(&self.ctx.target)
            .await?
            .iter()
            .filter_map(|f| f.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    fn item_name(&self, item: &SourceFilter) -> String {
        item.name.clone()
    }

    async fn create(&self, item: &SourceFilter) -> Result<Created> {
        let share = remap_permissions(&item.share_permissions, &self.refs, PermissionScope::Share);
        let edit = remap_permissions(&item.edit_permissions, &self.refs, PermissionScope::Edit);

        let body = json!({
            "name": item.name,
            "description": item.description.as_deref().unwrap_or_default(),
            "jql": item.jql,
            "sharePermissions": share.permissions,
            "editPermissions": edit.permissions,
        });
        let response = self.ctx.target.post_json(FILTER_PATH, &body).await?;
        let target_id = scalar_string(response.get("id"))
            .ok_or_else(|| MigrationError::parse("filter create response has no id"))?;

        let mut created = Created::new(target_id.clone());
        match item.owner_account() {
            Some(account_id) => {
                let owner = json!({ "accountId": account_id });
                if let Err(e) = self
                    .ctx
                    .target
                    .put_json(&format!("{FILTER_PATH}/{target_id}/owner"), &owner)
                    .await
                {
                    created.warn(format!("owner not changed to {account_id}: {e}"));
                }
            }
            None => {
                warn!(filter = %item.name, source_id = %item.id, "source filter has no owner");
                created.warn("source filter has no owner; API user remains owner");
            }
        }
        Ok(created)
    }
}

/// Migrate every filter; errors go to `filter_transfer_errors.csv`.
#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn migrate_filters(
    ctx: &MigrationContext,
    progress: &dyn ProgressReporter,
) -> Result<TransferSummary> {
    progress.phase("Loading target projects and groups");
    let pipeline = FilterPipeline::prepare(ctx).await?;
    run_with_report(&pipeline, ctx, progress).await
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::context::testing;
    use crate::transfer::{SilentProgress, SkipReason, TransferOutcome};

    async fn mount_refs(target: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/rest/api/3/project/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLast": true, "values": [{"key": "ABC", "id": "10000"}]
            })))
            .mount(target)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/group/bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLast": true, "values": []
            })))
            .mount(target)
            .await;
    }

    async fn mount_filters(server: &MockServer, values: Value) {
        Mock::given(method("GET"))
            .and(path("/rest/api/3/filter/search"))
            .and(query_param("expand", FILTER_EXPAND))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLast": true, "values": values
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn creates_missing_filter_and_restores_owner() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        mount_filters(
            &source,
            json!([
                {
                    "id": "10100",
                    "name": "Open Bugs",
                    "jql": "type = Bug AND resolution IS EMPTY",
                    "owner": {"accountId": "owner-1", "displayName": "Ana"},
                    "sharePermissions": [{"type": "project", "project": {"key": "ABC"}}],
                    "editPermissions": []
                },
                {
                    "id": 10101,
                    "name": "My Issues",
                    "jql": "assignee = currentUser()",
                    "owner": {"accountId": "owner-2"}
                }
            ]),
        )
        .await;
        mount_refs(&target).await;
        mount_filters(&target, json!([{"id": "1", "name": "My Issues"}])).await;

        Mock::given(method("POST"))
            .and(path(FILTER_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "20100"})))
            .expect(1)
            .mount(&target)
            .await;
        Mock::given(method("PUT"))
            .and(path("/rest/api/3/filter/20100/owner"))
            .and(body_json(json!({"accountId": "owner-1"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&target)
            .await;

        let ctx = testing::context(&source.uri(), &target.uri());
        let summary = migrate_filters(&ctx, &SilentProgress).await.unwrap();

        assert_eq!((summary.created, summary.skipped, summary.failed), (1, 1, 0));
        assert_eq!(
            summary.outcome_of("Open Bugs"),
            Some(&TransferOutcome::Created {
                target_id: "20100".into(),
                warnings: vec![]
            })
        );
        assert_eq!(
            summary.outcome_of("My Issues"),
            Some(&TransferOutcome::Skipped {
                reason: SkipReason::AlreadyExists
            })
        );
        assert_eq!(summary.error_report, None);

        let requests = target.received_requests().await.unwrap();
        let post = requests
            .iter()
            .find(|r| r.method.as_str() == "POST")
            .expect("create request");
        let body: Value = serde_json::from_slice(&post.body).unwrap();
        assert_eq!(body["jql"], "type = Bug AND resolution IS EMPTY");
        assert_eq!(
            body["sharePermissions"],
            json!([{"type": "project", "project": {"id": "10000"}}])
        );
    }

    #[tokio::test]
    async fn owner_failure_keeps_filter_and_warns() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        mount_filters(
            &source,
            json!([{"id": "1", "name": "Team", "jql": "project = ABC", "owner": {"accountId": "gone"}}]),
        )
        .await;
        mount_refs(&target).await;
        mount_filters(&target, json!([])).await;
        Mock::given(method("POST"))
            .and(path(FILTER_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5})))
            .mount(&target)
            .await;
        Mock::given(method("PUT"))
            .and(path("/rest/api/3/filter/5/owner"))
            .respond_with(ResponseTemplate::new(400).set_body_string("user not found"))
            .mount(&target)
            .await;

        let ctx = testing::context(&source.uri(), &target.uri());
        let summary = migrate_filters(&ctx, &SilentProgress).await.unwrap();

        match summary.outcome_of("Team") {
            Some(TransferOutcome::Created { target_id, warnings }) => {
                assert_eq!(target_id, "5");
                assert!(warnings[0].contains("gone"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(summary.error_report.is_some());
        std::fs::remove_dir_all(&ctx.output_dir).ok();
    }

    #[tokio::test]
    async fn create_failure_is_recorded() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        mount_filters(&source, json!([{"id": "1", "name": "Broken", "jql": "nonsense ="}])).await;
        mount_refs(&target).await;
        mount_filters(&target, json!([])).await;
        Mock::given(method("POST"))
            .and(path(FILTER_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string("jql invalid"))
            .expect(1)
            .mount(&target)
            .await;

        let ctx = testing::context(&source.uri(), &target.uri());
        let summary = migrate_filters(&ctx, &SilentProgress).await.unwrap();

        assert_eq!(summary.failed, 1);
        let report = summary.error_report.expect("report");
        let content = std::fs::read_to_string(&report).unwrap();
        assert!(content.starts_with("Filter Name,Error"));
        assert!(content.contains("jql invalid"));
        std::fs::remove_dir_all(&ctx.output_dir).ok();
    }

    #[tokio::test]
    async fn unreachable_reference_tables_abort_the_run() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/project/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&target)
            .await;

        let ctx = testing::context(&source.uri(), &target.uri());
        let err = migrate_filters(&ctx, &SilentProgress).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }
}
