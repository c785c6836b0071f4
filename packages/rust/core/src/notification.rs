//! Notification scheme migration.
//!
//! Events and notifications are copied verbatim: event ids, notification
//! types and parameters are instance-independent for the built-in events.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use tenantmove_client::{ApiClient, PageSpec, fetch_all};
use tenantmove_shared::{MigrationError, Result};

use crate::context::MigrationContext;
use crate::reference::{deserialize_id, scalar_string};
use crate::transfer::{ArtifactPipeline, Created, ProgressReporter, TransferSummary, run_with_report};

const SCHEME_PATH: &str = "/rest/api/3/notificationscheme";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceScheme {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notification_scheme_events: Vec<SchemeEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeEvent {
    pub event: EventRef,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRef {
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notification_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<Value>,
}

impl SourceScheme {
    /// Create payload for the target.
    pub fn to_payload(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description.as_deref().unwrap_or_default(),
            "notificationSchemeEvents": self.notification_scheme_events,
        })
    }
}

/// A source scheme as the pipeline sees it. In list-all mode a scheme whose
/// details cannot be read is kept so it fails on its own and lands in the
/// error report.
#[derive(Debug, Clone)]
pub enum SchemeSource {
    Loaded(SourceScheme),
    Unreadable { name: String, reason: String },
}

/// Migrates the listed schemes, or every scheme when `ids` is empty.
pub struct NotificationSchemePipeline<'a> {
    ctx: &'a MigrationContext,
    ids: Vec<String>,
}

impl<'a> NotificationSchemePipeline<'a> {
    pub fn new(ctx: &'a MigrationContext, ids: Vec<String>) -> Self {
        Self { ctx, ids }
    }

    async fn list(&self, client: &ApiClient) -> Result<Vec<Value>> {
        let spec = PageSpec::jira(SCHEME_PATH, "values");
        fetch_all(client, &spec, self.ctx.page_size).await
    }

    async fn fetch_scheme(&self, id: &str) -> Result<SourceScheme> {
        let raw = self
            .ctx
            .source
            .get_json(&format!("{SCHEME_PATH}/{id}"), &[("expand", "all".to_string())])
            .await?;
        serde_json::from_value(raw)
            .map_err(|e| MigrationError::parse(format!("notification scheme {id}: {e}")))
    }
}

impl ArtifactPipeline for NotificationSchemePipeline<'_> {
    type Item = SchemeSource;

    fn kind(&self) -> &'static str {
        "notification scheme"
    }

    async fn fetch_source(&self) -> Result<Vec<SchemeSource>> {
        if !self.ids.is_empty() {
            let mut schemes = Vec::with_capacity(self.ids.len());
            for id in &self.ids {
                schemes.push(SchemeSource::Loaded(self.fetch_scheme(id).await?));
            }
            return Ok(schemes);
        }

        let listed = self.list(&self.ctx.source).await?;
        info!(schemes = listed.len(), "migrating every source notification scheme");

        let mut schemes = Vec::with_capacity(listed.len());
        for entry in &listed {
            let Some(id) = scalar_string(entry.get("id")) else {
                continue;
            };
            match self.fetch_scheme(&id).await {
                Ok(scheme) => schemes.push(SchemeSource::Loaded(scheme)),
                Err(e) => {
                    let name = entry
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("scheme {id}"));
                    warn!(scheme = %name, id = %id, error = %e, "scheme details not readable");
                    schemes.push(SchemeSource::Unreadable {
                        name,
                        reason: format!("scheme {id} not readable: {e}"),
                    });
                }
            }
        }
        Ok(schemes)
    }

    async fn fetch_target_names(&self) -> Result<HashSet<String>> {
        Ok(self
            .list(&self.ctx.target)
            .await?
            .iter()
            .filter_map(|s| s.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    fn item_name(&self, item: &SchemeSource) -> String {
        match item {
            SchemeSource::Loaded(scheme) => scheme.name.clone(),
            SchemeSource::Unreadable { name, .. } => name.clone(),
        }
    }

    async fn create(&self, item: &SchemeSource) -> Result<Created> {
        let item = match item {
            SchemeSource::Loaded(scheme) => scheme,
            SchemeSource::Unreadable { reason, .. } => {
                return Err(MigrationError::validation(reason.clone()));
            }
        };
        let response = self.ctx.target.post_json(SCHEME_PATH, &item.to_payload()).await?;
        let target_id = scalar_string(response.get("id"))
            .ok_or_else(|| MigrationError::parse("notification scheme create response has no id"))?;
        Ok(Created::new(target_id))
    }
}

/// Migrate notification schemes; errors go to `notification_scheme_transfer_errors.csv`.
#[instrument(skip_all, fields(run_id = %ctx.run_id, requested = ids.len()))]
pub async fn migrate_notification_schemes(
    ctx: &MigrationContext,
    ids: Vec<String>,
    progress: &dyn ProgressReporter,
) -> Result<TransferSummary> {
    let pipeline = NotificationSchemePipeline::new(ctx, ids);
    run_with_report(&pipeline, ctx, progress).await
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::context::testing;
    use crate::transfer::{SilentProgress, TransferOutcome};

    fn scheme_body() -> Value {
        json!({
            "id": 10100,
            "name": "Support Notifications",
            "description": "support projects",
            "notificationSchemeEvents": [
                {
                    "event": {"id": 1, "name": "Issue created"},
                    "notifications": [
                        {"id": 1, "notificationType": "Group", "parameter": "support-team",
                         "group": {"name": "support-team"}}
                    ]
                },
                {
                    "event": {"id": 2, "name": "Issue updated"},
                    "notifications": [
                        {"id": 2, "notificationType": "Group", "parameter": "jira-admins"}
                    ]
                }
            ]
        })
    }

    async fn mount_target_listing(target: &MockServer, names: &[&str]) {
        let values: Vec<Value> = names.iter().map(|n| json!({"id": 1, "name": n})).collect();
        Mock::given(method("GET"))
            .and(path(SCHEME_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLast": true, "values": values
            })))
            .mount(target)
            .await;
    }

    #[test]
    fn payload_keeps_events_and_omits_missing_parameter() {
        let mut scheme: SourceScheme = serde_json::from_value(scheme_body()).unwrap();
        scheme.notification_scheme_events[1].notifications.push(Notification {
            notification_type: "CurrentAssignee".into(),
            parameter: None,
        });

        let payload = scheme.to_payload();
        assert_eq!(payload["name"], "Support Notifications");
        let events = payload["notificationSchemeEvents"].as_array().unwrap();
        assert_eq!(events[0], json!({
            "event": {"id": 1},
            "notifications": [{"notificationType": "Group", "parameter": "support-team"}]
        }));
        assert_eq!(
            events[1]["notifications"][1],
            json!({"notificationType": "CurrentAssignee"})
        );
    }

    #[tokio::test]
    async fn migrates_requested_scheme_verbatim() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/notificationscheme/10100"))
            .and(query_param("expand", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(scheme_body()))
            .expect(1)
            .mount(&source)
            .await;
        mount_target_listing(&target, &["Default Notification Scheme"]).await;
        Mock::given(method("POST"))
            .and(path(SCHEME_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "10200"})))
            .expect(1)
            .mount(&target)
            .await;

        let ctx = testing::context(&source.uri(), &target.uri());
        let summary = migrate_notification_schemes(&ctx, vec!["10100".into()], &SilentProgress)
            .await
            .unwrap();

        assert_eq!(
            summary.outcome_of("Support Notifications"),
            Some(&TransferOutcome::Created {
                target_id: "10200".into(),
                warnings: vec![]
            })
        );

        let requests = target.received_requests().await.unwrap();
        let post = requests.iter().find(|r| r.method.as_str() == "POST").unwrap();
        let body: Value = serde_json::from_slice(&post.body).unwrap();
        let events = body["notificationSchemeEvents"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        for (event, parameter) in events.iter().zip(["support-team", "jira-admins"]) {
            let notifications = event["notifications"].as_array().unwrap();
            assert_eq!(notifications.len(), 1);
            assert_eq!(notifications[0]["notificationType"], "Group");
            assert_eq!(notifications[0]["parameter"], parameter);
        }
    }

    #[tokio::test]
    async fn without_ids_every_source_scheme_is_considered() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SCHEME_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLast": true, "values": [{"id": 10100, "name": "Support Notifications"}]
            })))
            .mount(&source)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/notificationscheme/10100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(scheme_body()))
            .mount(&source)
            .await;
        mount_target_listing(&target, &["Support Notifications"]).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&target)
            .await;

        let ctx = testing::context(&source.uri(), &target.uri());
        let summary = migrate_notification_schemes(&ctx, vec![], &SilentProgress)
            .await
            .unwrap();
        assert_eq!((summary.created, summary.skipped), (0, 1));
    }

    #[tokio::test]
    async fn unreadable_scheme_fails_alone_when_listing_all() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SCHEME_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLast": true,
                "values": [
                    {"id": 10099, "name": "Broken Scheme"},
                    {"id": 10100, "name": "Support Notifications"}
                ]
            })))
            .mount(&source)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/notificationscheme/10099"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&source)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/notificationscheme/10100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(scheme_body()))
            .mount(&source)
            .await;
        mount_target_listing(&target, &[]).await;
        Mock::given(method("POST"))
            .and(path(SCHEME_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "10200"})))
            .expect(1)
            .mount(&target)
            .await;

        let ctx = testing::context(&source.uri(), &target.uri());
        let summary = migrate_notification_schemes(&ctx, vec![], &SilentProgress)
            .await
            .unwrap();

        assert_eq!((summary.created, summary.failed), (1, 1));
        assert!(matches!(
            summary.outcome_of("Broken Scheme"),
            Some(TransferOutcome::Failed { reason }) if reason.contains("10099")
        ));
        let csv_path = summary.error_report.clone().unwrap();
        let csv = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv.contains("Broken Scheme"));
        std::fs::remove_dir_all(&ctx.output_dir).ok();
    }

    #[tokio::test]
    async fn unknown_scheme_id_aborts() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/notificationscheme/404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&source)
            .await;

        let ctx = testing::context(&source.uri(), &target.uri());
        let err = migrate_notification_schemes(&ctx, vec!["404".into()], &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
