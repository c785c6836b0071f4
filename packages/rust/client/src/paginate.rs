//! Offset-paginated collection fetching.
//!
//! Issue-tracker endpoints page with `startAt`/`maxResults` and signal the end
//! with `isLast` or `total`; wiki endpoints page with `start`/`limit` and a
//! `_links.next` link. [`fetch_all`] walks either convention until the remote
//! signals the last page and returns every record in server order.

use serde_json::Value;
use tracing::{debug, instrument};

use tenantmove_shared::{MigrationError, Result};

use crate::http::ApiClient;

/// Upper bound on pages per collection; a remote that never signals the end
/// is treated as a protocol error rather than looped on forever.
const MAX_PAGES: usize = 10_000;

/// How the remote signals that the current page is the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEnd {
    /// `isLast` when present, otherwise `total`, otherwise a short page.
    Signalled,
    /// The response has no `_links.next`.
    NextLink,
    /// The page holds fewer records than the (echoed or requested) limit.
    ShortPage,
}

/// Description of one paginated collection endpoint.
#[derive(Debug, Clone)]
pub struct PageSpec {
    /// Path relative to the instance base URL.
    pub path: String,
    /// Fixed query parameters sent with every page.
    pub query: Vec<(String, String)>,
    /// JSON pointer to the records array in each page (e.g. `/values`).
    pub items_pointer: String,
    /// Name of the offset query parameter.
    pub offset_param: &'static str,
    /// Name of the page-size query parameter.
    pub limit_param: &'static str,
    /// End-of-collection convention.
    pub end: PageEnd,
}

impl PageSpec {
    /// Issue-tracker convention: `startAt`/`maxResults`, records under `items_key`.
    pub fn jira(path: impl Into<String>, items_key: &str) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            items_pointer: format!("/{items_key}"),
            offset_param: "startAt",
            limit_param: "maxResults",
            end: PageEnd::Signalled,
        }
    }

    /// Wiki convention: `start`/`limit`, records at `items_pointer`.
    pub fn wiki(path: impl Into<String>, items_pointer: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            items_pointer: items_pointer.into(),
            offset_param: "start",
            limit_param: "limit",
            end: PageEnd::NextLink,
        }
    }

    /// Add a fixed query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Override the end-of-collection convention.
    pub fn ending(mut self, end: PageEnd) -> Self {
        self.end = end;
        self
    }
}

/// Fetch every record of a paginated collection, in order.
///
/// The offset advances by the number of records actually returned, so a
/// server that caps the page size below `page_size` loses nothing. An empty
/// page always terminates. A failed page request aborts the fetch; the HTTP
/// layer has already retried it.
#[instrument(skip_all, fields(path = %spec.path))]
pub async fn fetch_all(client: &ApiClient, spec: &PageSpec, page_size: u32) -> Result<Vec<Value>> {
    let page_size = page_size.max(1);
    let mut records: Vec<Value> = Vec::new();
    let mut offset: u64 = 0;

    for page_number in 0..MAX_PAGES {
        let mut query: Vec<(&str, String)> = spec
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        query.push((spec.offset_param, offset.to_string()));
        query.push((spec.limit_param, page_size.to_string()));

        let page = client.get_json(&spec.path, &query).await?;

        let items = page
            .pointer(&spec.items_pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                MigrationError::parse(format!(
                    "{}: response has no array at '{}'",
                    spec.path, spec.items_pointer
                ))
            })?;

        let returned = items.len() as u64;
        records.extend(items.iter().cloned());
        debug!(page = page_number, offset, returned, total = records.len(), "fetched page");

        if returned == 0 || is_last_page(&page, spec, offset, returned, page_size) {
            return Ok(records);
        }
        offset += returned;
    }

    Err(MigrationError::parse(format!(
        "{}: pagination did not terminate after {MAX_PAGES} pages",
        spec.path
    )))
}

fn is_last_page(page: &Value, spec: &PageSpec, offset: u64, returned: u64, requested: u32) -> bool {
    match spec.end {
        PageEnd::Signalled => {
            if let Some(is_last) = page.get("isLast").and_then(Value::as_bool) {
                return is_last;
            }
            if let Some(total) = page.get("total").and_then(Value::as_u64) {
                return offset + returned >= total;
            }
            is_short_page(page, returned, requested)
        }
        PageEnd::NextLink => page.pointer("/_links/next").is_none(),
        PageEnd::ShortPage => is_short_page(page, returned, requested),
    }
}

/// Short relative to the limit the server says it applied, else the one requested.
fn is_short_page(page: &Value, returned: u64, requested: u32) -> bool {
    let applied = page
        .get("maxResults")
        .or_else(|| page.get("limit"))
        .and_then(Value::as_u64)
        .unwrap_or(u64::from(requested));
    returned < applied
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tenantmove_shared::{HttpSettings, Instance};
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> ApiClient {
        let instance = Instance {
            base_url: Url::parse(&server.uri()).unwrap(),
            email: "admin@example.com".into(),
            token: "t".into(),
        };
        let settings = HttpSettings {
            timeout: Duration::from_secs(5),
            max_attempts: 1,
            backoff: Duration::from_millis(1),
            page_size: 2,
        };
        ApiClient::new(instance, &settings).unwrap()
    }

    async fn mount_page(server: &MockServer, start: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path("/rest/api/3/dashboard"))
            .and(query_param("startAt", start))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn total_convention_collects_every_record_once() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "0",
            json!({"startAt": 0, "maxResults": 2, "total": 5, "dashboards": [{"id": "1"}, {"id": "2"}]}),
        )
        .await;
        mount_page(
            &server,
            "2",
            json!({"startAt": 2, "maxResults": 2, "total": 5, "dashboards": [{"id": "3"}, {"id": "4"}]}),
        )
        .await;
        mount_page(
            &server,
            "4",
            json!({"startAt": 4, "maxResults": 2, "total": 5, "dashboards": [{"id": "5"}]}),
        )
        .await;

        let client = client_for(&server);
        let spec = PageSpec::jira("/rest/api/3/dashboard", "dashboards");
        let records = fetch_all(&client, &spec, 2).await.expect("fetch");

        let ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn is_last_flag_wins_over_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/filter/search"))
            .and(query_param("startAt", "0"))
            .and(query_param("expand", "owner"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLast": true, "total": 10, "values": [{"name": "Open Bugs"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let spec = PageSpec::jira("/rest/api/3/filter/search", "values").with_query("expand", "owner");
        let records = fetch_all(&client, &spec, 50).await.expect("fetch");
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn capped_page_size_advances_by_returned_count() {
        let server = MockServer::start().await;
        // Server applies maxResults=1 even though 2 were requested.
        Mock::given(method("GET"))
            .and(path("/rest/api/3/group/bulk"))
            .and(query_param("startAt", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "maxResults": 1, "isLast": false, "values": [{"name": "a"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/group/bulk"))
            .and(query_param("startAt", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "maxResults": 1, "isLast": true, "values": [{"name": "b"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let spec = PageSpec::jira("/rest/api/3/group/bulk", "values");
        let records = fetch_all(&client, &spec, 2).await.expect("fetch");
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn wiki_next_link_convention() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/space/DOC/content/page"))
            .and(query_param("start", "0"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "1"}, {"id": "2"}],
                "_links": {"next": "/rest/api/space/DOC/content/page?start=2"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/space/DOC/content/page"))
            .and(query_param("start", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "3"}, {"id": "4"}],
                "_links": {}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let spec = PageSpec::wiki("/wiki/rest/api/space/DOC/content/page", "/results");
        let records = fetch_all(&client, &spec, 2).await.expect("fetch");
        assert_eq!(records.len(), 4);
    }

    #[tokio::test]
    async fn empty_page_terminates_even_without_signal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"isLast": false, "values": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let spec = PageSpec::jira("/rest/api/3/notificationscheme", "values");
        let records = fetch_all(&client, &spec, 50).await.expect("fetch");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn missing_items_array_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"isLast": true})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let spec = PageSpec::jira("/rest/api/3/dashboard", "dashboards");
        let err = fetch_all(&client, &spec, 50).await.unwrap_err();
        assert!(err.to_string().contains("/dashboards"));
    }

    #[tokio::test]
    async fn page_failure_aborts_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("startAt", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLast": false, "values": [{"id": 1}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startAt", "1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let spec = PageSpec::jira("/rest/api/3/project/search", "values");
        let err = fetch_all(&client, &spec, 1).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
    }
}
