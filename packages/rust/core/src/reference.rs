//! Target-side reference tables: natural key → remote identifier.
//!
//! Built once per run from the target instance and held read-only while
//! permission entries are remapped. A lookup miss is never fatal; callers drop
//! the entry that needed it and log a warning.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{info, instrument, warn};

use tenantmove_client::{ApiClient, PageSpec, fetch_all};
use tenantmove_shared::Result;

/// Lookup from natural key (project key, group name, role name) to target id.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    kind: &'static str,
    entries: HashMap<String, String>,
}

impl ReferenceTable {
    /// Build a table from raw records, reading `key_field` and `id_field` from each.
    ///
    /// Numeric ids are stringified. Records missing either field are skipped.
    /// On duplicate keys the first record wins.
    pub fn from_records(
        kind: &'static str,
        records: &[Value],
        key_field: &str,
        id_field: &str,
    ) -> Self {
        let mut entries = HashMap::with_capacity(records.len());
        for record in records {
            let (Some(key), Some(id)) = (
                scalar_string(record.get(key_field)),
                scalar_string(record.get(id_field)),
            ) else {
                warn!(kind, "reference record without '{key_field}'/'{id_field}', ignoring");
                continue;
            };
            entries.entry(key).or_insert(id);
        }
        Self { kind, entries }
    }

    /// Target identifier for `key`, if the target has such an entity.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// What this table maps (`project`, `group`, `role`).
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The tables needed to remap share/edit permissions onto the target.
#[derive(Debug, Clone, Default)]
pub struct TargetReferences {
    pub projects: ReferenceTable,
    pub groups: ReferenceTable,
}

impl TargetReferences {
    /// Fetch project and group tables from `client` (normally the target).
    pub async fn fetch(client: &ApiClient, page_size: u32) -> Result<Self> {
        Ok(Self {
            projects: fetch_projects(client, page_size).await?,
            groups: fetch_groups(client, page_size).await?,
        })
    }
}

/// Project key → project id.
#[instrument(skip_all, fields(host = client.instance().host()))]
pub async fn fetch_projects(client: &ApiClient, page_size: u32) -> Result<ReferenceTable> {
    let spec = PageSpec::jira("/rest/api/3/project/search", "values");
    let records = fetch_all(client, &spec, page_size).await?;
    let table = ReferenceTable::from_records("project", &records, "key", "id");
    info!(projects = table.len(), "loaded project reference table");
    Ok(table)
}

/// Group name → group id.
#[instrument(skip_all, fields(host = client.instance().host()))]
pub async fn fetch_groups(client: &ApiClient, page_size: u32) -> Result<ReferenceTable> {
    let spec = PageSpec::jira("/rest/api/3/group/bulk", "values");
    let records = fetch_all(client, &spec, page_size).await?;
    let table = ReferenceTable::from_records("group", &records, "name", "groupId");
    info!(groups = table.len(), "loaded group reference table");
    Ok(table)
}

/// Project role name → role id. The role endpoint is not paginated.
#[instrument(skip_all, fields(host = client.instance().host()))]
pub async fn fetch_roles(client: &ApiClient) -> Result<ReferenceTable> {
    let records: Vec<Value> = client.get("/rest/api/3/role", &[]).await?;
    let table = ReferenceTable::from_records("role", &records, "name", "id");
    info!(roles = table.len(), "loaded project role reference table");
    Ok(table)
}

/// Render a JSON string or number as a `String`.
pub(crate) fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Deserialize an identifier the remote may send as either a string or a number.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_string(Some(&value))
        .ok_or_else(|| serde::de::Error::custom(format!("expected string or number id, got {value}")))
}
