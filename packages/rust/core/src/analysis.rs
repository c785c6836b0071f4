//! Source/target comparison report.
//!
//! Both instances are read once into an [`InstanceSnapshot`]; the report is
//! then built from the two snapshots without further network access. A
//! collection that could not be fetched leaves its section marked as
//! unavailable and the rest of the report is still produced.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use tenantmove_client::{ApiClient, PageSpec, fetch_all};
use tenantmove_shared::{MigrationError, Result};

use crate::context::MigrationContext;
use crate::document::Document;
use crate::reference::scalar_string;
use crate::transfer::ProgressReporter;

/// Field schema types the import cannot carry over.
const NON_MIGRATABLE_FIELD_TYPES: &[&str] = &[
    "option-with-child",
    "project",
    "sd-servicelevelagreement",
    "multiuserpicker",
];

const NO_DESCRIPTION: &str = "No description";

/// A fetched collection, or the error text that prevented fetching it.
pub type Fetched<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRole {
    pub name: String,
    #[serde(default)]
    pub number_of_seats: i64,
    #[serde(default)]
    pub remaining_seats: i64,
    #[serde(default)]
    pub user_count: i64,
    #[serde(default)]
    pub user_count_description: Option<String>,
    #[serde(default)]
    pub default_groups: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Everything the report needs from one instance.
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub projects: Fetched<Vec<Value>>,
    pub priorities: Fetched<Vec<Value>>,
    pub resolutions: Fetched<Vec<Value>>,
    pub roles: Fetched<Vec<Value>>,
    pub issue_types: Fetched<Vec<Value>>,
    /// Custom fields only.
    pub fields: Fetched<Vec<Value>>,
    pub statuses: Fetched<Vec<Value>>,
    pub filters: Fetched<Vec<Value>>,
    pub dashboards: Fetched<Vec<Value>>,
    /// `(scheme name, project id)` for every scheme/project association.
    pub scheme_projects: Fetched<Vec<(String, String)>>,
    pub application_roles: Fetched<Vec<ApplicationRole>>,
    /// License name → email addresses of the users holding it.
    pub users_by_license: Fetched<BTreeMap<String, BTreeSet<String>>>,
}

impl InstanceSnapshot {
    /// Read every collection from `client`. Never fails as a whole.
    #[instrument(skip_all, fields(host = client.instance().host()))]
    pub async fn fetch(client: &ApiClient, page_size: u32) -> Self {
        let projects = capture(
            "projects",
            fetch_all(client, &PageSpec::jira("/rest/api/3/project/search", "values"), page_size),
        )
        .await;
        let priorities = capture("priorities", plain_list(client, "/rest/api/3/priority")).await;
        let resolutions = capture("resolutions", plain_list(client, "/rest/api/3/resolution")).await;
        let roles = capture("roles", plain_list(client, "/rest/api/3/role")).await;
        let issue_types = capture("issue types", plain_list(client, "/rest/api/3/issuetype")).await;
        let fields = capture("fields", plain_list(client, "/rest/api/3/field"))
            .await
            .map(|all| {
                all.into_iter()
                    .filter(|f| f.get("custom").and_then(Value::as_bool).unwrap_or(false))
                    .collect()
            });
        let statuses = capture("statuses", plain_list(client, "/rest/api/3/status")).await;
        let filters = capture(
            "filters",
            fetch_all(client, &PageSpec::jira("/rest/api/3/filter/search", "values"), page_size),
        )
        .await;
        let dashboards = capture(
            "dashboards",
            fetch_all(client, &PageSpec::jira("/rest/api/3/dashboard", "dashboards"), page_size),
        )
        .await
        .map(|all| {
            all.into_iter()
                .filter(|d| !field_str(d, "name").eq_ignore_ascii_case("Default dashboard"))
                .collect()
        });
        let scheme_projects =
            capture("notification schemes", scheme_projects(client, page_size)).await;
        let application_roles = capture("application roles", application_roles(client)).await;
        let users_by_license = match &application_roles {
            Ok(roles) => capture("license users", users_by_license(client, roles, page_size)).await,
            Err(e) => Err(e.clone()),
        };

        Self {
            projects,
            priorities,
            resolutions,
            roles,
            issue_types,
            fields,
            statuses,
            filters,
            dashboards,
            scheme_projects,
            application_roles,
            users_by_license,
        }
    }
}

async fn capture<T>(what: &str, fut: impl Future<Output = Result<T>>) -> Fetched<T> {
    fut.await.map_err(|e| {
        warn!(section = what, error = %e, "collection unavailable");
        e.to_string()
    })
}

async fn plain_list(client: &ApiClient, path: &str) -> Result<Vec<Value>> {
    client.get(path, &[]).await
}

async fn application_roles(client: &ApiClient) -> Result<Vec<ApplicationRole>> {
    client.get("/rest/api/3/applicationrole", &[]).await
}

async fn scheme_projects(client: &ApiClient, page_size: u32) -> Result<Vec<(String, String)>> {
    let names: HashMap<String, String> = fetch_all(
        client,
        &PageSpec::jira("/rest/api/3/notificationscheme", "values"),
        page_size,
    )
    .await?
    .iter()
    .filter_map(|s| Some((scalar_string(s.get("id"))?, field_str(s, "name").to_string())))
    .collect();

    let associations = fetch_all(
        client,
        &PageSpec::jira("/rest/api/3/notificationscheme/project", "values"),
        page_size,
    )
    .await?;

    associations
        .iter()
        .map(|a| {
            let scheme_id = scalar_string(a.get("notificationSchemeId"))
                .ok_or_else(|| MigrationError::parse("association without notificationSchemeId"))?;
            let project_id = scalar_string(a.get("projectId")).unwrap_or_default();
            let name = names.get(&scheme_id).cloned().unwrap_or(scheme_id);
            Ok((name, project_id))
        })
        .collect()
}

async fn users_by_license(
    client: &ApiClient,
    roles: &[ApplicationRole],
    page_size: u32,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut members_of: HashMap<String, Vec<String>> = HashMap::new();
    let mut result = BTreeMap::new();

    for role in roles {
        let groups: BTreeSet<&String> = role.groups.iter().chain(&role.default_groups).collect();
        let mut emails = BTreeSet::new();
        for group in groups {
            if !members_of.contains_key(group) {
                let spec = PageSpec::jira("/rest/api/3/group/member", "values")
                    .with_query("groupname", group.as_str());
                let members = fetch_all(client, &spec, page_size).await?;
                let addresses = members
                    .iter()
                    .filter_map(|m| m.get("emailAddress").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                members_of.insert(group.clone(), addresses);
            }
            if let Some(addresses) = members_of.get(group) {
                emails.extend(addresses.iter().cloned());
            }
        }
        result.insert(role.name.clone(), emails);
    }
    Ok(result)
}

fn field_str<'a>(record: &'a Value, field: &str) -> &'a str {
    record.get(field).and_then(Value::as_str).unwrap_or_default()
}

/// `(natural key, description)` pairs in source order.
fn keyed(records: &[Value], key: &str) -> Vec<(String, String)> {
    records
        .iter()
        .map(|r| {
            let description = match field_str(r, "description") {
                "" => NO_DESCRIPTION,
                d => d,
            };
            (field_str(r, key).to_string(), description.to_string())
        })
        .collect()
}

fn readable_field_type(api_type: &str) -> &str {
    match api_type {
        "option" => "Select List (Single Select)",
        "array" => "Select List (Multiple Select)",
        "string" => "Text",
        "date" => "Date",
        "datetime" => "Date/Time",
        "number" => "Number",
        "sd-servicelevelagreement" => "Service Level Agreement (SLA)",
        "project" => "Project Picker",
        "option-with-child" => "Select List (cascade)",
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Build the comparison report from two snapshots.
pub fn build_report(source: &InstanceSnapshot, target: &InstanceSnapshot) -> Document {
    let mut doc = Document::new("Instance Migration Analysis");

    projects_section(&mut doc, source, target);
    for (title, s, t) in [
        ("Priorities", &source.priorities, &target.priorities),
        ("Resolutions", &source.resolutions, &target.resolutions),
        ("Issue Types", &source.issue_types, &target.issue_types),
    ] {
        if let Some((s, t)) = available(&mut doc, title, s, t) {
            name_diff_section(&mut doc, title, s, t);
        }
    }
    roles_section(&mut doc, source, target);
    custom_fields_section(&mut doc, source, target);
    statuses_section(&mut doc, source, target);
    conflicts_section(&mut doc, "Filters", &source.filters, &target.filters);
    if conflicts_section(&mut doc, "Dashboards", &source.dashboards, &target.dashboards) {
        doc.heading(2, "Limitations")
            .paragraph("Due to the limitations of the REST API, the following restrictions apply to dashboard migration:")
            .bullet("Dashboard layouts are not migrated.")
            .bullet("Dashboard ownership is not migrated; the migrating account becomes the owner.")
            .bullet("User favourites are not retained and must be set again in the target instance.");
    }
    notification_section(&mut doc, source, target);
    licenses_section(&mut doc, source, target);

    doc
}

/// Both sides, or an "unavailable" section when either failed.
fn available<'a, T>(
    doc: &mut Document,
    title: &str,
    source: &'a Fetched<T>,
    target: &'a Fetched<T>,
) -> Option<(&'a T, &'a T)> {
    match (source, target) {
        (Ok(s), Ok(t)) => Some((s, t)),
        (Err(e), _) => {
            unavailable(doc, title, "source", e);
            None
        }
        (_, Err(e)) => {
            unavailable(doc, title, "target", e);
            None
        }
    }
}

fn unavailable(doc: &mut Document, title: &str, side: &str, error: &str) {
    doc.heading(2, title)
        .paragraph(format!("Data unavailable from the {side} instance: {error}"));
}

fn counts(doc: &mut Document, what: &str, source: usize, target: usize) {
    doc.bullet(format!("Number of {what} in source instance: {source}"))
        .bullet(format!("Number of {what} in target instance: {target}"));
}

fn pair_rows(pairs: Vec<(String, String)>) -> Vec<Vec<String>> {
    pairs.into_iter().map(|(a, b)| vec![a, b]).collect()
}

fn projects_section(doc: &mut Document, source: &InstanceSnapshot, target: &InstanceSnapshot) {
    let Some((s, t)) = available(doc, "Projects", &source.projects, &target.projects) else {
        return;
    };
    doc.heading(2, "Projects");
    counts(doc, "projects", s.len(), t.len());

    let target_keys: HashSet<String> = keyed(t, "key").into_iter().map(|(k, _)| k).collect();
    let (conflicts, additions): (Vec<_>, Vec<_>) = keyed(s, "key")
        .into_iter()
        .partition(|(k, _)| target_keys.contains(k));

    doc.heading(3, "Items to be added to the target instance");
    if additions.is_empty() {
        doc.paragraph("No items identified for addition.");
    } else {
        doc.table(&["Key", "Description"], pair_rows(additions));
    }
    if !conflicts.is_empty() {
        doc.heading(3, "Conflicting project keys requiring renaming for migration")
            .table(&["Key", "Description"], pair_rows(conflicts));
    }
}

fn name_diff_section(doc: &mut Document, title: &str, s: &[Value], t: &[Value]) {
    doc.heading(2, title);
    counts(doc, &title.to_lowercase(), s.len(), t.len());

    let target_names: HashSet<String> = keyed(t, "name").into_iter().map(|(k, _)| k).collect();
    let (merges, additions): (Vec<_>, Vec<_>) = keyed(s, "name")
        .into_iter()
        .partition(|(k, _)| target_names.contains(k));

    doc.heading(3, "Items to be added to the target instance");
    if additions.is_empty() {
        doc.paragraph("No items identified for addition.");
    } else {
        doc.table(&["Name", "Description"], pair_rows(additions));
    }
    doc.heading(3, "Items to be merged due to presence in both instances");
    if merges.is_empty() {
        doc.paragraph("No items identified for merging.");
    } else {
        doc.table(&["Name", "Description"], pair_rows(merges));
    }
}

fn roles_section(doc: &mut Document, source: &InstanceSnapshot, target: &InstanceSnapshot) {
    let Some((s, t)) = available(doc, "Project Roles", &source.roles, &target.roles) else {
        return;
    };
    doc.heading(2, "Project Roles");
    counts(doc, "project roles", s.len(), t.len());

    let target_names: HashSet<String> = keyed(t, "name").into_iter().map(|(k, _)| k).collect();
    let (merges, additions): (Vec<_>, Vec<_>) = keyed(s, "name")
        .into_iter()
        .partition(|(k, _)| target_names.contains(k));

    doc.heading(3, "Roles to be added to the target instance");
    if additions.is_empty() {
        doc.paragraph("No roles identified for addition.");
    } else {
        doc.table(&["Name", "Description"], pair_rows(additions));
    }
    doc.heading(3, "Roles to be merged due to presence in both instances");
    if merges.is_empty() {
        doc.paragraph("No roles identified for merging.");
    } else {
        doc.table(&["Name", "Description"], pair_rows(merges));
    }
}

fn custom_fields_section(doc: &mut Document, source: &InstanceSnapshot, target: &InstanceSnapshot) {
    let Some((s, t)) = available(doc, "Custom Fields", &source.fields, &target.fields) else {
        return;
    };
    doc.heading(2, "Custom Fields");
    counts(doc, "custom fields", s.len(), t.len());

    let field_type = |f: &Value| -> String {
        f.pointer("/schema/type")
            .and_then(Value::as_str)
            .unwrap_or("N/A")
            .to_string()
    };
    let target_types: HashMap<&str, String> =
        t.iter().map(|f| (field_str(f, "name"), field_type(f))).collect();

    let mut additions = Vec::new();
    let mut differing = Vec::new();
    let mut excluded = Vec::new();
    for field in s {
        let name = field_str(field, "name");
        let kind = field_type(field);
        let non_migratable = NON_MIGRATABLE_FIELD_TYPES.contains(&kind.as_str());
        if non_migratable {
            excluded.push(vec![name.to_string(), readable_field_type(&kind).to_string()]);
        }
        match target_types.get(name) {
            None if !non_migratable => {
                additions.push(vec![name.to_string(), readable_field_type(&kind).to_string()]);
            }
            Some(target_kind) if *target_kind != kind => differing.push(vec![
                name.to_string(),
                readable_field_type(&kind).to_string(),
                readable_field_type(target_kind).to_string(),
            ]),
            _ => {}
        }
    }

    doc.heading(3, "Custom fields to be added");
    if additions.is_empty() {
        doc.paragraph("No custom fields identified for addition.");
    } else {
        doc.table(&["Name", "Source Type"], additions);
    }
    doc.heading(3, "Custom fields with identical names in both instances");
    if differing.is_empty() {
        doc.paragraph("No custom fields with identical names found in both instances with differing types.");
    } else {
        doc.table(&["Name", "Source Type", "Target Type"], differing);
    }
    doc.heading(3, "Custom fields that will not be migrated");
    if excluded.is_empty() {
        doc.paragraph("No custom fields identified for exclusion from migration.");
    } else {
        doc.table(&["Name", "Type"], excluded);
    }
}

fn statuses_section(doc: &mut Document, source: &InstanceSnapshot, target: &InstanceSnapshot) {
    let Some((s, t)) = available(doc, "Statuses", &source.statuses, &target.statuses) else {
        return;
    };
    doc.heading(2, "Statuses");
    counts(doc, "statuses", s.len(), t.len());

    let category = |st: &Value| -> String {
        st.pointer("/statusCategory/name")
            .and_then(Value::as_str)
            .unwrap_or("N/A")
            .to_string()
    };
    let target_categories: HashMap<&str, String> =
        t.iter().map(|st| (field_str(st, "name"), category(st))).collect();

    let mut additions = Vec::new();
    let mut conflicts = Vec::new();
    let mut seen = HashSet::new();
    for status in s {
        let name = field_str(status, "name");
        if !seen.insert(name) {
            continue;
        }
        let cat = category(status);
        match target_categories.get(name) {
            None => additions.push(vec![name.to_string(), cat]),
            Some(target_cat) if *target_cat != cat => conflicts.push(vec![
                name.to_string(),
                cat,
                target_cat.clone(),
                "Change category or Merge".to_string(),
            ]),
            _ => {}
        }
    }

    doc.heading(3, "Statuses to be added");
    if additions.is_empty() {
        doc.paragraph("No statuses identified for addition.");
    } else {
        doc.table(&["Name", "Category"], additions);
    }
    doc.heading(3, "Statuses with identical names but different categories");
    if conflicts.is_empty() {
        doc.paragraph("No statuses with identical names found but differing categories.");
    } else {
        doc.table(
            &["Name", "Source Category", "Target Category", "Suggestion"],
            conflicts,
        );
    }
}

/// Name-conflict section; returns whether it could be rendered.
fn conflicts_section(
    doc: &mut Document,
    title: &str,
    source: &Fetched<Vec<Value>>,
    target: &Fetched<Vec<Value>>,
) -> bool {
    let Some((s, t)) = available(doc, title, source, target) else {
        return false;
    };
    doc.heading(2, title);
    counts(doc, &title.to_lowercase(), s.len(), t.len());

    let target_names: HashSet<&str> = t.iter().map(|r| field_str(r, "name")).collect();
    let conflicts = s
        .iter()
        .map(|r| field_str(r, "name"))
        .filter(|n| target_names.contains(n));

    doc.heading(3, "Conflicting names (present in both instances)");
    doc.bullets(
        conflicts,
        &format!("No conflicts identified for {}.", title.to_lowercase()),
    );
    true
}

fn notification_section(doc: &mut Document, source: &InstanceSnapshot, target: &InstanceSnapshot) {
    let Some((s, t)) = available(
        doc,
        "Notification Schemes",
        &source.scheme_projects,
        &target.scheme_projects,
    ) else {
        return;
    };

    let project_names: HashMap<String, String> = source
        .projects
        .as_ref()
        .map(|projects| {
            projects
                .iter()
                .filter_map(|p| Some((scalar_string(p.get("id"))?, field_str(p, "name").to_string())))
                .collect()
        })
        .unwrap_or_default();

    // Scheme order follows first appearance.
    let mut by_scheme: Vec<(String, Vec<String>)> = Vec::new();
    for (scheme, project_id) in s {
        let project = project_names
            .get(project_id)
            .cloned()
            .unwrap_or_else(|| "Unknown Project".to_string());
        match by_scheme.iter_mut().find(|(name, _)| name == scheme) {
            Some((_, projects)) => projects.push(project),
            None => by_scheme.push((scheme.clone(), vec![project])),
        }
    }
    let target_schemes: HashSet<&String> = t.iter().map(|(name, _)| name).collect();

    doc.heading(2, "Notification Schemes");
    counts(doc, "notification schemes", by_scheme.len(), target_schemes.len());
    doc.heading(3, "Notification Schemes and Associated Projects");
    if by_scheme.is_empty() {
        doc.paragraph("No notification schemes identified in the source instance.");
    } else {
        let rows = by_scheme
            .into_iter()
            .map(|(scheme, projects)| vec![scheme, projects.join(", ")])
            .collect();
        doc.table(&["Notification Scheme", "Project(s)"], rows);
    }
}

fn license_table(doc: &mut Document, heading: &str, roles: &[ApplicationRole]) {
    doc.heading(3, heading);
    if roles.is_empty() {
        doc.paragraph(format!("No licenses found in {}.", heading.to_lowercase()));
        return;
    }
    let rows = roles
        .iter()
        .map(|r| {
            vec![
                r.name.clone(),
                r.number_of_seats.to_string(),
                r.remaining_seats.to_string(),
                match &r.user_count_description {
                    Some(d) => format!("{} ({d})", r.user_count),
                    None => r.user_count.to_string(),
                },
                r.default_groups.join(", "),
                r.groups.join(", "),
            ]
        })
        .collect();
    doc.table(
        &[
            "Application",
            "Number of Seats",
            "Remaining Seats",
            "User Count",
            "Default Groups",
            "All Groups",
        ],
        rows,
    );
    doc.paragraph(format!(
        "Total number of seats: {}",
        roles.iter().map(|r| r.number_of_seats).sum::<i64>()
    ))
    .paragraph(format!(
        "Total remaining seats: {}",
        roles.iter().map(|r| r.remaining_seats).sum::<i64>()
    ))
    .paragraph(format!(
        "Total user count: {}",
        roles.iter().map(|r| r.user_count).sum::<i64>()
    ));
}

fn seats_of(roles: &[ApplicationRole], name: &str) -> i64 {
    roles
        .iter()
        .find(|r| r.name == name)
        .map(|r| r.number_of_seats)
        .unwrap_or_default()
}

fn licenses_section(doc: &mut Document, source: &InstanceSnapshot, target: &InstanceSnapshot) {
    let Some((s_roles, t_roles)) = available(
        doc,
        "Licenses",
        &source.application_roles,
        &target.application_roles,
    ) else {
        return;
    };
    doc.heading(2, "Licenses");
    license_table(doc, "Source Instance", s_roles);
    license_table(doc, "Target Instance", t_roles);

    let Some((s_users, t_users)) = available(
        doc,
        "Common Users and License Savings",
        &source.users_by_license,
        &target.users_by_license,
    ) else {
        return;
    };

    doc.heading(2, "Common Users and License Savings");
    let mut rows = Vec::new();
    for (license, users) in s_users {
        if let Some(target_users) = t_users.get(license) {
            for user in users.intersection(target_users) {
                rows.push(vec![license.clone(), user.clone(), "1 License".to_string()]);
            }
        }
    }
    if rows.is_empty() {
        doc.paragraph("No common users found that would save licenses.");
    } else {
        let savings = rows.len();
        doc.table(&["License Type", "User", "Savings"], rows)
            .paragraph(format!("Total Savings: {savings} licenses"));
    }

    doc.heading(2, "Domains to be Added");
    let domains = |by_license: &BTreeMap<String, BTreeSet<String>>| -> BTreeSet<String> {
        by_license
            .values()
            .flatten()
            .filter_map(|email| email.rsplit_once('@').map(|(_, d)| d.to_string()))
            .collect()
    };
    let target_domains = domains(t_users);
    let new_domains: Vec<String> = domains(s_users)
        .into_iter()
        .filter(|d| !target_domains.contains(d))
        .collect();
    doc.bullets(new_domains, "No new domains will be added.");

    doc.heading(2, "Remaining Seats After Transfer");
    let seat_row = |license: &str, source: usize, target: usize, unique: usize, seats: i64| {
        vec![
            license.to_string(),
            source.to_string(),
            target.to_string(),
            unique.to_string(),
            (seats - (unique + target) as i64).to_string(),
        ]
    };
    let mut rows = Vec::new();
    for (license, users) in s_users {
        rows.push(match t_users.get(license) {
            Some(target_users) => seat_row(
                license,
                users.len(),
                target_users.len(),
                users.difference(target_users).count(),
                seats_of(t_roles, license),
            ),
            None => seat_row(license, users.len(), 0, users.len(), seats_of(s_roles, license)),
        });
    }
    for (license, users) in t_users {
        if !s_users.contains_key(license) {
            rows.push(seat_row(license, 0, users.len(), 0, seats_of(t_roles, license)));
        }
    }
    doc.table(
        &[
            "License Type",
            "Total Users in Source",
            "Total Users in Target",
            "Unique Users from Source",
            "Remaining Seats After Transfer",
        ],
        rows,
    );
}

/// Fetch both instances and write the comparison report to `out`
/// (default `<output dir>/instance_analysis.md`).
#[instrument(skip_all, fields(run_id = %ctx.run_id))]
pub async fn analyze_instances(
    ctx: &MigrationContext,
    out: Option<&Path>,
    progress: &dyn ProgressReporter,
) -> Result<PathBuf> {
    progress.phase("Reading source instance");
    let source = InstanceSnapshot::fetch(&ctx.source, ctx.page_size).await;
    progress.phase("Reading target instance");
    let target = InstanceSnapshot::fetch(&ctx.target, ctx.page_size).await;

    progress.phase("Writing report");
    let path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.output_dir.join("instance_analysis.md"));
    build_report(&source, &target).write_to(&path)?;
    info!(path = %path.display(), "analysis report written");
    Ok(path)
}
