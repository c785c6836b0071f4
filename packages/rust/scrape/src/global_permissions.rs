//! Global permissions admin page.
//!
//! The page is server-rendered: a `#global_perms` table whose body rows hold
//! the permission name (in a `<strong>`) and a list of granted groups.

use std::collections::HashSet;

use reqwest::Client;
use reqwest::header::{ACCEPT, COOKIE};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};

use tenantmove_shared::{HttpSettings, Instance, MigrationError, Result};

pub const GLOBAL_PERMISSIONS_PATH: &str = "/secure/admin/GlobalPermissions!default.jspa";

const USER_AGENT: &str = concat!("tenantmove/", env!("CARGO_PKG_VERSION"));

/// One global permission and the groups granted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalPermission {
    pub name: String,
    pub groups: Vec<String>,
}

/// Fetches admin pages with a browser session cookie instead of API credentials.
pub struct AdminPageClient {
    client: Client,
    instance: Instance,
}

impl AdminPageClient {
    pub fn new(instance: Instance, settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| MigrationError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, instance })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// GET an admin page and return its HTML.
    pub async fn fetch_page(&self, path: &str, cookie: &str) -> Result<String> {
        let url = format!(
            "{}{path}",
            self.instance.base_url.as_str().trim_end_matches('/')
        );
        debug!(%url, "fetching admin page");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/html")
            .header(COOKIE, cookie)
            .send()
            .await
            .map_err(|e| MigrationError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MigrationError::Network(format!("{url}: body read failed: {e}")))?;
        if !status.is_success() {
            return Err(MigrationError::Http {
                status: status.as_u16(),
                url,
                body: body.chars().take(200).collect(),
            });
        }
        Ok(body)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| MigrationError::Scrape(format!("bad selector {css:?}: {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Parse the permissions table.
///
/// Rows without exactly two cells, or without a `<strong>` name, are logged
/// and skipped. A page with no table at all usually means the session cookie
/// was rejected and the login page came back.
pub fn extract_permissions(html: &str) -> Result<Vec<GlobalPermission>> {
    let document = Html::parse_document(html);
    let table_sel = selector("table#global_perms")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;
    let name_sel = selector("strong")?;
    let group_sel = selector("li span")?;

    let table = document.select(&table_sel).next().ok_or_else(|| {
        MigrationError::Scrape(
            "no #global_perms table on the page; the session cookie may have expired".into(),
        )
    })?;

    let mut permissions = Vec::new();
    for row in table.select(&row_sel).skip(1) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
        if cells.len() != 2 {
            debug!(cells = cells.len(), "permission row without two cells skipped");
            continue;
        }
        let Some(name) = cells[0].select(&name_sel).next().map(text_of) else {
            warn!("permission row without a name; skipped");
            continue;
        };
        let groups = cells[1]
            .select(&group_sel)
            .map(text_of)
            .filter(|g| !g.is_empty())
            .collect();
        permissions.push(GlobalPermission { name, groups });
    }
    Ok(permissions)
}

/// Source grants the target lacks. A permission absent from the target keeps
/// its whole group list.
pub fn missing_permissions(
    source: &[GlobalPermission],
    target: &[GlobalPermission],
) -> Vec<GlobalPermission> {
    source
        .iter()
        .filter_map(|perm| {
            let groups: Vec<String> = match target.iter().find(|t| t.name == perm.name) {
                Some(existing) => {
                    let granted: HashSet<&String> = existing.groups.iter().collect();
                    perm.groups
                        .iter()
                        .filter(|g| !granted.contains(g))
                        .cloned()
                        .collect()
                }
                None => perm.groups.clone(),
            };
            let absent = !target.iter().any(|t| t.name == perm.name);
            (absent || !groups.is_empty()).then(|| GlobalPermission {
                name: perm.name.clone(),
                groups,
            })
        })
        .collect()
}

/// Fetch and parse the global permissions page of `client`'s instance.
#[instrument(skip_all, fields(host = client.instance().host()))]
pub async fn fetch_global_permissions(
    client: &AdminPageClient,
    cookie: &str,
) -> Result<Vec<GlobalPermission>> {
    let html = client.fetch_page(GLOBAL_PERMISSIONS_PATH, cookie).await?;
    let permissions = extract_permissions(&html)?;
    info!(permissions = permissions.len(), "global permissions extracted");
    Ok(permissions)
}
