//! Wiki page migration between spaces, driven by a `SOURCE`/`TARGET` CSV.
//!
//! Every migrated page lands under a "Migrated Pages" root page in the target
//! space. The source hierarchy is kept: a page is created under the target
//! copy of its nearest ancestor, falling back to the root page.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument};

use tenantmove_client::{ApiClient, PageSpec, fetch_all};
use tenantmove_shared::{MigrationError, Result};

use crate::context::MigrationContext;
use crate::error_report::ErrorCollector;
use crate::reference::{deserialize_id, scalar_string};
use crate::transfer::{ArtifactPipeline, Created, ProgressReporter, TransferSummary, run_transfer};

const CONTENT_PATH: &str = "/wiki/rest/api/content";
const PAGE_EXPAND: &str = "body.storage,ancestors,extensions.position";

/// Title of the page every migrated page is nested under.
pub const ROOT_PAGE_TITLE: &str = "Migrated Pages";
const ROOT_PAGE_BODY: &str = "<p>This is the root page for all content that was migrated</p>";

// ---------------------------------------------------------------------------
// Space pairs
// ---------------------------------------------------------------------------

/// One `SOURCE` → `TARGET` space mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacePair {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Deserialize)]
struct SpaceRow {
    #[serde(rename = "SOURCE", default)]
    source: Option<String>,
    #[serde(rename = "TARGET", default)]
    target: Option<String>,
}

/// Read space pairs from a CSV file with `SOURCE` and `TARGET` columns.
///
/// Rows where either value is missing or blank are skipped.
pub fn read_space_pairs(path: &Path) -> Result<Vec<SpacePair>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| MigrationError::Csv(format!("{}: {e}", path.display())))?;

    let mut pairs = Vec::new();
    for (line, row) in reader.deserialize::<SpaceRow>().enumerate() {
        let row = row.map_err(|e| MigrationError::Csv(format!("{}: {e}", path.display())))?;
        let source = row.source.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let target = row.target.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        match (source, target) {
            (Some(source), Some(target)) => pairs.push(SpacePair { source, target }),
            _ => debug!(line = line + 2, "space row without SOURCE/TARGET, skipping"),
        }
    }
    Ok(pairs)
}

// ---------------------------------------------------------------------------
// Page model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourcePage {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    body: Option<PageBody>,
    #[serde(default)]
    ancestors: Vec<Ancestor>,
    #[serde(default)]
    extensions: Option<Extensions>,
}

#[derive(Debug, Clone, Deserialize)]
struct PageBody {
    #[serde(default)]
    storage: Option<Storage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Storage {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Ancestor {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Extensions {
    #[serde(default)]
    position: Option<Value>,
}

impl SourcePage {
    /// Storage-format body, empty when the listing did not include it.
    pub fn storage_html(&self) -> &str {
        self.body
            .as_ref()
            .and_then(|b| b.storage.as_ref())
            .map(|s| s.value.as_str())
            .unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    /// Sibling position; pages without one sort first.
    pub fn position(&self) -> i64 {
        match self.extensions.as_ref().and_then(|e| e.position.as_ref()) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Parents before children, siblings by position. Stable for equal keys.
pub fn order_pages(pages: &mut [SourcePage]) {
    pages.sort_by_key(|p| (p.depth(), p.position()));
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Copies the pages of one source space into one target space.
pub struct WikiPagePipeline<'a> {
    ctx: &'a MigrationContext,
    pair: SpacePair,
    root_id: String,
    /// Source page id → target page id, for pages created in this run.
    migrated: RefCell<HashMap<String, String>>,
    /// Target page title → target page id, for pages already in the target space.
    existing: RefCell<HashMap<String, String>>,
}

impl<'a> WikiPagePipeline<'a> {
    /// Find or create the root page in the target space.
    pub async fn prepare(ctx: &'a MigrationContext, pair: SpacePair) -> Result<Self> {
        let root_id = ensure_root_page(&ctx.target, &pair.target).await?;
        Ok(Self {
            ctx,
            pair,
            root_id,
            migrated: RefCell::new(HashMap::new()),
            existing: RefCell::new(HashMap::new()),
        })
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Target id of the page's nearest ancestor that exists on the target,
    /// or the root page.
    fn parent_for(&self, page: &SourcePage) -> String {
        let migrated = self.migrated.borrow();
        let existing = self.existing.borrow();
        page.ancestors
            .iter()
            .rev()
            .find_map(|a| {
                migrated.get(&a.id).cloned().or_else(|| {
                    a.title
                        .as_ref()
                        .and_then(|t| existing.get(t))
                        .filter(|id| **id != self.root_id)
                        .cloned()
                })
            })
            .unwrap_or_else(|| self.root_id.clone())
    }

    /// Copy every attachment of `source_id` to `target_id`.
    async fn copy_attachments(&self, source_id: &str, target_id: &str, created: &mut Created) {
        let spec = PageSpec::wiki(format!("{CONTENT_PATH}/{source_id}/child/attachment"), "/results");
        let attachments = match fetch_all(&self.ctx.source, &spec, self.ctx.page_size).await {
            Ok(list) => list,
            Err(e) => {
                created.warn(format!("could not list attachments: {e}"));
                return;
            }
        };

        for attachment in &attachments {
            let title = attachment
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("attachment");
            if let Err(e) = self.copy_attachment(attachment, title, target_id).await {
                created.warn(format!("attachment '{title}' not copied: {e}"));
            }
        }
    }

    async fn copy_attachment(&self, attachment: &Value, title: &str, target_id: &str) -> Result<()> {
        let download = attachment
            .pointer("/_links/download")
            .and_then(Value::as_str)
            .ok_or_else(|| MigrationError::parse("attachment has no download link"))?;
        let bytes = self.ctx.source.get_bytes(&format!("/wiki{download}")).await?;
        self.ctx
            .target
            .post_multipart_file(
                &format!("{CONTENT_PATH}/{target_id}/child/attachment"),
                title,
                bytes,
            )
            .await?;
        debug!(title, target_id, "attachment uploaded");
        Ok(())
    }
}

impl ArtifactPipeline for WikiPagePipeline<'_> {
    type Item = SourcePage;

    fn kind(&self) -> &'static str {
        "page"
    }

    async fn fetch_source(&self) -> Result<Vec<SourcePage>> {
        let spec = PageSpec::wiki(space_pages_path(&self.pair.source), "/results")
            .with_query("expand", PAGE_EXPAND);
        let mut pages = fetch_all(&self.ctx.source, &spec, self.ctx.page_size)
            .await?
            .into_iter()
            .map(|raw| {
                serde_json::from_value(raw)
                    .map_err(|e| MigrationError::parse(format!("wiki page record: {e}")))
            })
            .collect::<Result<Vec<SourcePage>>>()?;
        order_pages(&mut pages);
        info!(space = %self.pair.source, pages = pages.len(), "source pages loaded");
        Ok(pages)
    }

    async fn fetch_target_names(&self) -> Result<HashSet<String>> {
        let spec = PageSpec::wiki(space_pages_path(&self.pair.target), "/results");
        let pages = fetch_all(&self.ctx.target, &spec, self.ctx.page_size).await?;

        let mut existing = self.existing.borrow_mut();
        for page in &pages {
            if let (Some(title), Some(id)) = (
                page.get("title").and_then(Value::as_str),
                scalar_string(page.get("id")),
            ) {
                existing.entry(title.to_string()).or_insert(id);
            }
        }
        Ok(existing.keys().cloned().collect())
    }

    fn item_name(&self, item: &SourcePage) -> String {
        item.title.clone()
    }

    async fn create(&self, item: &SourcePage) -> Result<Created> {
        let parent_id = self.parent_for(item);
        let body = json!({
            "type": "page",
            "title": item.title,
            "space": {"key": self.pair.target},
            "ancestors": [{"id": parent_id}],
            "body": {"storage": {"value": item.storage_html(), "representation": "storage"}},
        });
        let response = self.ctx.target.post_json(CONTENT_PATH, &body).await?;
        let target_id = scalar_string(response.get("id"))
            .ok_or_else(|| MigrationError::parse("page create response has no id"))?;
        self.migrated
            .borrow_mut()
            .insert(item.id.clone(), target_id.clone());

        let mut created = Created::new(target_id.clone());
        self.copy_attachments(&item.id, &target_id, &mut created).await;
        Ok(created)
    }
}

fn space_pages_path(space_key: &str) -> String {
    format!("/wiki/rest/api/space/{space_key}/content/page")
}

/// Id of the root page in `space_key`, creating it when absent.
#[instrument(skip(client))]
pub async fn ensure_root_page(client: &ApiClient, space_key: &str) -> Result<String> {
    let found = client
        .get_json(
            CONTENT_PATH,
            &[
                ("spaceKey", space_key.to_string()),
                ("title", ROOT_PAGE_TITLE.to_string()),
                ("type", "page".to_string()),
            ],
        )
        .await?;
    if let Some(id) = found
        .pointer("/results/0")
        .and_then(|page| scalar_string(page.get("id")))
    {
        info!(page_id = %id, "reusing existing root page");
        return Ok(id);
    }

    let body = json!({
        "type": "page",
        "title": ROOT_PAGE_TITLE,
        "space": {"key": space_key},
        "body": {"storage": {"value": ROOT_PAGE_BODY, "representation": "storage"}},
    });
    let response = client.post_json(CONTENT_PATH, &body).await?;
    let id = scalar_string(response.get("id"))
        .ok_or_else(|| MigrationError::parse("root page create response has no id"))?;
    info!(page_id = %id, "created root page");
    Ok(id)
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Result of one space pair.
#[derive(Debug)]
pub struct SpaceRun {
    pub pair: SpacePair,
    /// `Err` when the space could not be processed at all.
    pub summary: std::result::Result<TransferSummary, String>,
}

/// Result of a whole wiki migration.
#[derive(Debug, Default)]
pub struct WikiMigration {
    pub spaces: Vec<SpaceRun>,
    pub error_report: Option<PathBuf>,
}

/// Migrate every space pair listed in `spaces_csv`.
///
/// A space that cannot be processed (root page, listing) is recorded in the
/// error report under its key and the remaining pairs still run. Errors go to
/// `page_transfer_errors.csv`.
#[instrument(skip_all, fields(run_id = %ctx.run_id, spaces = %spaces_csv.display()))]
pub async fn migrate_wiki_pages(
    ctx: &MigrationContext,
    spaces_csv: &Path,
    progress: &dyn ProgressReporter,
) -> Result<WikiMigration> {
    let pairs = read_space_pairs(spaces_csv)?;
    if pairs.is_empty() {
        return Err(MigrationError::validation(format!(
            "{}: no SOURCE/TARGET space pairs",
            spaces_csv.display()
        )));
    }

    let mut collector = ErrorCollector::new("Page Name");
    let mut result = WikiMigration::default();

    for pair in pairs {
        progress.phase(&format!("Space {} → {}", pair.source, pair.target));
        info!(source = %pair.source, target = %pair.target, "processing space");

        let summary = match WikiPagePipeline::prepare(ctx, pair.clone()).await {
            Ok(pipeline) => run_transfer(&pipeline, &mut collector, progress).await,
            Err(e) => Err(e),
        };
        let summary = match summary {
            Ok(summary) => {
                progress.done(&summary);
                Ok(summary)
            }
            Err(e) => {
                error!(source = %pair.source, error = %e, "space not migrated");
                collector.record(format!("space {}", pair.source), e.to_string());
                Err(e.to_string())
            }
        };
        result.spaces.push(SpaceRun { pair, summary });
    }

    result.error_report = collector.write_csv(&ctx.output_dir.join("page_transfer_errors.csv"))?;
    Ok(result)
}
