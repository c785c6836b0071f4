//! Global permissions comparison, read from the admin pages of both instances.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use tenantmove_scrape::{
    AdminPageClient, GlobalPermission, SessionProvider, fetch_global_permissions,
    missing_permissions,
};
use tenantmove_shared::Result;

use crate::document::Document;
use crate::transfer::ProgressReporter;

/// One instance's admin page client plus where its session cookie comes from.
pub struct AdminSide<'a> {
    pub client: &'a AdminPageClient,
    pub session: &'a dyn SessionProvider,
}

impl AdminSide<'_> {
    async fn permissions(&self) -> Result<Vec<GlobalPermission>> {
        let cookie = self.session.session_cookie(self.client.instance())?;
        fetch_global_permissions(self.client, &cookie).await
    }
}

pub fn missing_permissions_document(missing: &[GlobalPermission]) -> Document {
    let mut doc = Document::new("Missing Permissions in Target Instance");
    if missing.is_empty() {
        doc.paragraph("The target instance already grants every source global permission.");
    }
    for permission in missing {
        doc.heading(2, &permission.name);
        if permission.groups.is_empty() {
            doc.bullet("No groups assigned");
        } else {
            for group in &permission.groups {
                doc.bullet(group);
            }
        }
    }
    doc
}

/// Scrape both instances and write the missing-permissions report to `out`.
#[instrument(skip_all, fields(out = %out.display()))]
pub async fn global_permissions_report(
    source: AdminSide<'_>,
    target: AdminSide<'_>,
    out: &Path,
    progress: &dyn ProgressReporter,
) -> Result<PathBuf> {
    progress.phase("Reading source global permissions");
    let source_permissions = source.permissions().await?;
    progress.phase("Reading target global permissions");
    let target_permissions = target.permissions().await?;

    let missing = missing_permissions(&source_permissions, &target_permissions);
    info!(
        source = source_permissions.len(),
        target = target_permissions.len(),
        missing = missing.len(),
        "global permissions compared"
    );
    missing_permissions_document(&missing).write_to(out)?;
    Ok(out.to_path_buf())
}
