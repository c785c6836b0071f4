//! Migration pipelines and reports for tenantmove.
//!
//! Every artifact pipeline follows the same shape: fetch the source
//! collection, skip names already present on the target, remap identities
//! against target reference tables, create, and record per-object outcomes
//! (see [`transfer::run_transfer`]). The analysis and permissions modules
//! produce Markdown reports instead of writing to the target.

pub mod analysis;
pub mod context;
pub mod dashboards;
pub mod document;
pub mod error_report;
pub mod filters;
pub mod notification;
pub mod permissions;
pub mod reference;
pub mod remap;
pub mod roles;
pub mod transfer;
pub mod wiki;

pub use analysis::{InstanceSnapshot, analyze_instances, build_report};
pub use context::MigrationContext;
pub use dashboards::migrate_dashboards;
pub use document::{Block, Document};
pub use error_report::{ErrorCollector, ErrorEntry};
pub use filters::migrate_filters;
pub use notification::migrate_notification_schemes;
pub use permissions::{AdminSide, global_permissions_report};
pub use reference::{ReferenceTable, TargetReferences};
pub use remap::{PermissionScope, RemapResult, remap_permissions};
pub use roles::{CleanupSummary, clean_migrated_roles};
pub use transfer::{
    ArtifactPipeline, ObjectReport, ProgressReporter, SilentProgress, SkipReason,
    TransferOutcome, TransferSummary, run_transfer,
};
pub use wiki::{SpacePair, SpaceRun, WikiMigration, migrate_wiki_pages, read_space_pairs};
