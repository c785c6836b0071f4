//! The generic transfer runner: existence check, idempotent create, outcome
//! aggregation.
//!
//! Each artifact type implements [`ArtifactPipeline`]; [`run_transfer`] drives
//! it. Objects are processed strictly one after another, and every object ends
//! in exactly one of three states: created, skipped or failed.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{error, info, instrument, warn};

use tenantmove_shared::Result;

use crate::context::MigrationContext;
use crate::error_report::ErrorCollector;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why an object was not created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The target already has an object of the same kind and name.
    AlreadyExists,
    /// The pipeline never migrates this object (e.g. the system default dashboard).
    Excluded(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyExists => f.write_str("already exists in target"),
            SkipReason::Excluded(why) => write!(f, "excluded: {why}"),
        }
    }
}

/// Terminal state of one object's transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Created on the target. `warnings` lists follow-up steps that failed
    /// after the create succeeded (owner, gadgets, attachments); the object
    /// itself is not rolled back.
    Created {
        target_id: String,
        warnings: Vec<String>,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        reason: String,
    },
}

/// What a pipeline's `create` step reports on success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Created {
    pub target_id: String,
    pub warnings: Vec<String>,
}

impl Created {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            warnings: Vec::new(),
        }
    }

    /// Record a non-fatal follow-up failure.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// One object's name and outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReport {
    pub name: String,
    pub outcome: TransferOutcome,
}

/// Aggregate result of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct TransferSummary {
    /// Artifact kind, e.g. `dashboard`.
    pub kind: String,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Per-object outcomes in source order.
    pub reports: Vec<ObjectReport>,
    /// CSV error report written at the end of the run, if any errors occurred.
    pub error_report: Option<PathBuf>,
}

impl TransferSummary {
    fn push(&mut self, report: ObjectReport) {
        match report.outcome {
            TransferOutcome::Created { .. } => self.created += 1,
            TransferOutcome::Skipped { .. } => self.skipped += 1,
            TransferOutcome::Failed { .. } => self.failed += 1,
        }
        self.reports.push(report);
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }

    /// Outcome recorded for `name`, first match in source order.
    pub fn outcome_of(&self, name: &str) -> Option<&TransferOutcome> {
        self.reports
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.outcome)
    }
}

// ---------------------------------------------------------------------------
// Pipeline seam
// ---------------------------------------------------------------------------

/// One artifact type's fetch/create behaviour.
#[allow(async_fn_in_trait)]
pub trait ArtifactPipeline {
    /// The source-side object.
    type Item;

    /// Lowercase artifact kind used in logs and report names.
    fn kind(&self) -> &'static str;

    /// Every source object, in source order.
    async fn fetch_source(&self) -> Result<Vec<Self::Item>>;

    /// Display names of the objects that already exist on the target.
    async fn fetch_target_names(&self) -> Result<HashSet<String>>;

    /// Display name used for the existence check.
    fn item_name(&self, item: &Self::Item) -> String;

    /// `Some(reason)` when this object must never be migrated.
    fn exclusion(&self, _item: &Self::Item) -> Option<String> {
        None
    }

    /// Create the object on the target.
    async fn create(&self, item: &Self::Item) -> Result<Created>;
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting transfer status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each object reaches its terminal state.
    fn object_done(&self, report: &ObjectReport, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &TransferSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn object_done(&self, _report: &ObjectReport, _current: usize, _total: usize) {}
    fn done(&self, _summary: &TransferSummary) {}
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Transfer every source object of `pipeline` onto the target.
///
/// Target names are fetched once; names created during the run are added to
/// that set so a name repeated in the source is created only once. Fetch
/// failures of either collection are fatal. Per-object failures are recorded
/// in `collector` and the run continues.
#[instrument(skip_all, fields(kind = pipeline.kind()))]
pub async fn run_transfer<P: ArtifactPipeline>(
    pipeline: &P,
    collector: &mut ErrorCollector,
    progress: &dyn ProgressReporter,
) -> Result<TransferSummary> {
    let kind = pipeline.kind();

    progress.phase(&format!("Fetching source {kind}s"));
    let items = pipeline.fetch_source().await?;

    progress.phase(&format!("Fetching target {kind}s"));
    let mut known = pipeline.fetch_target_names().await?;
    info!(source = items.len(), target = known.len(), "collections loaded");

    progress.phase(&format!("Transferring {kind}s"));
    let mut summary = TransferSummary {
        kind: kind.to_string(),
        ..TransferSummary::default()
    };
    let total = items.len();

    for (index, item) in items.iter().enumerate() {
        let name = pipeline.item_name(item);
        let outcome = transfer_one(pipeline, item, &name, &mut known, collector).await;
        let report = ObjectReport { name, outcome };
        progress.object_done(&report, index + 1, total);
        summary.push(report);
    }

    info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        "transfer complete"
    );
    Ok(summary)
}

async fn transfer_one<P: ArtifactPipeline>(
    pipeline: &P,
    item: &P::Item,
    name: &str,
    known: &mut HashSet<String>,
    collector: &mut ErrorCollector,
) -> TransferOutcome {
    let kind = pipeline.kind();

    if let Some(why) = pipeline.exclusion(item) {
        info!(kind, name, reason = %why, "excluded, skipping");
        return TransferOutcome::Skipped {
            reason: SkipReason::Excluded(why),
        };
    }

    if known.contains(name) {
        info!(kind, name, "already exists in target, skipping");
        return TransferOutcome::Skipped {
            reason: SkipReason::AlreadyExists,
        };
    }

    match pipeline.create(item).await {
        Ok(created) => {
            known.insert(name.to_string());
            for warning in &created.warnings {
                warn!(kind, name, "{warning}");
                collector.record(name, warning.clone());
            }
            info!(kind, name, target_id = %created.target_id, "created");
            TransferOutcome::Created {
                target_id: created.target_id,
                warnings: created.warnings,
            }
        }
        Err(e) => {
            error!(kind, name, error = %e, "failed to create");
            collector.record(name, e.to_string());
            TransferOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

/// Run `pipeline` with a fresh [`ErrorCollector`] and write its CSV report
/// into the context's output directory.
///
/// The report is named `<kind>_transfer_errors.csv` with a `<Kind> Name`
/// column, and is only written when something failed.
pub async fn run_with_report<P: ArtifactPipeline>(
    pipeline: &P,
    ctx: &MigrationContext,
    progress: &dyn ProgressReporter,
) -> Result<TransferSummary> {
    let kind = pipeline.kind();
    let mut collector = ErrorCollector::new(format!("{} Name", title_case(kind)));

    let mut summary = run_transfer(pipeline, &mut collector, progress).await?;

    let report_path = ctx
        .output_dir
        .join(format!("{}_transfer_errors.csv", kind.replace(' ', "_")));
    summary.error_report = collector.write_csv(&report_path)?;

    progress.done(&summary);
    Ok(summary)
}

/// Title-case artifact kind for report headers (`dashboard` → `Dashboard`).
pub(crate) fn title_case(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tenantmove_shared::MigrationError;

    use super::*;

    /// In-memory pipeline: names in `source`, names in `target`, names whose
    /// create fails.
    struct FakePipeline {
        source: Vec<String>,
        target: Vec<String>,
        failing: Vec<String>,
        warn_on: Vec<String>,
        created: Mutex<Vec<String>>,
    }

    impl FakePipeline {
        fn new(source: &[&str], target: &[&str]) -> Self {
            Self {
                source: source.iter().map(|s| s.to_string()).collect(),
                target: target.iter().map(|s| s.to_string()).collect(),
                failing: Vec::new(),
                warn_on: Vec::new(),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    impl ArtifactPipeline for FakePipeline {
        type Item = String;

        fn kind(&self) -> &'static str {
            "filter"
        }

        async fn fetch_source(&self) -> Result<Vec<String>> {
            Ok(self.source.clone())
        }

        async fn fetch_target_names(&self) -> Result<HashSet<String>> {
            Ok(self.target.iter().cloned().collect())
        }

        fn item_name(&self, item: &String) -> String {
            item.clone()
        }

        fn exclusion(&self, item: &String) -> Option<String> {
            (item == "System").then(|| "system object".to_string())
        }

        async fn create(&self, item: &String) -> Result<Created> {
            if self.failing.contains(item) {
                return Err(MigrationError::Http {
                    status: 400,
                    url: "https://target.example/rest/api/3/filter".into(),
                    body: "bad jql".into(),
                });
            }
            let mut created = self.created.lock().unwrap();
            created.push(item.clone());
            let mut result = Created::new(format!("id-{}", created.len()));
            if self.warn_on.contains(item) {
                result.warn("owner reassignment failed");
            }
            Ok(result)
        }
    }

    #[tokio::test]
    async fn existing_names_are_skipped() {
        let pipeline = FakePipeline::new(&["Open Bugs", "My Issues"], &["My Issues"]);
        let mut collector = ErrorCollector::new("Filter Name");
        let summary = run_transfer(&pipeline, &mut collector, &SilentProgress)
            .await
            .unwrap();

        assert_eq!((summary.created, summary.skipped, summary.failed), (1, 1, 0));
        assert_eq!(*pipeline.created.lock().unwrap(), vec!["Open Bugs"]);
        assert_eq!(
            summary.outcome_of("My Issues"),
            Some(&TransferOutcome::Skipped {
                reason: SkipReason::AlreadyExists
            })
        );
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn failures_are_recorded_and_run_continues() {
        let mut pipeline = FakePipeline::new(&["A", "B", "C"], &[]);
        pipeline.failing.push("B".into());
        let mut collector = ErrorCollector::new("Filter Name");

        let summary = run_transfer(&pipeline, &mut collector, &SilentProgress)
            .await
            .unwrap();

        assert_eq!((summary.created, summary.failed), (2, 1));
        assert!(matches!(
            summary.outcome_of("B"),
            Some(TransferOutcome::Failed { reason }) if reason.contains("400")
        ));
        assert_eq!(collector.entries().len(), 1);
        assert_eq!(collector.entries()[0].name, "B");
    }

    #[tokio::test]
    async fn duplicate_source_names_create_once() {
        let pipeline = FakePipeline::new(&["Board", "Board"], &[]);
        let mut collector = ErrorCollector::new("Dashboard Name");
        let summary = run_transfer(&pipeline, &mut collector, &SilentProgress)
            .await
            .unwrap();

        assert_eq!((summary.created, summary.skipped), (1, 1));
        assert_eq!(pipeline.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn excluded_objects_are_skipped_with_reason() {
        let pipeline = FakePipeline::new(&["System", "Team"], &[]);
        let mut collector = ErrorCollector::new("Dashboard Name");
        let summary = run_transfer(&pipeline, &mut collector, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(
            summary.reports[0].outcome,
            TransferOutcome::Skipped {
                reason: SkipReason::Excluded("system object".into())
            }
        );
        assert_eq!(summary.created, 1);
    }

    #[tokio::test]
    async fn follow_up_warnings_reach_the_collector() {
        let mut pipeline = FakePipeline::new(&["Shared"], &[]);
        pipeline.warn_on.push("Shared".into());
        let mut collector = ErrorCollector::new("Filter Name");
        let summary = run_transfer(&pipeline, &mut collector, &SilentProgress)
            .await
            .unwrap();

        match &summary.reports[0].outcome {
            TransferOutcome::Created { warnings, .. } => assert_eq!(warnings.len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(collector.entries()[0].message, "owner reassignment failed");
    }

    #[tokio::test]
    async fn report_is_written_only_on_errors() {
        let ctx = crate::context::testing::context("http://127.0.0.1:9", "http://127.0.0.1:9");

        let clean = FakePipeline::new(&["A"], &[]);
        let summary = run_with_report(&clean, &ctx, &SilentProgress).await.unwrap();
        assert_eq!(summary.error_report, None);

        let mut failing = FakePipeline::new(&["A"], &[]);
        failing.failing.push("A".into());
        let summary = run_with_report(&failing, &ctx, &SilentProgress).await.unwrap();
        let path = summary.error_report.expect("report written");
        assert!(path.ends_with("filter_transfer_errors.csv"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Filter Name,Error"));
        std::fs::remove_dir_all(&ctx.output_dir).ok();
    }

    #[test]
    fn title_case_kind() {
        assert_eq!(title_case("dashboard"), "Dashboard");
        assert_eq!(title_case("notification scheme"), "Notification scheme");
        assert_eq!(title_case(""), "");
    }
}
