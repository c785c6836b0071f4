//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tenantmove_core::{
    AdminSide, CleanupSummary, MigrationContext, ObjectReport, ProgressReporter, TransferOutcome,
    TransferSummary, WikiMigration, analyze_instances, clean_migrated_roles,
    global_permissions_report, migrate_dashboards, migrate_filters, migrate_notification_schemes,
    migrate_wiki_pages,
};
use tenantmove_scrape::{AdminPageClient, InteractiveSession, SessionProvider, StoredCookieSession};
use tenantmove_shared::{AppConfig, HttpSettings, Side, init_config, load_config, load_config_from};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// tenantmove: move issue-tracker and wiki configuration between instances.
#[derive(Parser)]
#[command(
    name = "tenantmove",
    version,
    about = "Migrate dashboards, filters, notification schemes and wiki pages between two hosted instances.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.tenantmove/tenantmove.toml).
    #[arg(long, global = true, env = "TENANTMOVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Copy dashboards (with gadgets) that the target does not have yet.
    Dashboards,

    /// Copy filters that the target does not have yet, keeping their owners.
    Filters,

    /// Copy notification schemes.
    NotificationSchemes {
        /// Source scheme id (repeatable). Every scheme when omitted.
        #[arg(long = "id")]
        ids: Vec<String>,
    },

    /// Copy wiki pages between the space pairs listed in a CSV file.
    WikiPages {
        /// CSV with SOURCE and TARGET space key columns.
        #[arg(long)]
        spaces: PathBuf,
    },

    /// Fold "(migrated)" duplicate project roles back into their originals on the target.
    CleanRoles {
        /// Project key to clean (repeatable). Every project when omitted.
        #[arg(long = "project")]
        projects: Vec<String>,

        /// Permission scheme id to clean (repeatable). Every scheme when omitted.
        #[arg(long = "scheme")]
        schemes: Vec<String>,
    },

    /// Compare source and target and write a Markdown analysis report.
    Analyze {
        /// Report path (defaults to <output dir>/instance_analysis.md).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Compare global permissions scraped from both admin pages.
    GlobalPermissions {
        /// Report path (defaults to <output dir>/global_permissions.md).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Prompt for session cookies instead of reading them from the environment.
        #[arg(long)]
        interactive: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "tenantmove=info",
        1 => "tenantmove=debug",
        _ => "tenantmove=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Dashboards => {
            let ctx = context(config_path)?;
            let summary = migrate_dashboards(&ctx, &CliProgress::new()).await?;
            print_summary(&summary);
        }
        Command::Filters => {
            let ctx = context(config_path)?;
            let summary = migrate_filters(&ctx, &CliProgress::new()).await?;
            print_summary(&summary);
        }
        Command::NotificationSchemes { ids } => {
            let ctx = context(config_path)?;
            let summary = migrate_notification_schemes(&ctx, ids, &CliProgress::new()).await?;
            print_summary(&summary);
        }
        Command::WikiPages { spaces } => {
            let ctx = context(config_path)?;
            let migration = migrate_wiki_pages(&ctx, &spaces, &CliProgress::new()).await?;
            print_wiki(&migration);
        }
        Command::CleanRoles { projects, schemes } => {
            let ctx = context(config_path)?;
            let summary = clean_migrated_roles(&ctx.target, &projects, &schemes, ctx.page_size).await?;
            print_cleanup(&summary);
        }
        Command::Analyze { out } => {
            let ctx = context(config_path)?;
            let path = analyze_instances(&ctx, out.as_deref(), &CliProgress::new()).await?;
            println!("Analysis written to {}", path.display());
        }
        Command::GlobalPermissions { out, interactive } => {
            cmd_global_permissions(config_path, out, interactive).await?;
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init()?,
            ConfigAction::Show => cmd_config_show(config_path)?,
        },
    }
    Ok(())
}

fn config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn context(path: Option<&Path>) -> Result<MigrationContext> {
    let config = config(path)?;
    let ctx = MigrationContext::from_config(&config)?;
    info!(
        run_id = %ctx.run_id,
        source = ctx.source.instance().host(),
        target = ctx.target.instance().host(),
        "starting run"
    );
    Ok(ctx)
}

async fn cmd_global_permissions(
    config_path: Option<&Path>,
    out: Option<PathBuf>,
    interactive: bool,
) -> Result<()> {
    let config = config(config_path)?;
    let settings = HttpSettings::from(&config);
    let source = AdminPageClient::new(config.resolve_instance(Side::Source)?, &settings)?;
    let target = AdminPageClient::new(config.resolve_instance(Side::Target)?, &settings)?;

    let (source_session, target_session): (Box<dyn SessionProvider>, Box<dyn SessionProvider>) =
        if interactive {
            (Box::new(InteractiveSession), Box::new(InteractiveSession))
        } else {
            (
                Box::new(StoredCookieSession::from_env(config.cookie_env(Side::Source))),
                Box::new(StoredCookieSession::from_env(config.cookie_env(Side::Target))),
            )
        };

    let out = out.unwrap_or_else(|| config.output_dir().join("global_permissions.md"));
    let path = global_permissions_report(
        AdminSide {
            client: &source,
            session: source_session.as_ref(),
        },
        AdminSide {
            client: &target,
            session: target_session.as_ref(),
        },
        &out,
        &CliProgress::new(),
    )
    .await?;
    println!("Global permissions report written to {}", path.display());
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_summary(summary: &TransferSummary) {
    println!();
    println!("  {} transfer finished", summary.kind);
    println!("  Created: {}", summary.created);
    println!("  Skipped: {}", summary.skipped);
    println!("  Failed:  {}", summary.failed);
    let with_warnings = summary
        .reports
        .iter()
        .filter(|r| matches!(&r.outcome, TransferOutcome::Created { warnings, .. } if !warnings.is_empty()))
        .count();
    if with_warnings > 0 {
        println!("  Created with warnings: {with_warnings}");
    }
    if let Some(path) = &summary.error_report {
        println!("  Errors:  {}", path.display());
    }
    println!();
}

fn print_wiki(migration: &WikiMigration) {
    for run in &migration.spaces {
        match &run.summary {
            Ok(summary) => print_summary(summary),
            Err(e) => println!("  Space {} → {} not migrated: {e}", run.pair.source, run.pair.target),
        }
    }
    if let Some(path) = &migration.error_report {
        println!("  Errors:  {}", path.display());
    }
}

fn print_cleanup(summary: &CleanupSummary) {
    println!();
    println!("  Permission schemes checked: {}", summary.schemes_checked);
    println!("  Grants added:               {}", summary.grants_added);
    println!("  Projects checked:           {}", summary.projects_checked);
    println!("  Role actors added:          {}", summary.actors_added);
    for failure in &summary.failures {
        println!("  Failed: {failure}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter: a spinner per phase that turns into a bar once
/// the object count is known.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn object_done(&self, report: &ObjectReport, current: usize, total: usize) {
        if self.bar.length() != Some(total as u64) {
            self.bar.set_length(total as u64);
            self.bar.set_style(
                ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
        }
        self.bar.set_position(current as u64);
        let state = match &report.outcome {
            TransferOutcome::Created { .. } => "created",
            TransferOutcome::Skipped { .. } => "skipped",
            TransferOutcome::Failed { .. } => "failed",
        };
        self.bar.set_message(format!("{} ({state})", report.name));
    }

    fn done(&self, _summary: &TransferSummary) {
        self.bar.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeatable_ids() {
        let cli = Cli::try_parse_from([
            "tenantmove",
            "notification-schemes",
            "--id",
            "10100",
            "--id",
            "10200",
        ])
        .unwrap();
        match cli.command {
            Command::NotificationSchemes { ids } => assert_eq!(ids, ["10100", "10200"]),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tenantmove",
            "clean-roles",
            "--project",
            "OPS",
            "-vv",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(
            cli.command,
            Command::CleanRoles { ref projects, ref schemes } if projects == &["OPS"] && schemes.is_empty()
        ));
    }

    #[test]
    fn wiki_pages_requires_spaces() {
        assert!(Cli::try_parse_from(["tenantmove", "wiki-pages"]).is_err());
    }
}
