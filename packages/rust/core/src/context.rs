//! Per-run migration context: both API clients plus run-wide settings.

use std::path::PathBuf;

use tenantmove_client::ApiClient;
use tenantmove_shared::{AppConfig, HttpSettings, Result, RunId, Side};

/// Everything a pipeline needs for one run, passed explicitly.
#[derive(Clone)]
pub struct MigrationContext {
    /// Identifies this run in logs and reports.
    pub run_id: RunId,
    /// Client for the instance artifacts are read from.
    pub source: ApiClient,
    /// Client for the instance artifacts are written to.
    pub target: ApiClient,
    /// Records requested per page.
    pub page_size: u32,
    /// Directory for error reports and generated documents.
    pub output_dir: PathBuf,
}

impl MigrationContext {
    /// Build a context from loaded configuration, resolving both instances.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = HttpSettings::from(config);
        let source = ApiClient::new(config.resolve_instance(Side::Source)?, &settings)?;
        let target = ApiClient::new(config.resolve_instance(Side::Target)?, &settings)?;

        Ok(Self::new(source, target, settings.page_size, config.output_dir()))
    }

    /// Build a context from ready clients.
    pub fn new(source: ApiClient, target: ApiClient, page_size: u32, output_dir: PathBuf) -> Self {
        Self {
            run_id: RunId::new(),
            source,
            target,
            page_size: page_size.max(1),
            output_dir,
        }
    }

    /// The client for `side`.
    pub fn client(&self, side: Side) -> &ApiClient {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }
}
