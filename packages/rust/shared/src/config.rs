//! Application configuration for tenantmove.
//!
//! User config lives at `~/.tenantmove/tenantmove.toml` (or wherever
//! `--config` points). API tokens and session cookies are never stored in the
//! file; the file names the environment variables that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{MigrationError, Result};
use crate::types::{Instance, Side};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tenantmove.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tenantmove";

// ---------------------------------------------------------------------------
// Config structs (matching tenantmove.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Instance artifacts are read from.
    #[serde(default = "default_source")]
    pub source: InstanceConfig,

    /// Instance artifacts are written to.
    #[serde(default = "default_target")]
    pub target: InstanceConfig,

    /// HTTP client behaviour.
    #[serde(default)]
    pub http: HttpConfig,

    /// Where error reports and generated documents go.
    #[serde(default)]
    pub output: OutputConfig,

    /// Browser session cookies for admin pages with no REST API.
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            target: default_target(),
            http: HttpConfig::default(),
            output: OutputConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// `[source]` / `[target]` sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Site root URL.
    pub base_url: String,

    /// Account email used for Basic auth.
    #[serde(default)]
    pub email: String,

    /// Name of the env var holding the API token.
    pub token_env: String,
}

fn default_source() -> InstanceConfig {
    InstanceConfig {
        base_url: "https://source.atlassian.net".into(),
        email: String::new(),
        token_env: "TENANTMOVE_SOURCE_TOKEN".into(),
    }
}

fn default_target() -> InstanceConfig {
    InstanceConfig {
        base_url: "https://target.atlassian.net".into(),
        email: String::new(),
        token_env: "TENANTMOVE_TARGET_TOKEN".into(),
    }
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts for idempotent requests (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry; doubles on every further retry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Records requested per page from paginated endpoints.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            page_size: default_page_size(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_page_size() -> u32 {
    50
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for CSV error reports and generated documents.
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    ".".into()
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Env var holding the source instance's browser `Cookie` header.
    #[serde(default = "default_source_cookie_env")]
    pub source_cookie_env: String,

    /// Env var holding the target instance's browser `Cookie` header.
    #[serde(default = "default_target_cookie_env")]
    pub target_cookie_env: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source_cookie_env: default_source_cookie_env(),
            target_cookie_env: default_target_cookie_env(),
        }
    }
}

fn default_source_cookie_env() -> String {
    "TENANTMOVE_SOURCE_COOKIE".into()
}
fn default_target_cookie_env() -> String {
    "TENANTMOVE_TARGET_COOKIE".into()
}

// ---------------------------------------------------------------------------
// Runtime settings (resolved from config)
// ---------------------------------------------------------------------------

/// Runtime HTTP settings handed to every API client.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub page_size: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for HttpSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.http.timeout_secs),
            max_attempts: config.http.max_attempts.max(1),
            backoff: Duration::from_millis(config.http.backoff_ms),
            page_size: config.http.page_size.max(1),
        }
    }
}

impl AppConfig {
    /// Config section for one side of the migration.
    pub fn instance_config(&self, side: Side) -> &InstanceConfig {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }

    /// Name of the env var holding the session cookie for `side`.
    pub fn cookie_env(&self, side: Side) -> &str {
        match side {
            Side::Source => &self.session.source_cookie_env,
            Side::Target => &self.session.target_cookie_env,
        }
    }

    /// Resolve `side` into an [`Instance`], reading the token from the process environment.
    pub fn resolve_instance(&self, side: Side) -> Result<Instance> {
        self.resolve_instance_with(side, |name| std::env::var(name).ok())
    }

    /// Resolve `side` into an [`Instance`] using `lookup` to read env vars.
    pub fn resolve_instance_with(
        &self,
        side: Side,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Instance> {
        let section = self.instance_config(side);

        let base_url = Url::parse(section.base_url.trim_end_matches('/')).map_err(|e| {
            MigrationError::config(format!(
                "[{side}] base_url '{}' is not a valid URL: {e}",
                section.base_url
            ))
        })?;

        if section.email.trim().is_empty() {
            return Err(MigrationError::config(format!("[{side}] email is not set")));
        }

        let var_name = &section.token_env;
        let token = match lookup(var_name) {
            Some(val) if !val.is_empty() => val,
            _ => {
                return Err(MigrationError::config(format!(
                    "API token for the {side} instance not found. Set the {var_name} environment variable."
                )));
            }
        };

        Ok(Instance {
            base_url,
            email: section.email.trim().to_string(),
            token,
        })
    }

    /// Directory where reports are written.
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output.dir)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tenantmove/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| MigrationError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tenantmove/tenantmove.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| MigrationError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        MigrationError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| MigrationError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Err(MigrationError::config(format!(
            "{} already exists; edit it instead",
            path.display()
        )));
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| MigrationError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| MigrationError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
