//! Core domain types shared by every tenantmove crate.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 identifying one migration run (time-sortable, used in spans and reports).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Side / Instance
// ---------------------------------------------------------------------------

/// Which end of the migration an instance sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Target => f.write_str("target"),
        }
    }
}

/// A resolved, ready-to-use hosted instance: base URL plus Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Instance {
    /// Site root, e.g. `https://acme.atlassian.net`.
    pub base_url: Url,
    /// Account email used as the Basic-auth user.
    pub email: String,
    /// API token used as the Basic-auth password.
    pub token: String,
}

impl Instance {
    /// Host part of the base URL, for log lines and report headings.
    pub fn host(&self) -> &str {
        self.base_url.host_str().unwrap_or("unknown")
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("base_url", &self.base_url.as_str())
            .field("email", &self.email)
            .field("token", &"<redacted>")
            .finish()
    }
}
