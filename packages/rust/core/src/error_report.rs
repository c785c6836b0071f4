//! Per-run error collection and the CSV error report.

use std::path::{Path, PathBuf};

use tracing::info;

use tenantmove_shared::{MigrationError, Result};

/// One object that could not be (fully) transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub name: String,
    pub message: String,
}

/// Accumulates `(object name, error)` pairs for the duration of one run.
#[derive(Debug, Clone)]
pub struct ErrorCollector {
    name_column: String,
    entries: Vec<ErrorEntry>,
}

impl ErrorCollector {
    /// `name_column` is the header of the first CSV column, e.g. `Dashboard Name`.
    pub fn new(name_column: impl Into<String>) -> Self {
        Self {
            name_column: name_column.into(),
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.entries.push(ErrorEntry {
            name: name.into(),
            message: message.into(),
        });
    }

    pub fn entries(&self) -> &[ErrorEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Write the collected errors to `path` as CSV.
    ///
    /// Nothing is written when no errors were recorded; `Ok(None)` is returned
    /// in that case. Parent directories are created as needed.
    pub fn write_csv(&self, path: &Path) -> Result<Option<PathBuf>> {
        if self.entries.is_empty() {
            return Ok(None);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MigrationError::io(parent, e))?;
        }

        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| MigrationError::Csv(format!("{}: {e}", path.display())))?;
        writer
            .write_record([self.name_column.as_str(), "Error"])
            .map_err(|e| MigrationError::Csv(e.to_string()))?;
        for entry in &self.entries {
            writer
                .write_record([entry.name.as_str(), entry.message.as_str()])
                .map_err(|e| MigrationError::Csv(e.to_string()))?;
        }
        writer.flush().map_err(|e| MigrationError::io(path, e))?;

        info!(path = %path.display(), errors = self.entries.len(), "wrote error report");
        Ok(Some(path.to_path_buf()))
    }
}
