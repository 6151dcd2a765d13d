use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Append-only text file with one line per captured confirmation dialog.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `Linha <line>: <text>`.
    pub fn append(&self, line: usize, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open activity log {:?}", self.path))?;
        writeln!(file, "Linha {}: {}", line, text)
            .with_context(|| format!("Failed to write activity log {:?}", self.path))?;
        Ok(())
    }
}
