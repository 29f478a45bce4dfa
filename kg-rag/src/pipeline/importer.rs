//! GraphML import, clear, and export.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::driver::{ExportSummary, GraphDriver, ImportSummary};
use crate::errors::{KgRagError, Result};
use crate::graphml;
use crate::utils::with_timeout;

/// What to import and how.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    /// File reference as the store sees it (relative to its import directory).
    pub file_path: String,
    /// Where the same file lives on this machine, when that differs from
    /// `file_path` (e.g. a host directory mounted into the store's container).
    pub local_path: Option<PathBuf>,
    /// Delete everything in the store before importing.
    pub clear_db: bool,
}

impl ImportRequest {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    fn local_candidate(&self) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.file_path))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    #[serde(flatten)]
    pub summary: ImportSummary,
    /// Nodes deleted beforehand, when the store was cleared.
    pub cleared: Option<u64>,
    /// Whether the file was found and validated locally before import.
    pub validated_locally: bool,
}

pub struct Importer<D> {
    driver: Arc<D>,
    call_timeout: Duration,
}

impl<D: GraphDriver> Importer<D> {
    pub fn new(driver: Arc<D>, call_timeout: Duration) -> Self {
        Self {
            driver,
            call_timeout,
        }
    }

    pub async fn import(&self, request: &ImportRequest) -> Result<ImportReport> {
        if request.file_path.trim().is_empty() {
            return Err(KgRagError::Import("file path is empty".to_string()));
        }

        let validated_locally = self.preflight(request).await?;

        let cleared = if request.clear_db {
            Some(self.clear().await?)
        } else {
            None
        };

        info!(file = %request.file_path, "Importing GraphML file");
        let summary = with_timeout(
            "GraphML import",
            self.call_timeout,
            self.driver.import_graphml(&request.file_path),
        )
        .await?;

        Ok(ImportReport {
            summary,
            cleared,
            validated_locally,
        })
    }

    /// Delete every node and relationship; returns the number of deleted nodes.
    pub async fn clear(&self) -> Result<u64> {
        info!("Clearing database");
        let deleted = with_timeout("clear database", self.call_timeout, self.driver.clear()).await?;
        info!(deleted, "Database cleared");
        Ok(deleted)
    }

    pub async fn export(&self, file_path: &str) -> Result<ExportSummary> {
        if file_path.trim().is_empty() {
            return Err(KgRagError::Import("file path is empty".to_string()));
        }
        with_timeout(
            "GraphML export",
            self.call_timeout,
            self.driver.export_graphml(file_path),
        )
        .await
    }

    /// Parse the local copy of the file, if there is one.
    ///
    /// The store may see files this machine cannot (a container's import
    /// directory), so a missing local file only warns.
    async fn preflight(&self, request: &ImportRequest) -> Result<bool> {
        let local = request.local_candidate();
        if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
            warn!(
                path = %local.display(),
                "File does not exist locally; proceeding, it may exist in the store's import directory"
            );
            return Ok(false);
        }

        let doc = graphml::parse_file(&local).await?;
        info!(
            path = %local.display(),
            nodes = doc.nodes.len(),
            edges = doc.edges.len(),
            "Local GraphML validated"
        );
        Ok(true)
    }
}
