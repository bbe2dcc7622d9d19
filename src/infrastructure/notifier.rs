//! Report delivery: through the log, to a JSON file, or both.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::report::{AggregateReport, Notifier, ReportVerdict};

/// Writes the rendered summary through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, report: &AggregateReport) -> Result<()> {
        let verdict = report.verdict();
        let text = report.render_text();
        match verdict {
            ReportVerdict::Clean => info!(?verdict, "{text}"),
            ReportVerdict::Discrepancies | ReportVerdict::Incomplete => warn!(?verdict, "{text}"),
        }
        Ok(())
    }
}

/// Writes the report as pretty-printed JSON, replacing the previous file.
#[derive(Debug, Clone)]
pub struct JsonReportNotifier {
    path: PathBuf,
}

impl JsonReportNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Notifier for JsonReportNotifier {
    async fn send(&self, report: &AggregateReport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("writing report to {}", self.path.display()))?;
        info!(path = %self.path.display(), "Validation report written");
        Ok(())
    }
}

/// Sends to every inner notifier; one failing does not stop the others.
#[derive(Default, Clone)]
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn send(&self, report: &AggregateReport) -> Result<()> {
        let mut failures = Vec::new();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.send(report).await {
                failures.push(format!("{e:#}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("{} of {} notifiers failed: {}", failures.len(), self.notifiers.len(), failures.join("; "))
        }
    }
}
