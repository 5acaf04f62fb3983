use log::warn;
use tokio::sync::mpsc;

use crate::core::report::Report;
use crate::core::warnings::Warnings;
use crate::repository::Project;

/// What one scan task sends back: always a report, plus the failure that
/// turned it into a placeholder.
#[derive(Debug)]
pub struct ProjectOutcome {
    pub report: Report,
    pub warning: Option<anyhow::Error>,
}

impl ProjectOutcome {
    pub fn scanned(report: Report) -> Self {
        Self { report, warning: None }
    }

    pub fn failed(project: Project, err: anyhow::Error) -> Self {
        Self {
            report: Report::failed(project),
            warning: Some(err),
        }
    }
}

/// Collects the outcomes of all scan tasks into the final report list.
pub struct ReportAggregator;

impl ReportAggregator {
    /// Drains `receiver` until every sender is gone. No report is dropped,
    /// failed placeholders included.
    pub async fn run(mut receiver: mpsc::Receiver<ProjectOutcome>) -> (Vec<Report>, Warnings) {
        let mut reports = Vec::new();
        let mut warnings = Warnings::new();

        while let Some(outcome) = receiver.recv().await {
            if let Some(err) = outcome.warning {
                warn!("[{}] {:#}", outcome.report.project.path, err);
                warnings.push(err);
            }
            reports.push(outcome.report);
        }

        Self::sort(&mut reports);
        (reports, warnings)
    }

    /// Most vulnerabilities first. Equal counts keep arrival order.
    pub fn sort(reports: &mut [Report]) {
        reports.sort_by(|a, b| b.vulnerabilities.len().cmp(&a.vulnerabilities.len()));
    }
}
