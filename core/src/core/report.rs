use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::project_config::ProjectConfig;
use crate::core::severity::SeverityThresholds;
use crate::core::SeverityScoreKind;
use crate::repository::Project;

/// A finding as it comes out of the scanner, before classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFinding {
    pub id: String,
    pub package_name: String,
    pub package_version: String,
    pub package_url: String,
    pub package_ecosystem: String,
    pub source: String,
    /// Raw score. Kept as a string since some advisories are not numeric.
    pub severity: String,
    pub summary: String,
    pub details: String,
    pub fix_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub package_name: String,
    pub package_version: String,
    pub package_url: String,
    pub package_ecosystem: String,
    pub source: String,
    pub severity: String,
    pub severity_kind: SeverityScoreKind,
    pub summary: String,
    pub details: String,
    pub fix_available: bool,
    pub ack_reason: Option<String>,
}

/// Outcome of one project in one patrol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub project: Project,
    pub project_config: ProjectConfig,
    /// At least one finding is not acknowledged.
    pub is_vulnerable: bool,
    pub vulnerabilities: Vec<Vulnerability>,
    pub issue_url: Option<String>,
    /// Fetching or scanning failed; every other field is left empty.
    pub error: bool,
    /// Acknowledged codes the scan no longer reports.
    pub outdated_acks: Vec<String>,
}

impl Report {
    /// Placeholder for a project whose scan failed.
    pub fn failed(project: Project) -> Self {
        Self {
            project,
            project_config: ProjectConfig::default(),
            is_vulnerable: false,
            vulnerabilities: Vec::new(),
            issue_url: None,
            error: true,
            outdated_acks: Vec::new(),
        }
    }

    pub fn count_of(&self, kind: SeverityScoreKind) -> usize {
        self.vulnerabilities
            .iter()
            .filter(|v| v.severity_kind == kind)
            .count()
    }

    /// Most severe kind among the findings, `None` without findings.
    pub fn max_severity_kind(&self, thresholds: &SeverityThresholds) -> Option<SeverityScoreKind> {
        self.vulnerabilities
            .iter()
            .map(|v| v.severity_kind)
            .min_by_key(|kind| thresholds.rank(*kind))
    }
}

/// Turns scanner output into reports, applying the project's acknowledgements.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    thresholds: Arc<SeverityThresholds>,
}

impl ReportBuilder {
    pub fn new(thresholds: Arc<SeverityThresholds>) -> Self {
        Self { thresholds }
    }

    pub fn build(&self, project: Project, config: ProjectConfig, findings: Vec<RawFinding>) -> Report {
        let vulnerabilities = findings
            .into_iter()
            .map(|finding| self.classify(finding))
            .collect();

        let mut report = Report {
            project,
            project_config: config,
            is_vulnerable: false,
            vulnerabilities,
            issue_url: None,
            error: false,
            outdated_acks: Vec::new(),
        };
        mark_acknowledged(&mut report);
        report
    }

    fn classify(&self, f: RawFinding) -> Vulnerability {
        let severity_kind = self.thresholds.classify(&f.severity);
        Vulnerability {
            id: f.id,
            package_name: f.package_name,
            package_version: f.package_version,
            package_url: f.package_url,
            package_ecosystem: f.package_ecosystem,
            source: f.source,
            severity: f.severity,
            severity_kind,
            summary: f.summary,
            details: f.details,
            fix_available: f.fix_available,
            ack_reason: None,
        }
    }
}

/// Overrides acknowledged findings in place and recomputes the derived
/// fields (`is_vulnerable`, `outdated_acks`).
fn mark_acknowledged(report: &mut Report) {
    let reasons: HashMap<&str, Option<&String>> = report
        .project_config
        .acknowledged
        .iter()
        .map(|ack| (ack.code.as_str(), ack.reason.as_ref()))
        .collect();

    for vuln in report.vulnerabilities.iter_mut() {
        if let Some(reason) = reasons.get(vuln.id.as_str()) {
            vuln.severity_kind = SeverityScoreKind::Acknowledged;
            vuln.ack_reason = (*reason).cloned();
        }
    }

    report.is_vulnerable = report
        .vulnerabilities
        .iter()
        .any(|v| v.severity_kind != SeverityScoreKind::Acknowledged);

    let mut outdated: Vec<String> = Vec::new();
    for ack in &report.project_config.acknowledged {
        let still_found = report.vulnerabilities.iter().any(|v| v.id == ack.code);
        if !still_found && !outdated.contains(&ack.code) {
            outdated.push(ack.code.clone());
        }
    }
    report.outdated_acks = outdated;
}
