use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::{anyhow, Context};
use log::{error, info};

use crate::core::report::{Report, Vulnerability};
use crate::core::severity::{compare_scores_desc, SeverityThresholds};
use crate::core::warnings::Warnings;
use crate::core::SeverityScoreKind;
use crate::repository::{Issue, IssueState, Platforms, Project, RepositoryRef, VULNERABILITY_ISSUE_TITLE};

/// Brings the tracked issue of every report in line with its state, one task
/// per project. Issue URLs of vulnerable projects are written back into the
/// reports so the chat messages can link them. A failed scan is not
/// vulnerable, so it closes an open issue like a clean one.
pub async fn publish_as_issues(
    platforms: &Platforms,
    reports: &mut [Report],
    thresholds: &SeverityThresholds,
) -> Warnings {
    let mut warnings = Warnings::new();
    let mut handles = Vec::new();

    for (index, report) in reports.iter().enumerate() {
        let service = match platforms.get(report.project.platform) {
            Ok(service) => service,
            Err(e) => {
                warnings.push(e.context(format!("[{}] cannot publish issue", report.project.path)));
                continue;
            }
        };
        let project = report.project.clone();
        let body = report
            .is_vulnerable
            .then(|| format_issue_body(report, thresholds));

        handles.push((
            index,
            project.path.clone(),
            tokio::spawn(async move { sync_issue(service, &project, body).await }),
        ));
    }

    for (index, path, handle) in handles {
        let outcome = handle
            .await
            .map_err(|e| anyhow!("issue task panicked: {}", e))
            .and_then(|result| result);

        match outcome {
            Ok(Some(issue)) => reports[index].issue_url = Some(issue.web_url),
            Ok(None) => {}
            Err(e) => {
                error!("[{}] Failed to publish vulnerability issue: {:#}", path, e);
                warnings.push(e.context(format!("[{}] failed to publish vulnerability issue", path)));
            }
        }
    }

    warnings
}

/// Idempotent transition of one project's tracked issue.
///
/// With a body (vulnerable project) the issue is created or updated and
/// forced open. Without one, an open issue is closed and anything else is
/// left untouched. Returns the issue that now describes the project, if any.
pub async fn sync_issue(
    service: RepositoryRef,
    project: &Project,
    body: Option<String>,
) -> anyhow::Result<Option<Issue>> {
    let existing = service.find_tracked_issue(project).await?;

    match (body, existing) {
        (Some(body), None) => {
            let issue = service
                .create_issue(project, VULNERABILITY_ISSUE_TITLE, &body)
                .await?;
            Ok(Some(issue))
        }
        (Some(body), Some(issue)) => {
            let updated = service
                .update_issue(project, &issue, Some(&body), IssueState::Open)
                .await
                .context("failed to update or reopen issue")?;
            if updated.state != IssueState::Open {
                return Err(anyhow!("failed to reopen issue #{}", updated.number));
            }
            info!("[{}] Updated issue #{}", project.path, updated.number);
            Ok(Some(updated))
        }
        (None, Some(issue)) if issue.state == IssueState::Open => {
            service
                .update_issue(project, &issue, None, IssueState::Closed)
                .await
                .context("failed to close issue")?;
            info!("[{}] Closed issue #{}: no vulnerabilities left", project.path, issue.number);
            Ok(None)
        }
        (None, _) => Ok(None),
    }
}

/// Markdown body of the tracked issue: one table per severity kind.
pub fn format_issue_body(report: &Report, thresholds: &SeverityThresholds) -> String {
    let mut by_kind: HashMap<SeverityScoreKind, Vec<&Vulnerability>> = HashMap::new();
    for vuln in &report.vulnerabilities {
        by_kind.entry(vuln.severity_kind).or_default().push(vuln);
    }

    let mut md = String::new();
    for kind in thresholds.display_order() {
        let Some(mut group) = by_kind.remove(&kind) else {
            continue;
        };
        group.sort_by(|a, b| compare_scores_desc(&a.severity, &b.severity));

        let _ = writeln!(md, "\n## Severity: {}", kind);
        md.push_str("| OSV URL | CVSS | Ecosystem | Package | Version | Fix Available | Source |\n");
        md.push_str("| --- | --- | --- | --- | --- | --- | --- |\n");
        for v in group {
            let _ = writeln!(
                md,
                "| https://osv.dev/{} | {} | {} | {} | {} | {} | {} |",
                v.id,
                v.severity,
                v.package_ecosystem,
                v.package_name,
                v.package_version,
                markdown_bool(v.fix_available),
                v.source,
            );
        }
    }

    let acknowledged: Vec<&Vulnerability> = report
        .vulnerabilities
        .iter()
        .filter(|v| v.severity_kind == SeverityScoreKind::Acknowledged)
        .collect();
    if !acknowledged.is_empty() {
        md.push_str("\n## Acknowledged vulnerabilities\n");
        for v in acknowledged {
            let reason = v.ack_reason.as_deref().unwrap_or("no reason given");
            let _ = writeln!(md, "- {}: {}", v.id, reason);
        }
    }

    if !report.outdated_acks.is_empty() {
        md.push_str("\n## Outdated acknowledgements\n");
        md.push_str("These codes are acknowledged in `sheriff.toml` but no longer reported and can be removed:\n");
        for code in &report.outdated_acks {
            let _ = writeln!(md, "- {}", code);
        }
    }

    md
}

fn markdown_bool(b: bool) -> &'static str {
    if b {
        "✅"
    } else {
        "❌"
    }
}
