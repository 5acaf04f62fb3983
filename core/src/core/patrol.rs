use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use log::{info, warn};

use crate::chat::ChatService;
use crate::core::engine::ScanOrchestrator;
use crate::core::report::{Report, ReportBuilder};
use crate::core::severity::SeverityThresholds;
use crate::core::target::{ReportTarget, ScanLocation};
use crate::core::warnings::Warnings;
use crate::modules::VulnScanner;
use crate::notifications::{PublishOptions, Publisher};
use crate::repository::Platforms;

/// Everything one patrol run needs to know, already parsed and validated.
#[derive(Debug, Clone, Default)]
pub struct PatrolArgs {
    pub locations: Vec<ScanLocation>,
    pub report_to: Vec<ReportTarget>,
    /// Also send each project a message in the channel its own config names.
    pub enable_project_report_to: bool,
    pub silent_report: bool,
    pub verbose: bool,
    pub max_concurrent_scans: Option<usize>,
    pub work_dir: Option<PathBuf>,
}

/// Non-fatal outcome of a patrol.
#[derive(Debug)]
pub struct PatrolResult {
    pub reports: Vec<Report>,
    pub warnings: Option<Warnings>,
}

/// List, scan, aggregate, publish.
pub struct PatrolService<S> {
    platforms: Platforms,
    scanner: Arc<S>,
    chat: Option<Arc<ChatService>>,
    thresholds: Arc<SeverityThresholds>,
}

impl<S> PatrolService<S>
where
    S: VulnScanner + 'static,
{
    pub fn new(platforms: Platforms, scanner: S, chat: Option<Arc<ChatService>>) -> Self {
        Self {
            platforms,
            scanner: Arc::new(scanner),
            chat,
            thresholds: Arc::new(SeverityThresholds::default()),
        }
    }

    pub fn with_thresholds(mut self, thresholds: SeverityThresholds) -> Self {
        self.thresholds = Arc::new(thresholds);
        self
    }

    /// Runs one patrol. `Err` only for fatal conditions: no project could be
    /// resolved at all, or no working storage could be allocated.
    pub async fn patrol(&self, args: &PatrolArgs) -> anyhow::Result<PatrolResult> {
        let mut warnings = Warnings::new();

        let (projects, list_warnings) = self.platforms.list_projects(&args.locations).await;
        if projects.is_empty() && !list_warnings.is_empty() {
            return Err(anyhow!("could not resolve any project to scan:\n{}", list_warnings));
        }
        warnings.merge("failed to list some projects", list_warnings);

        if args.verbose {
            for project in &projects {
                info!("Will scan {} ({})", project.path, project.platform);
            }
        }

        let orchestrator = ScanOrchestrator::new(
            self.platforms.clone(),
            Arc::clone(&self.scanner),
            ReportBuilder::new(Arc::clone(&self.thresholds)),
        )
        .with_max_concurrent(args.max_concurrent_scans)
        .with_work_dir(args.work_dir.clone());

        let (mut reports, scan_warnings) = orchestrator.scan_all(projects).await?;
        warnings.merge("failed to scan some projects", scan_warnings);

        if reports.is_empty() {
            warn!("No reports found. Check that the projects and group paths are correct");
            return Ok(PatrolResult {
                reports,
                warnings: warnings.into_option(),
            });
        }

        let publisher = Publisher::new(
            self.platforms.clone(),
            self.chat.clone(),
            Arc::clone(&self.thresholds),
        );
        let options = PublishOptions {
            report_to: args.report_to.clone(),
            enable_project_report_to: args.enable_project_report_to,
            silent: args.silent_report,
        };
        let publish_warnings = publisher.publish(&mut reports, &args.locations, &options).await;
        warnings.merge("failed to publish some reports", publish_warnings);

        if !warnings.is_empty() {
            warn!("Patrol finished with {} warnings", warnings.len());
        } else {
            info!("Patrol finished: {} projects scanned", reports.len());
        }

        Ok(PatrolResult {
            reports,
            warnings: warnings.into_option(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::RetryPolicy;
    use crate::core::target::Platform;
    use crate::core::SeverityScoreKind;
    use crate::testing::{finding, project, FakeChatClient, FakeRepository, FakeScanner};
    use std::time::Duration;

    fn location(path: &str) -> ScanLocation {
        format!("gitlab://{}", path).parse().unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_three_projects() {
        let repo = Arc::new(FakeRepository::new().with_projects(vec![
            project(1, "zero"),
            project(2, "three"),
            project(3, "five"),
        ]));
        let scanner = FakeScanner::new()
            .with_findings(2, vec![finding("A", "9.1"), finding("B", "8.5"), finding("C", "1.0")])
            .with_findings(
                3,
                vec![
                    finding("D", "9.9"),
                    finding("E", "4.0"),
                    finding("F", "4.1"),
                    finding("G", "n/a"),
                    finding("H", "0.1"),
                ],
            );
        let client = Arc::new(FakeChatClient::with_channels(&[("security", "C1")]));
        let chat = Arc::new(ChatService::with_retry_policy(client.clone(), RetryPolicy::new(1, Duration::ZERO)));

        let service = PatrolService::new(
            Platforms::new().with(Platform::Gitlab, repo.clone()),
            scanner,
            Some(chat),
        );
        let args = PatrolArgs {
            locations: vec![location("acme/all")],
            report_to: vec![ReportTarget::Slack("security".into()), ReportTarget::Issue],
            silent_report: true,
            ..Default::default()
        };

        let result = service.patrol(&args).await.unwrap();

        assert!(result.warnings.is_none(), "{:?}", result.warnings.map(|w| w.to_string()));
        let names: Vec<&str> = result.reports.iter().map(|r| r.project.name.as_str()).collect();
        assert_eq!(names, vec!["five", "three", "zero"]);

        let total: usize = result.reports.iter().map(|r| r.vulnerabilities.len()).sum();
        let per_kind: usize = SeverityScoreKind::ALL
            .iter()
            .map(|k| result.reports.iter().map(|r| r.count_of(*k)).sum::<usize>())
            .sum();
        assert_eq!(total, 8);
        assert_eq!(per_kind, total);

        // Two vulnerable projects got an issue, the summary went out.
        assert_eq!(repo.calls(), (2, 0, 0));
        assert!(!client.posts().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_resolvable_is_fatal() {
        let repo = Arc::new(FakeRepository::new());
        repo.fail_listing("acme/missing");
        let service = PatrolService::new(
            Platforms::new().with(Platform::Gitlab, repo),
            FakeScanner::new(),
            None,
        );
        let args = PatrolArgs {
            locations: vec![location("acme/missing")],
            silent_report: true,
            ..Default::default()
        };

        let err = service.patrol(&args).await.unwrap_err();
        assert!(err.to_string().contains("could not resolve any project"));
    }

    #[tokio::test]
    async fn test_partial_listing_failure_is_a_warning() {
        let repo = Arc::new(FakeRepository::new().with_projects(vec![project(1, "api")]));
        repo.fail_listing("acme/missing");
        let service = PatrolService::new(
            Platforms::new().with(Platform::Gitlab, repo),
            FakeScanner::new(),
            None,
        );
        let args = PatrolArgs {
            locations: vec![location("acme/api"), location("acme/missing")],
            silent_report: true,
            ..Default::default()
        };

        let result = service.patrol(&args).await.unwrap();
        assert_eq!(result.reports.len(), 1);
        let warnings = result.warnings.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings.to_string().contains("acme/missing"));
    }

    #[tokio::test]
    async fn test_no_projects_and_no_failures_is_clean() {
        let client = Arc::new(FakeChatClient::with_channels(&[("security", "C1")]));
        let chat = Arc::new(ChatService::with_retry_policy(client.clone(), RetryPolicy::new(1, Duration::ZERO)));
        let service = PatrolService::new(
            Platforms::new().with(Platform::Gitlab, Arc::new(FakeRepository::new())),
            FakeScanner::new(),
            Some(chat),
        );
        let args = PatrolArgs {
            locations: vec![location("acme/empty")],
            report_to: vec![ReportTarget::Slack("security".into())],
            silent_report: true,
            ..Default::default()
        };

        let result = service.patrol(&args).await.unwrap();
        assert!(result.reports.is_empty());
        assert!(result.warnings.is_none());
        // Nothing scanned, nothing published.
        assert!(client.posts().is_empty());
        assert_eq!(client.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces_as_warning() {
        let repo = Arc::new(FakeRepository::new().with_projects(vec![project(1, "a"), project(2, "b")]));
        repo.fail_download_for(1);
        let service = PatrolService::new(
            Platforms::new().with(Platform::Gitlab, repo),
            FakeScanner::new().with_findings(2, vec![finding("X", "3.0")]),
            None,
        );
        let args = PatrolArgs {
            locations: vec![location("acme/all")],
            silent_report: true,
            ..Default::default()
        };

        let result = service.patrol(&args).await.unwrap();
        assert_eq!(result.reports.len(), 2);
        assert!(result.reports.iter().any(|r| r.error && r.project.id == 1));
        assert_eq!(result.warnings.unwrap().len(), 1);
    }
}
