use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use log::{error, info};
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

use crate::core::project_config::ProjectConfig;
use crate::core::report::{Report, ReportBuilder};
use crate::core::result_aggregator::{ProjectOutcome, ReportAggregator};
use crate::core::warnings::Warnings;
use crate::modules::VulnScanner;
use crate::repository::{Platforms, Project};

/// Scans projects in parallel, one task per project.
///
/// Every task:
/// 1. Creates its own working directory under the run's root directory
/// 2. Downloads the project source into it
/// 3. Loads the project's `sheriff.toml`
/// 4. Runs the scanner and builds the report
///
/// The working directory is removed when the task ends, whatever the outcome.
/// A failing task yields a placeholder report and a warning; it never affects
/// its siblings.
pub struct ScanOrchestrator<S> {
    platforms: Platforms,
    scanner: Arc<S>,
    builder: ReportBuilder,
    max_concurrent: Option<usize>,
    work_dir: Option<PathBuf>,
}

impl<S> ScanOrchestrator<S>
where
    S: VulnScanner + 'static,
{
    pub fn new(platforms: Platforms, scanner: Arc<S>, builder: ReportBuilder) -> Self {
        Self {
            platforms,
            scanner,
            builder,
            max_concurrent: None,
            work_dir: None,
        }
    }

    /// Caps the number of projects scanned at once. `None` is one task per
    /// project with no ceiling.
    pub fn with_max_concurrent(mut self, limit: Option<usize>) -> Self {
        self.max_concurrent = limit;
        self
    }

    /// Parent of the run's root working directory (system temp dir otherwise).
    pub fn with_work_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.work_dir = dir;
        self
    }

    /// Scans every project and returns the reports sorted by vulnerability
    /// count. Only failing to create the root working directory is fatal.
    pub async fn scan_all(&self, projects: Vec<Project>) -> anyhow::Result<(Vec<Report>, Warnings)> {
        let root = self.create_root_dir()?;
        let semaphore = self.max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let (tx, rx) = mpsc::channel(projects.len().max(1));

        info!("Scanning {} projects", projects.len());

        let mut tasks = Vec::with_capacity(projects.len());
        for project in projects {
            let platforms = self.platforms.clone();
            let scanner = Arc::clone(&self.scanner);
            let builder = self.builder.clone();
            let semaphore = semaphore.clone();
            let root_path = root.path().to_path_buf();
            let task_tx = tx.clone();
            let task_project = project.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };

                let outcome = scan_project(&platforms, scanner.as_ref(), &builder, task_project, &root_path).await;
                let _ = task_tx.send(outcome).await;
            });

            tasks.push((project, handle));
        }

        // A panicking task never sends; stand in for it so the project still
        // shows up in the results.
        for (project, handle) in tasks {
            if let Err(e) = handle.await {
                error!("[{}] Scan task panicked: {}", project.path, e);
                let err = anyhow!("[{}] scan task panicked: {}", project.path, e);
                let _ = tx.send(ProjectOutcome::failed(project, err)).await;
            }
        }
        drop(tx);

        Ok(ReportAggregator::run(rx).await)
    }

    fn create_root_dir(&self) -> anyhow::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sheriff-");

        match &self.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create work directory {}", parent.display()))?;
                builder
                    .tempdir_in(parent)
                    .with_context(|| format!("Failed to create root working directory in {}", parent.display()))
            }
            None => builder
                .tempdir()
                .context("Failed to create root working directory"),
        }
    }
}

async fn scan_project<S: VulnScanner>(
    platforms: &Platforms,
    scanner: &S,
    builder: &ReportBuilder,
    project: Project,
    root: &Path,
) -> ProjectOutcome {
    match try_scan_project(platforms, scanner, builder, &project, root).await {
        Ok(report) => {
            info!(
                "[{}] Scanned: {} vulnerabilities",
                project.path,
                report.vulnerabilities.len()
            );
            ProjectOutcome::scanned(report)
        }
        Err(e) => {
            error!("[{}] Failed to scan project: {:#}", project.path, e);
            let path = project.path.clone();
            ProjectOutcome::failed(project, e.context(format!("[{}] failed to scan project", path)))
        }
    }
}

async fn try_scan_project<S: VulnScanner>(
    platforms: &Platforms,
    scanner: &S,
    builder: &ReportBuilder,
    project: &Project,
    root: &Path,
) -> anyhow::Result<Report> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("{}-", project.name))
        .tempdir_in(root)
        .context("Failed to create project working directory")?;

    let service = platforms.get(project.platform)?;

    info!("[{}] Fetching project source", project.path);
    service
        .download(project, dir.path())
        .await
        .context("Failed to fetch project source")?;

    let config = ProjectConfig::load(dir.path())?;

    info!("[{}] Running scanner", project.path);
    let output = scanner
        .scan(dir.path())
        .await
        .context("Failed to run vulnerability scanner")?;
    let findings = scanner.findings(project, output);

    Ok(builder.build(project.clone(), config, findings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::Platform;
    use crate::testing::{finding, project, FakeRepository, FakeScanner};
    use std::time::Duration;

    fn orchestrator(repo: Arc<FakeRepository>, scanner: FakeScanner) -> ScanOrchestrator<FakeScanner> {
        ScanOrchestrator::new(
            Platforms::new().with(Platform::Gitlab, repo),
            Arc::new(scanner),
            ReportBuilder::default(),
        )
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_project() {
        let repo = Arc::new(FakeRepository::new());
        repo.fail_download_for(2);
        let scanner = FakeScanner::new()
            .with_findings(1, vec![finding("GHSA-1", "9.0")])
            .with_findings(3, vec![finding("GHSA-2", "5.0"), finding("GHSA-3", "4.0")]);

        let projects = vec![project(1, "a"), project(2, "b"), project(3, "c")];
        let (reports, warnings) = orchestrator(repo, scanner).scan_all(projects).await.unwrap();

        assert_eq!(reports.len(), 3);
        let failed: Vec<&Report> = reports.iter().filter(|r| r.error).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].project.id, 2);
        assert!(failed[0].vulnerabilities.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings.to_string().contains("acme/b"));

        assert_eq!(reports[0].project.id, 3);
        assert_eq!(reports[1].project.id, 1);
    }

    #[tokio::test]
    async fn test_scanner_failure_and_panic_yield_placeholders() {
        let repo = Arc::new(FakeRepository::new());
        let scanner = FakeScanner::new().fail_for(1).panic_for(2);

        let projects = vec![project(1, "a"), project(2, "b"), project(3, "c")];
        let (reports, warnings) = orchestrator(repo, scanner).scan_all(projects).await.unwrap();

        assert_eq!(reports.len(), 3);
        assert_eq!(reports.iter().filter(|r| r.error).count(), 2);
        assert_eq!(warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_project_config_is_applied() {
        let repo = Arc::new(FakeRepository::new());
        repo.add_file(1, "sheriff.toml", "acknowledged = [ { code = \"GHSA-1\", reason = \"ok\" } ]\n");
        let scanner = FakeScanner::new().with_findings(1, vec![finding("GHSA-1", "9.0")]);

        let (reports, _) = orchestrator(repo, scanner)
            .scan_all(vec![project(1, "a")])
            .await
            .unwrap();

        assert!(!reports[0].is_vulnerable);
        assert_eq!(reports[0].vulnerabilities[0].ack_reason.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_malformed_project_config_fails_the_project() {
        let repo = Arc::new(FakeRepository::new());
        repo.add_file(1, "sheriff.toml", "acknowledged = [[[");

        let (reports, warnings) = orchestrator(repo, FakeScanner::new())
            .scan_all(vec![project(1, "a")])
            .await
            .unwrap();

        assert!(reports[0].error);
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_working_directories_are_removed() {
        let work = tempfile::tempdir().unwrap();
        let repo = Arc::new(FakeRepository::new());
        repo.fail_download_for(2);

        let (reports, _) = orchestrator(repo, FakeScanner::new().fail_for(3))
            .with_work_dir(Some(work.path().to_path_buf()))
            .scan_all(vec![project(1, "a"), project(2, "b"), project(3, "c")])
            .await
            .unwrap();

        assert_eq!(reports.len(), 3);
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let repo = Arc::new(FakeRepository::new());
        let scanner = FakeScanner::new().with_delay(Duration::from_millis(20));
        let peak = scanner.peak_counter();

        let projects = (1..=6).map(|i| project(i, &format!("p{}", i))).collect();
        let (reports, _) = orchestrator(repo, scanner)
            .with_max_concurrent(Some(2))
            .scan_all(projects)
            .await
            .unwrap();

        assert_eq!(reports.len(), 6);
        assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_unwritable_work_dir_is_fatal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = orchestrator(Arc::new(FakeRepository::new()), FakeScanner::new())
            .with_work_dir(Some(file.path().join("nested")))
            .scan_all(vec![project(1, "a")])
            .await;
        assert!(result.is_err());
    }
}
