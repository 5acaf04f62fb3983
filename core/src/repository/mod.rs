pub mod github;
pub mod gitlab;

pub use github::GithubService;
pub use gitlab::GitlabService;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::core::target::{Platform, ScanLocation};
use crate::core::warnings::Warnings;

/// Title of the one issue per project that tracks its vulnerabilities.
pub const VULNERABILITY_ISSUE_TITLE: &str = "Sheriff - 🚨 Vulnerability report";

/// A repository to patrol, as listed by its hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    /// Full path including namespace, e.g. `group/subgroup/project`.
    pub path: String,
    pub group_or_owner: String,
    pub web_url: String,
    pub repo_url: String,
    pub platform: Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Platform-local issue number (GitLab `iid`, GitHub `number`).
    pub number: u64,
    pub title: String,
    pub web_url: String,
    pub state: IssueState,
}

/// Everything the patrol needs from a source-hosting platform.
#[async_trait]
pub trait RepositoryService: Send + Sync {
    /// Resolves group, organisation or project paths to concrete projects.
    /// Paths that cannot be resolved are reported as warnings.
    async fn list_projects(&self, paths: &[String]) -> (Vec<Project>, Warnings);

    /// Materialises the project's default branch into `dir`.
    async fn download(&self, project: &Project, dir: &Path) -> anyhow::Result<()>;

    /// Looks up the issue titled [`VULNERABILITY_ISSUE_TITLE`], open or closed.
    async fn find_tracked_issue(&self, project: &Project) -> anyhow::Result<Option<Issue>>;

    async fn create_issue(&self, project: &Project, title: &str, body: &str) -> anyhow::Result<Issue>;

    /// Changes body (when given) and state of an existing issue.
    async fn update_issue(
        &self,
        project: &Project,
        issue: &Issue,
        body: Option<&str>,
        state: IssueState,
    ) -> anyhow::Result<Issue>;
}

pub type RepositoryRef = Arc<dyn RepositoryService>;

/// Platform tag → service. Every project carries its tag, so callers never
/// branch on the platform themselves.
#[derive(Clone, Default)]
pub struct Platforms {
    services: HashMap<Platform, RepositoryRef>,
}

impl Platforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: Platform, service: RepositoryRef) -> Self {
        self.services.insert(platform, service);
        self
    }

    pub fn get(&self, platform: Platform) -> anyhow::Result<RepositoryRef> {
        self.services
            .get(&platform)
            .cloned()
            .ok_or_else(|| anyhow!("no repository service configured for platform {}", platform))
    }

    /// Lists the projects of every location, one platform at a time.
    pub async fn list_projects(&self, locations: &[ScanLocation]) -> (Vec<Project>, Warnings) {
        let mut projects = Vec::new();
        let mut warnings = Warnings::new();

        for platform in [Platform::Gitlab, Platform::Github] {
            let paths: Vec<String> = locations
                .iter()
                .filter(|l| l.platform == platform)
                .map(|l| l.path.clone())
                .collect();
            if paths.is_empty() {
                continue;
            }

            let service = match self.get(platform) {
                Ok(s) => s,
                Err(e) => {
                    warnings.push(e);
                    continue;
                }
            };

            info!("Getting the list of {} projects to scan: {:?}", platform, paths);
            let (found, warn) = service.list_projects(&paths).await;
            projects.extend(found);
            warnings.extend(warn);
        }

        (projects, warnings)
    }
}
