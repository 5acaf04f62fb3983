use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::core::pagination::{fetch_all, Page};
use crate::core::target::Platform;
use crate::core::warnings::Warnings;
use crate::http::{send_checked, send_json, ApiClient, Auth};
use crate::repository::{Issue, IssueState, Project, RepositoryService, VULNERABILITY_ISSUE_TITLE};
use crate::utils::extract::extract_tar_gz;

pub const GITHUB_API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct GithubOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubRepo {
    id: u64,
    name: String,
    full_name: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    clone_url: String,
    owner: GithubOwner,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct GithubIssue {
    number: u64,
    title: String,
    #[serde(default)]
    html_url: String,
    state: String,
    /// Present when the "issue" is actually a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<GithubRepo> for Project {
    fn from(r: GithubRepo) -> Self {
        Project {
            id: r.id,
            name: r.name,
            path: r.full_name,
            group_or_owner: r.owner.login,
            web_url: r.html_url,
            repo_url: r.clone_url,
            platform: Platform::Github,
        }
    }
}

impl From<GithubIssue> for Issue {
    fn from(i: GithubIssue) -> Self {
        Issue {
            number: i.number,
            title: i.title,
            web_url: i.html_url,
            state: if i.state == "open" { IssueState::Open } else { IssueState::Closed },
        }
    }
}

pub struct GithubService {
    client: ApiClient,
}

impl GithubService {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        Self::with_base_url(GITHUB_API_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> anyhow::Result<Self> {
        let client = ApiClient::new(base_url, Auth::Bearer(token.to_string()))?;
        Ok(Self { client })
    }

    /// `owner` lists every repository of an organisation (or user, as a
    /// fallback); `owner/repo` names a single repository.
    async fn projects_at(&self, path: &str) -> anyhow::Result<Vec<Project>> {
        match path.split_once('/') {
            Some((owner, repo)) => Ok(vec![self.repository(owner, repo).await?]),
            None => match self.list_repos(&format!("orgs/{}/repos", path)).await {
                Ok(projects) => Ok(projects),
                Err(org_err) => {
                    debug!("'{}' is not an organisation ({:#}), trying as user", path, org_err);
                    self.list_repos(&format!("users/{}/repos", path))
                        .await
                        .with_context(|| format!("'{}' is neither an organisation nor a user", path))
                }
            },
        }
    }

    async fn list_repos(&self, endpoint: &str) -> anyhow::Result<Vec<Project>> {
        let repos = fetch_all(|page: Option<u32>| async move {
            let page = page.unwrap_or(1);
            let request = self.client.get(endpoint)?.query(&[
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ]);
            let (items, _) = send_json::<Vec<GithubRepo>>(request).await?;
            let next = next_page(page, items.len());
            Ok(Page::with_next_page(items, next))
        })
        .await?;

        Ok(repos
            .into_iter()
            .filter(|r| !r.archived)
            .map(Project::from)
            .collect())
    }

    async fn repository(&self, owner: &str, repo: &str) -> anyhow::Result<Project> {
        let request = self.client.get(&format!("repos/{}/{}", owner, repo))?;
        let (repo, _) = send_json::<GithubRepo>(request).await?;
        Ok(repo.into())
    }
}

#[async_trait]
impl RepositoryService for GithubService {
    async fn list_projects(&self, paths: &[String]) -> (Vec<Project>, Warnings) {
        let results = join_all(paths.iter().map(|path| async move {
            (path, self.projects_at(path).await)
        }))
        .await;

        let mut warnings = Warnings::new();
        let mut seen = HashSet::new();
        let mut projects = Vec::new();
        for (path, result) in results {
            match result {
                Ok(found) => projects.extend(found.into_iter().filter(|p| seen.insert(p.id))),
                Err(e) => {
                    warn!("[{}] Failed to list GitHub repositories: {:#}", path, e);
                    warnings.push(e.context(format!("failed to list GitHub repositories of {}", path)));
                }
            }
        }

        (projects, warnings)
    }

    async fn download(&self, project: &Project, dir: &Path) -> anyhow::Result<()> {
        let request = self.client.get(&format!("repos/{}/tarball", project.path))?;
        let bytes = send_checked(request)
            .await
            .context("Failed to download GitHub tarball")?
            .bytes()
            .await
            .context("Failed to read GitHub tarball")?;

        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_tar_gz(&bytes[..], &dir))
            .await
            .map_err(|e| anyhow!("archive extraction task failed: {}", e))?
    }

    async fn find_tracked_issue(&self, project: &Project) -> anyhow::Result<Option<Issue>> {
        let endpoint = format!("repos/{}/issues", project.path);
        let issues = fetch_all(|page: Option<u32>| {
            let endpoint = endpoint.clone();
            async move {
                let page = page.unwrap_or(1);
                let request = self.client.get(&endpoint)?.query(&[
                    ("state", "all".to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ]);
                let (items, _) = send_json::<Vec<GithubIssue>>(request).await?;
                let next = next_page(page, items.len());
                Ok(Page::with_next_page(items, next))
            }
        })
        .await
        .with_context(|| format!("[{}] Failed to fetch current list of issues", project.path))?;

        Ok(issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .find(|i| i.title == VULNERABILITY_ISSUE_TITLE)
            .map(Issue::from))
    }

    async fn create_issue(&self, project: &Project, title: &str, body: &str) -> anyhow::Result<Issue> {
        let request = self
            .client
            .post(&format!("repos/{}/issues", project.path))?
            .json(&json!({ "title": title, "body": body }));
        let (issue, _) = send_json::<GithubIssue>(request)
            .await
            .with_context(|| format!("[{}] Failed to create new issue", project.path))?;
        info!("[{}] Created issue #{}", project.path, issue.number);
        Ok(issue.into())
    }

    async fn update_issue(
        &self,
        project: &Project,
        issue: &Issue,
        body: Option<&str>,
        state: IssueState,
    ) -> anyhow::Result<Issue> {
        let mut payload = json!({
            "state": match state {
                IssueState::Open => "open",
                IssueState::Closed => "closed",
            }
        });
        if let Some(body) = body {
            payload["body"] = json!(body);
        }

        let request = self
            .client
            .patch(&format!("repos/{}/issues/{}", project.path, issue.number))?
            .json(&payload);
        let (updated, _) = send_json::<GithubIssue>(request)
            .await
            .with_context(|| format!("[{}] Failed to update issue #{}", project.path, issue.number))?;

        let updated: Issue = updated.into();
        if updated.state != state {
            bail!("[{}] issue #{} did not reach state {:?}", project.path, updated.number, state);
        }
        Ok(updated)
    }
}

/// GitHub has no next-page header worth parsing here; a full page means
/// there may be more.
fn next_page(current: u32, received: usize) -> u32 {
    if received >= PER_PAGE {
        current + 1
    } else {
        0
    }
}
