use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::json;

use crate::core::pagination::{fetch_all, Page};
use crate::core::target::Platform;
use crate::core::warnings::Warnings;
use crate::http::{header_u64, send_checked, send_json, ApiClient, Auth};
use crate::repository::{Issue, IssueState, Project, RepositoryService, VULNERABILITY_ISSUE_TITLE};
use crate::utils::extract::extract_tar_gz;

pub const GITLAB_API_URL: &str = "https://gitlab.com/api/v4";
const PER_PAGE: &str = "100";

/// Path segments keep `-`, `_` and `.`; everything else (notably `/`) is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

#[derive(Debug, Deserialize)]
struct GitlabNamespace {
    #[serde(default)]
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct GitlabProject {
    id: u64,
    name: String,
    path_with_namespace: String,
    #[serde(default)]
    web_url: String,
    #[serde(default)]
    http_url_to_repo: String,
    namespace: Option<GitlabNamespace>,
}

#[derive(Debug, Deserialize)]
struct GitlabIssue {
    iid: u64,
    title: String,
    #[serde(default)]
    web_url: String,
    state: String,
}

impl From<GitlabProject> for Project {
    fn from(p: GitlabProject) -> Self {
        let group = p
            .namespace
            .map(|ns| ns.full_path)
            .filter(|full_path| !full_path.is_empty())
            .unwrap_or_else(|| {
                p.path_with_namespace
                    .rsplit_once('/')
                    .map(|(group, _)| group.to_string())
                    .unwrap_or_default()
            });

        Project {
            id: p.id,
            name: p.name,
            path: p.path_with_namespace,
            group_or_owner: group,
            web_url: p.web_url,
            repo_url: p.http_url_to_repo,
            platform: Platform::Gitlab,
        }
    }
}

impl From<GitlabIssue> for Issue {
    fn from(i: GitlabIssue) -> Self {
        Issue {
            number: i.iid,
            title: i.title,
            web_url: i.web_url,
            state: if i.state == "opened" { IssueState::Open } else { IssueState::Closed },
        }
    }
}

pub struct GitlabService {
    client: ApiClient,
}

impl GitlabService {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        Self::with_base_url(GITLAB_API_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> anyhow::Result<Self> {
        let client = ApiClient::new(
            base_url,
            Auth::Header("PRIVATE-TOKEN".to_string(), token.to_string()),
        )?;
        Ok(Self { client })
    }

    /// A path is first treated as a group (subgroups included); if that
    /// fails it is tried as a single project.
    async fn projects_at(&self, path: &str) -> anyhow::Result<Vec<Project>> {
        match self.group_projects(path).await {
            Ok(projects) => Ok(projects),
            Err(group_err) => {
                debug!("'{}' is not a listable group ({:#}), trying as project", path, group_err);
                let project = self
                    .project(path)
                    .await
                    .with_context(|| format!("'{}' is neither a group nor a project", path))?;
                Ok(vec![project])
            }
        }
    }

    async fn group_projects(&self, group_path: &str) -> anyhow::Result<Vec<Project>> {
        let endpoint = format!("groups/{}/projects", encode_path(group_path));

        let projects = fetch_all(|page: Option<u32>| {
            let endpoint = endpoint.clone();
            async move {
                let page = page.unwrap_or(1).to_string();
                let request = self.client.get(&endpoint)?.query(&[
                    ("archived", "false"),
                    ("simple", "true"),
                    ("include_subgroups", "true"),
                    ("with_shared", "false"),
                    ("per_page", PER_PAGE),
                    ("page", page.as_str()),
                ]);
                let (items, headers) = send_json::<Vec<GitlabProject>>(request).await?;
                let next = header_u64(&headers, "x-next-page").unwrap_or(0) as u32;
                Ok(Page::with_next_page(items, next))
            }
        })
        .await?;

        Ok(projects.into_iter().map(Project::from).collect())
    }

    async fn project(&self, path: &str) -> anyhow::Result<Project> {
        let request = self.client.get(&format!("projects/{}", encode_path(path)))?;
        let (project, _) = send_json::<GitlabProject>(request).await?;
        Ok(project.into())
    }
}

#[async_trait]
impl RepositoryService for GitlabService {
    async fn list_projects(&self, paths: &[String]) -> (Vec<Project>, Warnings) {
        let results = join_all(paths.iter().map(|path| async move {
            (path, self.projects_at(path).await)
        }))
        .await;

        let mut warnings = Warnings::new();
        let mut found = Vec::new();
        for (path, result) in results {
            match result {
                Ok(projects) => found.extend(projects),
                Err(e) => {
                    warn!("[{}] Failed to list GitLab projects: {:#}", path, e);
                    warnings.push(e.context(format!("failed to list GitLab projects of {}", path)));
                }
            }
        }

        (dedup_projects(found), warnings)
    }

    async fn download(&self, project: &Project, dir: &Path) -> anyhow::Result<()> {
        let request = self
            .client
            .get(&format!("projects/{}/repository/archive.tar.gz", project.id))?;
        let bytes = send_checked(request)
            .await
            .context("Failed to download GitLab archive")?
            .bytes()
            .await
            .context("Failed to read GitLab archive")?;

        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_tar_gz(&bytes[..], &dir))
            .await
            .map_err(|e| anyhow!("archive extraction task failed: {}", e))?
    }

    async fn find_tracked_issue(&self, project: &Project) -> anyhow::Result<Option<Issue>> {
        let endpoint = format!("projects/{}/issues", project.id);
        let issues = fetch_all(|page: Option<u32>| {
            let endpoint = endpoint.clone();
            async move {
                let page = page.unwrap_or(1).to_string();
                let request = self.client.get(&endpoint)?.query(&[
                    ("search", VULNERABILITY_ISSUE_TITLE),
                    ("in", "title"),
                    ("state", "all"),
                    ("per_page", PER_PAGE),
                    ("page", page.as_str()),
                ]);
                let (items, headers) = send_json::<Vec<GitlabIssue>>(request).await?;
                let next = header_u64(&headers, "x-next-page").unwrap_or(0) as u32;
                Ok(Page::with_next_page(items, next))
            }
        })
        .await
        .with_context(|| format!("[{}] Failed to fetch current list of issues", project.path))?;

        Ok(issues
            .into_iter()
            .find(|i| i.title == VULNERABILITY_ISSUE_TITLE)
            .map(Issue::from))
    }

    async fn create_issue(&self, project: &Project, title: &str, body: &str) -> anyhow::Result<Issue> {
        let request = self
            .client
            .post(&format!("projects/{}/issues", project.id))?
            .json(&json!({ "title": title, "description": body }));
        let (issue, _) = send_json::<GitlabIssue>(request)
            .await
            .with_context(|| format!("[{}] Failed to create new issue", project.path))?;
        info!("[{}] Created issue #{}", project.path, issue.iid);
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
            "state_event": match state {
                IssueState::Open => "reopen",
                IssueState::Closed => "close",
            }
        });
        if let Some(body) = body {
            payload["description"] = json!(body);
        }

        let request = self
            .client
            .put(&format!("projects/{}/issues/{}", project.id, issue.number))?
            .json(&payload);
        let (updated, _) = send_json::<GitlabIssue>(request)
            .await
            .with_context(|| format!("[{}] Failed to update issue #{}", project.path, issue.number))?;

        let updated: Issue = updated.into();
        if updated.state != state {
            bail!("[{}] issue #{} did not reach state {:?}", project.path, updated.number, state);
        }
        Ok(updated)
    }
}

fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_SEGMENT).to_string()
}

/// Locations may overlap (a group and one of its subgroups); keep the first
/// occurrence of every project.
fn dedup_projects(projects: Vec<Project>) -> Vec<Project> {
    let mut seen = HashSet::new();
    projects.into_iter().filter(|p| seen.insert(p.id)).collect()
}
