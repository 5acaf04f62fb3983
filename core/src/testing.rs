//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;

use crate::chat::{Channel, ChatClient, ChatMessage};
use crate::core::pagination::Page;
use crate::core::report::RawFinding;
use crate::core::retry::RateLimited;
use crate::core::target::Platform;
use crate::core::warnings::Warnings;
use crate::modules::VulnScanner;
use crate::repository::{Issue, IssueState, Project, RepositoryService};

const PROJECT_ID_FILE: &str = ".project-id";

pub fn project(id: u64, name: &str) -> Project {
    Project {
        id,
        name: name.to_string(),
        path: format!("acme/{}", name),
        group_or_owner: "acme".to_string(),
        web_url: format!("https://gitlab.com/acme/{}", name),
        repo_url: format!("https://gitlab.com/acme/{}.git", name),
        platform: Platform::Gitlab,
    }
}

pub fn finding(id: &str, score: &str) -> RawFinding {
    RawFinding {
        id: id.to_string(),
        package_name: format!("pkg-{}", id),
        package_version: "1.0.0".to_string(),
        package_ecosystem: "npm".to_string(),
        source: "package-lock.json".to_string(),
        severity: score.to_string(),
        ..Default::default()
    }
}

#[derive(Default)]
struct RepositoryState {
    projects: Vec<Project>,
    failing_listings: HashSet<String>,
    failing_downloads: HashSet<u64>,
    failing_issues: HashSet<u64>,
    files: HashMap<u64, Vec<(String, String)>>,
    issues: HashMap<u64, Issue>,
    refuse_state_changes: bool,
    created: usize,
    updated: usize,
    closed: usize,
}

/// Hosting platform double. Every listed location resolves to all seeded
/// projects; downloads write a marker file the [`FakeScanner`] reads back.
#[derive(Default)]
pub struct FakeRepository {
    state: Mutex<RepositoryState>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(self, projects: Vec<Project>) -> Self {
        self.state.lock().unwrap().projects = projects;
        self
    }

    pub fn fail_listing(&self, path: &str) {
        self.state.lock().unwrap().failing_listings.insert(path.to_string());
    }

    pub fn fail_download_for(&self, id: u64) {
        self.state.lock().unwrap().failing_downloads.insert(id);
    }

    pub fn fail_issues_for(&self, id: u64) {
        self.state.lock().unwrap().failing_issues.insert(id);
    }

    pub fn add_file(&self, id: u64, name: &str, contents: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .entry(id)
            .or_default()
            .push((name.to_string(), contents.to_string()));
    }

    pub fn seed_issue(&self, id: u64, state: IssueState) {
        let issue = Issue {
            number: 1,
            title: crate::repository::VULNERABILITY_ISSUE_TITLE.to_string(),
            web_url: format!("https://gitlab.com/issues/{}", id),
            state,
        };
        self.state.lock().unwrap().issues.insert(id, issue);
    }

    pub fn issue_state(&self, id: u64) -> Option<IssueState> {
        self.state.lock().unwrap().issues.get(&id).map(|i| i.state)
    }

    pub fn refuse_state_changes(&self) {
        self.state.lock().unwrap().refuse_state_changes = true;
    }

    /// (created, updated while open, closed)
    pub fn calls(&self) -> (usize, usize, usize) {
        let state = self.state.lock().unwrap();
        (state.created, state.updated, state.closed)
    }
}

#[async_trait]
impl RepositoryService for FakeRepository {
    async fn list_projects(&self, paths: &[String]) -> (Vec<Project>, Warnings) {
        let state = self.state.lock().unwrap();
        let mut warnings = Warnings::new();
        let mut seen = HashSet::new();
        let mut projects = Vec::new();

        for path in paths {
            if state.failing_listings.contains(path) {
                warnings.push(anyhow!("failed to list projects of {}", path));
                continue;
            }
            for project in &state.projects {
                if seen.insert(project.id) {
                    projects.push(project.clone());
                }
            }
        }

        (projects, warnings)
    }

    async fn download(&self, project: &Project, dir: &Path) -> anyhow::Result<()> {
        let files = {
            let state = self.state.lock().unwrap();
            if state.failing_downloads.contains(&project.id) {
                bail!("archive download failed");
            }
            state.files.get(&project.id).cloned().unwrap_or_default()
        };

        std::fs::write(dir.join(PROJECT_ID_FILE), project.id.to_string())?;
        for (name, contents) in files {
            std::fs::write(dir.join(name), contents)?;
        }
        Ok(())
    }

    async fn find_tracked_issue(&self, project: &Project) -> anyhow::Result<Option<Issue>> {
        let state = self.state.lock().unwrap();
        if state.failing_issues.contains(&project.id) {
            bail!("issue tracker unavailable");
        }
        Ok(state.issues.get(&project.id).cloned())
    }

    async fn create_issue(&self, project: &Project, title: &str, _body: &str) -> anyhow::Result<Issue> {
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        let issue = Issue {
            number: 1,
            title: title.to_string(),
            web_url: format!("{}/-/issues/1", project.web_url),
            state: IssueState::Open,
        };
        state.issues.insert(project.id, issue.clone());
        Ok(issue)
    }

    async fn update_issue(
        &self,
        project: &Project,
        _issue: &Issue,
        _body: Option<&str>,
        new_state: IssueState,
    ) -> anyhow::Result<Issue> {
        let mut state = self.state.lock().unwrap();
        match new_state {
            IssueState::Open => state.updated += 1,
            IssueState::Closed => state.closed += 1,
        }
        let refuse = state.refuse_state_changes;
        let issue = state
            .issues
            .get_mut(&project.id)
            .ok_or_else(|| anyhow!("no such issue"))?;
        if !refuse {
            issue.state = new_state;
        }
        Ok(issue.clone())
    }
}

/// Scanner double keyed by the marker file [`FakeRepository`] downloads.
#[derive(Default)]
pub struct FakeScanner {
    findings: HashMap<u64, Vec<RawFinding>>,
    failing: HashSet<u64>,
    panicking: HashSet<u64>,
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_findings(mut self, id: u64, findings: Vec<RawFinding>) -> Self {
        self.findings.insert(id, findings);
        self
    }

    pub fn fail_for(mut self, id: u64) -> Self {
        self.failing.insert(id);
        self
    }

    pub fn panic_for(mut self, id: u64) -> Self {
        self.panicking.insert(id);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Highest number of scans seen running at the same time.
    pub fn peak_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }
}

#[async_trait]
impl VulnScanner for FakeScanner {
    type Output = u64;

    async fn scan(&self, dir: &Path) -> anyhow::Result<u64> {
        let id: u64 = std::fs::read_to_string(dir.join(PROJECT_ID_FILE))
            .context("missing marker file")?
            .trim()
            .parse()?;

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(&id) {
            panic!("scanner crashed on project {}", id);
        }
        if self.failing.contains(&id) {
            bail!("scanner exited with status 2");
        }
        Ok(id)
    }

    fn findings(&self, _project: &Project, id: u64) -> Vec<RawFinding> {
        self.findings.get(&id).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub channel_id: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub message: ChatMessage,
}

impl PostedMessage {
    /// Fallback text and blocks, for substring checks.
    pub fn body(&self) -> String {
        format!(
            "{}\n{}",
            self.message.text,
            serde_json::to_string(&self.message.blocks).unwrap_or_default()
        )
    }
}

#[derive(Default)]
struct ChatState {
    list_calls: usize,
    post_attempts: usize,
    rate_limited_posts: usize,
    rate_limit_wait: Duration,
    posts: Vec<PostedMessage>,
}

/// Chat API double. Channel listing is paged by offset when `paged` is set.
#[derive(Default)]
pub struct FakeChatClient {
    channels: Vec<Channel>,
    page_size: Option<usize>,
    state: Mutex<ChatState>,
}

impl FakeChatClient {
    pub fn with_channels(channels: &[(&str, &str)]) -> Self {
        Self {
            channels: channels
                .iter()
                .map(|(name, id)| Channel { id: id.to_string(), name: name.to_string() })
                .collect(),
            ..Default::default()
        }
    }

    pub fn paged(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn rate_limit_next_posts(&self, n: usize, wait: Duration) {
        let mut state = self.state.lock().unwrap();
        state.rate_limited_posts = n;
        state.rate_limit_wait = wait;
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn post_attempts(&self) -> usize {
        self.state.lock().unwrap().post_attempts
    }

    pub fn posts(&self) -> Vec<PostedMessage> {
        self.state.lock().unwrap().posts.clone()
    }
}

#[async_trait]
impl ChatClient for FakeChatClient {
    async fn post_message(
        &self,
        channel_id: &str,
        message: &ChatMessage,
        thread_ts: Option<&str>,
    ) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.post_attempts += 1;
        if state.rate_limited_posts > 0 {
            state.rate_limited_posts -= 1;
            return Err(RateLimited { retry_after: state.rate_limit_wait }.into());
        }

        let ts = (state.posts.len() + 1).to_string();
        state.posts.push(PostedMessage {
            channel_id: channel_id.to_string(),
            ts: ts.clone(),
            thread_ts: thread_ts.map(str::to_string),
            message: message.clone(),
        });
        Ok(ts)
    }

    async fn list_channels(&self, cursor: Option<String>) -> anyhow::Result<Page<Channel, String>> {
        self.state.lock().unwrap().list_calls += 1;

        let offset: usize = cursor.as_deref().unwrap_or("0").parse()?;
        let size = self.page_size.unwrap_or(self.channels.len().max(1));
        let end = (offset + size).min(self.channels.len());
        let next = if end < self.channels.len() { end.to_string() } else { String::new() };

        Ok(Page::with_cursor(self.channels[offset..end].to_vec(), next))
    }
}
