use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{anyhow, bail, Context};
use regex::Regex;
use serde::{Deserialize, Serialize};

static GITLAB_PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+(/\S+)+$").expect("gitlab path regex should compile"));
static GITHUB_PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/\s]+(/[^/\s]+)?$").expect("github path regex should compile"));
static SLACK_CHANNEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-][a-z0-9-]{0,20}$").expect("slack channel regex should compile"));

/// Source-hosting platform a project or scan location lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Gitlab,
    Github,
}

impl Platform {
    fn path_regex(&self) -> &'static Regex {
        match self {
            Platform::Gitlab => &GITLAB_PATH_REGEX,
            Platform::Github => &GITHUB_PATH_REGEX,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Gitlab => write!(f, "gitlab"),
            Platform::Github => write!(f, "github"),
        }
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gitlab" => Ok(Platform::Gitlab),
            "github" => Ok(Platform::Github),
            other => bail!("Unsupported repository service: {}", other),
        }
    }
}

/// A group, organisation or project path to patrol, e.g. `gitlab://group/sub`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanLocation {
    pub platform: Platform,
    pub path: String,
}

impl FromStr for ScanLocation {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (scheme, path) = split_target(raw)?;
        let platform: Platform = scheme.parse()?;
        ensure_matches(platform.path_regex(), path)
            .with_context(|| format!("invalid group path for platform {}: {}", platform, path))?;

        Ok(Self { platform, path: path.to_string() })
    }
}

impl fmt::Display for ScanLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.platform, self.path)
    }
}

/// Where the aggregated reports go, e.g. `slack://security` or `issue://`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportTarget {
    Slack(String),
    Issue,
}

impl FromStr for ReportTarget {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (scheme, path) = split_target(raw)?;
        match scheme {
            "slack" => {
                ensure_matches(&SLACK_CHANNEL_REGEX, path)
                    .with_context(|| format!("invalid slack channel name: {}", path))?;
                Ok(ReportTarget::Slack(path.to_string()))
            }
            "issue" => {
                if !path.is_empty() {
                    bail!("issue target takes no path, got: {}", path);
                }
                Ok(ReportTarget::Issue)
            }
            other => bail!("Unsupported report service: {}", other),
        }
    }
}

impl fmt::Display for ReportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportTarget::Slack(channel) => write!(f, "slack://{}", channel),
            ReportTarget::Issue => write!(f, "issue://"),
        }
    }
}

fn split_target(raw: &str) -> anyhow::Result<(&str, &str)> {
    raw.split_once("://")
        .ok_or_else(|| anyhow!("invalid url (expected <platform>://<path>): {}", raw))
}

fn ensure_matches(re: &Regex, value: &str) -> anyhow::Result<()> {
    if !re.is_match(value) {
        bail!("'{}' does not match {}", value, re.as_str());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gitlab_location() {
        let loc: ScanLocation = "gitlab://namespace/group".parse().unwrap();
        assert_eq!(loc.platform, Platform::Gitlab);
        assert_eq!(loc.path, "namespace/group");
        assert_eq!(loc.to_string(), "gitlab://namespace/group");
    }

    #[test]
    fn test_gitlab_requires_nested_path() {
        assert!("gitlab://toplevel".parse::<ScanLocation>().is_err());
    }

    #[test]
    fn test_parse_github_owner_and_repo() {
        let owner: ScanLocation = "github://octo-org".parse().unwrap();
        assert_eq!(owner.platform, Platform::Github);
        let repo: ScanLocation = "github://octo-org/repo".parse().unwrap();
        assert_eq!(repo.path, "octo-org/repo");
        assert!("github://a/b/c".parse::<ScanLocation>().is_err());
    }

    #[test]
    fn test_unsupported_platform_is_rejected() {
        let err = "azure://not-supported.com/x".parse::<ScanLocation>().unwrap_err();
        assert!(err.to_string().contains("Unsupported repository service"));
    }

    #[test]
    fn test_missing_scheme_is_rejected() {
        assert!("namespace/group".parse::<ScanLocation>().is_err());
    }

    #[test]
    fn test_parse_report_targets() {
        let targets: Vec<ReportTarget> = ["slack://channel1", "slack://channel-2", "issue://"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(
            targets,
            vec![
                ReportTarget::Slack("channel1".into()),
                ReportTarget::Slack("channel-2".into()),
                ReportTarget::Issue,
            ]
        );
    }

    #[test]
    fn test_validation_regexes_compile_once_and_match() {
        assert!(GITLAB_PATH_REGEX.is_match("group/sub/project"));
        assert!(GITHUB_PATH_REGEX.is_match("octo-org"));
        assert!(SLACK_CHANNEL_REGEX.is_match("security"));

        let err = ensure_matches(&SLACK_CHANNEL_REGEX, "UPPER").unwrap_err();
        assert!(err.to_string().contains("^[a-z0-9-][a-z0-9-]{0,20}$"));
    }

    #[test]
    fn test_invalid_slack_channel() {
        assert!("slack://Has Spaces".parse::<ReportTarget>().is_err());
        assert!("slack://".parse::<ReportTarget>().is_err());
        assert!("slack://this-channel-name-is-way-too-long".parse::<ReportTarget>().is_err());
    }

    #[test]
    fn test_issue_target_takes_no_path() {
        assert!("issue://something".parse::<ReportTarget>().is_err());
    }
}
