use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Policy file project owners commit at the root of their repository.
pub const PROJECT_CONFIG_FILE: &str = "sheriff.toml";

/// Per-project policy: which findings are acknowledged and where to send a
/// project-level report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProjectConfig {
    pub report_to: ReportToConfig,
    pub acknowledged: Vec<AcknowledgedVuln>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReportToConfig {
    pub slack_channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgedVuln {
    pub code: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ProjectConfig {
    /// Reads the policy file from a fetched source tree. A tree without one
    /// gets the default policy; a file that exists but cannot be parsed is an
    /// error.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(PROJECT_CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read project config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse project config: {}", path.display()))
    }

    pub fn report_to_slack_channel(&self) -> Option<&str> {
        self.report_to
            .slack_channel
            .as_deref()
            .filter(|channel| !channel.trim().is_empty())
    }
}
