pub mod chat;
pub mod core;
pub mod http;
pub mod modules;
pub mod notifications;
pub mod repository;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use crate::chat::{ChatService, SlackClient};
pub use crate::core::patrol::{PatrolArgs, PatrolResult, PatrolService};
pub use crate::core::report::Report;
pub use crate::core::target::{Platform, ReportTarget, ScanLocation};
pub use crate::core::warnings::Warnings;
pub use crate::modules::osv::OsvScanner;
pub use crate::repository::{GithubService, GitlabService, Platforms};

/// Default name of the run configuration file.
pub const RUN_CONFIG_FILE: &str = "sheriff.toml";

/// Run configuration read from a TOML file. Command-line values take
/// precedence over everything set here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RunConfig {
    pub url: Vec<String>,
    pub report_to: Vec<String>,
    pub enable_project_report_to: bool,
    pub silent: bool,
}

impl RunConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("Invalid run configuration")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("In config file {}", path.display()))
    }

    /// Like [`RunConfig::load`], but a missing file is an empty config.
    pub fn load_optional(path: &Path) -> anyhow::Result<Self> {
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn scan_locations(&self) -> anyhow::Result<Vec<ScanLocation>> {
        self.url.iter().map(|u| u.parse()).collect()
    }

    pub fn report_targets(&self) -> anyhow::Result<Vec<ReportTarget>> {
        self.report_to.iter().map(|t| t.parse()).collect()
    }
}
