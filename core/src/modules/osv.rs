use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use tokio::process::Command;

use crate::core::report::RawFinding;
use crate::modules::VulnScanner;
use crate::repository::Project;
use crate::utils;

/// osv-scanner exits with 1 when it found vulnerabilities.
const EXIT_VULNERABILITIES_FOUND: i32 = 1;
/// ...and with 128 when the tree holds no lockfile it understands.
const EXIT_NO_PACKAGES_FOUND: i32 = 128;

#[derive(Debug, Default, Deserialize)]
pub struct OsvReport {
    #[serde(default)]
    pub results: Vec<OsvResult>,
}

#[derive(Debug, Deserialize)]
pub struct OsvResult {
    pub source: OsvSource,
    #[serde(default)]
    pub packages: Vec<OsvPackages>,
}

#[derive(Debug, Deserialize)]
pub struct OsvSource {
    pub path: String,
    #[serde(default)]
    pub r#type: String,
}

#[derive(Debug, Deserialize)]
pub struct OsvPackages {
    pub package: OsvPackage,
    #[serde(default)]
    pub vulnerabilities: Vec<OsvVulnerability>,
    #[serde(default)]
    pub groups: Vec<OsvGroup>,
}

#[derive(Debug, Deserialize)]
pub struct OsvPackage {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub ecosystem: String,
}

#[derive(Debug, Deserialize)]
pub struct OsvVulnerability {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub affected: Vec<OsvAffected>,
}

#[derive(Debug, Deserialize)]
pub struct OsvAffected {
    #[serde(default)]
    pub ranges: Vec<OsvRange>,
}

#[derive(Debug, Deserialize)]
pub struct OsvRange {
    #[serde(default)]
    pub events: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct OsvGroup {
    pub ids: Vec<String>,
    #[serde(default)]
    pub max_severity: String,
}

impl OsvVulnerability {
    fn fix_available(&self) -> bool {
        self.affected
            .iter()
            .flat_map(|a| a.ranges.iter())
            .flat_map(|r| r.events.iter())
            .any(|event| event.contains_key("fixed"))
    }
}

/// Runs the `osv-scanner` binary recursively over a source tree.
#[derive(Debug, Clone, Default)]
pub struct OsvScanner {
    binary: Option<String>,
}

impl OsvScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an explicit binary instead of searching `./tools` and `PATH`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: Some(binary.into()) }
    }

    fn binary(&self) -> anyhow::Result<String> {
        match &self.binary {
            Some(path) => Ok(path.clone()),
            None => utils::get_binary_path("osv-scanner")
                .ok_or_else(|| anyhow!("'osv-scanner' binary not found in ./tools, . or PATH")),
        }
    }
}

#[async_trait]
impl VulnScanner for OsvScanner {
    type Output = OsvReport;

    async fn scan(&self, dir: &Path) -> anyhow::Result<OsvReport> {
        let binary = self.binary()?;
        debug!("Running {} on {}", binary, dir.display());

        let output = Command::new(&binary)
            .args(["--format", "json", "-r"])
            .arg(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to start osv-scanner ({})", binary))?;

        match output.status.code() {
            Some(0) | Some(EXIT_VULNERABILITIES_FOUND) => {
                let mut report = parse_report(&output.stdout)?;
                relativize_sources(&mut report, dir);
                Ok(report)
            }
            Some(EXIT_NO_PACKAGES_FOUND) => {
                info!("osv-scanner found no packages in {}", dir.display());
                Ok(OsvReport::default())
            }
            code => bail!(
                "osv-scanner exited with status {:?}: {}",
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }

    fn findings(&self, _project: &Project, output: OsvReport) -> Vec<RawFinding> {
        let mut findings = Vec::new();

        for result in output.results {
            for packages in result.packages {
                for vuln in &packages.vulnerabilities {
                    let severity = packages
                        .groups
                        .iter()
                        .find(|g| g.ids.iter().any(|id| id == &vuln.id))
                        .map(|g| g.max_severity.clone())
                        .unwrap_or_default();

                    findings.push(RawFinding {
                        id: vuln.id.clone(),
                        package_name: packages.package.name.clone(),
                        package_version: packages.package.version.clone().unwrap_or_default(),
                        package_url: String::new(),
                        package_ecosystem: packages.package.ecosystem.clone(),
                        source: result.source.path.clone(),
                        severity,
                        summary: vuln.summary.clone().unwrap_or_default(),
                        details: vuln.details.clone().unwrap_or_default(),
                        fix_available: vuln.fix_available(),
                    });
                }
            }
        }

        findings
    }
}

pub fn parse_report(stdout: &[u8]) -> anyhow::Result<OsvReport> {
    serde_json::from_slice(stdout).context("Failed to parse osv-scanner JSON output")
}

fn relativize_sources(report: &mut OsvReport, dir: &Path) {
    for result in report.results.iter_mut() {
        if let Ok(relative) = Path::new(&result.source.path).strip_prefix(dir) {
            result.source.path = relative.to_string_lossy().to_string();
        }
    }
}
