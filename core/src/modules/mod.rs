pub mod osv;

use std::path::Path;

use async_trait::async_trait;

use crate::core::report::RawFinding;
use crate::repository::Project;

/// An external vulnerability scanner run against a fetched source tree.
#[async_trait]
pub trait VulnScanner: Send + Sync {
    /// Scanner-specific output of one run.
    type Output: Send;

    async fn scan(&self, dir: &Path) -> anyhow::Result<Self::Output>;

    /// Maps the scanner's output onto findings for `project`.
    fn findings(&self, project: &Project, output: Self::Output) -> Vec<RawFinding>;
}
