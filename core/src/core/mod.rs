pub mod engine;
pub mod pagination;
pub mod patrol;
pub mod project_config;
pub mod report;
pub mod result_aggregator;
pub mod retry;
pub mod severity;
pub mod target;
pub mod warnings;

use serde::{Deserialize, Serialize};

/// Severity bucket a finding is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityScoreKind {
    Critical,
    High,
    Moderate,
    Low,
    Unknown,
    Acknowledged,
}

impl SeverityScoreKind {
    pub const ALL: [SeverityScoreKind; 6] = [
        SeverityScoreKind::Critical,
        SeverityScoreKind::High,
        SeverityScoreKind::Moderate,
        SeverityScoreKind::Low,
        SeverityScoreKind::Unknown,
        SeverityScoreKind::Acknowledged,
    ];
}

impl std::fmt::Display for SeverityScoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeverityScoreKind::Critical => write!(f, "CRITICAL"),
            SeverityScoreKind::High => write!(f, "HIGH"),
            SeverityScoreKind::Moderate => write!(f, "MODERATE"),
            SeverityScoreKind::Low => write!(f, "LOW"),
            SeverityScoreKind::Unknown => write!(f, "UNKNOWN"),
            SeverityScoreKind::Acknowledged => write!(f, "ACKNOWLEDGED"),
        }
    }
}
