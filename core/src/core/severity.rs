use std::cmp::Ordering;

use crate::core::SeverityScoreKind;

/// Lower bounds (inclusive) of each severity kind, inferred from CVSS scores
/// seen in the wild. Unknown and Acknowledged carry arbitrary sentinels.
const DEFAULT_THRESHOLDS: [(SeverityScoreKind, f64); 6] = [
    (SeverityScoreKind::Critical, 9.0),
    (SeverityScoreKind::High, 8.0),
    (SeverityScoreKind::Moderate, 3.0),
    (SeverityScoreKind::Low, 0.0),
    (SeverityScoreKind::Unknown, -1.0),
    (SeverityScoreKind::Acknowledged, -2.0),
];

/// Immutable threshold table shared by classification and formatting.
///
/// Entries are kept sorted by descending threshold. Acknowledged never comes
/// out of a score and always displays last.
#[derive(Debug, Clone, PartialEq)]
pub struct SeverityThresholds {
    entries: Vec<(SeverityScoreKind, f64)>,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLDS)
    }
}

impl SeverityThresholds {
    pub fn new(entries: impl IntoIterator<Item = (SeverityScoreKind, f64)>) -> Self {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        Self { entries }
    }

    /// Kind of a live finding: the highest threshold the score meets.
    /// Scores that do not parse as numbers are Unknown.
    pub fn classify(&self, score: &str) -> SeverityScoreKind {
        let value = match score.trim().parse::<f64>() {
            Ok(v) if !v.is_nan() => v,
            _ => return SeverityScoreKind::Unknown,
        };

        self.entries
            .iter()
            .filter(|(kind, _)| *kind != SeverityScoreKind::Acknowledged)
            .find(|(_, threshold)| value >= *threshold)
            .map(|(kind, _)| *kind)
            .unwrap_or(SeverityScoreKind::Unknown)
    }

    /// Kinds from most to least severe, Acknowledged last.
    pub fn display_order(&self) -> Vec<SeverityScoreKind> {
        let mut order: Vec<_> = self
            .entries
            .iter()
            .map(|(kind, _)| *kind)
            .filter(|kind| *kind != SeverityScoreKind::Acknowledged)
            .collect();
        order.push(SeverityScoreKind::Acknowledged);
        order
    }

    /// Position in the display order, lower is more severe.
    pub fn rank(&self, kind: SeverityScoreKind) -> usize {
        self.display_order()
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(usize::MAX)
    }
}

/// Orders raw scores from highest to lowest. Non-numeric scores go after
/// numeric ones, compared as plain strings.
pub fn compare_scores_desc(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => y.total_cmp(&x),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => b.cmp(a),
    }
}
