use std::io::{self, Write};

use anyhow::Context;
use colored::*;

use crate::core::report::Report;
use crate::core::severity::SeverityThresholds;
use crate::core::SeverityScoreKind;

/// Terminal output of a patrol: a coloured line per project, then the full
/// report set as JSON for piping.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn print(reports: &[Report], thresholds: &SeverityThresholds) -> anyhow::Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        Self::write_to(&mut out, reports, thresholds)?;
        out.flush().ok();
        Ok(())
    }

    pub fn write_to<W: Write>(out: &mut W, reports: &[Report], thresholds: &SeverityThresholds) -> anyhow::Result<()> {
        writeln!(out, "{}", "──────────────────────────────────────────".dimmed())?;
        for report in reports {
            writeln!(out, "{}", summary_line(report, thresholds))?;
        }
        writeln!(out, "{}", "──────────────────────────────────────────".dimmed())?;

        let json = serde_json::to_string_pretty(reports).context("Failed to serialize reports")?;
        writeln!(out, "{}", json)?;
        Ok(())
    }
}

fn summary_line(report: &Report, thresholds: &SeverityThresholds) -> String {
    let name = report.project.path.bold();

    if report.error {
        return format!("{} {} scan failed", "[!]".red().bold(), name);
    }
    if report.vulnerabilities.is_empty() {
        return format!("{} {} no vulnerabilities", "[+]".green().bold(), name);
    }

    let counts: Vec<String> = thresholds
        .display_order()
        .into_iter()
        .filter_map(|kind| {
            let n = report.count_of(kind);
            (n > 0).then(|| colorize(kind, &format!("{} {}", n, kind)))
        })
        .collect();

    let marker = if report.is_vulnerable {
        "[-]".red().bold()
    } else {
        "[~]".yellow().bold()
    };
    format!("{} {} {}", marker, name, counts.join(", "))
}

fn colorize(kind: SeverityScoreKind, text: &str) -> String {
    match kind {
        SeverityScoreKind::Critical => text.red().bold().to_string(),
        SeverityScoreKind::High => text.red().to_string(),
        SeverityScoreKind::Moderate => text.yellow().to_string(),
        SeverityScoreKind::Low => text.cyan().to_string(),
        SeverityScoreKind::Unknown => text.dimmed().to_string(),
        SeverityScoreKind::Acknowledged => text.green().to_string(),
    }
}
