use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use log::{error, info};
use serde_json::{json, Value};

use crate::chat::{ChatMessage, ChatService};
use crate::core::report::Report;
use crate::core::severity::SeverityThresholds;
use crate::core::target::ScanLocation;
use crate::core::warnings::Warnings;
use crate::core::SeverityScoreKind;

/// Slack rejects section texts above 3000 characters.
pub const MESSAGE_CHAR_LIMIT: usize = 3000;

/// Posts the run summary to `channel` and the per-project details as
/// replies in its thread.
pub async fn publish_summary(
    chat: &ChatService,
    channel: &str,
    reports: &[Report],
    locations: &[ScanLocation],
    thresholds: &SeverityThresholds,
    date: &str,
) -> anyhow::Result<()> {
    let summary = format_summary(reports, locations, thresholds, date);
    let ts = chat
        .post_message(channel, &summary, None)
        .await
        .context("failed to post slack summary")?;
    info!("Posted summary to #{}", channel);

    let details = format_thread_text(reports, thresholds);
    for chunk in split_message(&details, MESSAGE_CHAR_LIMIT) {
        let message = ChatMessage::new(chunk, vec![section(chunk)]);
        chat.post_message(channel, &message, Some(&ts))
            .await
            .context("failed to post message in slack summary thread")?;
    }

    Ok(())
}

/// Sends each project that names its own channel a compact report.
pub async fn publish_project_messages(chat: Arc<ChatService>, reports: &[Report], date: &str) -> Warnings {
    let sends = reports.iter().filter_map(|report| {
        let channel = report.project_config.report_to_slack_channel()?.to_string();
        let chat = chat.clone();
        let message = format_project_message(report, date);
        Some(async move {
            let result = chat.post_message(&channel, &message, None).await;
            (channel, result)
        })
    });

    let mut warnings = Warnings::new();
    for (channel, result) in join_all(sends).await {
        if let Err(e) = result {
            error!("[#{}] Failed to post project report: {:#}", channel, e);
            warnings.push(e.context(format!("failed to post slack report to channel {}", channel)));
        }
    }
    warnings
}

/// Splits `text` into chunks of at most `max_chars` characters, cutting just
/// after the last newline in range or hard at the limit when there is none.
/// The chunks concatenate back to `text`.
pub fn split_message(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let Some((limit, _)) = rest.char_indices().nth(max_chars) else {
            chunks.push(rest);
            break;
        };
        let cut = match rest[..limit].rfind('\n') {
            Some(newline) => newline + 1,
            None => limit,
        };
        chunks.push(&rest[..cut]);
        rest = &rest[cut..];
    }

    chunks
}

pub fn format_summary(
    reports: &[Report],
    locations: &[ScanLocation],
    thresholds: &SeverityThresholds,
    date: &str,
) -> ChatMessage {
    let title = format!("Security Scan Report {}", date);
    let targets: Vec<String> = locations.iter().map(|l| l.to_string()).collect();
    let targets_text = match targets.as_slice() {
        [] => "no targets scanned".to_string(),
        [single] => format!("targets scanned: {}", single),
        many => format!("targets scanned:\n\t- {}", many.join("\n\t- ")),
    };

    let counts: Vec<Value> = thresholds
        .display_order()
        .into_iter()
        .map(|kind| {
            let n: usize = reports.iter().map(|r| r.count_of(kind)).sum();
            mrkdwn(&format!("{}: *{}*", kind_label(kind), n))
        })
        .collect();

    let blocks = vec![
        json!({ "type": "header", "text": { "type": "plain_text", "text": title, "emoji": true } }),
        context(&targets_text),
        context(&format!("Total projects scanned: {}", reports.len())),
        section("*Vulnerability Counts*"),
        json!({ "type": "section", "fields": counts }),
    ];

    ChatMessage::new(title, blocks)
}

/// Projects grouped by their most severe finding, most severe group first.
/// Failed scans come last.
pub fn format_thread_text(reports: &[Report], thresholds: &SeverityThresholds) -> String {
    let mut by_kind: HashMap<SeverityScoreKind, Vec<&Report>> = HashMap::new();
    for report in reports.iter().filter(|r| !r.error) {
        if let Some(kind) = report.max_severity_kind(thresholds) {
            by_kind.entry(kind).or_default().push(report);
        }
    }

    let mut text = String::new();
    for kind in thresholds.display_order() {
        let Some(group) = by_kind.get(&kind) else {
            continue;
        };

        let _ = writeln!(text, "Projects with vulnerabilities of *{}* severity", kind_label(kind));
        for r in group {
            let _ = writeln!(text, "<{}|*{}*>", r.project.web_url, r.project.name);
            match &r.issue_url {
                Some(url) => {
                    let _ = write!(text, "\t<{}|Full report>\t\t", url);
                }
                None => text.push_str("\t_full report unavailable_\t\t"),
            }
            let _ = writeln!(text, "\tVulnerability count: *{}*", r.vulnerabilities.len());
        }
        text.push('\n');
    }

    let failed: Vec<&Report> = reports.iter().filter(|r| r.error).collect();
    if !failed.is_empty() {
        text.push_str("Unsuccessfully scanned\n");
        for r in failed {
            let _ = writeln!(text, "<{}|*{}*>", r.project.web_url, r.project.name);
        }
    }

    text
}

pub fn format_project_message(report: &Report, date: &str) -> ChatMessage {
    let title = format!("Sheriff Report {}", date);
    let subtitle = format!("Project: <{}|*{}*>", report.project.web_url, report.project.path);
    let full_report = match &report.issue_url {
        Some(url) => format!("Full report: <{}|*Full report*>", url),
        None => "\t_full report unavailable_\t\t".to_string(),
    };

    let counts: Vec<Value> = SeverityScoreKind::ALL
        .iter()
        .map(|kind| mrkdwn(&format!("{}: *{}*", kind_label(*kind), report.count_of(*kind))))
        .collect();

    let blocks = vec![
        json!({ "type": "header", "text": { "type": "plain_text", "text": title, "emoji": true } }),
        context(&subtitle),
        context(&full_report),
        section(&format!("*Vulnerability Counts* (total {})", report.vulnerabilities.len())),
        json!({ "type": "section", "fields": counts }),
    ];

    ChatMessage::new(format!("{} - {}", title, report.project.path), blocks)
}

fn kind_label(kind: SeverityScoreKind) -> &'static str {
    match kind {
        SeverityScoreKind::Critical => "Critical",
        SeverityScoreKind::High => "High",
        SeverityScoreKind::Moderate => "Moderate",
        SeverityScoreKind::Low => "Low",
        SeverityScoreKind::Unknown => "Unknown",
        SeverityScoreKind::Acknowledged => "Acknowledged",
    }
}

fn mrkdwn(text: &str) -> Value {
    json!({ "type": "mrkdwn", "text": text })
}

fn section(text: &str) -> Value {
    json!({ "type": "section", "text": mrkdwn(text) })
}

fn context(text: &str) -> Value {
    json!({ "type": "context", "elements": [mrkdwn(text)] })
}
