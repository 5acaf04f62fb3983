pub mod chat;
pub mod console;
pub mod issue;

pub use console::ConsoleSink;

use std::sync::Arc;

use anyhow::anyhow;
use log::{error, info};

use crate::chat::ChatService;
use crate::core::report::Report;
use crate::core::severity::SeverityThresholds;
use crate::core::target::{ReportTarget, ScanLocation};
use crate::core::warnings::Warnings;
use crate::repository::Platforms;

/// Where and how a patrol's reports go out.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub report_to: Vec<ReportTarget>,
    pub enable_project_report_to: bool,
    pub silent: bool,
}

/// Fans the reports out to the configured sinks. A failing sink only adds
/// warnings; it never keeps the others from running.
pub struct Publisher {
    platforms: Platforms,
    chat: Option<Arc<ChatService>>,
    thresholds: Arc<SeverityThresholds>,
}

impl Publisher {
    pub fn new(platforms: Platforms, chat: Option<Arc<ChatService>>, thresholds: Arc<SeverityThresholds>) -> Self {
        Self { platforms, chat, thresholds }
    }

    pub async fn publish(
        &self,
        reports: &mut [Report],
        locations: &[ScanLocation],
        options: &PublishOptions,
    ) -> Warnings {
        let mut warnings = Warnings::new();
        let date = chrono::Local::now().format("%Y-%m-%d").to_string();

        // Issues go first so chat messages can link them.
        if options.report_to.contains(&ReportTarget::Issue) {
            info!("Publishing {} reports as issues", reports.len());
            let issue_warnings = issue::publish_as_issues(&self.platforms, reports, &self.thresholds).await;
            warnings.merge("issue publishing had failures", issue_warnings);
        }

        let channels: Vec<&str> = options
            .report_to
            .iter()
            .filter_map(|target| match target {
                ReportTarget::Slack(channel) => Some(channel.as_str()),
                ReportTarget::Issue => None,
            })
            .collect();

        if !channels.is_empty() || options.enable_project_report_to {
            match &self.chat {
                Some(chat) => {
                    let reports: &[Report] = reports;
                    let general = async {
                        let mut general_warnings = Warnings::new();
                        for channel in &channels {
                            if let Err(e) = chat::publish_summary(
                                chat,
                                channel,
                                reports,
                                locations,
                                &self.thresholds,
                                &date,
                            )
                            .await
                            {
                                error!("[#{}] Failed to publish summary: {:#}", channel, e);
                                general_warnings.push(e.context(format!("failed to publish summary to #{}", channel)));
                            }
                        }
                        general_warnings
                    };
                    let specific = async {
                        if options.enable_project_report_to {
                            chat::publish_project_messages(chat.clone(), reports, &date).await
                        } else {
                            Warnings::new()
                        }
                    };

                    let (general_warnings, specific_warnings) = tokio::join!(general, specific);
                    warnings.extend(general_warnings);
                    warnings.merge("project-level slack reports had failures", specific_warnings);
                }
                None => {
                    let e = anyhow!("slack reporting requested but no slack client is configured");
                    error!("{}", e);
                    warnings.push(e);
                }
            }
        }

        if !options.silent {
            if let Err(e) = ConsoleSink::print(reports, &self.thresholds) {
                warnings.push(e.context("failed to print reports to console"));
            }
        }

        warnings
    }
}
