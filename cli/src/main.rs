use clap::Parser;
use colored::*;
use log::{error, warn};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use sheriff_core::{
    ChatService, GithubService, GitlabService, OsvScanner, PatrolArgs, PatrolService, Platform,
    Platforms, ReportTarget, RunConfig, ScanLocation, SlackClient, RUN_CONFIG_FILE,
};

const EXIT_WARNINGS: i32 = 1;
const EXIT_FATAL: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "sheriff",
    version,
    about = "Patrols GitLab and GitHub projects for vulnerable dependencies",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Scan a GitLab group:            sheriff --url gitlab://acme/backend
  Scan a GitHub organisation:     sheriff --url github://acme
  Report to Slack and issues:     sheriff --url gitlab://acme/backend --report-to slack://security --report-to issue://
  Project-level Slack reports:    sheriff --url gitlab://acme/backend --report-to slack://security --enable-project-report-to
  Settings from a file:           sheriff --config patrol.toml"
)]
pub struct Args {
    #[arg(long = "url", value_name = "PLATFORM://PATH",
        help = "Group, organisation or project to scan (repeatable)")]
    pub url: Vec<String>,

    #[arg(long = "report-to", value_name = "SERVICE://NAME",
        help = "Where to send the report: slack://<channel> or issue:// (repeatable)")]
    pub report_to: Vec<String>,

    #[arg(long, default_value_t = false,
        help = "Also report to the channel each project names in its own sheriff.toml (off by default)")]
    pub enable_project_report_to: bool,

    #[arg(long = "silent", default_value_t = false, help = "Do not print the report to stdout")]
    pub silent: bool,

    #[arg(short = 'v', long, default_value_t = false, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, value_name = "FILE",
        help = "Configuration file (defaults to ./sheriff.toml when present)")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true, help = "Token to access the GitLab API")]
    pub gitlab_token: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, help = "Token to access the GitHub API")]
    pub github_token: Option<String>,

    #[arg(long, env = "SLACK_TOKEN", hide_env_values = true, help = "Token to access the Slack API")]
    pub slack_token: Option<String>,

    #[arg(long, value_name = "N", help = "Maximum number of projects scanned at once (unbounded by default)")]
    pub max_concurrent_scans: Option<usize>,

    #[arg(long, value_name = "DIR", help = "Directory for temporary checkouts (system temp dir by default)")]
    pub work_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    init_logger(args.verbose);

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprint!("{}\r\n", format!("[!] {:#}", e).red());
            EXIT_FATAL
        }
    };
    process::exit(code);
}

fn init_logger(verbose: bool) {
    let default_filter = if verbose {
        "info,sheriff=debug,sheriff_core=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let file_config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::load_optional(Path::new(RUN_CONFIG_FILE))?,
    };
    let patrol_args = build_patrol_args(&args, &file_config)?;
    let service = build_service(&args, &patrol_args)?;

    let result = service.patrol(&patrol_args).await?;

    match result.warnings {
        None => {
            eprint!(
                "{}\r\n",
                format!("[+] Patrol complete: {} project(s) scanned.", result.reports.len())
                    .green()
                    .bold()
            );
            Ok(0)
        }
        Some(warnings) => {
            for w in warnings.iter() {
                warn!("{:#}", w);
            }
            eprint!(
                "{}\r\n",
                format!(
                    "[~] Patrol complete with {} warning(s): {} project(s) scanned.",
                    warnings.len(),
                    result.reports.len()
                )
                .yellow()
                .bold()
            );
            Ok(EXIT_WARNINGS)
        }
    }
}

/// Merges command line and file configuration; the command line wins.
fn build_patrol_args(args: &Args, file: &RunConfig) -> anyhow::Result<PatrolArgs> {
    let locations: Vec<ScanLocation> = if args.url.is_empty() {
        file.scan_locations()?
    } else {
        args.url.iter().map(|u| u.parse()).collect::<anyhow::Result<_>>()?
    };

    let report_to: Vec<ReportTarget> = if args.report_to.is_empty() {
        file.report_targets()?
    } else {
        args.report_to.iter().map(|t| t.parse()).collect::<anyhow::Result<_>>()?
    };

    Ok(PatrolArgs {
        locations,
        report_to,
        enable_project_report_to: args.enable_project_report_to || file.enable_project_report_to,
        silent_report: args.silent || file.silent,
        verbose: args.verbose,
        max_concurrent_scans: args.max_concurrent_scans,
        work_dir: args.work_dir.clone(),
    })
}

/// Wires the platform, scanner and chat services a patrol needs. Every
/// platform a target uses must have a token.
fn build_service(args: &Args, patrol: &PatrolArgs) -> anyhow::Result<PatrolService<OsvScanner>> {
    let uses = |platform: Platform| patrol.locations.iter().any(|l| l.platform == platform);
    let mut platforms = Platforms::new();

    if uses(Platform::Gitlab) {
        let token = require_token(&args.gitlab_token, "GITLAB_TOKEN", "gitlab")?;
        platforms = platforms.with(Platform::Gitlab, Arc::new(GitlabService::new(token)?));
    }
    if uses(Platform::Github) {
        let token = require_token(&args.github_token, "GITHUB_TOKEN", "github")?;
        platforms = platforms.with(Platform::Github, Arc::new(GithubService::new(token)?));
    }

    let wants_slack = patrol.enable_project_report_to
        || patrol.report_to.iter().any(|t| matches!(t, ReportTarget::Slack(_)));
    let chat = if wants_slack {
        let token = require_token(&args.slack_token, "SLACK_TOKEN", "slack")?;
        Some(Arc::new(ChatService::new(Arc::new(SlackClient::new(token)?))))
    } else {
        None
    };

    Ok(PatrolService::new(platforms, OsvScanner::new(), chat))
}

fn require_token<'a>(token: &'a Option<String>, env: &str, service: &str) -> anyhow::Result<&'a str> {
    token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("a {} token is required (--{}-token or {})", service, service, env))
}
