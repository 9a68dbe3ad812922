//! issue-dedup - duplicate issue and pull request detection
//!
//! Invoked once per newly filed item (typically from a CI workflow). Reads
//! the item from flags or `ISSUE_*` / `PR_*` environment variables.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use issue_dedup::config::{DetectorConfig, DEFAULT_CONFIG_PATH};
use issue_dedup::github::{self, GitHubGateway};
use issue_dedup::{Action, Detector, ItemGateway, ItemKind, Query, RunReport};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Issue,
    Pr,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Issue => ItemKind::Issue,
            KindArg::Pr => ItemKind::PullRequest,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "issue-dedup",
    about = "Detect duplicate issues and PRs",
    long_about = "Compares a newly filed issue or pull request against existing ones\n\
                  using TF-IDF similarity, then labels, comments on, and optionally\n\
                  closes it. Requires GITHUB_TOKEN in the environment.",
    version
)]
struct Args {
    /// Type of item to check (issue or pr)
    #[arg(long = "type", value_enum)]
    kind: KindArg,

    /// Path to configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Repository as owner/name (defaults to the current git remote)
    #[arg(long, env = "REPOSITORY")]
    repo: Option<String>,

    /// Item number (defaults to ISSUE_NUMBER or PR_NUMBER)
    #[arg(long)]
    number: Option<u64>,

    /// Item title (defaults to ISSUE_TITLE or PR_TITLE)
    #[arg(long)]
    title: Option<String>,

    /// Item body (defaults to ISSUE_BODY or PR_BODY)
    #[arg(long)]
    body: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    let kind = ItemKind::from(args.kind);

    let token = github::get_token()
        .context("GITHUB_TOKEN environment variable is required")?;
    let (owner, repo) = resolve_repository(args.repo.as_deref())?;
    let query = resolve_query(
        kind,
        args.number,
        args.title,
        args.body,
        |key| std::env::var(key).ok(),
    )?;

    let config = DetectorConfig::load(&args.config);
    tracing::debug!(?config, "loaded configuration");

    let gateway = GitHubGateway::new(&github::api_base_url(), &owner, &repo, &token)?;
    gateway
        .verify_access()
        .await
        .context("Error initializing GitHub connection")?;

    let banner = "=".repeat(60);
    println!("\n{}", banner);
    println!("Processing {} #{}: {}", kind, query.number, query.title);
    println!("{}\n", banner);

    let report = Detector::new(&gateway, &config).process_item(&query).await;
    print_summary(&query, &report);

    println!("\n{}", banner);
    println!("✅ Duplicate detection completed successfully");
    println!("{}\n", banner);
    Ok(())
}

fn resolve_repository(repo: Option<&str>) -> Result<(String, String)> {
    match repo.filter(|r| !r.trim().is_empty()) {
        Some(full_name) => github::parse_repository(full_name).with_context(|| {
            format!("Invalid repository '{}', expected owner/name", full_name)
        }),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            github::get_remote_info(&cwd)
        }
    }
}

/// Build the query from flags, falling back to `{ISSUE,PR}_{NUMBER,TITLE,BODY}`.
fn resolve_query<F>(
    kind: ItemKind,
    number: Option<u64>,
    title: Option<String>,
    body: Option<String>,
    env: F,
) -> Result<Query>
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = kind.cli_name().to_uppercase();

    let number = match number {
        Some(n) => n,
        None => {
            let key = format!("{}_NUMBER", prefix);
            match env(&key).filter(|v| !v.trim().is_empty()) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{} is not a number: {}", key, raw))?,
                None => 0,
            }
        }
    };
    if number == 0 {
        anyhow::bail!("{}_NUMBER not found", prefix);
    }

    let title = title
        .or_else(|| env(&format!("{}_TITLE", prefix)))
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    let title = if title.is_empty() {
        tracing::warn!("{}_TITLE is empty", prefix);
        format!("Untitled {}", kind.cli_name())
    } else {
        title
    };

    let body = body
        .or_else(|| env(&format!("{}_BODY", prefix)))
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty());

    Ok(Query {
        number,
        title,
        body,
        kind,
    })
}

fn print_summary(query: &Query, report: &RunReport) {
    match &report.action {
        Action::NoAction => {
            println!("✅ No duplicates found for {} #{}", query.kind, query.number);
        }
        Action::FlagPossible { matches } | Action::FlagExact { matches, .. } => {
            println!("🔍 Found {} similar {}(s):", matches.len(), query.kind);
            for m in matches {
                println!(
                    "  - #{}: {} (Similarity: {:.2}%)",
                    m.number,
                    issue_dedup::util::truncate(&m.title, 60),
                    m.score * 100.0
                );
            }
        }
    }
    if let Some(target) = report.closed_as_duplicate_of {
        println!("🔒 Closed as duplicate of #{}", target);
    }
    if !report.failures.is_empty() {
        println!("⚠️  {} step(s) failed:", report.failures.len());
        for failure in &report.failures {
            println!("  - {}: {}", failure.step, failure.message);
        }
    }
}
