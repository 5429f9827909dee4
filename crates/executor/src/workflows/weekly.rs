use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use taskbridge_protocol::Params;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::registry::ActionHandler;

const LOOKBACK_DAYS: i64 = 7;
const SUMMARY_LIMIT: usize = 500;
const SUMMARISE_LIMIT: usize = 200;
const GIT_TIMEOUT: StdDuration = StdDuration::from_secs(10);
const POLL_INTERVAL: StdDuration = StdDuration::from_millis(50);

/// Lists the git repositories directly under `path` with their commits
/// from the last week.
#[derive(Debug, Clone)]
pub struct ScanDirectory {
    default_path: PathBuf,
}

impl ScanDirectory {
    pub fn new(default_path: PathBuf) -> Self {
        Self { default_path }
    }
}

impl ActionHandler for ScanDirectory {
    fn call(&self, params: &Params, _previous: Option<&Value>) -> Result<Value> {
        let requested = str_param(params, "path")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_path.clone());
        let root = fs::canonicalize(&requested)
            .with_context(|| format!("path does not exist: {}", requested.display()))?;
        if !root.is_dir() {
            bail!("not a directory: {}", root.display());
        }

        let since = (Utc::now() - Duration::days(LOOKBACK_DAYS))
            .format("%Y-%m-%d")
            .to_string();

        let mut repos = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("failed to read {}", root.display()))?;
            if !entry.file_type().is_dir() || !entry.path().join(".git").exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            repos.push(match recent_commits(entry.path(), &since) {
                Ok(commits) => json!({ "repo": name, "commits": commits }),
                Err(err) => json!({ "repo": name, "error": format!("{err:#}") }),
            });
        }

        debug!(root = %root.display(), repos = repos.len(), "Scanned directory");
        Ok(json!({
            "root": root.display().to_string(),
            "repos": repos,
            "since": since,
        }))
    }
}

fn recent_commits(repo: &Path, since: &str) -> Result<Vec<String>> {
    let mut command = Command::new("git");
    command
        .arg("-C")
        .arg(repo)
        .arg("log")
        .arg(format!("--since={since}"))
        .arg("--oneline");
    let output = output_with_timeout(&mut command, GIT_TIMEOUT)?;

    // A repository without commits makes git exit non-zero; that is an
    // empty history, not an error.
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Runs `command` to completion, killing it once `timeout` has passed.
/// Stderr is discarded.
fn output_with_timeout(command: &mut Command, timeout: StdDuration) -> Result<Output> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to run git")?;

    // Drain stdout on its own thread so a chatty child cannot block on a
    // full pipe while we wait on it.
    let mut stdout = child.stdout.take().context("child stdout not captured")?;
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).map(|_| buf)
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().context("failed to wait for git")? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("git timed out after {}s", timeout.as_secs());
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = reader
        .join()
        .map_err(|_| anyhow::anyhow!("git output reader panicked"))?
        .context("failed to read git output")?;
    Ok(Output {
        status,
        stdout,
        stderr: Vec::new(),
    })
}

/// Renders the preceding scan as a markdown report.
#[derive(Debug, Clone, Default)]
pub struct GenerateReport {
    report_dir: Option<PathBuf>,
}

impl GenerateReport {
    pub fn new(report_dir: Option<PathBuf>) -> Self {
        Self { report_dir }
    }
}

impl ActionHandler for GenerateReport {
    fn call(&self, params: &Params, previous: Option<&Value>) -> Result<Value> {
        let format = str_param(params, "format").unwrap_or("text");
        let report_text = render_report(previous);

        let report_path = match &self.report_dir {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                let file = dir.join(format!(
                    "weekly_report_{}.md",
                    Utc::now().format("%Y%m%d")
                ));
                fs::write(&file, &report_text)
                    .with_context(|| format!("failed to write {}", file.display()))?;
                info!(path = %file.display(), "Report written");
                Some(file.display().to_string())
            }
            None => None,
        };

        Ok(json!({
            "report_text": report_text,
            "report_path": report_path,
            "format": format,
        }))
    }
}

fn render_report(scan: Option<&Value>) -> String {
    let repos = scan
        .and_then(|s| s.get("repos"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let since = scan
        .and_then(|s| s.get("since"))
        .and_then(Value::as_str)
        .unwrap_or("N/A");

    let mut lines = vec![
        "# Weekly Dev Report".to_string(),
        format!("**Period**: {} → {}", since, Utc::now().format("%Y-%m-%d")),
        String::new(),
    ];

    if repos.is_empty() {
        lines.push("_No repositories found or no commits in the period._".to_string());
    }
    for repo in repos {
        let name = repo.get("repo").and_then(Value::as_str).unwrap_or("unknown");
        lines.push(format!("## {name}"));
        if let Some(error) = repo.get("error").and_then(Value::as_str) {
            lines.push(format!("  - error: {error}"));
        } else {
            let commits: Vec<&str> = repo
                .get("commits")
                .and_then(Value::as_array)
                .map(|c| c.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            if commits.is_empty() {
                lines.push("  _No commits this week._".to_string());
            }
            for commit in commits {
                lines.push(format!("  - {commit}"));
            }
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Prepares a summary for an external target. No integration is wired up,
/// so nothing is sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostSummary;

impl ActionHandler for PostSummary {
    fn call(&self, params: &Params, previous: Option<&Value>) -> Result<Value> {
        let target = str_param(params, "target").unwrap_or("slack");
        let summary = truncate_chars(
            previous
                .and_then(|p| p.get("report_text"))
                .and_then(Value::as_str)
                .unwrap_or_default(),
            SUMMARY_LIMIT,
        );
        info!(%target, summary_len = summary.len(), "Summary prepared (no integration configured)");
        Ok(json!({
            "target": target,
            "posted": false,
            "stub": true,
            "summary": summary,
            "message": format!("Summary ready for {target} (integration not configured)."),
        }))
    }
}

pub fn summarise_text(params: &Params, _previous: Option<&Value>) -> Result<Value> {
    let text = str_param(params, "text").unwrap_or_default();
    Ok(json!({ "summary": truncate_chars(text, SUMMARISE_LIMIT) }))
}

fn str_param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
