//! Ticket-tracker and change-request platform client.
//!
//! One trait per collaborator kind: the schedulers and the merge sequencer
//! talk to [`Forge`], and the production implementation shells out to the
//! `gh` CLI with `--json` payloads parsed by serde. Tests substitute
//! in-memory fakes.

use crate::tasks::Task;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug)]
pub enum ForgeError {
    CommandFailed(String),
    ParseError(String),
}

impl std::fmt::Display for ForgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForgeError::CommandFailed(msg) => write!(f, "forge command failed: {msg}"),
            ForgeError::ParseError(msg) => write!(f, "forge response parse error: {msg}"),
        }
    }
}

impl std::error::Error for ForgeError {}

/// State of a change request on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRequestState {
    Open,
    Merged,
    Closed,
    Other(String),
}

impl ChangeRequestState {
    fn from_wire(s: &str) -> Self {
        match s {
            "OPEN" => ChangeRequestState::Open,
            "MERGED" => ChangeRequestState::Merged,
            "CLOSED" => ChangeRequestState::Closed,
            other => ChangeRequestState::Other(other.to_string()),
        }
    }
}

/// Merge strategy the platform should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MergeStrategy {
    Squash,
    Merge,
    Rebase,
}

impl MergeStrategy {
    fn gh_flag(self) -> &'static str {
        match self {
            MergeStrategy::Squash => "--squash",
            MergeStrategy::Merge => "--merge",
            MergeStrategy::Rebase => "--rebase",
        }
    }
}

pub trait Forge: Send + Sync {
    /// List open tracker issues as tasks.
    fn list_open_tasks(&self) -> Result<Vec<Task>, ForgeError>;

    /// Create a tracker issue, returning its assigned id.
    fn create_task(&self, title: &str, body: &str) -> Result<u64, ForgeError>;

    fn close_task(&self, id: u64) -> Result<(), ForgeError>;

    /// Create a change request for an already-pushed branch, returning its
    /// number. `cwd` is the worktree the branch lives in.
    fn create_change_request(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
        cwd: &Path,
    ) -> Result<u64, ForgeError>;

    fn change_request_state(&self, id: u64) -> Result<ChangeRequestState, ForgeError>;

    fn merge_change_request(&self, id: u64, strategy: MergeStrategy) -> Result<(), ForgeError>;

    fn retarget_change_request(&self, id: u64, new_base: &str) -> Result<(), ForgeError>;
}

// ---------------------------------------------------------------------------
// gh-backed implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    author: Option<GhAuthor>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhAuthor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhPrView {
    state: String,
}

pub struct GhForge {
    repo_root: PathBuf,
    /// When non-empty, `list_open_tasks` keeps only these authors.
    allowed_authors: Vec<String>,
}

impl GhForge {
    pub fn new(repo_root: impl Into<PathBuf>, allowed_authors: Vec<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            allowed_authors,
        }
    }

    fn run_gh(&self, args: &[&str], cwd: &Path) -> Result<String, ForgeError> {
        log::debug!("$ gh {} (in {})", args.join(" "), cwd.display());
        let output = Command::new("gh")
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| ForgeError::CommandFailed(format!("failed to spawn gh: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ForgeError::CommandFailed(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Forge for GhForge {
    fn list_open_tasks(&self) -> Result<Vec<Task>, ForgeError> {
        let stdout = self.run_gh(
            &[
                "issue",
                "list",
                "--state",
                "open",
                "--limit",
                "200",
                "--json",
                "number,title,body,labels,author",
            ],
            &self.repo_root,
        )?;

        let issues: Vec<GhIssue> =
            serde_json::from_str(&stdout).map_err(|e| ForgeError::ParseError(e.to_string()))?;

        Ok(issues
            .into_iter()
            .filter(|issue| {
                self.allowed_authors.is_empty()
                    || issue
                        .author
                        .as_ref()
                        .is_some_and(|a| self.allowed_authors.contains(&a.login))
            })
            .map(|issue| Task {
                id: issue.number,
                title: issue.title,
                body: issue.body.unwrap_or_default(),
                labels: issue
                    .labels
                    .into_iter()
                    .map(|l| l.name)
                    .collect::<BTreeSet<_>>(),
            })
            .collect())
    }

    fn create_task(&self, title: &str, body: &str) -> Result<u64, ForgeError> {
        let stdout = self.run_gh(
            &["issue", "create", "--title", title, "--body", body],
            &self.repo_root,
        )?;
        parse_trailing_number(&stdout).ok_or_else(|| {
            ForgeError::ParseError(format!("no issue number in gh output: {stdout:?}"))
        })
    }

    fn close_task(&self, id: u64) -> Result<(), ForgeError> {
        self.run_gh(&["issue", "close", &id.to_string()], &self.repo_root)?;
        Ok(())
    }

    fn create_change_request(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
        cwd: &Path,
    ) -> Result<u64, ForgeError> {
        let stdout = self.run_gh(
            &[
                "pr", "create", "--title", title, "--body", body, "--base", base, "--head", head,
            ],
            cwd,
        )?;
        parse_trailing_number(&stdout).ok_or_else(|| {
            ForgeError::ParseError(format!("no change-request number in gh output: {stdout:?}"))
        })
    }

    fn change_request_state(&self, id: u64) -> Result<ChangeRequestState, ForgeError> {
        let stdout = self.run_gh(
            &["pr", "view", &id.to_string(), "--json", "state"],
            &self.repo_root,
        )?;
        let view: GhPrView =
            serde_json::from_str(&stdout).map_err(|e| ForgeError::ParseError(e.to_string()))?;
        Ok(ChangeRequestState::from_wire(&view.state))
    }

    fn merge_change_request(&self, id: u64, strategy: MergeStrategy) -> Result<(), ForgeError> {
        self.run_gh(
            &[
                "pr",
                "merge",
                &id.to_string(),
                strategy.gh_flag(),
                "--delete-branch",
            ],
            &self.repo_root,
        )?;
        Ok(())
    }

    fn retarget_change_request(&self, id: u64, new_base: &str) -> Result<(), ForgeError> {
        self.run_gh(
            &["pr", "edit", &id.to_string(), "--base", new_base],
            &self.repo_root,
        )?;
        Ok(())
    }
}

/// `gh issue create` and `gh pr create` print the created item's URL; the
/// number is the trailing path segment.
fn parse_trailing_number(output: &str) -> Option<u64> {
    output
        .lines()
        .rev()
        .find_map(|line| line.trim().rsplit('/').next()?.parse().ok())
}
