//! Test utilities: isolated git repositories and in-memory collaborators.
//!
//! `TestRepo` creates a throwaway git repository in a temp directory with a
//! deterministic, isolated environment (no global config, fixed dates,
//! C locale). `FnAgent` and `FakeForge` stand in for the agent subprocess
//! and the platform client so scheduler tests run without network access.

#![allow(dead_code)]

use pai::agent::{Agent, AgentOutcome, AgentRequest};
use pai::forge::{ChangeRequestState, Forge, ForgeError, MergeStrategy};
use pai::tasks::Task;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

pub struct TestRepo {
    temp_dir: TempDir, // held for cleanup on drop
    root: PathBuf,
    remote: Option<PathBuf>,
}

impl TestRepo {
    /// Create a repository with one initial commit on `master`.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let root = temp_dir.path().join("test-repo");
        std::fs::create_dir(&root).expect("failed to create repo directory");
        let root = root.canonicalize().expect("failed to canonicalize path");

        let repo = Self {
            temp_dir,
            root,
            remote: None,
        };

        repo.git(&["init", "-b", "master"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.write_file("README.md", "initial\n");
        repo.git(&["add", "-A"]);
        repo.git(&["commit", "-m", "initial commit"]);
        repo
    }

    /// Add a bare `origin` remote so pushes have somewhere to go.
    pub fn with_remote(mut self) -> Self {
        let remote = self.temp_dir.path().join("origin.git");
        run_git_in(self.temp_dir.path(), &["init", "--bare", "origin.git"]);
        self.git(&["remote", "add", "origin", remote.to_str().unwrap()]);
        self.git(&["push", "-u", "origin", "master"]);
        self.remote = Some(remote);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write_file(&self, name: &str, content: &str) {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn commit_file(&self, name: &str, content: &str, message: &str) {
        self.write_file(name, content);
        self.git(&["add", "-A"]);
        self.git(&["commit", "-m", message]);
    }

    /// Create `branch` from `base` with one commit touching `file`, then
    /// return to the branch we were on.
    pub fn branch_with_commit(&self, branch: &str, base: &str, file: &str, content: &str) {
        let previous = self.git_stdout(&["branch", "--show-current"]);
        self.git(&["checkout", "-b", branch, base]);
        self.commit_file(file, content, &format!("work on {branch}"));
        self.git(&["checkout", previous.trim()]);
    }

    pub fn write_config(&self, json: &str) {
        let dir = self.root.join(".pait");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("orchestrator.json"), json).unwrap();
    }

    pub fn git(&self, args: &[&str]) {
        run_git_in(&self.root, args);
    }

    pub fn git_stdout(&self, args: &[&str]) -> String {
        git_command_in(&self.root, args)
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        let mut cmd = Command::new("git");
        configure_git_cmd(&mut cmd);
        cmd.args(["rev-parse", "--verify", &format!("refs/heads/{branch}")])
            .current_dir(&self.root)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Isolated environment for git commands run by the tests themselves.
pub fn configure_git_cmd(cmd: &mut Command) {
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_CONFIG_SYSTEM", "/dev/null");
    cmd.env("GIT_AUTHOR_DATE", "2025-01-01T00:00:00Z");
    cmd.env("GIT_COMMITTER_DATE", "2025-01-01T00:00:00Z");
    cmd.env("LC_ALL", "C");
    cmd.env("LANG", "C");
}

fn run_git_in(dir: &Path, args: &[&str]) {
    let output = git_output_in(dir, args);
    assert!(
        output.0,
        "git {args:?} failed in {}: {}",
        dir.display(),
        output.1
    );
}

fn git_command_in(dir: &Path, args: &[&str]) -> String {
    let (ok, stdout) = git_output_in(dir, args);
    assert!(ok, "git {args:?} failed in {}", dir.display());
    stdout
}

fn git_output_in(dir: &Path, args: &[&str]) -> (bool, String) {
    let mut cmd = Command::new("git");
    configure_git_cmd(&mut cmd);
    let output = cmd
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    (output.status.success(), combined)
}

// ---------------------------------------------------------------------------
// In-memory collaborators
// ---------------------------------------------------------------------------

/// Agent backed by a closure.
pub struct FnAgent(pub Box<dyn Fn(&AgentRequest) -> AgentOutcome + Send + Sync>);

impl FnAgent {
    pub fn new(f: impl Fn(&AgentRequest) -> AgentOutcome + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    /// An agent that succeeds at everything and declines every split.
    pub fn accepting() -> Self {
        Self::new(|request| {
            if request.prompt.contains("Assess whether") {
                return AgentOutcome {
                    ok: true,
                    output: r#"{"shouldSplit": false, "proposedSplits": [], "reasoning": "small"}"#
                        .to_string(),
                };
            }
            AgentOutcome {
                ok: true,
                output: String::new(),
            }
        })
    }
}

impl Agent for FnAgent {
    fn run(&self, request: &AgentRequest) -> AgentOutcome {
        (self.0)(request)
    }
}

/// Recording in-memory forge. Change requests default to `Open`.
#[derive(Default)]
pub struct FakeForge {
    pub tasks: Mutex<Vec<Task>>,
    next_task_id: AtomicU64,
    next_cr_id: AtomicU64,
    pub created_change_requests: Mutex<Vec<CreatedChangeRequest>>,
    pub merged: Mutex<Vec<(u64, MergeStrategy)>>,
    pub retargeted: Mutex<Vec<(u64, String)>>,
    pub closed_tasks: Mutex<Vec<u64>>,
    pub cr_states: Mutex<HashMap<u64, ChangeRequestState>>,
    pub fail_merges: Mutex<HashMap<u64, usize>>,
}

#[derive(Debug, Clone)]
pub struct CreatedChangeRequest {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
}

impl FakeForge {
    pub fn new(tasks: Vec<Task>) -> Self {
        let next_task_id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        Self {
            tasks: Mutex::new(tasks),
            next_task_id: AtomicU64::new(next_task_id),
            next_cr_id: AtomicU64::new(100),
            ..Self::default()
        }
    }

    /// Make `merge_change_request` fail `times` times for the given CR.
    pub fn fail_merge(&self, cr: u64, times: usize) {
        self.fail_merges.lock().unwrap().insert(cr, times);
    }

    pub fn change_request_for_head(&self, head: &str) -> Option<CreatedChangeRequest> {
        self.created_change_requests
            .lock()
            .unwrap()
            .iter()
            .find(|cr| cr.head == head)
            .cloned()
    }
}

impl Forge for FakeForge {
    fn list_open_tasks(&self) -> Result<Vec<Task>, ForgeError> {
        Ok(self.tasks.lock().unwrap().clone())
    }

    fn create_task(&self, title: &str, body: &str) -> Result<u64, ForgeError> {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().unwrap().push(Task::new(id, title, body));
        Ok(id)
    }

    fn close_task(&self, id: u64) -> Result<(), ForgeError> {
        self.closed_tasks.lock().unwrap().push(id);
        Ok(())
    }

    fn create_change_request(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
        _cwd: &Path,
    ) -> Result<u64, ForgeError> {
        let id = self.next_cr_id.fetch_add(1, Ordering::SeqCst);
        self.created_change_requests
            .lock()
            .unwrap()
            .push(CreatedChangeRequest {
                id,
                title: title.to_string(),
                body: body.to_string(),
                base: base.to_string(),
                head: head.to_string(),
            });
        self.cr_states
            .lock()
            .unwrap()
            .insert(id, ChangeRequestState::Open);
        Ok(id)
    }

    fn change_request_state(&self, id: u64) -> Result<ChangeRequestState, ForgeError> {
        Ok(self
            .cr_states
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or(ChangeRequestState::Open))
    }

    fn merge_change_request(&self, id: u64, strategy: MergeStrategy) -> Result<(), ForgeError> {
        let mut failures = self.fail_merges.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ForgeError::CommandFailed("scripted merge failure".to_string()));
        }
        drop(failures);

        self.merged.lock().unwrap().push((id, strategy));
        self.cr_states
            .lock()
            .unwrap()
            .insert(id, ChangeRequestState::Merged);
        Ok(())
    }

    fn retarget_change_request(&self, id: u64, new_base: &str) -> Result<(), ForgeError> {
        self.retargeted
            .lock()
            .unwrap()
            .push((id, new_base.to_string()));
        Ok(())
    }
}
