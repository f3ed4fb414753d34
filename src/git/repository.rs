//! Git plumbing: every invocation is an argv array, never a shell string.

use super::GitError;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A repository (or worktree) rooted at a specific directory.
///
/// Methods spawn `git` with `current_dir` set to the root, so the same type
/// serves the main checkout and every task worktree.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

/// Outcome of rebasing a branch onto a target.
#[derive(Debug, Clone, PartialEq)]
pub struct RebaseResult {
    pub ok: bool,
    pub conflicts: Vec<ConflictFile>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictFile {
    pub file: String,
}

/// Which side of a conflicted file to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSide {
    Ours,
    Theirs,
}

impl Repository {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    /// Resolve the repository toplevel for the current working directory.
    pub fn discover() -> Result<Self, GitError> {
        let repo = Self::at(std::env::current_dir()?);
        let toplevel = repo.run_command(&["rev-parse", "--show-toplevel"])?;
        Ok(Self::at(PathBuf::from(toplevel.trim())))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a git command, returning stdout on success.
    pub fn run_command(&self, args: &[&str]) -> Result<String, GitError> {
        self.run_command_with_env(args, &[])
    }

    pub fn run_command_with_env(
        &self,
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<String, GitError> {
        let (status_ok, stdout, stderr) = self.spawn(args, envs)?;
        if !status_ok {
            return Err(GitError::CommandFailed(if stderr.trim().is_empty() {
                stdout
            } else {
                stderr
            }));
        }
        Ok(stdout)
    }

    /// Run a git command without treating a non-zero exit as an error.
    /// Returns `(success, combined stdout+stderr)`.
    pub fn run_command_status(&self, args: &[&str]) -> Result<(bool, String), GitError> {
        self.run_command_status_with_env(args, &[])
    }

    pub fn run_command_status_with_env(
        &self,
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<(bool, String), GitError> {
        let (status_ok, stdout, stderr) = self.spawn(args, envs)?;
        let mut combined = stdout;
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        Ok((status_ok, combined))
    }

    fn spawn(&self, args: &[&str], envs: &[(&str, &str)]) -> Result<(bool, String, String), GitError> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.root);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        log::debug!("$ git {} (in {})", args.join(" "), self.root.display());

        let output = cmd
            .output()
            .map_err(|e| GitError::CommandFailed(format!("failed to spawn git: {e}")))?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }

    // -- branches ----------------------------------------------------------

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> bool {
        self.run_command(&["rev-parse", "--verify", &format!("refs/heads/{branch}")])
            .is_ok()
    }

    pub fn delete_branch(&self, branch: &str) -> Result<(), GitError> {
        self.run_command(&["branch", "-D", branch])?;
        Ok(())
    }

    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        let stdout = self.run_command(&["branch", "--show-current"])?;
        let branch = stdout.trim();
        if branch.is_empty() {
            Ok(None) // detached HEAD
        } else {
            Ok(Some(branch.to_string()))
        }
    }

    pub fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.run_command(&["checkout", branch])?;
        Ok(())
    }

    /// Best-effort fast-forward pull; failure only logs.
    pub fn pull_fast_forward(&self) {
        if let Err(e) = self.run_command(&["pull", "--ff-only"]) {
            log::warn!("fast-forward pull failed: {e}");
        }
    }

    // -- worktrees ---------------------------------------------------------

    pub fn add_worktree(
        &self,
        path: &Path,
        new_branch: &str,
        base: &str,
    ) -> Result<(), GitError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| GitError::ParseError("worktree path is not valid UTF-8".to_string()))?;
        self.run_command(&["worktree", "add", path_str, "-b", new_branch, base])?;
        Ok(())
    }

    pub fn remove_worktree_registration(&self, path: &Path) -> Result<(), GitError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| GitError::ParseError("worktree path is not valid UTF-8".to_string()))?;
        self.run_command(&["worktree", "remove", "--force", path_str])?;
        Ok(())
    }

    pub fn prune_worktrees(&self) -> Result<(), GitError> {
        self.run_command(&["worktree", "prune"])?;
        Ok(())
    }

    // -- merge / rebase ----------------------------------------------------

    pub fn merge_branch(&self, branch: &str, message: &str) -> Result<(), GitError> {
        self.run_command(&["merge", "--no-ff", "-m", message, branch])?;
        Ok(())
    }

    pub fn merge_abort(&self) {
        if let Err(e) = self.run_command(&["merge", "--abort"]) {
            log::warn!("merge --abort failed: {e}");
        }
    }

    /// Rebase `branch` onto `target`: checkout, then rebase. A non-zero
    /// rebase with unmerged files reports them as conflicts; a non-zero
    /// rebase without unmerged files is some other failure and the caller
    /// decides whether to abort.
    pub fn rebase_branch(&self, branch: &str, target: &str) -> Result<RebaseResult, GitError> {
        self.checkout(branch)?;
        let (ok, output) = self.run_command_status(&["rebase", target])?;
        if ok {
            return Ok(RebaseResult {
                ok: true,
                conflicts: Vec::new(),
                output,
            });
        }

        let conflicts = self
            .unmerged_files()?
            .into_iter()
            .map(|file| ConflictFile { file })
            .collect();
        Ok(RebaseResult {
            ok: false,
            conflicts,
            output,
        })
    }

    /// List files with unresolved merge conflicts.
    pub fn unmerged_files(&self) -> Result<Vec<String>, GitError> {
        let stdout = self.run_command(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(stdout
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Continue an in-progress rebase. `GIT_EDITOR=true` suppresses the
    /// commit-message editor so non-interactive sessions don't hang.
    pub fn rebase_continue(&self) -> Result<(bool, String), GitError> {
        self.run_command_status_with_env(&["rebase", "--continue"], &[("GIT_EDITOR", "true")])
    }

    pub fn rebase_abort(&self) {
        if let Err(e) = self.run_command(&["rebase", "--abort"]) {
            log::warn!("rebase --abort failed: {e}");
        }
    }

    /// Keep one side of a conflicted file and stage it.
    pub fn resolve_conflict_side(&self, file: &str, side: ConflictSide) -> Result<(), GitError> {
        let flag = match side {
            ConflictSide::Ours => "--ours",
            ConflictSide::Theirs => "--theirs",
        };
        self.run_command(&["checkout", flag, "--", file])?;
        self.stage(file)
    }

    pub fn stage(&self, pathspec: &str) -> Result<(), GitError> {
        self.run_command(&["add", "--", pathspec])?;
        Ok(())
    }

    pub fn stage_all_matching(&self, glob: &str) -> Result<(), GitError> {
        self.run_command(&["add", "-A", glob])?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<(), GitError> {
        self.run_command(&["commit", "-m", message])?;
        Ok(())
    }

    // -- remotes -----------------------------------------------------------

    pub fn push_upstream(&self, branch: &str) -> Result<(), GitError> {
        self.run_command(&["push", "-u", "origin", branch])?;
        Ok(())
    }

    pub fn force_push_with_lease(&self, branch: &str) -> Result<(), GitError> {
        self.run_command(&["push", "--force-with-lease", "origin", branch])?;
        Ok(())
    }
}
