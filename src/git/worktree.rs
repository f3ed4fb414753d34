//! Worktree/branch lifecycle for task isolation.
//!
//! Each task runs in its own worktree on a fresh branch. Creation cleans
//! up leftovers from crashed runs (stale registrations, stale directories,
//! stale same-named branches); removal is force-then-fallback and never
//! fails the owning task.

use super::{GitError, Repository};
use crate::config::OrchestratorConfig;
use crate::graph::kebab_case;
use crate::output::TaskLogger;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct WorktreeSetup {
    pub worktree_path: PathBuf,
    pub base_branch: String,
}

/// Create an isolated worktree for `branch_name`.
///
/// The base is the first dependency branch that exists locally, falling
/// back to the configured base branch. Remaining existing dependency
/// branches are merged in, in declared order; a conflicting merge aborts,
/// tears the worktree down, and fails.
pub fn create_worktree(
    repo: &Repository,
    branch_name: &str,
    dep_branches: &[String],
    config: &OrchestratorConfig,
    logger: &TaskLogger,
) -> Result<WorktreeSetup, GitError> {
    let worktree_path = repo
        .root()
        .join(&config.worktree_dir)
        .join(kebab_case(branch_name));

    // Leftovers from a crashed run are cleaned up best-effort; failures
    // here mean there was nothing to clean up.
    if repo.remove_worktree_registration(&worktree_path).is_ok() {
        logger.progress(format!(
            "Removed stale worktree registration at {}",
            worktree_path.display()
        ));
    }
    if worktree_path.exists()
        && let Err(e) = std::fs::remove_dir_all(&worktree_path)
    {
        log::warn!(
            "could not delete stale worktree directory {}: {e}",
            worktree_path.display()
        );
    }
    if repo.branch_exists(branch_name) {
        logger.progress(format!("Deleting stale branch {branch_name}"));
        repo.delete_branch(branch_name)?;
    }

    let existing_deps: Vec<&String> = dep_branches
        .iter()
        .filter(|dep| repo.branch_exists(dep))
        .collect();

    let base_branch = existing_deps
        .first()
        .map_or_else(|| config.base_branch.clone(), |dep| (*dep).clone());

    if let Err(e) = repo.add_worktree(&worktree_path, branch_name, &base_branch) {
        return Err(GitError::WorktreeCreate {
            branch: branch_name.to_string(),
            worktree_path,
            base_branch,
            error: e.to_string(),
        });
    }

    // Fold the remaining dependency branches in. The worktree starts on
    // the first dep, so the others have to be merged.
    let worktree_repo = Repository::at(&worktree_path);
    for dep in existing_deps.iter().skip(1) {
        logger.progress(format!("Merging dependency branch {dep} into {branch_name}"));
        let message = format!("Merge dependency branch '{dep}' into {branch_name}");
        if worktree_repo.merge_branch(dep, &message).is_err() {
            worktree_repo.merge_abort();
            remove_worktree(repo, &worktree_path, branch_name, logger);
            return Err(GitError::MergeConflict {
                branch: (*dep).clone(),
            });
        }
    }

    Ok(WorktreeSetup {
        worktree_path,
        base_branch,
    })
}

/// Tear a worktree down. Never fails: a refused `worktree remove` falls
/// back to deleting the directory and pruning stale registrations.
pub fn remove_worktree(
    repo: &Repository,
    worktree_path: &Path,
    branch_name: &str,
    logger: &TaskLogger,
) {
    if repo.remove_worktree_registration(worktree_path).is_err() && worktree_path.exists() {
        if let Err(e) = std::fs::remove_dir_all(worktree_path) {
            log::warn!(
                "could not force-delete worktree {}: {e}",
                worktree_path.display()
            );
        }
        if let Err(e) = repo.prune_worktrees() {
            log::warn!("worktree prune failed: {e}");
        }
    }
    logger.progress(format!(
        "Removed worktree for {branch_name} at {}",
        worktree_path.display()
    ));
}
