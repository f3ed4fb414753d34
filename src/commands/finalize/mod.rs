//! `pai finalize`: merge completed change requests in dependency order.
//!
//! Discovers open change requests from the orchestrator state, topologically
//! sorts them by stacking (an entry whose base is another entry's branch
//! merges after it), rebases each onto its base, drives conflict
//! resolution, merges through the platform, and retargets dependents so the
//! deleted branch doesn't orphan them. Designed for partial progress: every
//! per-entry failure is local.

pub mod resolve;

use crate::agent::{Agent, ClaudeAgent};
use crate::config::OrchestratorConfig;
use crate::error::PaiError;
use crate::forge::{ChangeRequestState, Forge, GhForge, MergeStrategy};
use crate::git::Repository;
use crate::output::{self, TaskLogger};
use crate::state::{
    self, FINALIZE_TOOL, MergeState, MergeStateRecord, MergeStatus, ORCHESTRATE_TOOL,
    OrchestratorState, TaskStatus,
};
use crate::styling::{BOLD, DIM};
use crate::verify::{VerifyOptions, run_verify};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Wait between merge attempts; the platform needs a moment to see a
/// force-pushed head.
const MERGE_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct FinalizeFlags {
    pub dry_run: bool,
    pub single: bool,
    pub no_verify: bool,
    pub strategy: MergeStrategy,
    pub from: Option<u64>,
    pub auto_resolve: bool,
}

impl FinalizeFlags {
    pub fn from_cli(
        dry_run: bool,
        single: bool,
        no_verify: bool,
        strategy: MergeStrategy,
        from: Option<String>,
        auto_resolve: bool,
    ) -> Result<Self, PaiError> {
        let from = match from.as_deref() {
            None => None,
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| PaiError::Flag("--from requires a valid integer".to_string()))?,
            ),
        };
        Ok(Self {
            dry_run,
            single,
            no_verify,
            strategy,
            from,
            auto_resolve,
        })
    }
}

/// One mergeable change request from the orchestrator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlanEntry {
    pub task_id: u64,
    pub change_request_id: u64,
    pub branch: String,
    pub base_branch: String,
}

/// Topologically sort entries by stacking: A precedes B iff B's base branch
/// is A's branch. Independent entries order by ascending task id. A true
/// cycle (mutually stacked change requests) is an error.
pub fn determine_merge_order(
    mut entries: Vec<MergePlanEntry>,
) -> Result<Vec<MergePlanEntry>, PaiError> {
    entries.sort_by_key(|entry| entry.task_id);

    let index_of_branch: HashMap<String, usize> = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| (entry.branch.clone(), index))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        index: usize,
        entries: &[MergePlanEntry],
        index_of_branch: &HashMap<String, usize>,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) -> Result<(), PaiError> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(PaiError::MergeCycle(format!(
                    "Dependency cycle among stacked change requests (task #{})",
                    entries[index].task_id
                )));
            }
            Mark::Unvisited => {}
        }
        marks[index] = Mark::InProgress;
        if let Some(&base_index) = index_of_branch.get(&entries[index].base_branch) {
            visit(base_index, entries, index_of_branch, marks, order)?;
        }
        marks[index] = Mark::Done;
        order.push(index);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; entries.len()];
    let mut order = Vec::with_capacity(entries.len());
    for index in 0..entries.len() {
        visit(index, &entries, &index_of_branch, &mut marks, &mut order)?;
    }

    Ok(order.into_iter().map(|index| entries[index].clone()).collect())
}

pub fn handle_finalize(flags: FinalizeFlags) -> Result<(), PaiError> {
    let repo = Repository::discover()?;
    let config = OrchestratorConfig::load(repo.root())?;
    let agent = ClaudeAgent::new();
    let forge = GhForge::new(repo.root(), config.allowed_authors.clone());
    run(&repo, &config, &agent, &forge, &flags)
}

pub fn run(
    repo: &Repository,
    config: &OrchestratorConfig,
    agent: &dyn Agent,
    forge: &dyn Forge,
    flags: &FinalizeFlags,
) -> Result<(), PaiError> {
    let logger = TaskLogger::root();

    let entries = discover_entries(repo.root(), config, forge)?;
    if entries.is_empty() {
        output::warning("No open change requests to merge");
        return Ok(());
    }

    let mut entries = determine_merge_order(entries)?;

    let start = match flags.from {
        None => 0,
        Some(id) => entries
            .iter()
            .position(|entry| entry.task_id == id)
            .ok_or_else(|| {
                PaiError::Flag(format!("--from target #{id} is not in the merge plan"))
            })?,
    };

    print_merge_plan(&entries, start);
    if flags.dry_run {
        return Ok(());
    }

    let merge_state_path = state::state_path(repo.root(), FINALIZE_TOOL);
    let mut merge_state: MergeState = state::load(&merge_state_path).unwrap_or_default();

    // Sync the shared working tree before the first rebase.
    repo.checkout(&entries[start].base_branch)?;
    repo.pull_fast_forward();

    let mut merged_count = 0usize;
    let mut failed_count = 0usize;

    let mut index = start;
    while index < entries.len() {
        let entry = entries[index].clone();
        merge_state
            .prs
            .entry(entry.task_id)
            .or_insert_with(|| MergeStateRecord {
                task_id: entry.task_id,
                change_request_id: entry.change_request_id,
                branch: entry.branch.clone(),
                base_branch: entry.base_branch.clone(),
                status: MergeStatus::Pending,
                merged_at: None,
                error: None,
            });

        logger.progress(format!(
            "Merging CR #{} (task #{}, {} -> {})",
            entry.change_request_id, entry.task_id, entry.branch, entry.base_branch
        ));

        match merge_one(
            repo,
            config,
            agent,
            forge,
            flags,
            &mut entries,
            index,
            &logger,
        ) {
            MergeOutcome::Merged => {
                merged_count += 1;
                set_record(&mut merge_state, entry.task_id, |record| {
                    record.status = MergeStatus::Merged;
                    record.error = None;
                    record.merged_at = Some(Utc::now());
                });
            }
            MergeOutcome::Conflict(message) => {
                failed_count += 1;
                logger.warning(format!(
                    "CR #{} left unmerged (conflict): {message}",
                    entry.change_request_id
                ));
                set_record(&mut merge_state, entry.task_id, |record| {
                    record.status = MergeStatus::Conflict;
                    record.error = Some(message.clone());
                });
            }
            MergeOutcome::Failed(message) => {
                failed_count += 1;
                logger.warning(format!(
                    "CR #{} failed: {message}",
                    entry.change_request_id
                ));
                set_record(&mut merge_state, entry.task_id, |record| {
                    record.status = MergeStatus::Failed;
                    record.error = Some(message.clone());
                });
            }
        }

        if let Err(e) = state::save_merge(&mut merge_state, &merge_state_path) {
            log::warn!("merge state save failed: {e}");
        }

        if flags.single && merged_count > 0 {
            break;
        }
        index += 1;
    }

    output::success(format!("Merged {merged_count} change request(s)"));
    if failed_count > 0 {
        output::warning(format!("{failed_count} change request(s) not merged"));
    }
    Ok(())
}

enum MergeOutcome {
    Merged,
    Conflict(String),
    Failed(String),
}

/// Process one entry: rebase, resolve, push, retarget, merge, verify.
#[allow(clippy::too_many_arguments)]
fn merge_one(
    repo: &Repository,
    config: &OrchestratorConfig,
    agent: &dyn Agent,
    forge: &dyn Forge,
    flags: &FinalizeFlags,
    entries: &mut [MergePlanEntry],
    index: usize,
    logger: &TaskLogger,
) -> MergeOutcome {
    let entry = entries[index].clone();

    // Rebase onto the (possibly retargeted) base.
    match repo.rebase_branch(&entry.branch, &entry.base_branch) {
        Err(e) => return MergeOutcome::Failed(format!("rebase could not run: {e}")),
        Ok(result) if !result.ok => {
            if result.conflicts.is_empty() {
                // Failed for a non-conflict reason; leave the tree clean.
                repo.rebase_abort();
                return MergeOutcome::Failed(format!("rebase failed: {}", result.output.trim()));
            }
            let files: Vec<&str> = result
                .conflicts
                .iter()
                .map(|conflict| conflict.file.as_str())
                .collect();
            logger.warning(format!(
                "Rebase of {} conflicted in: {}",
                entry.branch,
                files.join(", ")
            ));
            if !resolve::resolve_conflicts(
                repo,
                &result.conflicts,
                agent,
                config,
                flags.auto_resolve,
                logger,
            ) {
                return MergeOutcome::Conflict(format!(
                    "unresolved rebase conflicts in: {}",
                    files.join(", ")
                ));
            }
        }
        Ok(_) => {}
    }

    // Failure is non-fatal but surfaced: a stale remote head usually shows
    // up again as a merge error below.
    if let Err(e) = repo.force_push_with_lease(&entry.branch) {
        logger.warning(format!("Force-push of {} failed: {e}", entry.branch));
    }

    // Retarget dependents before the platform deletes the branch.
    for later in entries[index + 1..].iter_mut() {
        if later.base_branch != entry.branch {
            continue;
        }
        if let Err(e) = forge.retarget_change_request(later.change_request_id, &entry.base_branch) {
            logger.warning(format!(
                "Could not retarget CR #{}: {e}",
                later.change_request_id
            ));
        }
        later.base_branch = entry.base_branch.clone();
    }

    // Merge with one retry: the platform may not have seen the new head yet.
    let mut merge_error = String::new();
    let mut merged = false;
    for attempt in 1..=2 {
        match forge.merge_change_request(entry.change_request_id, flags.strategy) {
            Ok(()) => {
                merged = true;
                break;
            }
            Err(e) => {
                merge_error = e.to_string();
                if attempt == 1 {
                    logger.warning(format!(
                        "Merge of CR #{} failed, retrying: {merge_error}",
                        entry.change_request_id
                    ));
                    std::thread::sleep(MERGE_RETRY_DELAY);
                }
            }
        }
    }
    if !merged {
        return MergeOutcome::Failed(format!("merge failed after retry: {merge_error}"));
    }

    if let Err(e) = repo.checkout(&entry.base_branch) {
        logger.warning(format!("Could not check out {}: {e}", entry.base_branch));
    }
    repo.pull_fast_forward();

    // The merge is already committed, so a verification failure here only
    // warns; the human fixes forward.
    if !flags.no_verify {
        post_merge_verify(repo.root(), config, &entry, logger);
    }

    if let Err(e) = forge.close_task(entry.task_id) {
        logger.warning(format!("Could not close tracker item #{}: {e}", entry.task_id));
    }

    logger.success(format!(
        "Merged CR #{} into {}",
        entry.change_request_id, entry.base_branch
    ));
    MergeOutcome::Merged
}

fn post_merge_verify(
    repo_root: &Path,
    config: &OrchestratorConfig,
    entry: &MergePlanEntry,
    logger: &TaskLogger,
) {
    if config.verify.is_empty() {
        return;
    }
    let result = run_verify(&VerifyOptions {
        verify: &config.verify,
        e2e: None,
        cwd: repo_root,
        skip_e2e: true,
        filter_name: None,
        logger,
        issue_number: Some(entry.task_id),
    });
    if !result.ok {
        logger.warning(format!(
            "Post-merge verification failed at '{}' on {}; fix forward",
            result.failed_step.unwrap_or_default(),
            entry.base_branch
        ));
    }
}

/// Read the orchestrator state and keep completed tasks whose change
/// request is still open on the platform.
fn discover_entries(
    repo_root: &Path,
    config: &OrchestratorConfig,
    forge: &dyn Forge,
) -> Result<Vec<MergePlanEntry>, PaiError> {
    let Some(state) =
        state::load::<OrchestratorState>(&state::state_path(repo_root, ORCHESTRATE_TOOL))
    else {
        return Err(PaiError::Other(
            "No orchestrator state found. Run 'pai orchestrate' first.".to_string(),
        ));
    };

    let mut entries = Vec::new();
    for task in state.tasks.values() {
        if task.status != TaskStatus::Completed {
            continue;
        }
        let (Some(change_request_id), Some(branch)) = (task.change_request_id, task.branch.clone())
        else {
            continue;
        };

        match forge.change_request_state(change_request_id) {
            Ok(ChangeRequestState::Open) => entries.push(MergePlanEntry {
                task_id: task.id,
                change_request_id,
                branch,
                base_branch: task
                    .base_branch
                    .clone()
                    .unwrap_or_else(|| config.base_branch.clone()),
            }),
            Ok(other) => {
                log::info!("skipping CR #{change_request_id}: state {other:?}");
            }
            Err(e) => {
                log::warn!("could not query CR #{change_request_id}: {e}");
            }
        }
    }
    Ok(entries)
}

fn print_merge_plan(entries: &[MergePlanEntry], start: usize) {
    output::plain(format!(
        "{BOLD}Merge plan{BOLD:#} ({} change requests):",
        entries.len()
    ));
    for (index, entry) in entries.iter().enumerate() {
        let marker = if index == start { "→" } else { " " };
        output::plain(format!(
            " {marker} #{} CR #{} {DIM}{} -> {}{DIM:#}",
            entry.task_id, entry.change_request_id, entry.branch, entry.base_branch
        ));
    }
}

fn set_record(merge_state: &mut MergeState, task_id: u64, f: impl FnOnce(&mut MergeStateRecord)) {
    if let Some(record) = merge_state.prs.get_mut(&task_id) {
        f(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(task_id: u64, cr: u64, branch: &str, base: &str) -> MergePlanEntry {
        MergePlanEntry {
            task_id,
            change_request_id: cr,
            branch: branch.to_string(),
            base_branch: base.to_string(),
        }
    }

    #[test]
    fn test_stacking_order() {
        let entries = vec![
            entry(2, 20, "feat/2-b", "feat/1-a"),
            entry(3, 30, "feat/3-c", "feat/2-b"),
            entry(1, 10, "feat/1-a", "master"),
        ];
        let order = determine_merge_order(entries).unwrap();
        let ids: Vec<u64> = order.iter().map(|e| e.task_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_independent_entries_order_by_id() {
        let entries = vec![
            entry(3, 30, "feat/3-c", "master"),
            entry(1, 10, "feat/1-a", "master"),
            entry(2, 20, "feat/2-b", "master"),
        ];
        let order = determine_merge_order(entries).unwrap();
        let ids: Vec<u64> = order.iter().map(|e| e.task_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let entries = vec![
            entry(1, 10, "feat/1-a", "feat/2-b"),
            entry(2, 20, "feat/2-b", "feat/1-a"),
        ];
        let err = determine_merge_order(entries).unwrap_err();
        assert!(err.to_string().to_lowercase().contains("cycle"));
    }

    #[test]
    fn test_single_entry_unchanged() {
        let entries = vec![entry(5, 50, "feat/5-e", "master")];
        let order = determine_merge_order(entries.clone()).unwrap();
        assert_eq!(order, entries);
    }

    #[test]
    fn test_mixed_stack_and_independent() {
        let entries = vec![
            entry(4, 40, "feat/4-d", "master"),
            entry(2, 20, "feat/2-b", "feat/1-a"),
            entry(1, 10, "feat/1-a", "master"),
        ];
        let order = determine_merge_order(entries).unwrap();
        let ids: Vec<u64> = order.iter().map(|e| e.task_id).collect();
        // 1 before 2 (stacking); 4 sorts by id among independents
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[test]
    fn test_flags_from_rejects_garbage() {
        let err = FinalizeFlags::from_cli(
            false,
            false,
            false,
            MergeStrategy::Squash,
            Some("xyz".to_string()),
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--from requires a valid integer"));
    }
}
