//! Per-task pipeline: worktree, agent, verification, change request.
//!
//! One task's journey from `pending` to `completed` (or `failed`). The
//! pipeline owns its worktree: whatever happens, the worktree is removed
//! before the task terminates. It never panics on expected failures;
//! outcomes are returned so the schedulers decide between halting
//! (sequential) and isolating (parallel).

use super::TaskContext;
use crate::agent;
use crate::git::{self, Repository, WorktreeSetup};
use crate::graph::TaskGraph;
use crate::output::TaskLogger;
use crate::state::TaskStatus;
use crate::verify::{VerifyOptions, run_verify};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Already done (completed/split) or absent from the graph.
    Skipped,
    Failed,
}

/// Run the pipeline for one task. `check_deps` is set by the sequential
/// scheduler; the parallel scheduler has already checked at admission.
pub fn run_task(
    ctx: &TaskContext,
    graph: &TaskGraph,
    id: u64,
    logger: &TaskLogger,
    check_deps: bool,
) -> TaskOutcome {
    let started = Instant::now();

    let Some(node) = graph.node(id) else {
        logger.warning(format!("Task #{id} is not in the graph; skipping"));
        return TaskOutcome::Skipped;
    };
    let task = &node.task;
    let branch = node.branch.clone();

    // Skip checks: completed and split tasks are final.
    match ctx.state.read(|s| s.status_of(id)) {
        Some(TaskStatus::Completed) => {
            logger.progress(format!("Task #{id} already completed; skipping"));
            return TaskOutcome::Skipped;
        }
        Some(TaskStatus::Split) => {
            logger.progress(format!("Task #{id} was split into sub-tasks; skipping"));
            return TaskOutcome::Skipped;
        }
        _ => {}
    }

    if check_deps {
        let unmet: Vec<u64> = graph
            .deps_in_graph(id)
            .into_iter()
            .filter(|&dep| ctx.state.read(|s| s.status_of(dep)) != Some(TaskStatus::Completed))
            .collect();
        if !unmet.is_empty() {
            let refs: Vec<String> = unmet.iter().map(|d| format!("#{d}")).collect();
            let message = format!("Unmet dependencies: {}", refs.join(", "));
            logger.error(&message);
            record_failure(ctx, id, &message);
            return TaskOutcome::Failed;
        }
    }

    // Dependency branches, in declared order, for worktree stacking.
    let dep_branches: Vec<String> = node
        .depends_on
        .iter()
        .filter_map(|&dep| graph.node(dep).map(|n| n.branch.clone()))
        .collect();

    let setup = match git::create_worktree(ctx.repo, &branch, &dep_branches, ctx.config, logger) {
        Ok(setup) => setup,
        Err(e) => {
            logger.error(format!("Worktree creation failed: {e}"));
            record_failure(ctx, id, &format!("worktree creation failed: {e}"));
            if let crate::git::GitError::WorktreeCreate { worktree_path, .. } = &e
                && worktree_path.exists()
            {
                git::remove_worktree(ctx.repo, worktree_path, &branch, logger);
            }
            return TaskOutcome::Failed;
        }
    };

    record(ctx, |state| {
        if let Some(record) = state.tasks.get_mut(&id) {
            record.mark_in_progress(&branch, &setup.base_branch);
        }
    });
    logger.progress(format!(
        "Task #{id} started: {} (branch {branch}, base {})",
        task.title, setup.base_branch
    ));

    // Implementation with retries. A failed attempt logs a retry banner and
    // re-runs the same implementation prompt.
    let attempts = ctx.config.retries.implement + 1;
    let mut implemented = false;
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        if attempt > 1 {
            logger.warning(format!(
                "Implementation attempt {attempt}/{attempts} for #{id}"
            ));
        }
        let outcome = agent::implement_issue(
            ctx.agent,
            task,
            &branch,
            &setup.base_branch,
            ctx.config,
            &setup.worktree_path,
            logger,
        );
        if outcome.ok {
            implemented = true;
            break;
        }
        last_error = outcome.output;
        logger.warning(format!("Agent failed on #{id}: {last_error}"));
    }
    if !implemented {
        let message = format!("implementation failed after {attempts} attempts: {last_error}");
        fail_and_cleanup(ctx, id, &setup, &branch, &message, logger);
        return TaskOutcome::Failed;
    }

    // Verification with retries and repair.
    if !ctx.no_verify && let Err(message) = verify_with_repair(ctx, id, &setup, logger) {
        fail_and_cleanup(ctx, id, &setup, &branch, &message, logger);
        return TaskOutcome::Failed;
    }

    // Publish: push the branch, then open the change request.
    let change_request_id = match publish_change_request(ctx, task, &branch, &setup) {
        Ok(cr) => cr,
        Err(message) => {
            logger.error(&message);
            fail_and_cleanup(ctx, id, &setup, &branch, &message, logger);
            return TaskOutcome::Failed;
        }
    };

    // The branch stays (the change request references it); only the
    // worktree goes.
    git::remove_worktree(ctx.repo, &setup.worktree_path, &branch, logger);

    record(ctx, |state| {
        if let Some(record) = state.tasks.get_mut(&id) {
            record.mark_completed(change_request_id);
        }
    });
    logger.success(format!(
        "Task #{id} completed in {} ms (CR #{change_request_id})",
        started.elapsed().as_millis()
    ));

    // The change request body references the issue either way, so a failed
    // close is only a warning.
    if let Err(e) = ctx.forge.close_task(id) {
        logger.warning(format!("Could not close tracker item #{id}: {e}"));
    }

    TaskOutcome::Completed
}

/// Run the verification pipeline with repair retries. `Err` carries the
/// terminal failure message.
fn verify_with_repair(
    ctx: &TaskContext,
    id: u64,
    setup: &WorktreeSetup,
    logger: &TaskLogger,
) -> Result<(), String> {
    let attempts = ctx.config.retries.verify + 1;
    let mut last_failure = String::new();

    for attempt in 1..=attempts {
        let result = run_verify(&VerifyOptions {
            verify: &ctx.config.verify,
            e2e: ctx.config.e2e.as_ref(),
            cwd: &setup.worktree_path,
            skip_e2e: ctx.skip_e2e,
            filter_name: None,
            logger,
            issue_number: Some(id),
        });
        if result.ok {
            return Ok(());
        }

        let failed_step = result.failed_step.unwrap_or_default();
        let error_output = result.error.unwrap_or_default();
        last_failure = format!("verification failed at '{failed_step}': {error_output}");

        if !failed_step.is_empty() && attempt < attempts {
            logger.warning(format!(
                "Verification attempt {attempt}/{attempts} failed at '{failed_step}'; invoking fixer"
            ));
            agent::run_verification_fixer(
                ctx.agent,
                &failed_step,
                &error_output,
                ctx.config,
                &setup.worktree_path,
                logger,
            );
        }
    }

    Err(last_failure)
}

fn publish_change_request(
    ctx: &TaskContext,
    task: &crate::tasks::Task,
    branch: &str,
    setup: &WorktreeSetup,
) -> Result<u64, String> {
    let worktree_repo = Repository::at(&setup.worktree_path);
    worktree_repo
        .push_upstream(branch)
        .map_err(|e| format!("push failed for {branch}: {e}"))?;

    let body = build_change_request_body(task.id, ctx);
    ctx.forge
        .create_change_request(
            &task.title,
            &body,
            &setup.base_branch,
            branch,
            &setup.worktree_path,
        )
        .map_err(|e| format!("change request creation failed: {e}"))
}

/// The wire-visible change-request body.
fn build_change_request_body(id: u64, ctx: &TaskContext) -> String {
    let mut body = format!(
        "## Summary\n\nCloses #{id}\n\n## Changes\n\nSee issue #{id} for full specification.\n\n## Verification\n\n"
    );
    for step in &ctx.config.verify {
        body.push_str(&format!("- [x] `{}` passes\n", step.cmd));
    }
    if let Some(e2e) = &ctx.config.e2e {
        if ctx.skip_e2e {
            body.push_str("- [ ] E2E (skipped)\n");
        } else {
            body.push_str(&format!("- [x] `{}` passes\n", e2e.run));
        }
    }
    body.push_str("\n---\nAutomated by pai orchestrate\n");
    body
}

fn fail_and_cleanup(
    ctx: &TaskContext,
    id: u64,
    setup: &WorktreeSetup,
    branch: &str,
    message: &str,
    logger: &TaskLogger,
) {
    logger.error(format!("Task #{id} failed: {message}"));
    record_failure(ctx, id, message);
    git::remove_worktree(ctx.repo, &setup.worktree_path, branch, logger);
}

fn record_failure(ctx: &TaskContext, id: u64, message: &str) {
    record(ctx, |state| {
        if let Some(record) = state.tasks.get_mut(&id) {
            record.mark_failed(message);
        }
    });
}

/// State writes inside the pipeline are not allowed to abort the task; a
/// failed save is logged and the run continues on the in-memory state.
fn record(ctx: &TaskContext, f: impl FnOnce(&mut crate::state::OrchestratorState)) {
    if let Err(e) = ctx.state.update(f) {
        log::warn!("state save failed: {e}");
    }
}
