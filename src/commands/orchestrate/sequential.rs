//! Sequential scheduler: walk the topological order, halt on failure.
//!
//! Later tasks may depend on the failing one, so the walk stops at the
//! first fatal failure; the parallel scheduler covers the same case with
//! `blocked` instead of halting.
//!
//! The split flow only runs here: splitting rewrites the execution order
//! in place, which is a race anywhere else.

use super::task::{TaskOutcome, run_task};
use super::{OrchestrateFlags, TaskContext, ensure_state_entries, print_plan};
use crate::agent::{SplitAssessment, assess_split};
use crate::error::PaiError;
use crate::graph::{TaskGraph, parse_dependencies};
use crate::output::TaskLogger;
use crate::state::TaskStatus;
use crate::tasks::Task;

pub fn run(
    ctx: &TaskContext,
    graph: &mut TaskGraph,
    order: &mut Vec<u64>,
    start: usize,
    flags: &OrchestrateFlags,
) -> Result<(), PaiError> {
    let logger = TaskLogger::root();
    let mut index = start;

    while index < order.len() {
        let id = order[index];

        // Split assessment runs before the pipeline, on tasks that are
        // still live. Markdown-sourced batches cannot create sub-tasks on
        // the tracker, so `--file` runs skip it.
        let live = !matches!(
            ctx.state.read(|s| s.status_of(id)),
            Some(TaskStatus::Completed) | Some(TaskStatus::Split)
        );
        if live && !flags.skip_split && flags.file.is_none() {
            let task = graph.node(id).map(|node| node.task.clone());
            if let Some(task) = task
                && let Some(assessment) = assess_split(ctx.agent, &task, ctx.config, ctx.repo.root())
                && assessment.should_split
                && !assessment.proposed_splits.is_empty()
            {
                logger.progress(format!(
                    "Splitting #{id} into {} sub-tasks: {}",
                    assessment.proposed_splits.len(),
                    assessment.reasoning
                ));
                index = perform_split(ctx, graph, order, &task, assessment, flags)?;
                continue;
            }
        }

        match run_task(ctx, graph, id, &logger, true) {
            TaskOutcome::Failed => return Err(PaiError::TaskFailed { id }),
            TaskOutcome::Completed if flags.single_mode => break,
            _ => {}
        }
        index += 1;
    }

    Ok(())
}

/// Create sub-tasks on the tracker, mark the parent split, rebuild the
/// graph and order in place, and return the order index of the first
/// sub-task.
fn perform_split(
    ctx: &TaskContext,
    graph: &mut TaskGraph,
    order: &mut Vec<u64>,
    parent: &Task,
    assessment: SplitAssessment,
    flags: &OrchestrateFlags,
) -> Result<usize, PaiError> {
    // The first sub-task inherits the parent's non-self dependencies; each
    // later one chains on its predecessor.
    let parent_deps: Vec<u64> = parse_dependencies(&parent.body)
        .into_iter()
        .filter(|&dep| dep != parent.id)
        .collect();

    let mut sub_ids = Vec::with_capacity(assessment.proposed_splits.len());
    for (position, split) in assessment.proposed_splits.iter().enumerate() {
        let deps_line = if position == 0 {
            if parent_deps.is_empty() {
                String::new()
            } else {
                let refs: Vec<String> = parent_deps.iter().map(|d| format!("#{d}")).collect();
                format!("\n\nDepends on {}", refs.join(" "))
            }
        } else {
            format!("\n\nDepends on #{}", sub_ids[position - 1])
        };
        let body = format!("{}{deps_line}\n\nSplit from #{}", split.body, parent.id);
        let sub_id = ctx.forge.create_task(&split.title, &body)?;
        sub_ids.push(sub_id);
    }

    ctx.state.update(|state| {
        if let Some(record) = state.tasks.get_mut(&parent.id) {
            record.mark_split(sub_ids.clone());
        }
    })?;

    // The scheduler must observe the new nodes: re-fetch, rebuild the graph
    // and the order in place, and reprint the plan.
    let tasks = ctx.forge.list_open_tasks()?;
    *graph = TaskGraph::build(&tasks, ctx.config);
    *order = graph.topological_sort()?;
    ensure_state_entries(ctx.state, &tasks)?;
    print_plan(graph, order, flags.parallel);

    let first_sub = sub_ids[0];
    order
        .iter()
        .position(|&id| id == first_sub)
        .ok_or_else(|| {
            PaiError::Other(format!(
                "sub-task #{first_sub} missing from the rebuilt execution order"
            ))
        })
}
