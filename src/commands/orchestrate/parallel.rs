//! Parallel scheduler: dependency-aware admission into fixed slots.
//!
//! Up to N tasks run concurrently, each in its own worktree and thread.
//! Admission requires every in-graph dependency met; a failed or blocked
//! dependency blocks the dependent instead of halting the batch, so
//! independent work keeps flowing.
//!
//! Completion events arrive over a channel; the loop wakes on the first
//! finished slot, propagates blocks, and re-admits. All state writes go
//! through the store's mutex, so the file always reflects one applied
//! mutation.

use super::TaskContext;
use super::task::{TaskOutcome, run_task};
use crate::graph::TaskGraph;
use crate::output::TaskLogger;
use crate::state::TaskStatus;
use crossbeam_channel::unbounded;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};

type SlotResult = (u64, Result<TaskOutcome, String>);

pub fn run(ctx: &TaskContext, graph: &TaskGraph, order: &[u64], start: usize, slots: usize) {
    debug_assert!(slots >= 2);

    // Tasks before the start index are treated as met for dependency
    // resolution, so `--from` resumes behave like the sequential walk.
    let pre_completed: HashSet<u64> = order[..start].iter().copied().collect();
    let candidates: Vec<u64> = order[start..].to_vec();

    let is_met = |dep: u64| -> bool {
        !graph.contains(dep)
            || pre_completed.contains(&dep)
            || ctx.state.read(|s| s.status_of(dep)) == Some(TaskStatus::Completed)
    };
    let is_failed = |dep: u64| -> bool {
        graph.contains(dep)
            && !pre_completed.contains(&dep)
            && matches!(
                ctx.state.read(|s| s.status_of(dep)),
                Some(TaskStatus::Failed) | Some(TaskStatus::Blocked)
            )
    };

    std::thread::scope(|scope| {
        let (tx, rx) = unbounded::<SlotResult>();
        let mut active: HashSet<u64> = HashSet::new();

        loop {
            // Block propagation runs before admission so blocked tasks
            // never occupy a slot.
            for &id in &candidates {
                if active.contains(&id) {
                    continue;
                }
                let status = ctx.state.read(|s| s.status_of(id));
                if status.is_some_and(TaskStatus::is_terminal) {
                    continue;
                }
                let failed_dep = graph.deps_in_graph(id).into_iter().find(|&d| is_failed(d));
                if let Some(dep) = failed_dep {
                    let message = format!("Dependency #{dep} failed or was blocked");
                    TaskLogger::for_task(id).warning(&message);
                    if let Err(e) = ctx.state.update(|state| {
                        if let Some(record) = state.tasks.get_mut(&id) {
                            record.mark_blocked(&message);
                        }
                    }) {
                        log::warn!("state save failed: {e}");
                    }
                }
            }

            // Admission: fill free slots with ready tasks, in order.
            for &id in &candidates {
                if active.len() >= slots {
                    break;
                }
                if active.contains(&id) {
                    continue;
                }
                let status = ctx.state.read(|s| s.status_of(id));
                if status.is_some_and(TaskStatus::is_terminal) {
                    continue;
                }
                let deps = graph.deps_in_graph(id);
                if deps.iter().any(|&d| is_failed(d)) || !deps.iter().all(|&d| is_met(d)) {
                    continue;
                }

                active.insert(id);
                let tx = tx.clone();
                scope.spawn(move || {
                    let logger = TaskLogger::for_task(id);
                    // The pipeline is designed not to panic; this is the
                    // rejection handler that keeps an unexpected one from
                    // wedging the loop.
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        run_task(ctx, graph, id, &logger, false)
                    }))
                    .map_err(|payload| panic_message(payload.as_ref()));
                    let _ = tx.send((id, result));
                });
            }

            if active.is_empty() {
                break;
            }

            // Wake on the first finished slot.
            let (id, result) = rx.recv().expect("scheduler channel closed");
            active.remove(&id);
            if let Err(message) = result {
                TaskLogger::for_task(id).error(format!("Task crashed: {message}"));
                if let Err(e) = ctx.state.update(|state| {
                    if let Some(record) = state.tasks.get_mut(&id) {
                        record.mark_failed(format!("task crashed: {message}"));
                    }
                }) {
                    log::warn!("state save failed: {e}");
                }
            }
        }
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
