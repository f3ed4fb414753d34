//! `pai orchestrate`: drive the batch through the schedulers.

pub mod parallel;
pub mod sequential;
pub mod task;

use crate::agent::{Agent, ClaudeAgent};
use crate::config::OrchestratorConfig;
use crate::error::PaiError;
use crate::forge::{Forge, GhForge};
use crate::git::Repository;
use crate::graph::TaskGraph;
use crate::output;
use crate::state::{self, ORCHESTRATE_TOOL, OrchestratorState, StateStore, TaskState, TaskStatus};
use crate::styling::{BOLD, DIM};
use crate::tasks::{self, Task};
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct OrchestrateFlags {
    pub dry_run: bool,
    pub reset: bool,
    pub status: bool,
    pub skip_e2e: bool,
    pub skip_split: bool,
    pub no_verify: bool,
    /// Stop after the first successful task.
    pub single_mode: bool,
    /// Jump directly to this task id.
    pub single_issue: Option<u64>,
    /// Start the walk at this task id.
    pub from_issue: Option<u64>,
    /// Slot count; 2 or more selects the parallel scheduler.
    pub parallel: Option<usize>,
    pub file: Option<PathBuf>,
}

impl OrchestrateFlags {
    /// Validate raw CLI values. Bad values are reported with exit code 1,
    /// not clap's usage error.
    #[allow(clippy::too_many_arguments)]
    pub fn from_cli(
        dry_run: bool,
        reset: bool,
        status: bool,
        skip_e2e: bool,
        skip_split: bool,
        no_verify: bool,
        single: Option<String>,
        from: Option<String>,
        parallel: Option<String>,
        file: Option<PathBuf>,
    ) -> Result<Self, PaiError> {
        let (single_mode, single_issue) = match single.as_deref() {
            None => (false, None),
            Some("") => (true, None),
            Some(raw) => match raw.parse::<u64>() {
                Ok(id) => (true, Some(id)),
                Err(_) => {
                    return Err(PaiError::Flag("--single requires a numeric id".to_string()));
                }
            },
        };

        let from_issue = match from.as_deref() {
            None => None,
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| PaiError::Flag("--from requires a valid integer".to_string()))?,
            ),
        };

        let parallel = match parallel.as_deref() {
            None => None,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n >= 1 => Some(n),
                _ => {
                    return Err(PaiError::Flag(
                        "--parallel requires a positive integer".to_string(),
                    ));
                }
            },
        };

        Ok(Self {
            dry_run,
            reset,
            status,
            skip_e2e,
            skip_split,
            no_verify,
            single_mode,
            single_issue,
            from_issue,
            parallel,
            file,
        })
    }
}

/// Everything the per-task pipeline needs, injected once at the
/// composition root.
pub struct TaskContext<'a> {
    pub repo: &'a Repository,
    pub config: &'a OrchestratorConfig,
    pub agent: &'a dyn Agent,
    pub forge: &'a dyn Forge,
    pub state: &'a StateStore,
    pub skip_e2e: bool,
    pub no_verify: bool,
}

pub fn handle_orchestrate(flags: OrchestrateFlags) -> Result<(), PaiError> {
    let repo = Repository::discover()?;

    if flags.reset {
        state::clear(repo.root(), ORCHESTRATE_TOOL)?;
        output::success("Orchestrator state cleared");
        return Ok(());
    }

    let config = OrchestratorConfig::load(repo.root())?;

    if flags.status {
        match state::load::<OrchestratorState>(&state::state_path(repo.root(), ORCHESTRATE_TOOL)) {
            Some(state) => print_status(&state),
            None => output::warning("No orchestrator state found"),
        }
        return Ok(());
    }

    let agent = ClaudeAgent::new();
    let forge = GhForge::new(repo.root(), config.allowed_authors.clone());
    run(&repo, &config, &agent, &forge, &flags)
}

/// Orchestrate with injected collaborators (the testable entry point).
pub fn run(
    repo: &Repository,
    config: &OrchestratorConfig,
    agent: &dyn Agent,
    forge: &dyn Forge,
    flags: &OrchestrateFlags,
) -> Result<(), PaiError> {
    let tasks = load_tasks(forge, flags)?;
    if tasks.is_empty() {
        output::warning("No open tasks found");
        return Ok(());
    }

    let mut graph = TaskGraph::build(&tasks, config);
    let mut order = graph.topological_sort()?;
    print_plan(&graph, &order, flags.parallel);

    if flags.dry_run {
        return Ok(());
    }

    let store = StateStore::open(repo.root());
    ensure_state_entries(&store, &tasks)?;

    let start = resolve_start_index(&order, &store, flags)?;

    let ctx = TaskContext {
        repo,
        config,
        agent,
        forge,
        state: &store,
        skip_e2e: flags.skip_e2e,
        no_verify: flags.no_verify,
    };

    let result = match flags.parallel {
        Some(slots) if slots >= 2 => {
            parallel::run(&ctx, &graph, &order, start, slots);
            Ok(())
        }
        _ => sequential::run(&ctx, &mut graph, &mut order, start, flags),
    };

    print_status(&store.snapshot());
    result
}

fn load_tasks(forge: &dyn Forge, flags: &OrchestrateFlags) -> Result<Vec<Task>, PaiError> {
    match &flags.file {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                PaiError::Other(format!("cannot read task file {}: {e}", path.display()))
            })?;
            Ok(tasks::from_markdown(&content))
        }
        None => Ok(forge.list_open_tasks()?),
    }
}

pub(crate) fn ensure_state_entries(store: &StateStore, tasks: &[Task]) -> Result<(), PaiError> {
    store.update(|state| {
        for task in tasks {
            state
                .tasks
                .entry(task.id)
                .or_insert_with(|| TaskState::new(task.id, &task.title));
        }
    })?;
    Ok(())
}

/// Start-index resolution, in priority order: `--single <id>`, `--from
/// <id>`, first non-completed task.
fn resolve_start_index(
    order: &[u64],
    store: &StateStore,
    flags: &OrchestrateFlags,
) -> Result<usize, PaiError> {
    if let Some(id) = flags.single_issue {
        return order.iter().position(|&x| x == id).ok_or_else(|| {
            PaiError::Flag(format!("--single target #{id} is not in the execution order"))
        });
    }
    if let Some(id) = flags.from_issue {
        return order.iter().position(|&x| x == id).ok_or_else(|| {
            PaiError::Flag(format!("--from target #{id} is not in the execution order"))
        });
    }
    Ok(store.read(|state| {
        order
            .iter()
            .position(|&id| state.status_of(id) != Some(TaskStatus::Completed))
            .unwrap_or(order.len())
    }))
}

pub(crate) fn print_plan(graph: &TaskGraph, order: &[u64], parallel: Option<usize>) {
    output::plain(format!("{BOLD}Execution plan{BOLD:#} ({} tasks):", order.len()));
    for (position, &id) in order.iter().enumerate() {
        let Some(node) = graph.node(id) else { continue };
        let deps = graph.deps_in_graph(id);
        let dep_note = if deps.is_empty() {
            String::new()
        } else {
            let refs: Vec<String> = deps.iter().map(|d| format!("#{d}")).collect();
            format!(" {DIM}(depends on {}){DIM:#}", refs.join(", "))
        };
        output::plain(format!(
            "  {}. #{id} {}{dep_note}",
            position + 1,
            node.task.title
        ));
    }

    if parallel.is_some_and(|n| n >= 2) {
        output::plain(format!("{BOLD}Parallel tiers{BOLD:#}:"));
        for (tier, ids) in graph.tiers().iter().enumerate() {
            let refs: Vec<String> = ids.iter().map(|d| format!("#{d}")).collect();
            output::plain(format!("  tier {tier}: {}", refs.join(", ")));
        }
    }
}

pub(crate) fn print_status(state: &OrchestratorState) {
    output::plain(format!("{BOLD}Task status{BOLD:#}:"));
    for task in state.tasks.values() {
        let title = task.title.as_deref().unwrap_or("");
        let mut line = format!("  #{:<4} {:<12} {title}", task.id, task.status.to_string());
        if let Some(cr) = task.change_request_id {
            line.push_str(&format!(" {DIM}(CR #{cr}){DIM:#}"));
        }
        if let Some(error) = &task.error {
            line.push_str(&format!(" {DIM}error: {error}{DIM:#}"));
        }
        output::plain(line);
    }
}
