//! Dependency graph over tasks.
//!
//! Builds a directed graph keyed by task id from `depends on #N`
//! declarations, derives deterministic branch names, topologically sorts
//! for execution, and computes parallel tiers for the plan display.
//!
//! Construction is pure. Dependencies that reference ids not present in the
//! graph are ignored for ordering and treated as already met; a true
//! back-edge within the in-graph set is a hard error.

use crate::config::OrchestratorConfig;
use crate::tasks::Task;
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

static DEPENDS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)depends\s+on").expect("static regex"));
static ISSUE_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d+)").expect("static regex"));
static BRACKET_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[\d+\]\s*").expect("static regex"));

/// Maximum length of the kebab-cased title segment of a branch name.
const KEBAB_MAX: usize = 50;

/// Extract declared prerequisite ids from a task body.
///
/// Only the first line matching a case-insensitive `depends on` is
/// consulted; all `#N` references on that line are returned in order.
pub fn parse_dependencies(body: &str) -> Vec<u64> {
    for line in body.lines() {
        if DEPENDS_LINE.is_match(line) {
            return ISSUE_REF
                .captures_iter(line)
                .filter_map(|caps| caps[1].parse().ok())
                .collect();
        }
    }
    Vec::new()
}

/// Kebab-case a task title for use in a branch name.
///
/// Lowercases, strips a leading `[N]` bracket prefix, collapses
/// non-alphanumeric runs to a single `-`, trims dashes, truncates to 50.
pub fn kebab_case(input: &str) -> String {
    let stripped = BRACKET_PREFIX.replace(input, "");
    let lower = stripped.to_lowercase();

    let mut out = String::with_capacity(lower.len());
    let mut pending_dash = false;
    for ch in lower.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }

    out.truncate(KEBAB_MAX);
    out.trim_matches('-').to_string()
}

/// Derive the branch name for a task. Deterministic; downstream
/// change-request retargeting depends on string equality.
pub fn branch_name(prefix: &str, id: u64, title: &str) -> String {
    format!("{prefix}{id}-{}", kebab_case(title))
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub task: Task,
    /// Declared prerequisites, in declaration order. May reference ids
    /// outside the graph.
    pub depends_on: Vec<u64>,
    pub branch: String,
}

#[derive(Debug)]
pub enum GraphError {
    Cycle { id: u64 },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::Cycle { id } => {
                write!(f, "Dependency cycle detected involving task #{id}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Directed dependency graph keyed by task id. Preserves input task order.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: IndexMap<u64, TaskNode>,
}

impl TaskGraph {
    /// Build the graph from tasks, deriving branch names from config.
    pub fn build(tasks: &[Task], config: &OrchestratorConfig) -> Self {
        let mut nodes = IndexMap::with_capacity(tasks.len());
        for task in tasks {
            let node = TaskNode {
                depends_on: parse_dependencies(&task.body),
                branch: branch_name(&config.branch_prefix, task.id, &task.title),
                task: task.clone(),
            };
            nodes.insert(task.id, node);
        }
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: u64) -> Option<&TaskNode> {
        self.nodes.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.nodes.keys().copied()
    }

    /// Declared dependencies of `id` restricted to ids present in the graph.
    pub fn deps_in_graph(&self, id: u64) -> Vec<u64> {
        match self.nodes.get(&id) {
            Some(node) => node
                .depends_on
                .iter()
                .copied()
                .filter(|dep| self.nodes.contains_key(dep))
                .collect(),
            None => Vec::new(),
        }
    }

    /// DFS topological sort: dependencies before dependents, ties broken by
    /// input order. Dependencies on unknown ids are silent no-ops; a
    /// back-edge within the graph fails.
    pub fn topological_sort(&self) -> Result<Vec<u64>, GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(
            graph: &TaskGraph,
            id: u64,
            marks: &mut IndexMap<u64, Mark>,
            order: &mut Vec<u64>,
        ) -> Result<(), GraphError> {
            match marks.get(&id).copied().unwrap_or(Mark::Unvisited) {
                Mark::Done => return Ok(()),
                Mark::InProgress => return Err(GraphError::Cycle { id }),
                Mark::Unvisited => {}
            }
            marks.insert(id, Mark::InProgress);
            for dep in graph.deps_in_graph(id) {
                visit(graph, dep, marks, order)?;
            }
            marks.insert(id, Mark::Done);
            order.push(id);
            Ok(())
        }

        let mut marks: IndexMap<u64, Mark> =
            self.nodes.keys().map(|&id| (id, Mark::Unvisited)).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        for &id in self.nodes.keys() {
            visit(self, id, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    /// Parallel tiers: tier of a node is 1 + the max tier of its in-graph
    /// dependencies (0 with none). Informational; the parallel scheduler
    /// admits on dependency state, not tier.
    pub fn tiers(&self) -> Vec<Vec<u64>> {
        fn tier_of(graph: &TaskGraph, id: u64, memo: &mut IndexMap<u64, usize>) -> usize {
            if let Some(&tier) = memo.get(&id) {
                return tier;
            }
            // Mark before recursing so a cycle terminates at tier 0 instead
            // of overflowing; topological_sort is the cycle reporter.
            memo.insert(id, 0);
            let tier = graph
                .deps_in_graph(id)
                .into_iter()
                .map(|dep| tier_of(graph, dep, memo) + 1)
                .max()
                .unwrap_or(0);
            memo.insert(id, tier);
            tier
        }

        let mut memo = IndexMap::new();
        let mut tiers: Vec<Vec<u64>> = Vec::new();
        for &id in self.nodes.keys() {
            let tier = tier_of(self, id, &mut memo);
            if tiers.len() <= tier {
                tiers.resize_with(tier + 1, Vec::new);
            }
            tiers[tier].push(id);
        }
        tiers
    }
}
