//! Task records and the markdown checklist source.
//!
//! A task is a unit of work identified by a positive integer id. Tasks come
//! from the forge (open tracker issues) or, with `orchestrate --file`, from
//! a markdown checklist:
//!
//! ```markdown
//! ## Backend
//! ### Auth
//! - [ ] Add login endpoint
//!   - [ ] returns 401 on bad password
//! - [x] Set up CI
//! - [ ] Add logout endpoint (depends on #1)
//! ```
//!
//! Every top-level checklist item gets a sequential positional id, checked
//! items included, so `depends on #N` references can point at already-done
//! work (the graph treats unknown ids as met). Checked items are then
//! skipped; indented items fold into the preceding top-level item's body as
//! acceptance criteria.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

impl Task {
    pub fn new(id: u64, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: body.into(),
            labels: BTreeSet::new(),
        }
    }
}

/// Parse a markdown checklist into open tasks.
///
/// Returns unchecked top-level items only; ids are positional across all
/// top-level items (checked ones included).
pub fn from_markdown(content: &str) -> Vec<Task> {
    let mut tasks: Vec<Task> = Vec::new();
    let mut section: Option<String> = None;
    let mut sub_section: Option<String> = None;
    let mut next_id: u64 = 0;
    // Whether the most recent top-level item was kept (unchecked), so
    // indented criteria know where to go.
    let mut current_open = false;

    for line in content.lines() {
        if let Some(heading) = line.strip_prefix("### ") {
            sub_section = Some(heading.trim().to_string());
            current_open = false;
            continue;
        }
        if let Some(heading) = line.strip_prefix("## ") {
            section = Some(heading.trim().to_string());
            sub_section = None;
            current_open = false;
            continue;
        }

        if let Some((checked, text)) = parse_checklist_item(line, false) {
            next_id += 1;
            current_open = !checked;
            if checked {
                continue;
            }
            let mut task = Task::new(next_id, text.to_string(), text.to_string());
            if let Some(label) = &section {
                task.labels.insert(label.clone());
            }
            if let Some(label) = &sub_section {
                task.labels.insert(label.clone());
            }
            tasks.push(task);
            continue;
        }

        // Indented checklist items become acceptance criteria of the
        // preceding open top-level item.
        if current_open
            && let Some((_, text)) = parse_checklist_item(line, true)
            && let Some(task) = tasks.last_mut()
        {
            if !task.body.contains("Acceptance criteria:") {
                task.body.push_str("\n\nAcceptance criteria:");
            }
            task.body.push_str(&format!("\n- {text}"));
        }
    }

    tasks
}

/// Match `- [ ] text` / `- [x] text`. `indented` selects items with at
/// least two spaces of leading indentation; top-level items must start in
/// column zero.
fn parse_checklist_item(line: &str, indented: bool) -> Option<(bool, &str)> {
    let leading = line.len() - line.trim_start().len();
    if indented {
        if leading < 2 {
            return None;
        }
    } else if leading != 0 {
        return None;
    }

    let rest = line.trim_start();
    let rest = rest.strip_prefix("- [").or_else(|| rest.strip_prefix("* ["))?;
    let (mark, rest) = rest.split_at_checked(1)?;
    let text = rest.strip_prefix("] ")?;
    let checked = matches!(mark, "x" | "X");
    if !checked && mark != " " {
        return None;
    }
    Some((checked, text.trim()))
}
