//! Rebase-conflict resolution: interactive or agent-assisted.
//!
//! Per conflicted file the operator picks `ours`, `theirs`, or types a
//! free-text intent that is handed to the agent; `--auto-resolve` skips the
//! prompt and lets the agent resolve every file. Agent output is only
//! accepted after validation: empty output, leftover conflict markers, or
//! prose-instead-of-code all reject the resolution and fail the entry
//! rather than writing garbage into the tree.

use crate::agent::{
    Agent, AgentRequest, CONFLICT_AUTO_TEMPLATE, CONFLICT_INTENT_TEMPLATE, PermissionMode,
    render_template, strip_code_fence,
};
use crate::config::OrchestratorConfig;
use crate::git::{ConflictFile, ConflictSide, Repository};
use crate::output::TaskLogger;
use crate::styling::{BOLD, eprint};
use std::io::BufRead;

/// Resolve every conflicted file, then run `rebase --continue`.
///
/// Returns true when the rebase finished; on any failure the rebase is
/// aborted so the repository is left clean.
pub fn resolve_conflicts(
    repo: &Repository,
    conflicts: &[ConflictFile],
    agent: &dyn Agent,
    config: &OrchestratorConfig,
    auto_resolve: bool,
    logger: &TaskLogger,
) -> bool {
    for conflict in conflicts {
        let resolved = if auto_resolve {
            resolve_with_agent(repo, &conflict.file, None, agent, config, logger)
        } else {
            resolve_interactive(repo, &conflict.file, agent, config, logger)
        };
        if !resolved {
            repo.rebase_abort();
            return false;
        }
    }

    match repo.rebase_continue() {
        Ok((true, _)) => true,
        Ok((false, output)) => {
            logger.warning(format!("rebase --continue failed: {output}"));
            repo.rebase_abort();
            false
        }
        Err(e) => {
            logger.warning(format!("rebase --continue failed: {e}"));
            repo.rebase_abort();
            false
        }
    }
}

fn resolve_interactive(
    repo: &Repository,
    file: &str,
    agent: &dyn Agent,
    config: &OrchestratorConfig,
    logger: &TaskLogger,
) -> bool {
    eprint!("Resolve {BOLD}{file}{BOLD:#} [ours/theirs/<describe intent>] (default ours): ");
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        logger.warning("Could not read conflict answer");
        return false;
    }

    match answer.trim() {
        "" | "ours" => keep_side(repo, file, ConflictSide::Ours, logger),
        "theirs" => keep_side(repo, file, ConflictSide::Theirs, logger),
        intent => resolve_with_agent(repo, file, Some(intent), agent, config, logger),
    }
}

fn keep_side(repo: &Repository, file: &str, side: ConflictSide, logger: &TaskLogger) -> bool {
    match repo.resolve_conflict_side(file, side) {
        Ok(()) => true,
        Err(e) => {
            logger.warning(format!("Could not keep a side of {file}: {e}"));
            false
        }
    }
}

/// Hand a conflicted file to the agent, validate the output, write and
/// stage it. `intent` selects the intent-aware prompt.
pub fn resolve_with_agent(
    repo: &Repository,
    file: &str,
    intent: Option<&str>,
    agent: &dyn Agent,
    config: &OrchestratorConfig,
    logger: &TaskLogger,
) -> bool {
    let path = repo.root().join(file);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            logger.warning(format!("Could not read conflicted file {file}: {e}"));
            return false;
        }
    };

    let prompt = match intent {
        Some(intent) => render_template(
            CONFLICT_INTENT_TEMPLATE,
            minijinja::context! { file => file, intent => intent, content => content },
        ),
        None => render_template(
            CONFLICT_AUTO_TEMPLATE,
            minijinja::context! { file => file, content => content },
        ),
    };
    let prompt = match prompt {
        Ok(prompt) => prompt,
        Err(e) => {
            logger.warning(format!("Conflict prompt template error: {e}"));
            return false;
        }
    };

    logger.progress(format!("Resolving {file} with the agent"));
    let outcome = agent.run(&AgentRequest {
        prompt,
        model: config.models.implement.clone(),
        cwd: repo.root().to_path_buf(),
        permission_mode: Some(PermissionMode::Default),
        allowed_tools: None,
    });
    if !outcome.ok {
        logger.warning(format!("Agent failed on {file}: {}", outcome.output));
        return false;
    }

    let resolved = match validate_resolution(&outcome.output, file) {
        Ok(resolved) => resolved,
        Err(reason) => {
            logger.warning(format!("Rejected agent resolution for {file}: {reason}"));
            return false;
        }
    };

    if let Err(e) = std::fs::write(&path, &resolved) {
        logger.warning(format!("Could not write resolved {file}: {e}"));
        return false;
    }
    if let Err(e) = repo.stage(file) {
        logger.warning(format!("Could not stage resolved {file}: {e}"));
        return false;
    }
    true
}

/// Validate agent-produced replacement content.
///
/// Accepts only non-empty output with no conflict-marker lines; for files
/// whose extension implies code, output opening with an English sentence is
/// rejected as prose. Returns the cleaned content (fence stripped, trailing
/// newline ensured).
pub fn validate_resolution(output: &str, file: &str) -> Result<String, String> {
    let body = strip_code_fence(output);
    if body.trim().is_empty() {
        return Err("empty output".to_string());
    }

    for line in body.lines() {
        if line.starts_with("<<<<<<<") || line.starts_with("=======") || line.starts_with(">>>>>>>")
        {
            return Err("output still contains conflict markers".to_string());
        }
    }

    if extension_implies_code(file) && looks_like_prose(body) {
        return Err("output reads like prose, not file content".to_string());
    }

    let mut cleaned = body.to_string();
    if !cleaned.ends_with('\n') {
        cleaned.push('\n');
    }
    Ok(cleaned)
}

fn looks_like_prose(body: &str) -> bool {
    let Some(first) = body.lines().find(|line| !line.trim().is_empty()) else {
        return false;
    };
    let first = first.trim_start();
    ["The ", "Here ", "I ", "This "]
        .iter()
        .any(|prefix| first.starts_with(prefix))
}

fn extension_implies_code(file: &str) -> bool {
    let Some(ext) = std::path::Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
    else {
        return false;
    };
    matches!(
        ext,
        "rs" | "ts"
            | "tsx"
            | "js"
            | "jsx"
            | "mjs"
            | "py"
            | "go"
            | "java"
            | "kt"
            | "c"
            | "h"
            | "cc"
            | "cpp"
            | "hpp"
            | "cs"
            | "rb"
            | "php"
            | "swift"
            | "sh"
            | "sql"
            | "toml"
            | "json"
            | "yml"
            | "yaml"
    )
}
