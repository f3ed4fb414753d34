//! External code-generation agent interface.
//!
//! Every agent invocation goes through one contract: a prompt, a model, a
//! working directory, optional permission mode and tool allowlist, and back
//! comes `{ ok, output }`. The contract never raises; callers must not use
//! exceptions for flow control around the agent, so all spawn and decode
//! failures collapse into `ok: false`.
//!
//! Prompts are minijinja templates rendered from stable strings.

use crate::config::OrchestratorConfig;
use crate::output::TaskLogger;
use crate::styling::format_with_gutter;
use crate::tasks::Task;
use minijinja::Environment;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Permission mode forwarded to the agent CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub model: String,
    pub cwd: std::path::PathBuf,
    pub permission_mode: Option<PermissionMode>,
    pub allowed_tools: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub ok: bool,
    pub output: String,
}

impl AgentOutcome {
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: output.into(),
        }
    }
}

pub trait Agent: Send + Sync {
    fn run(&self, request: &AgentRequest) -> AgentOutcome;
}

/// Production agent: spawns the `claude` CLI with the prompt on stdin.
pub struct ClaudeAgent {
    binary: String,
}

impl ClaudeAgent {
    pub fn new() -> Self {
        Self {
            binary: "claude".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for ClaudeAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for ClaudeAgent {
    fn run(&self, request: &AgentRequest) -> AgentOutcome {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p").args(["--model", &request.model]);
        if let Some(mode) = request.permission_mode {
            cmd.args(["--permission-mode", &mode.to_string()]);
        }
        if let Some(tools) = &request.allowed_tools {
            cmd.args(["--allowedTools", tools]);
        }
        cmd.current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::debug!(
            "$ {} -p --model {} (in {})",
            self.binary,
            request.model,
            request.cwd.display()
        );
        log::debug!("  Prompt (stdin):");
        for line in request.prompt.lines() {
            log::debug!("    {}", line);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return AgentOutcome::failure(format!("failed to spawn agent: {e}")),
        };

        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(request.prompt.as_bytes())
        {
            return AgentOutcome::failure(format!("failed to write agent prompt: {e}"));
        }

        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(e) => return AgentOutcome::failure(format!("agent did not finish: {e}")),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return AgentOutcome::failure(if stderr.is_empty() { stdout } else { stderr });
        }

        AgentOutcome {
            ok: true,
            output: stdout,
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt templates
// ---------------------------------------------------------------------------

const IMPLEMENT_TEMPLATE: &str = r#"You are implementing a change task in a git worktree.

Task #{{ id }}: {{ title }}

{{ body }}

Branch: {{ branch }} (based on {{ base_branch }})

Implement the task completely. Commit your work with clear commit messages.
Do not push; the orchestrator handles publishing."#;

const REPAIR_TEMPLATE: &str = r#"The verification pipeline failed in this worktree.

Failed step: {{ failed_step }}

Output (tail):
```
{{ error_output }}
```

Verification commands that must pass:
{% for step in commands %}- {{ step.name }}: `{{ step.cmd }}`
{% endfor %}
Fix the code so every verification command passes. Commit your fixes."#;

const SPLIT_TEMPLATE: &str = r#"Assess whether this change task is too large for a single reviewable change request.

Task #{{ id }}: {{ title }}

{{ body }}

Answer with ONLY a JSON object, no prose and no code fence:
{"shouldSplit": <bool>, "proposedSplits": [{"title": "...", "body": "..."}], "reasoning": "..."}

Propose splits only when the task clearly bundles independent deliverables."#;

pub const CONFLICT_AUTO_TEMPLATE: &str = r#"Resolve the merge conflict in `{{ file }}`.

The file content, conflict markers included:
```
{{ content }}
```

Keep both sides where possible; prefer the incoming change on a true
collision. Output ONLY the resolved file content, with no conflict markers,
no explanation, and no code fence."#;

pub const CONFLICT_INTENT_TEMPLATE: &str = r#"Resolve the merge conflict in `{{ file }}` following this instruction:

{{ intent }}

The file content, conflict markers included:
```
{{ content }}
```

Output ONLY the resolved file content, with no conflict markers, no
explanation, and no code fence."#;

pub fn render_template(
    template: &str,
    ctx: minijinja::Value,
) -> Result<String, minijinja::Error> {
    let env = Environment::new();
    let tmpl = env.template_from_str(template)?;
    tmpl.render(ctx)
}

// ---------------------------------------------------------------------------
// Orchestration-facing calls
// ---------------------------------------------------------------------------

/// Ask the agent to implement a task inside its worktree.
pub fn implement_issue(
    agent: &dyn Agent,
    task: &Task,
    branch: &str,
    base_branch: &str,
    config: &OrchestratorConfig,
    worktree_path: &Path,
    logger: &TaskLogger,
) -> AgentOutcome {
    let prompt = match render_template(
        IMPLEMENT_TEMPLATE,
        minijinja::context! {
            id => task.id,
            title => task.title,
            body => task.body,
            branch => branch,
            base_branch => base_branch,
        },
    ) {
        Ok(prompt) => prompt,
        Err(e) => return AgentOutcome::failure(format!("prompt template error: {e}")),
    };

    logger.progress(format!("Running agent ({})", config.models.implement));
    agent.run(&AgentRequest {
        prompt,
        model: config.models.implement.clone(),
        cwd: worktree_path.to_path_buf(),
        permission_mode: Some(PermissionMode::AcceptEdits),
        allowed_tools: Some(config.allowed_tools.clone()),
    })
}

/// Run the verification fixer on a failed step. Never fails; the outcome is
/// routed to the logger.
pub fn run_verification_fixer(
    agent: &dyn Agent,
    failed_step: &str,
    error_output: &str,
    config: &OrchestratorConfig,
    worktree_path: &Path,
    logger: &TaskLogger,
) {
    let prompt = match render_template(
        REPAIR_TEMPLATE,
        minijinja::context! {
            failed_step => failed_step,
            error_output => error_output,
            commands => config.verify,
        },
    ) {
        Ok(prompt) => prompt,
        Err(e) => {
            log::warn!("repair prompt template error: {e}");
            return;
        }
    };

    logger.progress(format!("Running verification fixer for '{failed_step}'"));
    let outcome = agent.run(&AgentRequest {
        prompt,
        model: config.models.implement.clone(),
        cwd: worktree_path.to_path_buf(),
        permission_mode: Some(PermissionMode::AcceptEdits),
        allowed_tools: Some(config.allowed_tools.clone()),
    });
    if outcome.ok {
        logger.progress("Fixer finished");
    } else {
        logger.warning(format!("Fixer failed: {}", outcome.output));
    }
    if !outcome.output.is_empty() {
        log::debug!("fixer output:\n{}", format_with_gutter(&outcome.output));
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitAssessment {
    pub should_split: bool,
    #[serde(default)]
    pub proposed_splits: Vec<ProposedSplit>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposedSplit {
    pub title: String,
    pub body: String,
}

/// Ask the assessment model whether a task should be decomposed.
/// `None` means the agent failed or returned something unparseable; the
/// caller treats that as "do not split".
pub fn assess_split(
    agent: &dyn Agent,
    task: &Task,
    config: &OrchestratorConfig,
    worktree_cwd: &Path,
) -> Option<SplitAssessment> {
    let prompt = render_template(
        SPLIT_TEMPLATE,
        minijinja::context! {
            id => task.id,
            title => task.title,
            body => task.body,
        },
    )
    .ok()?;

    let outcome = agent.run(&AgentRequest {
        prompt,
        model: config.models.assess.clone(),
        cwd: worktree_cwd.to_path_buf(),
        permission_mode: None,
        allowed_tools: None,
    });
    if !outcome.ok {
        log::warn!("split assessment failed for #{}: {}", task.id, outcome.output);
        return None;
    }

    match parse_json_payload::<SplitAssessment>(&outcome.output) {
        Some(assessment) => Some(assessment),
        None => {
            log::warn!(
                "split assessment for #{} returned unparseable output",
                task.id
            );
            None
        }
    }
}

/// Parse a JSON payload from agent output, tolerating a surrounding
/// ```json fence and leading/trailing prose-free whitespace.
pub fn parse_json_payload<T: serde::de::DeserializeOwned>(output: &str) -> Option<T> {
    let trimmed = output.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = strip_code_fence(trimmed);
    serde_json::from_str(unfenced.trim()).ok()
}

/// Strip a leading ```lang fence line and a trailing ``` line.
pub fn strip_code_fence(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => return trimmed,
    };
    body.strip_suffix("```").map_or(body, |b| b.trim_end())
}
