//! Verification pipeline.
//!
//! Runs the configured verification commands in order, stopping at the
//! first failure. When an E2E suite is configured, a failing run gets one
//! snapshot-style retry: run the update command, re-run the suite, and if
//! it now passes, stage and commit the refreshed snapshots.

use crate::config::{E2eConfig, VerifyCommand};
use crate::git::Repository;
use crate::output::TaskLogger;
use crate::shell_exec::run_shell;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// Failure output is tail-truncated to this many bytes so it fits logs and
/// repair prompts.
const ERROR_TAIL_BYTES: usize = 2000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyStep {
    pub name: String,
    pub ok: bool,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub ok: bool,
    pub steps: Vec<VerifyStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResult {
    fn pass(steps: Vec<VerifyStep>) -> Self {
        Self {
            ok: true,
            steps,
            failed_step: None,
            error: None,
        }
    }

    fn fail(steps: Vec<VerifyStep>, failed_step: &str, error: String) -> Self {
        Self {
            ok: false,
            steps,
            failed_step: Some(failed_step.to_string()),
            error: Some(error),
        }
    }
}

pub struct VerifyOptions<'a> {
    pub verify: &'a [VerifyCommand],
    pub e2e: Option<&'a E2eConfig>,
    pub cwd: &'a Path,
    pub skip_e2e: bool,
    /// Run only the step with this name.
    pub filter_name: Option<&'a str>,
    pub logger: &'a TaskLogger,
    pub issue_number: Option<u64>,
}

/// Run the verification pipeline.
pub fn run_verify(opts: &VerifyOptions) -> VerifyResult {
    let mut steps = Vec::new();

    for command in opts.verify {
        if let Some(filter) = opts.filter_name
            && command.name != filter
        {
            continue;
        }

        opts.logger
            .progress(format!("Verifying: {} ({})", command.name, command.cmd));
        let step = run_step(&command.name, &command.cmd, opts.cwd);
        let failed = !step.ok;
        let error = step.error.clone();
        steps.push(step);

        if failed {
            let error = error.unwrap_or_default();
            opts.logger
                .error(format!("Verification step '{}' failed", command.name));
            return VerifyResult::fail(steps, &command.name, error);
        }
    }

    // The E2E stage is skipped entirely when a name filter targets a
    // specific verify step.
    if opts.filter_name.is_none()
        && let Some(e2e) = opts.e2e
        && !opts.skip_e2e
    {
        return run_e2e(opts, e2e, steps);
    }

    VerifyResult::pass(steps)
}

fn run_e2e(opts: &VerifyOptions, e2e: &E2eConfig, mut steps: Vec<VerifyStep>) -> VerifyResult {
    opts.logger.progress(format!("Running E2E: {}", e2e.run));
    let first = run_step("e2e", &e2e.run, opts.cwd);
    if first.ok {
        steps.push(first);
        return VerifyResult::pass(steps);
    }

    // Snapshot-style retry: refresh expectations, run again.
    opts.logger
        .progress(format!("E2E failed; updating snapshots: {}", e2e.update));
    match run_shell(&e2e.update, opts.cwd) {
        Ok(update) if !update.ok => {
            log::warn!("e2e update command failed: {}", tail(&update.combined()));
        }
        Ok(_) => {}
        Err(e) => log::warn!("e2e update command could not run: {e}"),
    }

    let retry = run_step("e2e (after snapshot update)", &e2e.run, opts.cwd);
    if retry.ok {
        commit_snapshots(opts, e2e);
        steps.push(retry);
        return VerifyResult::pass(steps);
    }

    let error = retry.error.clone().unwrap_or_default();
    steps.push(retry);
    opts.logger.error("E2E failed after snapshot update");
    VerifyResult::fail(steps, "e2e", error)
}

/// Stage refreshed snapshots and commit them. Best-effort: a failure here
/// (nothing matched, commit hook refused) must not fail a passing suite.
fn commit_snapshots(opts: &VerifyOptions, e2e: &E2eConfig) {
    let repo = Repository::at(opts.cwd);
    if let Err(e) = repo.stage_all_matching(&e2e.snapshot_glob) {
        log::warn!("could not stage e2e snapshots: {e}");
        return;
    }
    let message = match opts.issue_number {
        Some(n) => format!("test: update E2E snapshots for #{n}"),
        None => "test: update E2E snapshots".to_string(),
    };
    match repo.commit(&message) {
        Ok(()) => opts.logger.progress("Committed updated E2E snapshots"),
        Err(e) => log::warn!("could not commit e2e snapshots: {e}"),
    }
}

fn run_step(name: &str, cmd: &str, cwd: &Path) -> VerifyStep {
    let start = Instant::now();
    match run_shell(cmd, cwd) {
        Ok(output) => VerifyStep {
            name: name.to_string(),
            ok: output.ok,
            duration_ms: start.elapsed().as_millis(),
            error: if output.ok {
                None
            } else {
                Some(tail(&output.combined()))
            },
        },
        Err(e) => VerifyStep {
            name: name.to_string(),
            ok: false,
            duration_ms: start.elapsed().as_millis(),
            error: Some(format!("failed to spawn: {e}")),
        },
    }
}

/// Last `ERROR_TAIL_BYTES` bytes of a string, kept on a char boundary.
fn tail(s: &str) -> String {
    if s.len() <= ERROR_TAIL_BYTES {
        return s.to_string();
    }
    let mut start = s.len() - ERROR_TAIL_BYTES;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}
