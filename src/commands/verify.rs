//! `pai verify`: run the configured verification pipeline standalone.

use crate::config::OrchestratorConfig;
use crate::error::PaiError;
use crate::git::Repository;
use crate::output::{self, TaskLogger};
use crate::verify::{VerifyOptions, run_verify};

pub struct VerifyFlags {
    pub skip_e2e: bool,
    pub name: Option<String>,
    pub json: bool,
}

pub fn handle_verify(flags: VerifyFlags) -> Result<(), PaiError> {
    let repo = Repository::discover()?;
    let config = OrchestratorConfig::load(repo.root())?;

    if config.verify.is_empty() && config.e2e.is_none() {
        return Err(PaiError::Other(
            "No verification commands configured. Add a `verify` section to .pait/orchestrator.json"
                .to_string(),
        ));
    }

    if let Some(name) = &flags.name
        && !config.verify.iter().any(|step| &step.name == name)
    {
        return Err(PaiError::Flag(format!(
            "--name '{name}' does not match any configured verify step"
        )));
    }

    let logger = TaskLogger::root();
    let result = run_verify(&VerifyOptions {
        verify: &config.verify,
        e2e: config.e2e.as_ref(),
        cwd: repo.root(),
        skip_e2e: flags.skip_e2e,
        filter_name: flags.name.as_deref(),
        logger: &logger,
        issue_number: None,
    });

    if flags.json {
        output::plain(serde_json::to_string_pretty(&result).unwrap_or_default());
    } else {
        for step in &result.steps {
            let marker = if step.ok { "✓" } else { "✗" };
            output::plain(format!("  {marker} {} ({} ms)", step.name, step.duration_ms));
        }
    }

    if result.ok {
        output::success("Verification passed");
        Ok(())
    } else {
        Err(PaiError::Other(format!(
            "Verification failed at '{}'",
            result.failed_step.unwrap_or_default()
        )))
    }
}
