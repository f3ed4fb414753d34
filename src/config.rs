//! Orchestrator configuration.
//!
//! The configuration lives inside the repository at
//! `<repoRoot>/.pait/orchestrator.json` and is merged over built-in
//! defaults. Environment variables with the `PAI` prefix override the flat
//! fields (e.g. `PAI_BASEBRANCH=main`).
//!
//! ```json
//! {
//!   "branchPrefix": "feat/",
//!   "baseBranch": "master",
//!   "worktreeDir": ".pait/worktrees",
//!   "models": { "implement": "sonnet", "assess": "haiku" },
//!   "retries": { "implement": 1, "verify": 1 },
//!   "allowedTools": "Bash Edit Write Read Glob Grep",
//!   "verify": [ { "name": "test", "cmd": "cargo test" } ],
//!   "e2e": { "run": "npm run e2e", "update": "npm run e2e:update", "snapshotGlob": "e2e/__snapshots__" },
//!   "allowedAuthors": ["octocat"]
//! }
//! ```

use config::{Config, ConfigError, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file location, relative to the repository root.
pub const CONFIG_RELATIVE_PATH: &str = ".pait/orchestrator.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    #[serde(alias = "branchprefix")]
    pub branch_prefix: String,
    #[serde(alias = "basebranch")]
    pub base_branch: String,
    #[serde(alias = "worktreedir")]
    pub worktree_dir: String,
    pub models: ModelConfig,
    pub retries: RetryConfig,
    #[serde(alias = "allowedtools")]
    pub allowed_tools: String,
    pub verify: Vec<VerifyCommand>,
    pub e2e: Option<E2eConfig>,
    /// When non-empty, issue listing keeps only tasks authored by one of
    /// these logins.
    #[serde(alias = "allowedauthors")]
    pub allowed_authors: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "feat/".to_string(),
            base_branch: "master".to_string(),
            worktree_dir: ".pait/worktrees".to_string(),
            models: ModelConfig::default(),
            retries: RetryConfig::default(),
            allowed_tools: "Bash Edit Write Read Glob Grep".to_string(),
            verify: Vec::new(),
            e2e: None,
            allowed_authors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub implement: String,
    pub assess: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            implement: "sonnet".to_string(),
            assess: "haiku".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub implement: u32,
    pub verify: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            implement: 1,
            verify: 1,
        }
    }
}

/// A named verification step; `cmd` is an opaque shell command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyCommand {
    pub name: String,
    pub cmd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct E2eConfig {
    pub run: String,
    pub update: String,
    #[serde(alias = "snapshotglob")]
    pub snapshot_glob: String,
}

impl OrchestratorConfig {
    /// Load configuration for the repository at `repo_root`, merging the
    /// optional JSON file and `PAI_*` environment overrides over defaults.
    pub fn load(repo_root: &Path) -> Result<Self, ConfigError> {
        let config_path = repo_root.join(CONFIG_RELATIVE_PATH);

        let mut builder = Config::builder();
        if config_path.exists() {
            builder = builder.add_source(File::from(config_path).format(FileFormat::Json));
        }
        builder = builder.add_source(config::Environment::with_prefix("PAI"));

        let config: OrchestratorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.branch_prefix.is_empty() {
            return Err(ConfigError::Message(
                "branchPrefix cannot be empty".to_string(),
            ));
        }
        if self.base_branch.is_empty() {
            return Err(ConfigError::Message(
                "baseBranch cannot be empty".to_string(),
            ));
        }
        if Path::new(&self.worktree_dir).is_absolute() {
            return Err(ConfigError::Message(
                "worktreeDir must be relative to the repository root".to_string(),
            ));
        }
        for step in &self.verify {
            if step.name.trim().is_empty() || step.cmd.trim().is_empty() {
                return Err(ConfigError::Message(
                    "verify entries need both a name and a cmd".to_string(),
                ));
            }
        }
        Ok(())
    }
}
