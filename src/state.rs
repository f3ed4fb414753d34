//! Persistent orchestrator state.
//!
//! A JSON snapshot of per-task progress lives at
//! `<repoRoot>/.pait/state/<tool>.json` so interrupted runs resume where
//! they stopped. Loads are forgiving (missing or malformed file yields
//! `None`); saves are atomic (temp file + rename) and stamp `updatedAt`.
//!
//! Writers go through [`StateStore`], which serializes
//! mutate-then-save segments behind a mutex: the file after each save
//! reflects exactly one applied mutation.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const SCHEMA_VERSION: u32 = 1;

/// Tool names used as state file stems.
pub const ORCHESTRATE_TOOL: &str = "orchestrate";
pub const FINALIZE_TOOL: &str = "finalize";

/// Pre-schema state location, migrated once on first load.
const LEGACY_ORCHESTRATE_PATH: &str = ".pait/orchestrator-state.json";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Split,
    Blocked,
}

impl TaskStatus {
    /// Terminal states are never re-admitted by a scheduler.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Split | TaskStatus::Blocked
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub id: u64,
    pub title: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub change_request_id: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sub_tasks: Option<Vec<u64>>,
}

impl TaskState {
    pub fn new(id: u64, title: &str) -> Self {
        Self {
            id,
            title: Some(title.to_string()),
            status: TaskStatus::Pending,
            branch: None,
            base_branch: None,
            change_request_id: None,
            error: None,
            completed_at: None,
            sub_tasks: None,
        }
    }

    pub fn mark_in_progress(&mut self, branch: &str, base_branch: &str) {
        self.status = TaskStatus::InProgress;
        self.branch = Some(branch.to_string());
        self.base_branch = Some(base_branch.to_string());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn mark_blocked(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Blocked;
        self.error = Some(error.into());
    }

    /// Completion clears any error from earlier failed attempts.
    pub fn mark_completed(&mut self, change_request_id: u64) {
        self.status = TaskStatus::Completed;
        self.change_request_id = Some(change_request_id);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_split(&mut self, sub_tasks: Vec<u64>) {
        debug_assert!(!sub_tasks.is_empty());
        self.status = TaskStatus::Split;
        self.sub_tasks = Some(sub_tasks);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorState {
    pub schema_version: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tasks: IndexMap<u64, TaskState>,
}

impl OrchestratorState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            started_at: now,
            updated_at: now,
            tasks: IndexMap::new(),
        }
    }

    pub fn task(&self, id: u64) -> Option<&TaskState> {
        self.tasks.get(&id)
    }

    pub fn status_of(&self, id: u64) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|t| t.status)
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Merge (finalize) state
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    Merged,
    Failed,
    Conflict,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStateRecord {
    pub task_id: u64,
    pub change_request_id: u64,
    pub branch: String,
    pub base_branch: String,
    pub status: MergeStatus,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeState {
    pub schema_version: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub prs: IndexMap<u64, MergeStateRecord>,
}

impl MergeState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            started_at: now,
            updated_at: now,
            prs: IndexMap::new(),
        }
    }
}

impl Default for MergeState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Load / save / clear
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StateError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Io(e) => write!(f, "state file I/O error: {e}"),
            StateError::Serialize(e) => write!(f, "state serialization error: {e}"),
        }
    }
}

impl std::error::Error for StateError {}

impl From<std::io::Error> for StateError {
    fn from(e: std::io::Error) -> Self {
        StateError::Io(e)
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        StateError::Serialize(e)
    }
}

/// Path of a tool's state file under the repository root.
pub fn state_path(repo_root: &Path, tool: &str) -> PathBuf {
    repo_root.join(".pait").join("state").join(format!("{tool}.json"))
}

/// Read and parse a state file. Missing file or malformed content yields
/// `None`; malformed content additionally logs a warning. A newer schema
/// version loads with a warning rather than failing.
pub fn load<T>(path: &Path) -> Option<T>
where
    T: DeserializeOwned,
{
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<T>(&content) {
        Ok(state) => {
            if let Ok(raw) = serde_json::from_str::<serde_json::Value>(&content)
                && let Some(version) = raw.get("schemaVersion").and_then(|v| v.as_u64())
                && version > u64::from(SCHEMA_VERSION)
            {
                log::warn!(
                    "state file {} has newer schema version {version} (supported: {SCHEMA_VERSION})",
                    path.display()
                );
            }
            Some(state)
        }
        Err(e) => {
            log::warn!("ignoring malformed state file {}: {e}", path.display());
            None
        }
    }
}

/// Atomically write pretty JSON: serialize to a temp file in the target
/// directory, then rename over the destination.
fn atomic_write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), StateError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let json = serde_json::to_string_pretty(value)?;
    tmp.write_all(json.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| StateError::Io(e.error))?;
    Ok(())
}

/// Save orchestrator state, stamping `updatedAt`.
pub fn save(state: &mut OrchestratorState, path: &Path) -> Result<(), StateError> {
    state.updated_at = Utc::now();
    atomic_write_json(state, path)
}

/// Save merge state, stamping `updatedAt`.
pub fn save_merge(state: &mut MergeState, path: &Path) -> Result<(), StateError> {
    state.updated_at = Utc::now();
    atomic_write_json(state, path)
}

/// Delete a tool's state file; missing file is a no-op.
pub fn clear(repo_root: &Path, tool: &str) -> Result<(), StateError> {
    let path = state_path(repo_root, tool);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Move a legacy orchestrate state file to the canonical path, once, if the
/// canonical file does not yet exist.
fn migrate_legacy_state(repo_root: &Path) {
    let canonical = state_path(repo_root, ORCHESTRATE_TOOL);
    if canonical.exists() {
        return;
    }
    let legacy = repo_root.join(LEGACY_ORCHESTRATE_PATH);
    if !legacy.exists() {
        return;
    }
    if let Some(dir) = canonical.parent()
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        log::warn!("cannot create state directory: {e}");
        return;
    }
    match std::fs::rename(&legacy, &canonical) {
        Ok(()) => log::info!(
            "migrated legacy state file {} -> {}",
            legacy.display(),
            canonical.display()
        ),
        Err(e) => log::warn!("failed to migrate legacy state file: {e}"),
    }
}

// ---------------------------------------------------------------------------
// StateStore: serialized mutate-then-save
// ---------------------------------------------------------------------------

/// Owns the orchestrator state and its file. All mutations run under one
/// mutex as `mutate -> stamp -> write` segments, which gives the parallel
/// scheduler its total write order.
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<OrchestratorState>,
}

impl StateStore {
    /// Open (or initialize) the orchestrate state for a repository,
    /// migrating any legacy file first.
    pub fn open(repo_root: &Path) -> Self {
        migrate_legacy_state(repo_root);
        let path = state_path(repo_root, ORCHESTRATE_TOOL);
        let state = load(&path).unwrap_or_default();
        Self {
            path,
            inner: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a mutation and persist it before the lock is released.
    pub fn update<R>(&self, f: impl FnOnce(&mut OrchestratorState) -> R) -> Result<R, StateError> {
        let mut state = self.inner.lock().expect("state mutex poisoned");
        let result = f(&mut state);
        save(&mut state, &self.path)?;
        Ok(result)
    }

    /// Read-only access without saving.
    pub fn read<R>(&self, f: impl FnOnce(&OrchestratorState) -> R) -> R {
        let state = self.inner.lock().expect("state mutex poisoned");
        f(&state)
    }

    pub fn snapshot(&self) -> OrchestratorState {
        self.read(|state| state.clone())
    }
}
