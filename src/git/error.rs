//! Git error types and formatting.

use crate::styling::{ERROR, ERROR_EMOJI, HINT, HINT_EMOJI};
use std::path::PathBuf;

#[derive(Debug)]
pub enum GitError {
    /// Generic error with a message
    CommandFailed(String),
    /// Error for parsing failures
    ParseError(String),
    /// `git worktree add` itself failed
    WorktreeCreate {
        branch: String,
        worktree_path: PathBuf,
        base_branch: String,
        error: String,
    },
    /// Merging a dependency branch into a fresh worktree conflicted
    MergeConflict { branch: String },
    /// Rebase failed for a non-conflict reason
    RebaseFailed {
        branch: String,
        target_branch: String,
        git_output: String,
    },
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::CommandFailed(msg) => write!(f, "{}", msg),

            GitError::ParseError(msg) => {
                write!(f, "{ERROR_EMOJI} {ERROR}{msg}{ERROR:#}")
            }

            GitError::WorktreeCreate {
                branch,
                worktree_path,
                base_branch,
                error,
            } => {
                let error_bold = ERROR.bold();
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Failed to create worktree for {error_bold}{branch}{error_bold:#}{ERROR} from {error_bold}{base_branch}{error_bold:#}{ERROR} at {}{ERROR:#}\n\n{error}",
                    worktree_path.display()
                )
            }

            GitError::MergeConflict { branch } => {
                let error_bold = ERROR.bold();
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Merging dependency branch {error_bold}{branch}{error_bold:#}{ERROR} conflicted{ERROR:#}\n\n{HINT_EMOJI} {HINT}Resolve the dependency branches manually, or drop the dependency{HINT:#}"
                )
            }

            GitError::RebaseFailed {
                branch,
                target_branch,
                git_output,
            } => {
                let error_bold = ERROR.bold();
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}Rebase of {error_bold}{branch}{error_bold:#}{ERROR} onto {error_bold}{target_branch}{error_bold:#}{ERROR} failed{ERROR:#}"
                )?;
                if !git_output.is_empty() {
                    write!(f, "\n\n{git_output}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for GitError {}

impl From<std::io::Error> for GitError {
    fn from(e: std::io::Error) -> Self {
        GitError::CommandFailed(e.to_string())
    }
}
