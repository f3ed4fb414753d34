//! Cross-platform shell execution for configured commands.
//!
//! Verification steps and E2E hooks are operator-supplied shell strings, so
//! they go through a real shell:
//! - Unix: `/bin/sh -c`
//! - Windows: Git Bash when available, PowerShell as a fallback
//!
//! Everything else in this crate (git, gh, the agent) uses argv arrays and
//! never touches a shell.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

static SHELL_CONFIG: OnceLock<ShellConfig> = OnceLock::new();

/// Shell configuration for command execution.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Path to the shell executable
    pub executable: PathBuf,
    /// Arguments to pass before the command (e.g. ["-c"] for sh)
    pub args: Vec<String>,
    /// Human-readable name for error messages
    pub name: String,
}

impl ShellConfig {
    pub fn get() -> &'static ShellConfig {
        SHELL_CONFIG.get_or_init(detect_shell)
    }

    /// Create a Command that passes `shell_command` to the shell for
    /// interpretation.
    pub fn command(&self, shell_command: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        for arg in &self.args {
            cmd.arg(arg);
        }
        cmd.arg(shell_command);
        cmd
    }
}

#[cfg(unix)]
fn detect_shell() -> ShellConfig {
    ShellConfig {
        executable: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string()],
        name: "sh".to_string(),
    }
}

#[cfg(windows)]
fn detect_shell() -> ShellConfig {
    // Prefer Git Bash so hooks can use the same syntax on all platforms.
    if let Some(bash) = find_in_path("bash.exe") {
        return ShellConfig {
            executable: bash,
            args: vec!["-c".to_string()],
            name: "bash".to_string(),
        };
    }
    ShellConfig {
        executable: PathBuf::from("powershell.exe"),
        args: vec!["-Command".to_string()],
        name: "powershell".to_string(),
    }
}

#[cfg(windows)]
fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Captured result of a shell command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stderr followed by stdout, the order repair prompts read best in.
    pub fn combined(&self) -> String {
        let mut combined = self.stderr.clone();
        if !self.stdout.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stdout);
        }
        combined
    }
}

/// Run a shell command in `cwd`, capturing output.
pub fn run_shell(shell_command: &str, cwd: &Path) -> std::io::Result<CommandOutput> {
    let shell = ShellConfig::get();
    log::debug!("$ {} ({})", shell_command, cwd.display());

    let output = shell.command(shell_command).current_dir(cwd).output()?;
    Ok(CommandOutput {
        ok: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
