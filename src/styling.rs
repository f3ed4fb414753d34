//! Consolidated styling module for terminal output.
//!
//! Uses the anstyle ecosystem:
//! - anstream for auto-detecting color support
//! - anstyle for composable styling
//! - Semantic style constants for domain-specific use
//!
//! ## stdout vs stderr principle
//!
//! - **stdout**: all pai output (messages, plans, status tables)
//! - **stderr**: child process output (git, gh, verification commands) and
//!   interactive prompts, so prompts appear even when stdout is redirected

// Re-exports from anstream (auto-detecting output)
pub use anstream::{eprint, eprintln, print, println};

// Re-export from anstyle (for composition)
pub use anstyle::Style as AnstyleStyle;

use anstyle::{AnsiColor, Color, Style};

pub const CYAN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
pub const CYAN_BOLD: Style = CYAN.bold();
pub const GREEN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));
pub const GREEN_BOLD: Style = GREEN.bold();
pub const WARNING: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
pub const ERROR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
pub const HINT: Style = Style::new().dimmed();
pub const DIM: Style = Style::new().dimmed();
pub const BOLD: Style = Style::new().bold();

pub const ERROR_EMOJI: &str = "❌";
pub const WARNING_EMOJI: &str = "⚠️";
pub const HINT_EMOJI: &str = "💡";

/// Indent a multi-line block under a left gutter for readable subprocess output.
pub fn format_with_gutter(content: &str) -> String {
    let mut out = String::new();
    for line in content.lines() {
        out.push_str(&format!("{DIM}│{DIM:#} {line}\n"));
    }
    out
}
