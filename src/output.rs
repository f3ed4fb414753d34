//! User-facing output layer.
//!
//! Thin wrappers over the styling module so commands don't format escape
//! sequences inline, plus the per-task logger decorator used by the
//! schedulers: every admitted task gets a `TaskLogger` that prefixes its
//! messages with `[#id]` so interleaved parallel output stays attributable.

use crate::styling::{
    CYAN, ERROR, ERROR_EMOJI, GREEN, HINT, HINT_EMOJI, WARNING, WARNING_EMOJI, println,
};

pub fn progress(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    println!("{CYAN}{msg}{CYAN:#}");
}

pub fn success(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    println!("{GREEN}{msg}{GREEN:#}");
}

pub fn warning(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    println!("{WARNING_EMOJI} {WARNING}{msg}{WARNING:#}");
}

pub fn error(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    println!("{ERROR_EMOJI} {ERROR}{msg}{ERROR:#}");
}

pub fn hint(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    println!("{HINT_EMOJI} {HINT}{msg}{HINT:#}");
}

/// Plain line with no semantic styling (plans, tables).
pub fn plain(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    println!("{msg}");
}

/// Logger handed to the per-task pipeline.
///
/// The root logger (sequential scheduler, finalize) prints messages as-is;
/// `for_task` produces the `[#id]`-prefixed decorator the parallel scheduler
/// hands to each slot. anstream locks stdout per call, so concurrent slots
/// interleave at line granularity only.
#[derive(Debug, Clone, Default)]
pub struct TaskLogger {
    prefix: Option<String>,
}

impl TaskLogger {
    pub fn root() -> Self {
        Self { prefix: None }
    }

    pub fn for_task(id: u64) -> Self {
        Self {
            prefix: Some(format!("[#{id}] ")),
        }
    }

    fn prefixed(&self, msg: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{msg}"),
            None => msg.to_string(),
        }
    }

    pub fn progress(&self, msg: impl AsRef<str>) {
        progress(self.prefixed(msg.as_ref()));
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        success(self.prefixed(msg.as_ref()));
    }

    pub fn warning(&self, msg: impl AsRef<str>) {
        warning(self.prefixed(msg.as_ref()));
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        error(self.prefixed(msg.as_ref()));
    }

    pub fn hint(&self, msg: impl AsRef<str>) {
        hint(self.prefixed(msg.as_ref()));
    }
}
