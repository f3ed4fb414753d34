//! Command-line surface.

use crate::forge::MergeStrategy;
use clap::builder::styling::{AnsiColor, Color, Styles};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Custom styles for help output - matches pai's color scheme
fn help_styles() -> Styles {
    Styles::styled()
        .header(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .usage(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .literal(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .placeholder(anstyle::Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
}

#[derive(Parser)]
#[command(name = "pai")]
#[command(about = "Agent-driven batch change-task orchestration", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
#[command(styles = help_styles())]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the batch: implement, verify and publish every open task
    Orchestrate {
        /// Print the dependency plan and exit
        #[arg(long)]
        dry_run: bool,

        /// Delete the orchestrator state file and exit
        #[arg(long)]
        reset: bool,

        /// Print per-task status from the state file and exit
        #[arg(long)]
        status: bool,

        /// Skip the E2E suite in the verification pipeline
        #[arg(long)]
        skip_e2e: bool,

        /// Skip the split-size assessment
        #[arg(long)]
        skip_split: bool,

        /// Skip the verification pipeline entirely
        #[arg(long)]
        no_verify: bool,

        /// Run a single task: the next pending one, or the given id
        #[arg(long, value_name = "id", num_args = 0..=1, default_missing_value = "")]
        single: Option<String>,

        /// Start at the given task id
        #[arg(long, value_name = "id")]
        from: Option<String>,

        /// Run up to N tasks concurrently (dependency-aware)
        #[arg(long, value_name = "n")]
        parallel: Option<String>,

        /// Read tasks from a markdown checklist instead of the tracker
        #[arg(long, value_name = "path")]
        file: Option<PathBuf>,
    },

    /// Run the configured verification pipeline in the current directory
    Verify {
        /// Skip the E2E suite
        #[arg(long)]
        skip_e2e: bool,

        /// Run only the named step
        #[arg(long, value_name = "step")]
        name: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge completed change requests in dependency order
    Finalize {
        /// Print the merge plan and exit
        #[arg(long)]
        dry_run: bool,

        /// Stop after the first merged change request
        #[arg(long)]
        single: bool,

        /// Skip post-merge verification
        #[arg(long)]
        no_verify: bool,

        /// Merge strategy for the platform
        #[arg(long, value_enum, default_value_t = MergeStrategy::Squash)]
        strategy: MergeStrategy,

        /// Start at the given task id
        #[arg(long, value_name = "id")]
        from: Option<String>,

        /// Resolve rebase conflicts with the agent instead of prompting
        #[arg(long)]
        auto_resolve: bool,
    },
}
