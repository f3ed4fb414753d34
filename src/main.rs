use clap::Parser;
use pai::cli::{Cli, Commands};
use pai::commands::finalize::FinalizeFlags;
use pai::commands::orchestrate::OrchestrateFlags;
use pai::commands::verify::VerifyFlags;
use pai::commands::{handle_finalize, handle_orchestrate, handle_verify};
use pai::output;
use std::process;

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Orchestrate {
            dry_run,
            reset,
            status,
            skip_e2e,
            skip_split,
            no_verify,
            single,
            from,
            parallel,
            file,
        } => OrchestrateFlags::from_cli(
            dry_run, reset, status, skip_e2e, skip_split, no_verify, single, from, parallel, file,
        )
        .and_then(handle_orchestrate),

        Commands::Verify {
            skip_e2e,
            name,
            json,
        } => handle_verify(VerifyFlags {
            skip_e2e,
            name,
            json,
        }),

        Commands::Finalize {
            dry_run,
            single,
            no_verify,
            strategy,
            from,
            auto_resolve,
        } => FinalizeFlags::from_cli(dry_run, single, no_verify, strategy, from, auto_resolve)
            .and_then(handle_finalize),
    };

    if let Err(e) = result {
        // Task-level failures were already narrated by the pipeline; this
        // is the final one-liner either way.
        output::error(e.to_string());
        process::exit(e.exit_code());
    }
}
