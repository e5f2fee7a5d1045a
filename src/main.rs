mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod site;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use declarative::{CompileError, CycleError, ManifestError};
use std::io;
use std::process;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

/// The role could not be turned into a valid plan
const EXIT_INVALID_CATALOG: i32 = 2;

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    let code = match run(&ctx, cli) {
        Ok(code) => code,
        Err(err) => {
            ui::error(&format!("{err:#}"));
            exit_code(&err)
        }
    };
    process::exit(code);
}

fn run(ctx: &Context, cli: Cli) -> Result<i32> {
    let config = cli.config.as_deref();
    match cli.command {
        Command::Facts { json } => commands::facts::run(ctx, config, json)?,
        Command::Compile(args) => commands::compile::run(ctx, config, &args)?,
        Command::Plan(args) => commands::plan::run(ctx, config, &args)?,
        Command::Apply(args) => return commands::apply::run(ctx, config, &args),
        Command::Report { json } => commands::report::run(ctx, json)?,
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "edgeform", &mut io::stdout());
        }
    }
    Ok(0)
}

/// 2 when the manifests, compilation or ordering failed, 1 otherwise
fn exit_code(err: &anyhow::Error) -> i32 {
    let invalid_catalog = err.chain().any(|cause| {
        cause.is::<ManifestError>()
            || cause.is::<CompileError>()
            || cause.is::<CycleError>()
            || cause.is::<declarative::Error>()
    });
    if invalid_catalog { EXIT_INVALID_CATALOG } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn test_exit_code_for_compile_errors() {
        let err = anyhow::Error::new(CompileError::UnknownClass {
            name: "roles::nope".to_string(),
            referenced_by: None,
        })
        .context("Failed to compile roles::nope");
        assert_eq!(exit_code(&err), EXIT_INVALID_CATALOG);

        let err: anyhow::Error = Err::<(), _>(io::Error::other("disk full"))
            .context("Failed to write state file")
            .unwrap_err();
        assert_eq!(exit_code(&err), 1);
    }
}
