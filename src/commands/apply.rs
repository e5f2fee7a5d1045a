use crate::Context;
use crate::cli::ApplyArgs;
use crate::commands::{Session, print_json};
use crate::paths;
use crate::progress::ConsoleProgress;
use crate::state::LastRun;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use declarative::facts::keys;
use declarative::{ApplyOptions, CancelToken, NoProgress, RunReport, apply, resolve};
use hostkit::DebianHost;
use std::path::Path;

/// Converge the host and return the process exit code
pub fn run(ctx: &Context, config_path: Option<&Path>, args: &ApplyArgs) -> Result<i32> {
    let session = Session::load(config_path, args.target.role.as_deref())?;
    let registry = session.registry()?;
    let catalog = session.compile(&registry)?;
    let plan = resolve(&catalog)?;

    let options = ApplyOptions {
        noop: args.noop,
        jobs: args.jobs.or(session.config.jobs).unwrap_or(1).max(1),
        timeout: session.config.timeout(args.timeout),
        cancel: CancelToken::new(),
    };
    log::debug!(
        "Applying {} resources with {} jobs (noop: {})",
        catalog.len(),
        options.jobs,
        options.noop
    );

    let host = DebianHost::new().with_retry(session.config.retry.to_retry_config());
    let providers = host.providers();

    if !args.target.json && !ctx.quiet {
        let verb = if args.noop { "Checking" } else { "Converging" };
        ui::header(&format!("{verb} {}", session.role));
    }
    let report = if args.target.json {
        apply(&catalog, &plan, &providers, &options, &mut NoProgress)
    } else {
        let show_unchanged = args.show_unchanged || ctx.verbose > 0;
        let mut progress = ConsoleProgress::new(show_unchanged, ctx.quiet);
        apply(&catalog, &plan, &providers, &options, &mut progress)
    };

    if args.target.json {
        print_json(&report)?;
    } else {
        print_summary(&report);
    }

    if report.noop {
        log::debug!("Noop run, keeping the last recorded apply");
    } else {
        let last_run = LastRun::from_report(
            &session.role,
            session.facts.get(keys::HOSTNAME),
            &report,
        );
        last_run.save_to(&paths::state_dir()?)?;
    }

    Ok(report.exit_code())
}

fn print_summary(report: &RunReport) {
    println!();
    let duration = ui::format_duration_ms(report.duration_ms);
    if !report.is_success() {
        ui::error(&format!("{} in {duration}", report.counts));
        for (id, error) in report.failures() {
            eprintln!("  {} {}: {}", "✗".red(), id, error);
        }
    } else if report.noop && report.change_count() > 0 {
        ui::warn(&format!("{} in {duration}", report.counts));
        ui::dim("Run without --noop to apply these changes");
    } else {
        ui::success(&format!("{} in {duration}", report.counts));
    }
}
