use crate::Context;
use crate::commands::print_json;
use crate::paths;
use crate::state::LastRun;
use crate::ui;
use anyhow::Result;
use colored::Colorize;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let dir = paths::state_dir()?;
    let Some(last) = LastRun::load_from(&dir)? else {
        if json {
            return print_json(&serde_json::Value::Null);
        }
        ui::info("No apply recorded yet");
        ui::dim(&format!("Looked in {}", dir.display()));
        return Ok(());
    };

    if json {
        return print_json(&last);
    }

    ui::header("Last apply");
    ui::kv("role", &last.role);
    if let Some(hostname) = &last.hostname {
        ui::kv("host", hostname);
    }
    ui::kv(
        "started",
        &last.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    ui::kv("duration", &ui::format_duration_ms(last.duration_ms));
    let result = if last.exit_code == 0 {
        last.counts.to_string().green()
    } else {
        last.counts.to_string().red()
    };
    ui::kv("result", &result.to_string());

    if !last.changed.is_empty() && !ctx.quiet {
        ui::section("Changed");
        for id in &last.changed {
            println!("  {} {}", "✓".green(), id);
        }
    }

    if !last.problems.is_empty() {
        ui::section("Problems");
        for problem in &last.problems {
            println!(
                "  {} {} {}",
                "✗".red(),
                problem.resource,
                problem.status.dimmed()
            );
            ui::dim(&format!("    {}", problem.message));
        }
    }
    Ok(())
}
