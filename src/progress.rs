//! Console progress for convergence runs

use crate::ui;
use colored::Colorize;
use declarative::{Outcome, ProgressCallback, ResourceId, RunReport};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar plus one line per resource that did something
pub struct ConsoleProgress {
    bar: ProgressBar,
    /// Also list resources that were already in sync
    show_unchanged: bool,
    quiet: bool,
}

impl ConsoleProgress {
    pub fn new(show_unchanged: bool, quiet: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            show_unchanged,
            quiet,
        }
    }

    fn print_outcome(id: &ResourceId, outcome: &Outcome) {
        println!("  {} {} {}", ui::outcome_marker(outcome), id, outcome.label().dimmed());
        match outcome {
            Outcome::Failed { error } => println!("      {}", error.to_string().red()),
            Outcome::Blocked { error } => println!("      {}", error.to_string().dimmed()),
            Outcome::Skipped { reason } => println!("      {}", reason.dimmed()),
            _ => outcome.changes().iter().for_each(ui::change),
        }
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_run_start(&mut self, total: usize, noop: bool) {
        if self.quiet {
            return;
        }
        self.bar = ProgressBar::new(total as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            self.bar.set_style(style.progress_chars("=>-"));
        }
        self.bar.set_message(if noop { "checking" } else { "converging" });
    }

    fn on_wave_start(&mut self, size: usize) {
        log::debug!("Starting wave of {size} resources");
    }

    fn on_resource_complete(&mut self, id: &ResourceId, outcome: &Outcome) {
        self.bar.inc(1);
        let interesting = match outcome {
            Outcome::Unchanged => self.show_unchanged,
            Outcome::Failed { .. } => true,
            _ => !self.quiet,
        };
        if interesting {
            self.bar.suspend(|| Self::print_outcome(id, outcome));
        }
    }

    fn on_run_complete(&mut self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}
