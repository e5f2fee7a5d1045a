use colored::{ColoredString, Colorize};
use declarative::{Change, Outcome};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// One-character marker for a resource outcome
pub fn outcome_marker(outcome: &Outcome) -> ColoredString {
    match outcome {
        Outcome::Unchanged => "·".dimmed(),
        Outcome::Changed { .. } => "✓".green(),
        Outcome::WouldChange { .. } => "~".yellow(),
        Outcome::Failed { .. } => "✗".red(),
        Outcome::Blocked { .. } => "⊘".red(),
        Outcome::Skipped { .. } => "-".yellow(),
    }
}

/// Print one property change, with its content diff when present
pub fn change(change: &Change) {
    println!("      {}", change.summary().dimmed());
    if let Some(diff) = &change.diff {
        for line in diff.lines() {
            let line = if line.starts_with("+++") || line.starts_with("---") {
                line.bold()
            } else if line.starts_with('+') {
                line.green()
            } else if line.starts_with('-') {
                line.red()
            } else if line.starts_with("@@") {
                line.cyan()
            } else {
                line.normal()
            };
            println!("        {line}");
        }
    }
}

/// Format milliseconds for run summaries
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(0), "0ms");
        assert_eq!(format_duration_ms(999), "999ms");
        assert_eq!(format_duration_ms(1500), "1.5s");
        assert_eq!(format_duration_ms(61_000), "1m01s");
        assert_eq!(format_duration_ms(754_300), "12m34s");
    }
}
