use crate::Context;
use crate::commands::{Session, print_json};
use crate::ui;
use anyhow::Result;
use std::path::Path;

pub fn run(ctx: &Context, config_path: Option<&Path>, json: bool) -> Result<()> {
    let session = Session::load(config_path, None)?;

    if json {
        return print_json(session.facts.as_map());
    }

    if !ctx.quiet {
        ui::header("Facts");
    }
    let width = session.facts.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    for (key, value) in session.facts.iter() {
        println!("  {key:<width$}  {value}");
    }
    if let Some(source) = &session.source
        && !session.config.facts.is_empty()
    {
        println!();
        ui::dim(&format!(
            "{} overridden by {}",
            session.config.facts.len(),
            source.display()
        ));
    }
    Ok(())
}
