//! `skein check` — parse a script and report diagnostics.

use colored::Colorize;
use std::path::Path;

/// Run the check command.
pub fn run(file: &Path) -> miette::Result<()> {
    let script = super::compile_file(file)?;

    let labels = script.labels().count();
    let functions = script.functions().count();
    println!(
        "{} {} ({} lines, {} labels, {} functions)",
        "ok:".green().bold(),
        file.display(),
        script.num_lines(),
        labels,
        functions
    );
    Ok(())
}
