//! CLI subcommand implementations.

pub mod check;
pub mod disasm;
pub mod play;

use miette::{IntoDiagnostic, miette};
use skein_script::{Script, render_diagnostics};
use std::path::Path;

/// Read and compile a script file, rendering diagnostics on failure.
pub fn compile_file(file: &Path) -> miette::Result<Script> {
    let source = std::fs::read_to_string(file).into_diagnostic()?;
    let name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("script");

    match skein_script::parse(name, &source) {
        Ok(script) => Ok(script),
        Err(error) => {
            let filename = file.display().to_string();
            let rendered = render_diagnostics(&source, &filename, &[error.to_diagnostic()]);
            eprint!("{rendered}");
            Err(miette!("{error}"))
        }
    }
}
