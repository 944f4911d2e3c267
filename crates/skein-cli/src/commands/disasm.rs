//! `skein disasm` — print the compiled element table.

use serde_json::json;
use std::path::Path;

/// Run the disasm command.
pub fn run(file: &Path, as_json: bool) -> miette::Result<()> {
    let script = super::compile_file(file)?;

    if as_json {
        let rows: Vec<_> = (0..script.num_lines())
            .filter_map(|index| {
                let id = script.line(index)?;
                let elem = script.elem(id);
                Some(json!({
                    "index": index,
                    "kind": elem.kind.name(),
                    "gather": elem.gather_level,
                }))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows).unwrap_or_default());
    } else {
        print!("{}", script.disassemble());
    }
    Ok(())
}
