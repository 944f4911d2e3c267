//! `skein play` — run a script interactively in the terminal.

use colored::Colorize;
use miette::{IntoDiagnostic, miette};
use skein_core::{BasicEvaluator, MemoryStore};
use skein_runtime::{Cursor, ExecEnv};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

/// Run the play command.
pub fn run(file: &Path, start: Option<&str>, seed: Option<u64>) -> miette::Result<()> {
    let script = Arc::new(super::compile_file(file)?);

    let mut cursor = match seed {
        Some(seed) => Cursor::with_seed(script, seed),
        None => Cursor::new(script),
    };
    if let Some(label) = start {
        if !cursor.start_label(label) {
            return Err(miette!("no label \"{label}\" in this script"));
        }
    }

    let mut store = MemoryStore::new();
    let evaluator = BasicEvaluator::new();
    let stdin = std::io::stdin();
    let mut input = stdin.lock();

    loop {
        while cursor.can_continue() {
            let mut env = ExecEnv::new(&mut store, &evaluator);
            let line = cursor.cont(&mut env);
            if !line.is_empty() {
                println!("{line}");
            }
        }

        if cursor.num_choices() == 0 {
            break;
        }

        println!();
        for index in 0..cursor.num_choices() {
            let mut env = ExecEnv::new(&mut store, &evaluator);
            let text = cursor.choice_text(index, &mut env);
            println!("{} {}", format!("{})", index + 1).cyan().bold(), text);
        }

        let selection = loop {
            print!("{} ", ">".cyan().bold());
            std::io::stdout().flush().into_diagnostic()?;
            let mut line = String::new();
            if input.read_line(&mut line).into_diagnostic()? == 0 {
                return Ok(());
            }
            let line = line.trim();
            if line.eq_ignore_ascii_case("q") {
                return Ok(());
            }
            match line.parse::<usize>() {
                Ok(n) if (1..=cursor.num_choices()).contains(&n) => break n - 1,
                _ => println!("enter a number between 1 and {}", cursor.num_choices()),
            }
        };

        cursor.choose_choice_index(selection);
        println!();
    }

    println!("{}", "— end —".dimmed());
    Ok(())
}
