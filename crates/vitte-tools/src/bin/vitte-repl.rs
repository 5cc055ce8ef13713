//! vitte-repl — boucle interactive colorée sur `vitte-runtime::State`.
//!
//! Même rôle que `vitte repl` (`vitte-cli`), en plus verbeux : la valeur de
//! retour est affichée en vert, les erreurs de compilation et d'exécution
//! en rouge (feature `colors`, activée par défaut).

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use vitte_core::value::Value;
use vitte_runtime::{InterpretOutcome, State};

#[cfg(feature = "colors")]
fn paint_ok(s: &str) -> String {
    use yansi::Paint;
    s.green().to_string()
}
#[cfg(not(feature = "colors"))]
fn paint_ok(s: &str) -> String {
    s.to_string()
}

#[cfg(feature = "colors")]
fn paint_err(s: &str) -> String {
    use yansi::Paint;
    s.red().to_string()
}
#[cfg(not(feature = "colors"))]
fn paint_err(s: &str) -> String {
    s.to_string()
}

fn main() -> Result<()> {
    color_eyre::install().ok();

    let mut state = State::new();
    let mut editor = DefaultEditor::new()?;
    let mut line_no = 0usize;

    println!("Vitte {} — Ctrl-D pour quitter", vitte_core::VERSION);
    loop {
        let prompt = format!("vitte[{line_no}]> ");
        match editor.readline(&prompt) {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                line_no += 1;
                let module_name = format!("<repl:{line_no}>");
                match state.interpret(&module_name, &line) {
                    Ok(InterpretOutcome::Ok(v)) => {
                        if !matches!(v, Value::Null) {
                            match state.to_string(v) {
                                Ok(s) => println!("{}", paint_ok(&s)),
                                Err(e) => eprintln!("{}", paint_err(&format!("erreur d'affichage: {}", e.message))),
                            }
                        }
                    }
                    Ok(InterpretOutcome::CompileError(messages)) => {
                        for message in &messages {
                            eprintln!("{}", paint_err(&format!("erreur de compilation: {message}")));
                        }
                    }
                    Ok(InterpretOutcome::RuntimeError { message, .. }) => {
                        eprintln!("{}", paint_err(&format!("erreur d'exécution: {message}")));
                    }
                    Err(e) => eprintln!("{}", paint_err(&format!("erreur: {e}"))),
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
