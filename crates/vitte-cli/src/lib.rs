//! vitte-cli/src/lib.rs — pilote en ligne de commande du langage Vitte
//!
//! Collaborateur externe au cœur (spec §1 : « the command-line driver
//! (argument parsing, REPL loop, test runner) » n'est pas dans le
//! périmètre de `vitte-core`/`vitte-compiler`/`vitte-vm`). Ce crate se
//! contente d'assembler `clap` pour les arguments et `vitte-runtime::State`
//! pour tout le reste : il ne connaît ni le format bytecode, ni les
//! opcodes, seulement l'API d'embarquement du §6.
//!
//! Sous-commandes :
//!   - `run <file>`  : compile et exécute un fichier `.vit`.
//!   - `repl`        : boucle interactive (lecture-évaluation-affichage).

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use vitte_core::value::Value;
use vitte_runtime::{InterpretOutcome, State};

/// Point d’entrée du binaire (à appeler depuis `src/main.rs`).
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Run { file } => cmd_run(file),
        Cmd::Repl => cmd_repl(),
    }
}

#[derive(Parser, Debug)]
#[command(name = "vitte", version, about = "Vitte language runtime")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compile et exécute un fichier source `.vit`.
    Run {
        /// Fichier source à interpréter.
        file: PathBuf,
    },
    /// Boucle interactive : lit une ligne, l'exécute, affiche le résultat.
    Repl,
}

fn cmd_run(file: PathBuf) -> Result<()> {
    let mut state = State::new();
    match state.interpret_file(&file)? {
        InterpretOutcome::Ok(_) => Ok(()),
        InterpretOutcome::CompileError(messages) => {
            for message in &messages {
                eprintln!("erreur de compilation: {message}");
            }
            Err(anyhow!("{} erreur(s) de compilation", messages.len()))
        }
        InterpretOutcome::RuntimeError { message, stack_trace } => {
            eprintln!("erreur d'exécution: {message}");
            for (depth, frame) in stack_trace.iter().enumerate() {
                eprintln!("  #{depth} {frame}");
            }
            Err(anyhow!("{message}"))
        }
    }
}

fn cmd_repl() -> Result<()> {
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
                                Ok(s) => println!("{s}"),
                                Err(e) => eprintln!("erreur d'affichage: {}", e.message),
                            }
                        }
                    }
                    Ok(InterpretOutcome::CompileError(messages)) => {
                        for message in &messages {
                            eprintln!("erreur de compilation: {message}");
                        }
                    }
                    Ok(InterpretOutcome::RuntimeError { message, .. }) => {
                        eprintln!("erreur d'exécution: {message}");
                    }
                    Err(e) => eprintln!("erreur: {e}"),
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
