//! vitte-disasm — compile un fichier `.vit` et affiche le bytecode de
//! chaque fonction qu'il contient (module principal puis fonctions
//! imbriquées, en largeur d'abord).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use vitte_core::Heap;
use vitte_tools::disasm::disassemble_recursive;

#[derive(Parser, Debug)]
#[command(name = "vitte-disasm", about = "Désassemble un fichier Vitte compilé")]
struct Args {
    /// Fichier source `.vit` à compiler puis désassembler.
    file: PathBuf,
}

fn main() -> Result<()> {
    color_eyre::install().ok();
    let args = Args::parse();

    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("lecture de {}", args.file.display()))?;
    let file_name = args.file.display().to_string();

    let mut heap = Heap::new();
    let module = vitte_compiler::compile_module(&mut heap, &file_name, &source)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    print!("{}", disassemble_recursive(&heap, module));
    Ok(())
}
