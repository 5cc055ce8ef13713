//! vitte-fmt — reformate un fichier `.vit` selon le style canonique.
//!
//! Par défaut, écrit le résultat sur la sortie standard. `--write` réécrit
//! le fichier en place ; `--check` ne modifie rien et renvoie un code de
//! sortie non nul si le fichier n'est pas déjà dans sa forme canonique
//! (utile en CI, sur le modèle de `cargo fmt --check`).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "vitte-fmt", about = "Reformate une source Vitte")]
struct Args {
    /// Fichier source `.vit` à reformater.
    file: PathBuf,

    /// Réécrit le fichier en place plutôt que d'imprimer sur stdout.
    #[arg(long)]
    write: bool,

    /// Ne modifie rien ; échoue si le fichier n'est pas déjà canonique.
    #[arg(long, conflicts_with = "write")]
    check: bool,
}

fn main() -> Result<ExitCode> {
    color_eyre::install().ok();
    let args = Args::parse();

    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("lecture de {}", args.file.display()))?;
    let file_name = args.file.display().to_string();

    let formatted =
        vitte_tools::fmt::format_source(&file_name, &source).map_err(|e| anyhow::anyhow!("{e}"))?;

    if args.check {
        if formatted == source {
            return Ok(ExitCode::SUCCESS);
        }
        eprintln!("{} n'est pas formaté", args.file.display());
        return Ok(ExitCode::FAILURE);
    }

    if args.write {
        std::fs::write(&args.file, &formatted)
            .with_context(|| format!("écriture de {}", args.file.display()))?;
    } else {
        print!("{formatted}");
    }
    Ok(ExitCode::SUCCESS)
}
