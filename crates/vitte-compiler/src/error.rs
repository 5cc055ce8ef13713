//! error.rs — Erreurs du frontend, en accord avec les trois familles
//! distinguées par le runtime : lex/parse, émission, (le runtime vit
//! dans `vitte-vm`).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("{file}:{line}: erreur de syntaxe: {message}")]
    Syntax { file: String, line: u32, message: String },

    #[error("{file}:{line}: erreur d'émission: {message}")]
    Emit { file: String, line: u32, message: String },
}

impl CompileError {
    pub fn line(&self) -> u32 {
        match self {
            CompileError::Syntax { line, .. } | CompileError::Emit { line, .. } => *line,
        }
    }
}

pub type Result<T> = core::result::Result<T, CompileError>;
