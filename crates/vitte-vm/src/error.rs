//! error.rs — Erreurs runtime de la VM (§7.3).
//!
//! Contrairement aux erreurs de compilation, les erreurs runtime sont des
//! messages construits dynamiquement (type mismatch, méthode inconnue,
//! dépassement de pile…) accompagnés d'une pile d'appels reconstruite à
//! partir des frames actives au moment de l'erreur.

use thiserror::Error;

/// Une erreur survenue pendant l'exécution d'un fiber.
///
/// `stack_trace` contient une ligne par frame actif, la plus récente en
/// tête, au format `"<nom_fonction> (ligne <n>)"` — reconstruite depuis
/// `FunctionObj.name` et la table de lignes du chunk courant (§4.5: « Stack
/// trace is built from each frame's function.name plus the line recovered
/// from the chunk's line map »).
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub stack_trace: Vec<String>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), stack_trace: Vec::new() }
    }

    pub fn with_trace(message: impl Into<String>, stack_trace: Vec<String>) -> Self {
        Self { message: message.into(), stack_trace }
    }
}

pub type VmResult<T> = Result<T, RuntimeError>;
