//! vitte-runtime — Surface d'embarquement du langage Vitte (§6, §10).
//!
//! `vitte-core` fournit le modèle de données, `vitte-compiler` le
//! frontend, `vitte-vm` la boucle d'exécution ; aucun des trois ne sait
//! résoudre un nom de module vers un fichier du disque, ni assembler les
//! trois en une API d'une seule pièce pour un embarqueur. C'est le rôle
//! de ce crate : [`State`] est l'unique point d'entrée que le CLI
//! (`vitte-cli`), les outils (`vitte-tools`) et les futurs bindings
//! embarqués utilisent.
//!
//! ## Modules
//! - [`config`] : tunables externalisés (`Config`, §10 AMBIENT STACK).
//! - [`state`]  : [`State`], `interpret`/`interpret_file`, `call`,
//!   `to_string`, accesseurs natifs typés, résolution de `require`.

#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

pub mod config;
pub mod state;

pub use config::Config;
pub use state::{InterpretOutcome, InterpretResult, State};

/// Erreurs propres à la couche d'embarquement (résolution de fichiers,
/// modules déjà en cours de chargement). Les erreurs de compilation et
/// d'exécution restent celles de `vitte-compiler`/`vitte-vm` — ce type ne
/// fait que les envelopper pour l'API d'`interpret`.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeHostError {
    /// Le fichier désigné par `interpret_file` ou par un `require` est
    /// introuvable ou illisible.
    #[error("impossible de lire {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Un `require` forme un cycle (le module est déjà en cours de
    /// compilation plus haut dans la pile d'appels).
    #[error("cycle de modules détecté sur {0}")]
    CyclicRequire(String),
}
