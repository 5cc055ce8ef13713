//! vitte-core — Cœur du langage Vitte
//!
//! Le modèle de données partagé par le compilateur et la VM : valeurs,
//! objets du tas, tas à ramasse-miettes, tables de hachage internées,
//! cadres d'appel et bytecode. Ce crate ne sait ni analyser du texte
//! source ni exécuter un programme ; il fournit les briques que
//! `vitte-compiler` émet et que `vitte-vm` interprète.
//!
//! ## Modules
//! - `value`    : [`Value`], la représentation d'exécution d'une donnée.
//! - `object`   : les variantes d'objets alloués sur le tas (`Object`).
//! - `heap`     : l'arène GC et la table d'internement des chaînes.
//! - `table`    : table de hachage à adressage ouvert utilisée partout
//!   où le langage a besoin d'associer des noms à des valeurs.
//! - `frame`    : le cadre d'appel de la VM.
//! - `bytecode` : le jeu d'instructions (`Op`) et le format `Chunk`.
//!
//! ## Features
//! - **std** *(par défaut)* : active la std.
//! - **serde** : dérive `Serialize`/`Deserialize` sur les types qui le supportent.
//! - **tracing** : instrumentation via `tracing` (désassemblage en log `trace!`).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

pub mod bytecode;
pub mod frame;
pub mod heap;
pub mod native;
pub mod object;
pub mod table;
pub mod value;

pub use bytecode::{Chunk, ConstPool, LineTable, Op};
pub use frame::CallFrame;
pub use heap::{Handle, Heap};
pub use native::{NativeBody, NativeContext, NativeFn, NativeResult};
pub use object::Object;
pub use table::Table;
pub use value::Value;

/// Version du crate (lisible, via Cargo).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use thiserror::Error;

/// Erreurs internes au modèle de données (pas les erreurs runtime du
/// langage interprété, qui vivent dans `vitte-vm::VmError`).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Un index de constante, de local ou d'upvalue dépasse les bornes
    /// du chunk ou du cadre courant — ne devrait jamais se produire pour
    /// du bytecode émis par `vitte-compiler`.
    #[error("index hors bornes: {0}")]
    OutOfBounds(String),

    /// Message générique.
    #[error("{0}")]
    Msg(String),
}

pub type Result<T, E = CoreError> = core::result::Result<T, E>;

pub mod prelude {
    pub use crate::{
        bytecode::{Chunk, Op},
        frame::{CallFrame, Callable},
        heap::{Handle, Heap},
        native::{NativeBody, NativeContext, NativeFn, NativeResult},
        object::{Object, ObjectKind},
        table::Table,
        value::Value,
        CoreError, Result,
    };
}

