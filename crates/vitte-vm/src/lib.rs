//! vitte-vm — boucle d'exécution du bytecode Vitte (§4.5-4.7).
//!
//! Ce crate assemble un [`vitte_core::heap::Heap`] (allocation, GC), une pile
//! de globales, et une boucle de dispatch ([`vm::Vm`]) qui interprète les
//! [`vitte_core::Op`] émis par `vitte-compiler`. Il ne sait rien analyser ni
//! compiler : il reçoit un module déjà compilé (un `Handle` vers un
//! `Object::Module`) et l'exécute.
//!
//! Les classes "core" (`Object`, `Number`, `String`, `Bool`, `Array`, `Map`,
//! `Range`, `Fiber`, `Function`, `Module`, `Class`) sont installées comme
//! globales au démarrage par [`natives::install_core_classes`].

#![forbid(unsafe_code)]

pub mod error;
pub mod natives;
pub mod vm;

pub use error::{RuntimeError, VmResult};
pub use natives::{check_bool, check_number, check_number_opt, check_object_string, check_string};
pub use vm::{RequireResolver, Vm, VmOptions, CALL_FRAMES_MAX};
