//! vitte-compiler — Frontend du langage Vitte
//!
//! Transforme du texte source en bytecode exécutable par `vitte-vm` :
//! `scanner` (texte -> jetons), `parser` (jetons -> AST), `emitter`
//! (AST -> [`vitte_core::Chunk`], en une seule passe, §4.3). Ce crate ne
//! sait ni allouer d'objets en dehors d'un [`vitte_core::Heap`] fourni
//! par l'appelant, ni exécuter quoi que ce soit : c'est le travail de
//! `vitte-vm`.
//!
//! ## Features
//! - **tracing** *(optionnelle)* : réservée à l'instrumentation du
//!   frontend lui-même (pas encore de points de trace, le dispatch
//!   instrumenté vit côté `vitte-vm`).

#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

pub mod ast;
pub mod emitter;
pub mod error;
pub mod parser;
pub mod scanner;
pub mod token;

use vitte_core::{Handle, Heap};

pub use ast::Program;
pub use emitter::Emitter;
pub use error::{CompileError, Result};
pub use parser::Parser;
pub use scanner::Scanner;

/// Scanne puis parse `src`, sans émettre de bytecode. Utile pour les
/// outils qui n'ont besoin que de l'AST (formatteur, linter).
pub fn parse(file: &str, src: &str) -> Result<Program> {
    let tokens = Scanner::new(file, src).tokenize()?;
    Parser::new(file, tokens).parse_program()
}

/// Compile `src` en une fonction Vitte prête à être exécutée, allouée
/// dans `heap`. Le handle retourné pointe vers un `Object::Function`
/// sans paramètres, dont l'appel exécute le corps du module.
pub fn compile(heap: &mut Heap, file: &str, src: &str) -> Result<Handle> {
    let program = parse(file, src)?;
    Emitter::compile_program(heap, file, &program)
}

/// Comme [`compile`], mais enveloppe la fonction compilée dans un
/// `Object::Module` nommé (§6 : `require`, cache de modules par chemin).
pub fn compile_module(heap: &mut Heap, file: &str, src: &str) -> Result<Handle> {
    let program = parse(file, src)?;
    Emitter::compile_module(heap, file, &program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_program() {
        let mut heap = Heap::new();
        let handle = compile(&mut heap, "<test>", "var x = 1 + 1;").unwrap();
        match heap.get(handle) {
            vitte_core::Object::Function(f) => assert!(!f.chunk.is_empty()),
            other => panic!("expected a function, got {other:?}"),
        }
    }

    #[test]
    fn reports_syntax_errors_with_location() {
        let mut heap = Heap::new();
        let err = compile(&mut heap, "<test>", "var = ;").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn compile_module_wraps_a_named_module() {
        let mut heap = Heap::new();
        let handle = compile_module(&mut heap, "main.vit", "var x = 1;").unwrap();
        match heap.get(handle) {
            vitte_core::Object::Module(m) => assert_eq!(heap.as_str(m.name), "main.vit"),
            other => panic!("expected a module, got {other:?}"),
        }
    }
}
