//! disasm.rs — désassemblage récursif d'un module ou d'une fonction compilés.
//!
//! Une fonction imbriquée (lambda, méthode, classe) est toujours référencée
//! par une constante `Value::Obj` de la fonction englobante (voir
//! `vitte-compiler::emitter`) : on les retrouve en parcourant `Chunk::constants`
//! plutôt qu'en demandant au compilateur une liste à part.

use std::collections::VecDeque;

use vitte_core::heap::{Handle, Heap};
use vitte_core::object::{Object, ObjectKind};
use vitte_core::value::Value;

/// Désassemble `root` (une fonction ou un module) et toute fonction qu'elle
/// référence transitivement, dans l'ordre de découverte (largeur d'abord).
pub fn disassemble_recursive(heap: &Heap, root: Handle) -> String {
    let mut out = String::new();
    let mut seen = std::collections::HashSet::new();
    let mut queue: VecDeque<Handle> = VecDeque::new();
    queue.push_back(root);

    while let Some(handle) = queue.pop_front() {
        if !seen.insert(handle.index) {
            continue;
        }
        let function_handle = match heap.get(handle) {
            Object::Module(m) => m.main_function,
            Object::Function(_) => handle,
            _ => continue,
        };
        if let Object::Function(f) = heap.get(function_handle) {
            let title = format!("{} ({} args)", heap.as_str(f.name), f.arg_count);
            out.push_str(&f.chunk.disassemble(&title, heap));
            out.push('\n');
            for constant in f.chunk.constants() {
                if let Value::Obj(h) = constant {
                    if heap.kind(*h) == ObjectKind::Function {
                        queue.push_back(*h);
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembles_nested_functions() {
        let mut heap = Heap::new();
        let module = vitte_compiler::compile_module(
            &mut heap,
            "<test>",
            "function outer() { var f = (x) => x + 1; return f(1); }",
        )
        .unwrap();
        let text = disassemble_recursive(&heap, module);
        assert!(text.contains("== "));
        assert!(text.matches("== ").count() >= 2, "attendu au moins deux fonctions désassemblées:\n{text}");
    }
}
