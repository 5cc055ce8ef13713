//! state.rs — [`State`], l'unique point d'entrée d'embarquement (§6).
//!
//! Assemble un [`vitte_vm::Vm`] (tas + dispatch loop) avec la résolution
//! de `require` sur le système de fichiers — le seul morceau que
//! `vitte-core`/`vitte-compiler`/`vitte-vm` délèguent volontairement
//! (spec §1: "the command-line driver ... filesystem I/O helpers" sont
//! hors cœur). Tout le reste de cette API est un passe-plat typé vers
//! `Vm`, au format de la table d'opérations du §6.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use vitte_core::heap::Handle;
use vitte_core::value::Value;
use vitte_vm::{RuntimeError, Vm, VmResult};

use crate::config::Config;
use crate::RuntimeHostError;

/// Le résultat public d'`interpret`/`interpret_file` (§6, §7) : distingue
/// les trois familles d'échec de la spécification sans perdre le détail
/// (message + ligne pour une erreur de compilation, message + trace pour
/// une erreur runtime).
#[derive(Debug)]
pub enum InterpretOutcome {
    Ok(Value),
    CompileError(Vec<String>),
    RuntimeError { message: String, stack_trace: Vec<String> },
}

pub type InterpretResult = Result<InterpretOutcome, RuntimeHostError>;

impl InterpretOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, InterpretOutcome::Ok(_))
    }
}

/// État d'un embarqueur : un [`Vm`], la racine de résolution des modules
/// requis par chemin relatif, et la pile des modules en cours de
/// chargement (pour résoudre `require` relatif au module courant, et
/// détecter les cycles — §4.5, comportement dérivé de
/// `examples/original_source/src/lit/std/lit_core.c:attempt_to_require`).
pub struct State {
    vm: Vm,
    base_dir: PathBuf,
    loading: Rc<RefCell<Vec<String>>>,
}

impl State {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut vm = Vm::with_options(config.vm_options());
        let loading: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        install_require_resolver(&mut vm, base_dir.clone(), Rc::clone(&loading));

        Self { vm, base_dir, loading }
    }

    /// Racine utilisée pour résoudre les `require` de premier niveau
    /// (ceux émis par le module passé à [`Self::interpret`]).
    pub fn set_base_dir(&mut self, dir: impl Into<PathBuf>) {
        self.base_dir = dir.into();
        install_require_resolver(&mut self.vm, self.base_dir.clone(), Rc::clone(&self.loading));
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    // ---- §6 embedding API --------------------------------------------

    pub fn define_native(&mut self, name: &str, arity: Option<u8>, body: vitte_core::native::NativeFn) {
        self.vm.define_native(name, arity, body);
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.vm.set_global(name, value);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.vm.get_global(name)
    }

    pub fn call(&mut self, callee: Value, args: &[Value]) -> VmResult<Value> {
        self.vm.call(callee, args)
    }

    /// Appelle `method` sur `instance` comme le ferait `OP_INVOKE` (§6 `call_method`).
    pub fn call_method(&mut self, instance: Value, method: &str, args: &[Value]) -> VmResult<Value> {
        self.vm.call_method(instance, method, args)
    }

    /// Convertit `v` en chaîne d'affichage via sa méthode `toString` (§6).
    pub fn to_string(&mut self, v: Value) -> VmResult<String> {
        self.vm.to_string_value(v)
    }

    /// Compile et exécute `source` comme un module nommé `module_name`
    /// (§6 `interpret`). Les `require` émis depuis ce module se résolvent
    /// relativement à [`Self::base_dir`].
    pub fn interpret(&mut self, module_name: &str, source: &str) -> InterpretResult {
        let heap = self.vm.heap_mut();
        let module = match vitte_compiler::compile_module(heap, module_name, source) {
            Ok(h) => h,
            Err(err) => return Ok(InterpretOutcome::CompileError(vec![err.to_string()])),
        };
        self.vm.register_module(module_name, module);
        self.loading.borrow_mut().push(module_name.to_string());
        let result = self.vm.run_module(module);
        self.loading.borrow_mut().pop();
        Ok(match result {
            Ok(v) => InterpretOutcome::Ok(v),
            Err(RuntimeError { message, stack_trace }) => {
                InterpretOutcome::RuntimeError { message, stack_trace }
            }
        })
    }

    /// Comme [`Self::interpret`], mais lit la source depuis `path` et
    /// utilise son répertoire parent comme racine pour les `require` de
    /// premier niveau (§6 `interpret_file`).
    pub fn interpret_file(&mut self, path: impl AsRef<Path>) -> InterpretResult {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .map_err(|source| RuntimeHostError::Io { path: path.display().to_string(), source })?;
        if let Some(parent) = path.parent() {
            self.set_base_dir(parent.to_path_buf());
        }
        let module_name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("main").to_string();
        self.interpret(&module_name, &source)
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Branche sur `vm` un résolveur de `require` qui relit l'algorithme de
/// l'implémentation d'origine : tente `path` tel quel relatif à
/// `base_dir`, puis — s'il échoue — `path` combiné au module actuellement
/// en cours de chargement moins son dernier segment dotté
/// (`examples/original_source/src/lit/std/lit_core.c:attempt_to_require_combined`).
/// Traduit en Rust : chemins de fichiers `Path`/`fs::read_to_string`
/// plutôt que `stat`/`fopen` bruts ; aucune autre différence de
/// comportement.
fn install_require_resolver(vm: &mut Vm, base_dir: PathBuf, loading: Rc<RefCell<Vec<String>>>) {
    vm.set_require_resolver(Some(Box::new(move |vm: &mut Vm, path: &str| {
        let candidates = {
            let mut v = vec![path.to_string()];
            if let Some(current) = loading.borrow().last() {
                if let Some(idx) = current.rfind('.') {
                    v.push(format!("{}.{}", &current[..idx], path));
                }
            }
            v
        };

        for dotted in &candidates {
            let rel = dotted.replace('.', "/");
            let file = base_dir.join(format!("{rel}.vit"));
            if !file.exists() {
                continue;
            }
            if loading.borrow().iter().any(|m| m == dotted) {
                return Err(RuntimeError::new(format!("cycle de modules détecté sur {dotted}")));
            }
            let source = fs::read_to_string(&file).map_err(|e| {
                RuntimeError::new(format!("lecture de {}: {e}", file.display()))
            })?;
            let heap = vm.heap_mut();
            let module: Handle = vitte_compiler::compile_module(heap, dotted, &source)
                .map_err(|e| RuntimeError::new(e.to_string()))?;
            vm.register_module(dotted, module);
            loading.borrow_mut().push(dotted.clone());
            let result = vm.run_module(module);
            loading.borrow_mut().pop();
            return result;
        }

        Err(RuntimeError::new(format!("échec de la résolution du module '{path}'")))
    })));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interprets_a_trivial_program() {
        let mut state = State::new();
        let outcome = state.interpret("<test>", "var x = 2 + 3 * 4 - 1; return x;").unwrap();
        match outcome {
            InterpretOutcome::Ok(v) => assert_eq!(v, Value::Number(13.0)),
            other => panic!("attendu Ok, obtenu {other:?}"),
        }
    }

    #[test]
    fn reports_compile_errors_without_panicking() {
        let mut state = State::new();
        let outcome = state.interpret("<test>", "var = ;").unwrap();
        assert!(matches!(outcome, InterpretOutcome::CompileError(_)));
    }

    #[test]
    fn reports_runtime_errors_with_a_stack_trace() {
        let mut state = State::new();
        let outcome = state.interpret("<test>", "function boom() { return 1 + \"x\"; } boom();").unwrap();
        match outcome {
            InterpretOutcome::RuntimeError { stack_trace, .. } => assert!(!stack_trace.is_empty()),
            other => panic!("attendu RuntimeError, obtenu {other:?}"),
        }
    }
}
