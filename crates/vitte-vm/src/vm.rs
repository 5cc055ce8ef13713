//! vm.rs — Boucle de dispatch, protocole d'appel, fermetures, fibers (§4.5-4.7).
//!
//! La VM ne connaît qu'un seul tas ([`Heap`]) et une pile de fibers en
//! cours d'exécution identifiée par `current_fiber`. Chaque instruction
//! est exécutée par [`Vm::step`], qui relit le frame actif du fiber
//! courant, copie l'opcode courant (`Op` est `Copy`), puis mute soit la
//! pile de valeurs du fiber, soit ses frames. Comme `CallFrame::slots_base`
//! est un index dans `Vec<Value>` plutôt qu'un pointeur brut, la
//! croissance de la pile (`Vec::push`) ne nécessite jamais de rebasage :
//! la spec (§5 "on growth ... rebase pointers") visait l'implémentation
//! d'origine en C, pas une pile indexée.

use std::collections::HashMap;

use vitte_core::bytecode::ops::{NameIx, PrivateIx};
use vitte_core::frame::{CallFrame, Callable};
use vitte_core::heap::{Handle, Heap};
use vitte_core::native::{NativeBody, NativeContext, NativeResult};
use vitte_core::object::{
    ArrayObj, BoundMethodObj, ClassObj, ClosureObj, FiberObj, InstanceObj, MapObj, ModuleObj,
    UpvalueLocation, UpvalueObj,
};
use vitte_core::table::Table;
use vitte_core::{Object, Op, Value};

use crate::error::{RuntimeError, VmResult};
use crate::natives;

/// Profondeur maximale de la pile de frames d'un fiber (§4.5, §8).
pub const CALL_FRAMES_MAX: usize = 64;

/// Tunables par défaut ; `vitte-runtime::Config` peut les faire varier
/// sans recompiler (§10 AMBIENT STACK).
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    pub call_frames_max: usize,
    pub heap_grow_factor: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self { call_frames_max: CALL_FRAMES_MAX, heap_grow_factor: 2 }
    }
}

/// La machine virtuelle : un tas, les globales, le cache de modules, et le
/// fiber actuellement exécuté.
pub struct Vm {
    heap: Heap,
    options: VmOptions,
    globals: Table<Value>,
    /// Cache de modules par chemin dotté (`§4.5 OP_REQUIRE`). Les clés sont
    /// des `String` Rust ordinaires (pas des `Handle` internés) : le nom de
    /// module n'a pas besoin de vivre dans le tas GC.
    modules: HashMap<String, Handle>,
    current_fiber: Handle,
    /// Pile de racines de compilation/natives (§4.6 : protection d'objets en
    /// cours de construction contre une collecte déclenchée par une
    /// allocation imbriquée).
    roots: Vec<Handle>,
    /// Résolveur de `require` branché par l'embarqueur (§4.5 `OP_REQUIRE`,
    /// §6 : le cœur ne sait pas lire un système de fichiers — `vitte-runtime`
    /// fournit ce callback, qui compile puis exécute le module désigné et
    /// retourne sa valeur de retour). Pris par `Option::take` pendant
    /// l'appel pour éviter un emprunt de `self` à l'intérieur de sa propre
    /// fermeture.
    resolver: Option<RequireResolver>,
}

/// Callback appelé par `OP_REQUIRE` quand le chemin demandé n'est pas déjà
/// dans le cache de modules. Reçoit la VM (pour compiler dans son tas,
/// appeler `register_module` et `run_module`) et le chemin tel qu'écrit
/// dans le code source ; retourne la valeur de retour du module une fois
/// exécuté — la résolution englobe la compilation ET l'exécution pour que
/// l'embarqueur puisse faire encadrer les deux par sa propre pile de
/// "module en cours" (résolution de chemins relatifs, §4.5).
pub type RequireResolver = Box<dyn FnMut(&mut Vm, &str) -> VmResult<Value>>;

impl Vm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let mut heap = Heap::new();
        let genesis = heap.alloc(Object::Fiber(FiberObj {
            stack: Vec::new(),
            frames: Vec::new(),
            parent: None,
            error: Value::Null,
            abort: false,
            catcher: false,
            arg_count: 0,
            open_upvalues: Vec::new(),
            module: None,
        }));
        let mut vm = Self {
            heap,
            options,
            globals: Table::new(),
            modules: HashMap::new(),
            current_fiber: genesis,
            roots: Vec::new(),
            resolver: None,
        };
        natives::install_core_classes(&mut vm);
        vm
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn current_fiber(&self) -> Handle {
        self.current_fiber
    }

    /// Branche le résolveur de `require` de l'embarqueur (§6). `None`
    /// restaure le comportement par défaut (seul le cache sert les `require`).
    pub fn set_require_resolver(&mut self, resolver: Option<RequireResolver>) {
        self.resolver = resolver;
    }

    pub fn push_root(&mut self, handle: Handle) {
        self.roots.push(handle);
    }

    pub fn pop_root(&mut self) {
        self.roots.pop();
    }

    pub fn define_native(
        &mut self,
        name: &str,
        arity: Option<u8>,
        body: vitte_core::native::NativeFn,
    ) {
        let handle = self.intern(name);
        let func = self.heap.alloc(Object::NativeFunction(vitte_core::object::NativeFunctionObj {
            name: handle,
            arity,
            body: NativeBody::Generic(body),
        }));
        self.globals.insert(handle, Value::Obj(func));
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let handle = self.intern(name);
        self.globals.insert(handle, value);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        let handle = self.heap.get_interned(name)?;
        self.globals.get(handle).copied()
    }

    pub(crate) fn intern(&mut self, s: &str) -> Handle {
        self.heap.intern_string(s)
    }

    fn maybe_collect(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let mut roots = vec![self.current_fiber];
        roots.extend(self.roots.iter().copied());
        for (_, v) in self.globals.iter() {
            if let Value::Obj(h) = v {
                roots.push(*h);
            }
        }
        roots.extend(self.modules.values().copied());
        #[cfg(feature = "tracing")]
        let before = self.heap.bytes_allocated();
        self.heap.collect_garbage(roots);
        #[cfg(feature = "tracing")]
        tracing::debug!(before, after = self.heap.bytes_allocated(), "gc cycle");
    }

    // ---- Accès bas niveau au fiber courant -------------------------------

    fn fiber(&self, handle: Handle) -> &FiberObj {
        match self.heap.get(handle) {
            Object::Fiber(f) => f,
            _ => panic!("handle does not reference a fiber"),
        }
    }

    fn fiber_mut(&mut self, handle: Handle) -> &mut FiberObj {
        match self.heap.get_mut(handle) {
            Object::Fiber(f) => f,
            _ => panic!("handle does not reference a fiber"),
        }
    }

    fn push(&mut self, v: Value) {
        self.fiber_mut(self.current_fiber).stack.push(v);
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.fiber_mut(self.current_fiber)
            .stack
            .pop()
            .ok_or_else(|| self.runtime_error("pile de valeurs vide"))
    }

    fn peek(&self, depth_from_top: usize) -> VmResult<Value> {
        let fiber = self.fiber(self.current_fiber);
        let len = fiber.stack.len();
        fiber
            .stack
            .get(len.wrapping_sub(1 + depth_from_top))
            .copied()
            .ok_or_else(|| self.runtime_error("pile de valeurs vide"))
    }

    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let trace = self.build_stack_trace();
        RuntimeError::with_trace(message, trace)
    }

    fn build_stack_trace(&self) -> Vec<String> {
        let fiber = self.fiber(self.current_fiber);
        fiber
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let function_handle = self.callable_function(frame.callable);
                let name = match self.heap.get(function_handle) {
                    Object::Function(f) => self.heap.as_str(f.name).to_owned(),
                    _ => "<?>".to_string(),
                };
                let line = match self.heap.get(function_handle) {
                    Object::Function(f) => {
                        f.chunk.lines.line_for_pc(frame.ip.saturating_sub(1) as u32).unwrap_or(0)
                    }
                    _ => 0,
                };
                format!("{name} (ligne {line})")
            })
            .collect()
    }

    fn callable_function(&self, callable: Callable) -> Handle {
        match callable {
            Callable::Function(h) => h,
            Callable::Closure(h) => match self.heap.get(h) {
                Object::Closure(c) => c.function,
                _ => unreachable!("closure handle does not reference a closure"),
            },
        }
    }

    // ---- Entrées publiques -------------------------------------------------

    /// Exécute le corps principal d'un module déjà compilé jusqu'à
    /// épuisement, et retourne sa valeur de retour (§4.5, §6 `interpret`).
    pub fn run_module(&mut self, module: Handle) -> VmResult<Value> {
        let main_function = match self.heap.get(module) {
            Object::Module(m) => m.main_function,
            _ => panic!("handle does not reference a module"),
        };
        // Chaque module s'exécute sur son propre fiber, lié à lui via
        // `FiberObj::module` (`lit_vm.c:258`: `lit_create_fiber(state, module,
        // module->main_function)`) : un `require` imbriqué dans un autre
        // module ne doit jamais résoudre ses privées sur le fiber — et donc
        // le module — de l'importeur.
        let previous_fiber = self.current_fiber;
        let module_fiber = self.heap.alloc(Object::Fiber(FiberObj {
            stack: Vec::new(),
            frames: Vec::new(),
            parent: Some(previous_fiber),
            error: Value::Null,
            abort: false,
            catcher: false,
            arg_count: 0,
            open_upvalues: Vec::new(),
            module: Some(module),
        }));
        self.current_fiber = module_fiber;
        let result = self.call(Value::Obj(main_function), &[]);
        self.current_fiber = previous_fiber;
        let result = result?;
        if let Object::Module(m) = self.heap.get_mut(module) {
            m.ran = true;
            m.return_value = result;
        }
        Ok(result)
    }

    /// Appelle `callee` avec `args`, depuis l'extérieur du dispatch loop
    /// (embedding API §6, et `NativeContext::call` pour les méthodes
    /// natives qui rappellent dans le code utilisateur, ex. `Array.sort`).
    pub fn call(&mut self, callee: Value, args: &[Value]) -> VmResult<Value> {
        let depth_before = self.fiber(self.current_fiber).frames.len();
        self.push(callee);
        for arg in args {
            self.push(*arg);
        }
        self.call_value(callee, args.len() as u8)?;
        self.run_until(depth_before)
    }

    /// Appelle `method` sur `receiver` (§6 `call_method`).
    pub fn call_method(&mut self, receiver: Value, method: &str, args: &[Value]) -> VmResult<Value> {
        let depth_before = self.fiber(self.current_fiber).frames.len();
        self.push(receiver);
        for arg in args {
            self.push(*arg);
        }
        let name = self.intern(method);
        self.invoke(name, args.len() as u8)?;
        self.run_until(depth_before)
    }

    /// Convertit `v` en chaîne d'affichage via sa méthode `toString` (§6).
    pub fn to_string_value(&mut self, v: Value) -> VmResult<String> {
        match v {
            Value::Null => Ok("null".to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(natives::format_number(n)),
            Value::Obj(h) => match self.heap.kind(h) {
                vitte_core::object::ObjectKind::String => Ok(self.heap.as_str(h).to_owned()),
                _ => {
                    let result = self.call_method(v, "toString", &[])?;
                    match result {
                        Value::Obj(rh) if self.heap.kind(rh) == vitte_core::object::ObjectKind::String => {
                            Ok(self.heap.as_str(rh).to_owned())
                        }
                        other => Ok(natives::default_display(&other, &self.heap)),
                    }
                }
            },
        }
    }

    /// Boucle jusqu'à ce que le fiber courant soit revenu à la profondeur
    /// `target_depth` (utilisé tant par l'appel de plus haut niveau que par
    /// les rappels natifs imbriqués, qui passent leur propre profondeur de
    /// départ).
    fn run_until(&mut self, target_depth: usize) -> VmResult<Value> {
        loop {
            self.maybe_collect();
            if self.fiber(self.current_fiber).frames.len() <= target_depth {
                return self.pop();
            }
            self.step()?;
        }
    }

    // ---- Un pas de dispatch -------------------------------------------------

    fn current_op(&self) -> (Op, u32, Handle) {
        let fiber = self.fiber(self.current_fiber);
        let frame = fiber.frames.last().expect("step called with no active frame");
        let function_handle = self.callable_function(frame.callable);
        let op = match self.heap.get(function_handle) {
            Object::Function(f) => f.chunk.ops[frame.ip],
            _ => unreachable!(),
        };
        (op, frame.ip as u32, function_handle)
    }

    fn advance_ip(&mut self) {
        self.fiber_mut(self.current_fiber).frames.last_mut().unwrap().ip += 1;
    }

    fn slots_base(&self) -> usize {
        self.fiber(self.current_fiber).frames.last().unwrap().slots_base
    }

    fn const_at(&self, function: Handle, ix: u32) -> Value {
        match self.heap.get(function) {
            Object::Function(f) => *f.chunk.const_at(ix).expect("constant index out of bounds"),
            _ => unreachable!(),
        }
    }

    fn get_local(&self, slot: u16) -> Value {
        let base = self.slots_base();
        self.fiber(self.current_fiber).stack[base + slot as usize]
    }

    fn set_local(&mut self, slot: u16, v: Value) {
        let base = self.slots_base();
        self.fiber_mut(self.current_fiber).stack[base + slot as usize] = v;
    }

    #[allow(clippy::too_many_lines)]
    fn step(&mut self) -> VmResult<()> {
        let (op, _pc, function_handle) = self.current_op();
        self.advance_ip();

        #[cfg(feature = "tracing")]
        tracing::trace!(?op, "step");

        match op {
            Op::Nop => {}
            Op::Pop => {
                self.pop()?;
            }
            Op::PopMultiple(n) => {
                for _ in 0..n {
                    self.pop()?;
                }
            }
            Op::Return => {
                return self.do_return();
            }
            Op::Constant(ix) => {
                let v = self.const_at(function_handle, ix);
                self.push(v);
            }
            Op::True => self.push(Value::Bool(true)),
            Op::False => self.push(Value::Bool(false)),
            Op::Null => self.push(Value::Null),

            Op::Negate => {
                let v = self.pop()?;
                match v {
                    Value::Number(n) => self.push(Value::Number(-n)),
                    other => return Err(self.type_error("number", &other)),
                }
            }
            Op::Not => {
                let v = self.pop()?;
                self.push(Value::Bool(!v.is_truthy()));
            }
            Op::BNot => {
                let v = self.pop()?;
                match v {
                    Value::Number(n) => self.push(Value::Number(!(n as i64) as f64)),
                    other => return Err(self.type_error("number", &other)),
                }
            }

            Op::Add => self.binary_add()?,
            Op::Subtract => self.binary_numeric(|a, b| a - b)?,
            Op::Multiply => self.binary_numeric(|a, b| a * b)?,
            Op::Divide => self.binary_numeric(|a, b| a / b)?,
            Op::Mod => self.binary_numeric(|a, b| a % b)?,
            Op::Power => self.binary_numeric(f64::powf)?,
            Op::FloorDivide => self.binary_numeric(|a, b| (a / b).floor())?,

            Op::Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b));
            }
            Op::NotEqual => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a != b));
            }
            Op::Greater => self.binary_compare(|a, b| a > b)?,
            Op::GreaterEqual => self.binary_compare(|a, b| a >= b)?,
            Op::Less => self.binary_compare(|a, b| a < b)?,
            Op::LessEqual => self.binary_compare(|a, b| a <= b)?,

            Op::LShift => self.binary_int(|a, b| a.wrapping_shl(b as u32))?,
            Op::RShift => self.binary_int(|a, b| a.wrapping_shr(b as u32))?,
            Op::BAnd => self.binary_int(|a, b| a & b)?,
            Op::BOr => self.binary_int(|a, b| a | b)?,
            Op::BXor => self.binary_int(|a, b| a ^ b)?,

            Op::Is => self.op_is()?,

            Op::GetGlobal(ix) => {
                let name = self.name_at(function_handle, ix);
                let v = self.globals.get(name).copied().ok_or_else(|| {
                    self.runtime_error(format!("variable globale non définie: {}", self.heap.as_str(name)))
                })?;
                self.push(v);
            }
            Op::SetGlobal(ix) => {
                let name = self.name_at(function_handle, ix);
                let v = self.peek(0)?;
                self.globals.insert(name, v);
            }
            Op::GetLocal(slot) => {
                let v = self.get_local(slot);
                self.push(v);
            }
            Op::SetLocal(slot) => {
                let v = self.peek(0)?;
                self.set_local(slot, v);
            }
            Op::GetPrivate(ix) => {
                let module = self.current_module()?;
                let v = match self.heap.get(module) {
                    Object::Module(m) => m.privates[ix as usize],
                    _ => unreachable!(),
                };
                self.push(v);
            }
            Op::SetPrivate(ix) => {
                let module = self.current_module()?;
                let v = self.peek(0)?;
                if let Object::Module(m) = self.heap.get_mut(module) {
                    m.privates[ix as usize] = v;
                }
            }
            Op::GetUpvalue(ix) => {
                let v = self.get_upvalue(ix)?;
                self.push(v);
            }
            Op::SetUpvalue(ix) => {
                let v = self.peek(0)?;
                self.set_upvalue(ix, v)?;
            }

            Op::Jump(d) => self.jump(op, d as i32)?,
            Op::JumpBack(d) => self.jump(op, -(d as i32))?,
            Op::JumpIfFalse(d) => {
                let cond = self.peek(0)?;
                if !cond.is_truthy() {
                    self.jump(op, d as i32)?;
                }
            }
            Op::JumpIfNull(d) => {
                let cond = self.peek(0)?;
                if cond.is_null() {
                    self.jump(op, d as i32)?;
                }
            }
            Op::JumpIfNullPopping(d) => {
                let cond = self.pop()?;
                if cond.is_null() {
                    self.jump(op, d as i32)?;
                }
            }

            Op::Call(argc) => {
                let callee = self.peek(argc as usize)?;
                self.call_value(callee, argc)?;
            }

            Op::Closure(ix) => self.make_closure(function_handle, ix)?,
            Op::CloseUpvalue => {
                let base = self.fiber(self.current_fiber).stack.len() - 1;
                self.close_upvalues_from(base);
                self.pop()?;
            }

            Op::Class => self.op_class(function_handle)?,
            Op::Inherit => self.op_inherit()?,
            Op::Method(ix) => self.op_method(function_handle, ix)?,
            Op::StaticField(ix) => self.op_static_field(function_handle, ix)?,
            Op::DefineField(ix) => self.op_method(function_handle, ix)?,
            Op::GetField(ix) => self.op_get_field(function_handle, ix)?,
            Op::SetField(ix) => self.op_set_field(function_handle, ix)?,
            Op::GetSuperMethod(ix) => self.op_get_super_method(function_handle, ix)?,

            Op::Invoke(ix, argc) => {
                let name = self.name_at(function_handle, ix);
                self.invoke(name, argc)?;
            }
            Op::InvokeIgnoring(ix, argc) => {
                let name = self.name_at(function_handle, ix);
                self.invoke(name, argc)?;
                self.pop()?;
            }
            Op::InvokeSuper(ix, argc) => {
                let name = self.name_at(function_handle, ix);
                self.invoke_super(name, argc)?;
            }
            Op::InvokeSuperIgnoring(ix, argc) => {
                let name = self.name_at(function_handle, ix);
                self.invoke_super(name, argc)?;
                self.pop()?;
            }

            Op::Array => {
                let handle = self.heap.alloc(Object::Array(ArrayObj::default()));
                self.push(Value::Obj(handle));
            }
            Op::Map => {
                let handle = self.heap.alloc(Object::Map(MapObj::default()));
                self.push(Value::Obj(handle));
            }
            Op::Range => self.op_range()?,
            Op::PushArrayElement => {
                let v = self.pop()?;
                let array = self.peek(0)?;
                self.array_mut(array)?.values.push(v);
            }
            Op::PushMapElement => {
                let v = self.pop()?;
                let k = self.pop()?;
                let map = self.peek(0)?;
                let key_handle = self.to_map_key(k)?;
                self.map_mut(map)?.entries.insert(key_handle, v);
            }
            Op::SubscriptGet => self.op_subscript_get()?,
            Op::SubscriptSet => self.op_subscript_set()?,

            Op::PopLocals(n) => {
                for _ in 0..n {
                    self.pop()?;
                }
            }

            Op::Require => self.op_require()?,
        }
        Ok(())
    }

    fn name_at(&self, function: Handle, ix: NameIx) -> Handle {
        match self.const_at(function, ix) {
            Value::Obj(h) => h,
            _ => panic!("name constant is not a string"),
        }
    }

    fn current_module(&self) -> VmResult<Handle> {
        // Le module courant est celui lié au fiber actif (`FiberObj::module`),
        // fixé à la création du fiber par `run_module` ou `Fiber.new` — jamais
        // déduit en remontant la pile d'appels, qui identifierait à tort le
        // module importeur pour un `require` exécuté sur le même fiber.
        self.fiber(self.current_fiber)
            .module
            .ok_or_else(|| self.runtime_error("accès à une variable privée hors d'un module"))
    }

    fn jump(&mut self, op: Op, offset: i32) -> VmResult<()> {
        let _ = op;
        let fiber = self.fiber_mut(self.current_fiber);
        let frame = fiber.frames.last_mut().unwrap();
        // `advance_ip` already moved `ip` past this instruction, so it sits
        // at pc+1 — exactly the base the emitter's `patch_jump` offsets are
        // relative to.
        let dest = frame.ip as i64 + offset as i64;
        frame.ip = dest.max(0) as usize;
        Ok(())
    }

    fn type_error(&self, expected: &str, got: &Value) -> RuntimeError {
        self.runtime_error(format!("type attendu {expected}, obtenu {}", got.type_name(&self.heap)))
    }

    fn binary_add(&mut self) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => self.push(Value::Number(x + y)),
            (Value::Obj(ha), Value::Obj(hb))
                if self.heap.kind(ha) == vitte_core::object::ObjectKind::String
                    && self.heap.kind(hb) == vitte_core::object::ObjectKind::String =>
            {
                let mut s = self.heap.as_str(ha).to_owned();
                s.push_str(self.heap.as_str(hb));
                let handle = self.heap.intern_string(&s);
                self.push(Value::Obj(handle));
            }
            (other, _) => return Err(self.type_error("number ou string", &other)),
        }
        Ok(())
    }

    fn binary_numeric(&mut self, f: impl FnOnce(f64, f64) -> f64) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                self.push(Value::Number(f(x, y)));
                Ok(())
            }
            (other, _) => Err(self.type_error("number", &other)),
        }
    }

    fn binary_int(&mut self, f: impl FnOnce(i64, i64) -> i64) -> VmResult<()> {
        self.binary_numeric(|a, b| f(a as i64, b as i64) as f64)
    }

    fn binary_compare(&mut self, f: impl FnOnce(f64, f64) -> bool) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                self.push(Value::Bool(f(x, y)));
                Ok(())
            }
            (other, _) => Err(self.type_error("number", &other)),
        }
    }

    fn op_is(&mut self) -> VmResult<()> {
        let class_v = self.pop()?;
        let instance_v = self.pop()?;
        let class_handle = match class_v {
            Value::Obj(h) if self.heap.kind(h) == vitte_core::object::ObjectKind::Class => h,
            other => return Err(self.type_error("class", &other)),
        };
        let instance_class = match instance_v {
            Value::Obj(h) => match self.heap.get(h) {
                Object::Instance(i) => Some(i.class),
                _ => None,
            },
            _ => None,
        };
        let mut found = false;
        let mut cursor = instance_class;
        while let Some(c) = cursor {
            if c == class_handle {
                found = true;
                break;
            }
            cursor = match self.heap.get(c) {
                Object::Class(cl) => cl.super_class,
                _ => None,
            };
        }
        self.push(Value::Bool(found));
        Ok(())
    }

    // ---- Upvalues ----------------------------------------------------------

    fn get_upvalue(&self, ix: u16) -> VmResult<Value> {
        let fiber = self.fiber(self.current_fiber);
        let frame = fiber.frames.last().unwrap();
        let closure_handle = match frame.callable {
            Callable::Closure(h) => h,
            Callable::Function(_) => panic!("GetUpvalue in a bare function frame"),
        };
        let upvalue_handle = match self.heap.get(closure_handle) {
            Object::Closure(c) => c.upvalues[ix as usize],
            _ => unreachable!(),
        };
        match self.heap.get(upvalue_handle) {
            Object::Upvalue(u) => Ok(match &u.location {
                UpvalueLocation::Stack { fiber, slot } => self.fiber(*fiber).stack[*slot],
                UpvalueLocation::Closed(v) => *v,
            }),
            _ => unreachable!(),
        }
    }

    fn set_upvalue(&mut self, ix: u16, v: Value) -> VmResult<()> {
        let fiber = self.fiber(self.current_fiber);
        let frame = fiber.frames.last().unwrap();
        let closure_handle = match frame.callable {
            Callable::Closure(h) => h,
            Callable::Function(_) => panic!("SetUpvalue in a bare function frame"),
        };
        let upvalue_handle = match self.heap.get(closure_handle) {
            Object::Closure(c) => c.upvalues[ix as usize],
            _ => unreachable!(),
        };
        match self.heap.get_mut(upvalue_handle) {
            Object::Upvalue(u) => match &mut u.location {
                UpvalueLocation::Stack { fiber, slot } => {
                    let (fiber, slot) = (*fiber, *slot);
                    self.fiber_mut(fiber).stack[slot] = v;
                }
                UpvalueLocation::Closed(slot) => *slot = v,
            },
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Recherche un upvalue ouvert existant sur `slot` du fiber courant, ou
    /// en crée un nouveau (§4.5: « walks the VM's sorted open-upvalue
    /// list »). Réutiliser l'upvalue existant est ce qui garantit que deux
    /// fermetures capturant la même case observent les mêmes mutations tant
    /// qu'elle reste ouverte.
    fn capture_upvalue(&mut self, slot: usize) -> Handle {
        let fiber = self.current_fiber;
        let existing = self.fiber(fiber).open_upvalues.iter().copied().find(|&h| {
            matches!(
                self.heap.get(h),
                Object::Upvalue(u) if matches!(u.location, UpvalueLocation::Stack { slot: s, .. } if s == slot)
            )
        });
        if let Some(h) = existing {
            return h;
        }
        let handle = self
            .heap
            .alloc(Object::Upvalue(UpvalueObj { location: UpvalueLocation::Stack { fiber, slot } }));
        self.fiber_mut(fiber).open_upvalues.push(handle);
        handle
    }

    /// Ferme tous les upvalues ouverts pointant vers des cases `>= from` du
    /// fiber courant, et les retire de la liste d'upvalues ouverts (une case
    /// refermée peut être réutilisée par une locale suivante sans risquer
    /// d'être confondue avec l'upvalue qu'elle portait).
    fn close_upvalues_from(&mut self, from: usize) {
        let fiber = self.current_fiber;
        let mut i = 0;
        while i < self.fiber(fiber).open_upvalues.len() {
            let handle = self.fiber(fiber).open_upvalues[i];
            let slot = match self.heap.get(handle) {
                Object::Upvalue(u) => match u.location {
                    UpvalueLocation::Stack { slot, .. } => Some(slot),
                    UpvalueLocation::Closed(_) => None,
                },
                _ => None,
            };
            match slot {
                Some(slot) if slot >= from => {
                    let value = self.fiber(fiber).stack[slot];
                    if let Object::Upvalue(u) = self.heap.get_mut(handle) {
                        u.location = UpvalueLocation::Closed(value);
                    }
                    self.fiber_mut(fiber).open_upvalues.remove(i);
                }
                _ => i += 1,
            }
        }
    }

    fn make_closure(&mut self, function_holder: Handle, const_ix: u32) -> VmResult<()> {
        let function_value = self.const_at(function_holder, const_ix);
        let function_handle = match function_value {
            Value::Obj(h) => h,
            _ => panic!("Closure operand is not a function constant"),
        };
        let descriptors = match self.heap.get(function_handle) {
            Object::Function(f) => f.upvalues.clone(),
            _ => panic!("Closure operand is not a function"),
        };
        let base = self.slots_base();
        let mut upvalues = Vec::with_capacity(descriptors.len());
        for desc in descriptors {
            if desc.is_local {
                upvalues.push(self.capture_upvalue(base + desc.index as usize));
            } else {
                let enclosing = match self.fiber(self.current_fiber).frames.last().unwrap().callable {
                    Callable::Closure(h) => h,
                    Callable::Function(_) => panic!("upvalue of an enclosing closure requested from a bare function"),
                };
                let reused = match self.heap.get(enclosing) {
                    Object::Closure(c) => c.upvalues[desc.index as usize],
                    _ => unreachable!(),
                };
                upvalues.push(reused);
            }
        }
        let handle = self.heap.alloc(Object::Closure(ClosureObj { function: function_handle, upvalues }));
        self.push(Value::Obj(handle));
        Ok(())
    }

    // ---- Classes -------------------------------------------------------

    fn op_class(&mut self, function_handle: Handle) -> VmResult<()> {
        let name_v = self.pop()?;
        let name = match name_v {
            Value::Obj(h) => h,
            _ => panic!("class name is not a string constant"),
        };
        let _ = function_handle;
        let handle = self.heap.alloc(Object::Class(ClassObj {
            name,
            methods: Table::new(),
            static_fields: Table::new(),
            init_method: None,
            super_class: None,
        }));
        self.push(Value::Obj(handle));
        Ok(())
    }

    fn op_inherit(&mut self) -> VmResult<()> {
        let super_v = self.pop()?;
        let subclass_v = self.peek(0)?;
        let super_handle = match super_v {
            Value::Obj(h) if self.heap.kind(h) == vitte_core::object::ObjectKind::Class => h,
            other => return Err(self.type_error("class", &other)),
        };
        let subclass_handle = match subclass_v {
            Value::Obj(h) => h,
            _ => unreachable!(),
        };
        let (methods, statics, init) = match self.heap.get(super_handle) {
            Object::Class(c) => (c.methods.clone(), c.static_fields.clone(), c.init_method),
            _ => unreachable!(),
        };
        if let Object::Class(c) = self.heap.get_mut(subclass_handle) {
            c.methods.copy_from(&methods);
            c.static_fields.copy_from(&statics);
            c.init_method = init;
            c.super_class = Some(super_handle);
        }
        Ok(())
    }

    fn op_method(&mut self, function_handle: Handle, ix: NameIx) -> VmResult<()> {
        let name = self.name_at(function_handle, ix);
        let method_v = self.pop()?;
        let class_v = self.peek(0)?;
        let class_handle = match class_v {
            Value::Obj(h) => h,
            _ => unreachable!(),
        };
        let is_ctor = self.heap.as_str(name) == natives::CONSTRUCTOR_NAME;
        if let Object::Class(c) = self.heap.get_mut(class_handle) {
            c.methods.insert(name, method_v);
            if is_ctor {
                c.init_method = Some(method_v);
            }
        }
        Ok(())
    }

    fn op_static_field(&mut self, function_handle: Handle, ix: NameIx) -> VmResult<()> {
        let name = self.name_at(function_handle, ix);
        let v = self.pop()?;
        let class_v = self.peek(0)?;
        let class_handle = match class_v {
            Value::Obj(h) => h,
            _ => unreachable!(),
        };
        if let Object::Class(c) = self.heap.get_mut(class_handle) {
            c.static_fields.insert(name, v);
        }
        Ok(())
    }

    fn op_get_field(&mut self, function_handle: Handle, ix: NameIx) -> VmResult<()> {
        let name = self.name_at(function_handle, ix);
        let receiver = self.pop()?;
        let v = self.get_field(receiver, name)?;
        self.push(v);
        Ok(())
    }

    /// Accès à une propriété (`Op::GetField`). Une méthode déclarée via
    /// `get name() { ... }` (stockée sous le nom synthétique `get name`,
    /// §4.3 `emit_method`) est invoquée immédiatement ; une méthode normale
    /// est renvoyée sous forme de `BoundMethod` pour un appel ultérieur.
    fn get_field(&mut self, receiver: Value, name: Handle) -> VmResult<Value> {
        match receiver {
            Value::Obj(h) if self.heap.kind(h) == vitte_core::object::ObjectKind::Instance => {
                if let Object::Instance(i) = self.heap.get(h) {
                    if let Some(v) = i.fields.get(name).copied() {
                        return Ok(v);
                    }
                }
                let class = match self.heap.get(h) {
                    Object::Instance(i) => i.class,
                    _ => unreachable!(),
                };
                self.get_member(receiver, class, name)
            }
            Value::Obj(h) if self.heap.kind(h) == vitte_core::object::ObjectKind::Class => {
                let getter = self.getter_name(name);
                let found = match self.heap.get(h) {
                    Object::Class(c) => c.static_fields.get(getter).copied(),
                    _ => unreachable!(),
                };
                if let Some(m) = found {
                    return self.invoke_value(receiver, m, &[]);
                }
                let field = match self.heap.get(h) {
                    Object::Class(c) => c.static_fields.get(name).copied(),
                    _ => unreachable!(),
                };
                if let Some(v) = field {
                    return Ok(v);
                }
                // Pas de champ statique propre : retombe sur les méthodes
                // partagées de la classe "Class" elle-même (`toString`,
                // `super`, …), exactement comme une instance retombe sur
                // les méthodes de sa classe.
                let class_class = self.core_class_handle_by_name("Class")?;
                self.get_member(receiver, class_class, name)
            }
            _ => {
                let class = self.core_class_handle(&receiver)?;
                self.get_member(receiver, class, name)
            }
        }
    }

    fn get_member(&mut self, receiver: Value, class: Handle, name: Handle) -> VmResult<Value> {
        let getter = self.getter_name(name);
        let found = match self.heap.get(class) {
            Object::Class(c) => c.methods.get(getter).copied(),
            _ => None,
        };
        if let Some(m) = found {
            return self.invoke_value(receiver, m, &[]);
        }
        self.bind_method(receiver, class, name)
    }

    fn getter_name(&mut self, name: Handle) -> Handle {
        let s = format!("get {}", self.heap.as_str(name));
        self.intern(&s)
    }

    fn core_class_handle(&mut self, receiver: &Value) -> VmResult<Handle> {
        let class_name = natives::core_class_name(receiver, &self.heap);
        self.core_class_handle_by_name(class_name)
    }

    fn core_class_handle_by_name(&mut self, class_name: &str) -> VmResult<Handle> {
        let handle = self.intern(class_name);
        match self.globals.get(handle).copied() {
            Some(Value::Obj(h)) => Ok(h),
            _ => Err(self.runtime_error(format!("classe core introuvable: {class_name}"))),
        }
    }

    /// Appelle `method` sur `receiver` sans passer par la pile de
    /// l'appelant (utilisé pour invoquer un getter pendant `get_field`).
    fn invoke_value(&mut self, receiver: Value, method: Value, args: &[Value]) -> VmResult<Value> {
        let depth_before = self.fiber(self.current_fiber).frames.len();
        self.push(receiver);
        for a in args {
            self.push(*a);
        }
        self.call_value(method, args.len() as u8)?;
        self.run_until(depth_before)
    }

    fn bind_method(&mut self, receiver: Value, class: Handle, name: Handle) -> VmResult<Value> {
        let method = match self.heap.get(class) {
            Object::Class(c) => c.methods.get(name).copied(),
            _ => None,
        };
        match method {
            Some(method) => {
                let handle = self.heap.alloc(Object::BoundMethod(BoundMethodObj { receiver, method }));
                Ok(Value::Obj(handle))
            }
            None => Err(self.runtime_error(format!("propriété inconnue: {}", self.heap.as_str(name)))),
        }
    }

    fn op_set_field(&mut self, function_handle: Handle, ix: NameIx) -> VmResult<()> {
        let name = self.name_at(function_handle, ix);
        let value = self.pop()?;
        let receiver = self.pop()?;
        match receiver {
            Value::Obj(h) => match self.heap.get_mut(h) {
                Object::Instance(i) => {
                    i.fields.insert(name, value);
                }
                _ => return Err(self.type_error("instance", &receiver)),
            },
            _ => return Err(self.type_error("instance", &receiver)),
        }
        self.push(value);
        Ok(())
    }

    fn op_get_super_method(&mut self, function_handle: Handle, ix: NameIx) -> VmResult<()> {
        let name = self.name_at(function_handle, ix);
        let super_v = self.pop()?;
        let receiver = self.pop()?;
        let super_handle = match super_v {
            Value::Obj(h) => h,
            _ => unreachable!(),
        };
        let bound = self.bind_method(receiver, super_handle, name)?;
        self.push(bound);
        Ok(())
    }

    fn invoke_super(&mut self, name: Handle, argc: u8) -> VmResult<()> {
        let super_v = self.pop()?;
        let super_handle = match super_v {
            Value::Obj(h) => h,
            _ => unreachable!(),
        };
        let method = match self.heap.get(super_handle) {
            Object::Class(c) => c.methods.get(name).copied(),
            _ => None,
        };
        match method {
            Some(m) => self.call_value(m, argc),
            None => Err(self.runtime_error(format!("méthode super inconnue: {}", self.heap.as_str(name)))),
        }
    }

    // ---- Collections ------------------------------------------------------

    fn array_mut(&mut self, v: Value) -> VmResult<&mut ArrayObj> {
        match v {
            Value::Obj(h) => match self.heap.get_mut(h) {
                Object::Array(a) => Ok(a),
                _ => Err(self.type_error("array", &v)),
            },
            _ => Err(self.type_error("array", &v)),
        }
    }

    fn map_mut(&mut self, v: Value) -> VmResult<&mut MapObj> {
        match v {
            Value::Obj(h) => match self.heap.get_mut(h) {
                Object::Map(m) => Ok(m),
                _ => Err(self.type_error("map", &v)),
            },
            _ => Err(self.type_error("map", &v)),
        }
    }

    /// Les clés de `Map` sont des chaînes internées (§3). Toute autre
    /// valeur est convertie via `toString` avant insertion.
    fn to_map_key(&mut self, v: Value) -> VmResult<Handle> {
        match v {
            Value::Obj(h) if self.heap.kind(h) == vitte_core::object::ObjectKind::String => Ok(h),
            other => {
                let s = self.to_string_value(other)?;
                Ok(self.intern(&s))
            }
        }
    }

    fn op_range(&mut self) -> VmResult<()> {
        let to = self.pop()?;
        let from = self.pop()?;
        match (from, to) {
            (Value::Number(_), Value::Number(_)) => {
                let handle = natives::make_range(self, from, to);
                self.push(Value::Obj(handle));
                Ok(())
            }
            (other, _) => Err(self.type_error("number", &other)),
        }
    }

    fn op_subscript_get(&mut self) -> VmResult<()> {
        let index = self.pop()?;
        let receiver = self.pop()?;
        match receiver {
            Value::Obj(h) => match self.heap.get(h) {
                Object::Array(a) => {
                    let i = natives::expect_index(&index, a.values.len(), &self.heap)?;
                    self.push(a.values[i]);
                    Ok(())
                }
                Object::Map(_) => {
                    let key = self.to_map_key(index)?;
                    let v = match self.heap.get(h) {
                        Object::Map(m) => m.entries.get(key).copied().unwrap_or(Value::Null),
                        _ => unreachable!(),
                    };
                    self.push(v);
                    Ok(())
                }
                _ => Err(self.type_error("array ou map", &receiver)),
            },
            other => Err(self.type_error("array ou map", &other)),
        }
    }

    fn op_subscript_set(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let index = self.pop()?;
        let receiver = self.pop()?;
        match receiver {
            Value::Obj(h) => match self.heap.get(h) {
                Object::Array(a) => {
                    let i = natives::expect_index(&index, a.values.len(), &self.heap)?;
                    if let Object::Array(a) = self.heap.get_mut(h) {
                        a.values[i] = value;
                    }
                    self.push(value);
                    Ok(())
                }
                Object::Map(_) => {
                    let key = self.to_map_key(index)?;
                    if let Object::Map(m) = self.heap.get_mut(h) {
                        m.entries.insert(key, value);
                    }
                    self.push(value);
                    Ok(())
                }
                _ => Err(self.type_error("array ou map", &receiver)),
            },
            other => Err(self.type_error("array ou map", &other)),
        }
    }

    // ---- Modules / require --------------------------------------------

    fn op_require(&mut self) -> VmResult<()> {
        let name_v = self.pop()?;
        let name_handle = match name_v {
            Value::Obj(h) if self.heap.kind(h) == vitte_core::object::ObjectKind::String => h,
            other => return Err(self.type_error("string", &other)),
        };
        let path = self.heap.as_str(name_handle).to_owned();
        if let Some(&module_handle) = self.modules.get(&path) {
            let (ran, return_value) = match self.heap.get(module_handle) {
                Object::Module(m) => (m.ran, m.return_value),
                _ => unreachable!(),
            };
            if ran {
                self.push(return_value);
                return Ok(());
            }
            // Module déjà compilé (enregistré par le résolveur) mais pas
            // encore exécuté : l'exécuter maintenant plutôt que de rappeler
            // le résolveur.
            let value = self.run_module(module_handle)?;
            self.push(value);
            return Ok(());
        }
        if let Some(mut resolver) = self.resolver.take() {
            let resolved = resolver(self, &path);
            self.resolver = Some(resolver);
            self.push(resolved?);
            return Ok(());
        }
        Err(self.runtime_error(format!(
            "module non résolu: {path} (aucun résolveur `require` n'est installé — voir `vitte-runtime`)"
        )))
    }

    /// Enregistre un module déjà compilé et interprété dans le cache, pour
    /// que de futurs `require(path)` le retrouvent (utilisé par
    /// `vitte-runtime`, qui sait lire le système de fichiers).
    pub fn register_module(&mut self, path: &str, module: Handle) {
        self.modules.insert(path.to_string(), module);
    }

    // ---- Appel / invocation --------------------------------------------

    fn call_value(&mut self, callee: Value, argc: u8) -> VmResult<()> {
        match callee {
            Value::Obj(h) => match self.heap.get(h).kind() {
                vitte_core::object::ObjectKind::Closure | vitte_core::object::ObjectKind::Function => {
                    self.call_bytecode(h, argc)
                }
                vitte_core::object::ObjectKind::NativeFunction => self.call_native(h, Value::Null, argc),
                vitte_core::object::ObjectKind::Class => self.call_class(h, argc),
                vitte_core::object::ObjectKind::BoundMethod => self.call_bound_method(h, argc),
                _ => Err(self.runtime_error(format!("valeur non appelable: {}", callee.type_name(&self.heap)))),
            },
            _ => Err(self.runtime_error(format!("valeur non appelable: {}", callee.type_name(&self.heap)))),
        }
    }

    fn call_bytecode(&mut self, handle: Handle, argc: u8) -> VmResult<()> {
        let frame_depth = self.fiber(self.current_fiber).frames.len();
        if frame_depth >= self.options.call_frames_max {
            return Err(self.runtime_error("Stack overflow"));
        }
        let (arg_count, callable) = match self.heap.get(handle).kind() {
            vitte_core::object::ObjectKind::Closure => {
                let function = match self.heap.get(handle) {
                    Object::Closure(c) => c.function,
                    _ => unreachable!(),
                };
                let arity = match self.heap.get(function) {
                    Object::Function(f) => f.arg_count,
                    _ => unreachable!(),
                };
                (arity, Callable::Closure(handle))
            }
            vitte_core::object::ObjectKind::Function => {
                let arity = match self.heap.get(handle) {
                    Object::Function(f) => f.arg_count,
                    _ => unreachable!(),
                };
                (arity, Callable::Function(handle))
            }
            _ => unreachable!(),
        };
        let fiber = self.fiber_mut(self.current_fiber);
        let stack_top = fiber.stack.len();
        let slots_base = stack_top - argc as usize - 1;
        let target = slots_base + 1 + arg_count as usize;
        while fiber.stack.len() < target {
            fiber.stack.push(Value::Null);
        }
        fiber.stack.truncate(target);
        fiber.frames.push(CallFrame::new(callable, slots_base));
        Ok(())
    }

    fn call_native(&mut self, handle: Handle, receiver: Value, argc: u8) -> VmResult<()> {
        let (name, body) = match self.heap.get(handle) {
            Object::NativeFunction(n) => (n.name, n.body),
            _ => unreachable!(),
        };
        let fiber = self.fiber(self.current_fiber);
        let stack_top = fiber.stack.len();
        let args_start = stack_top - argc as usize;
        let args: Vec<Value> = fiber.stack[args_start..].to_vec();
        let slots_base = args_start - 1;

        let result = match body {
            NativeBody::Generic(f) => f(self, receiver, &args).map_err(|msg| self.runtime_error(msg))?,
            NativeBody::FiberNew => self.native_fiber_new(&args)?,
            NativeBody::FiberRun => self.native_fiber_run(receiver, &args, false)?,
            NativeBody::FiberTry => self.native_fiber_run(receiver, &args, true)?,
            NativeBody::FiberYield => self.native_fiber_yield(args.first().copied().unwrap_or(Value::Null), false)?,
            NativeBody::FiberYeet => self.native_fiber_yield(args.first().copied().unwrap_or(Value::Null), true)?,
            NativeBody::FiberAbort => {
                return Err(self.runtime_error(
                    args.first()
                        .map(|v| natives::default_display(v, &self.heap))
                        .unwrap_or_else(|| "fiber aborted".to_string()),
                ))
            }
            NativeBody::FiberCurrent => Value::Obj(self.current_fiber),
            NativeBody::FiberIsDone => {
                let h = match receiver {
                    Value::Obj(h) => h,
                    _ => return Err(self.type_error("fiber", &receiver)),
                };
                Value::Bool(self.fiber(h).done())
            }
        };
        let _ = name;
        let fiber = self.fiber_mut(self.current_fiber);
        fiber.stack.truncate(slots_base);
        fiber.stack.push(result);
        Ok(())
    }

    fn call_class(&mut self, class_handle: Handle, argc: u8) -> VmResult<()> {
        let init = match self.heap.get(class_handle) {
            Object::Class(c) => c.init_method,
            _ => None,
        };
        // Un constructeur natif "brut" (ex. `Fiber.new`) fabrique lui-même
        // la valeur résultat (un `Object::Fiber`, pas un `Object::Instance`) :
        // on le laisse remplacer la case réceptrice plutôt que d'y allouer
        // une instance générique au préalable.
        if let Some(Value::Obj(init_handle)) = init {
            if let Object::NativeFunction(nf) = self.heap.get(init_handle) {
                if !matches!(nf.body, NativeBody::Generic(_)) {
                    return self.call_native(init_handle, Value::Null, argc);
                }
            }
        }

        let instance = self.heap.alloc(Object::Instance(InstanceObj { class: class_handle, fields: Table::new() }));
        let fiber = self.fiber_mut(self.current_fiber);
        let stack_top = fiber.stack.len();
        let slot_for_receiver = stack_top - argc as usize - 1;
        fiber.stack[slot_for_receiver] = Value::Obj(instance);

        match init {
            Some(init_method) => self.call_value(init_method, argc),
            None => {
                let fiber = self.fiber_mut(self.current_fiber);
                fiber.stack.truncate(slot_for_receiver + 1);
                Ok(())
            }
        }
    }

    fn call_bound_method(&mut self, handle: Handle, argc: u8) -> VmResult<()> {
        let (receiver, method) = match self.heap.get(handle) {
            Object::BoundMethod(b) => (b.receiver, b.method),
            _ => unreachable!(),
        };
        let fiber = self.fiber_mut(self.current_fiber);
        let stack_top = fiber.stack.len();
        let slot_for_receiver = stack_top - argc as usize - 1;
        fiber.stack[slot_for_receiver] = receiver;
        match method {
            Value::Obj(h) if self.heap.kind(h) == vitte_core::object::ObjectKind::NativeFunction => {
                self.call_native(h, receiver, argc)
            }
            other => self.call_value(other, argc),
        }
    }

    fn invoke(&mut self, name: Handle, argc: u8) -> VmResult<()> {
        let receiver = self.peek(argc as usize)?;
        match receiver {
            Value::Obj(h) if self.heap.kind(h) == vitte_core::object::ObjectKind::Instance => {
                let field = match self.heap.get(h) {
                    Object::Instance(i) => i.fields.get(name).copied(),
                    _ => unreachable!(),
                };
                if let Some(callee) = field {
                    return self.call_value(callee, argc);
                }
                let class = match self.heap.get(h) {
                    Object::Instance(i) => i.class,
                    _ => unreachable!(),
                };
                let method = match self.heap.get(class) {
                    Object::Class(c) => c.methods.get(name).copied(),
                    _ => None,
                };
                match method {
                    Some(m) => self.call_value(m, argc),
                    None => Err(self.runtime_error(format!("méthode inconnue: {}", self.heap.as_str(name)))),
                }
            }
            Value::Obj(h) if self.heap.kind(h) == vitte_core::object::ObjectKind::Class => {
                let method = match self.heap.get(h) {
                    Object::Class(c) => c.static_fields.get(name).copied(),
                    _ => unreachable!(),
                };
                match method {
                    Some(m) => self.call_value(m, argc),
                    None => {
                        let class_class = self.core_class_handle_by_name("Class")?;
                        let bound = self.bind_method(receiver, class_class, name)?;
                        self.call_value(bound, argc)
                    }
                }
            }
            _ => {
                let class = self.core_class_handle(&receiver)?;
                let bound = self.bind_method(receiver, class, name)?;
                self.call_value(bound, argc)
            }
        }
    }

    fn do_return(&mut self) -> VmResult<()> {
        let result = self.pop()?;
        let frame = self.fiber_mut(self.current_fiber).frames.pop().expect("Return with no active frame");
        self.close_upvalues_from(frame.slots_base);
        let fiber = self.fiber_mut(self.current_fiber);
        fiber.stack.truncate(frame.slots_base);
        fiber.stack.push(result);
        if fiber.frames.is_empty() {
            self.maybe_return_to_parent()?;
        }
        Ok(())
    }

    /// Quand le fiber courant s'achève naturellement (dernière frame
    /// retournée) alors qu'il a un parent (il a été lancé via
    /// `Fiber.run`/`try`), le contrôle revient au parent avec la valeur de
    /// retour (§4.7).
    fn maybe_return_to_parent(&mut self) -> VmResult<()> {
        let fiber = self.fiber(self.current_fiber);
        if let Some(parent) = fiber.parent {
            let result = *fiber.stack.last().unwrap_or(&Value::Null);
            self.current_fiber = parent;
            self.push(result);
        }
        Ok(())
    }

    // ---- Fibers ----------------------------------------------------------

    fn native_fiber_new(&mut self, args: &[Value]) -> VmResult<Value> {
        let entry = args.first().copied().unwrap_or(Value::Null);
        // Hérite du module du fiber créateur (`lit_core.c:492-493`) : les
        // privées visibles dans la closure passée à `new Fiber(...)` sont
        // celles du module où cette expression a été évaluée.
        let module = self.fiber(self.current_fiber).module;
        let handle = self.heap.alloc(Object::Fiber(FiberObj {
            stack: vec![entry],
            frames: Vec::new(),
            parent: None,
            error: Value::Null,
            abort: false,
            catcher: false,
            arg_count: 0,
            open_upvalues: Vec::new(),
            module,
        }));
        Ok(Value::Obj(handle))
    }

    fn native_fiber_run(&mut self, receiver: Value, args: &[Value], catcher: bool) -> VmResult<Value> {
        let handle = match receiver {
            Value::Obj(h) => h,
            _ => return Err(self.type_error("fiber", &receiver)),
        };
        let first_run = {
            let f = self.fiber(handle);
            f.frames.is_empty() && !f.stack.is_empty()
        };
        let caller = self.current_fiber;
        {
            let f = self.fiber_mut(handle);
            f.parent = Some(caller);
            f.catcher = catcher;
            f.arg_count = args.len() as u8;
        }
        self.current_fiber = handle;
        if first_run {
            let entry = self.fiber(handle).stack[0];
            self.fiber_mut(handle).stack.clear();
            self.push(entry);
            for a in args {
                self.push(*a);
            }
            self.call_value(entry, args.len() as u8)?;
        } else {
            for a in args {
                self.push(*a);
            }
        }
        let depth_before = 0;
        let result = self.run_until_fiber_yields(handle, depth_before);
        match result {
            Ok(v) => Ok(v),
            Err(e) if catcher => {
                self.current_fiber = caller;
                Ok(Value::Obj(self.intern(&e.message)))
            }
            Err(e) => Err(e),
        }
    }

    /// Exécute `handle` jusqu'à ce qu'il cède (yield/yeet), termine, ou
    /// qu'une erreur survienne ; retourne alors la valeur transmise au
    /// parent. La boucle suit le fiber couramment actif, qui peut changer
    /// (un fiber peut en lancer un autre) : elle s'arrête dès que le
    /// contrôle est revenu au fiber appelant (`caller`, capturé ci-dessus),
    /// détecté en comparant `self.current_fiber`.
    fn run_until_fiber_yields(&mut self, started: Handle, _depth_before: usize) -> VmResult<Value> {
        let caller = self.fiber(started).parent.expect("fiber has no caller");
        loop {
            self.maybe_collect();
            if self.current_fiber == caller {
                return self.pop();
            }
            if self.fiber(self.current_fiber).frames.is_empty() {
                // Le fiber s'est achevé sans relever `maybe_return_to_parent`
                // (ne devrait pas arriver : do_return le gère) ; filet de
                // sécurité.
                self.current_fiber = caller;
                return Ok(Value::Null);
            }
            self.step()?;
        }
    }

    fn native_fiber_yield(&mut self, value: Value, is_error: bool) -> VmResult<Value> {
        let current = self.current_fiber;
        let parent = self.fiber(current).parent.ok_or_else(|| self.runtime_error("yield hors d'un fiber lancé"))?;
        if is_error {
            self.fiber_mut(current).error = value;
            self.fiber_mut(current).abort = true;
        }
        self.current_fiber = parent;
        self.push(value);
        // La valeur de retour de `yield` lui-même (ce que `run` renverra la
        // prochaine fois qu'on reprend ce fiber) est `null` jusqu'à preuve
        // du contraire ; elle est poussée par le prochain `run(args)`.
        Ok(Value::Null)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeContext for Vm {
    fn heap(&self) -> &Heap {
        &self.heap
    }

    fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    fn call(&mut self, callee: Value, args: &[Value]) -> NativeResult {
        Vm::call(self, callee, args).map_err(|e| e.message)
    }

    fn to_string(&mut self, v: Value) -> Result<String, String> {
        Vm::to_string_value(self, v).map_err(|e| e.message)
    }

    fn current_fiber(&self) -> Handle {
        self.current_fiber
    }

    fn get_global(&self, name: &str) -> Option<Value> {
        Vm::get_global(self, name)
    }
}

#[allow(dead_code)]
fn assert_private_ix_type(_: PrivateIx) {}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_compiler::compile_module;

    fn run_source(src: &str) -> Value {
        let mut vm = Vm::new();
        let module_handle = {
            let heap = vm.heap_mut();
            compile_module(heap, "<test>", src).expect("compile error")
        };
        vm.run_module(module_handle).expect("runtime error")
    }

    fn run_source_with_vm(src: &str) -> (Vm, Value) {
        let mut vm = Vm::new();
        let module_handle = {
            let heap = vm.heap_mut();
            compile_module(heap, "<test>", src).expect("compile error")
        };
        let v = vm.run_module(module_handle).expect("runtime error");
        (vm, v)
    }

    #[test]
    fn arithmetic_and_return() {
        let v = run_source("var x = 2 + 3 * 4 - 1; return x;");
        assert_eq!(v, Value::Number(13.0));
    }

    #[test]
    fn closures_capture_distinct_upvalues() {
        let v = run_source(
            "function make(x) { return () => x } var f = make(5); var g = make(7); return f() + g();",
        );
        assert_eq!(v, Value::Number(12.0));
    }

    #[test]
    fn classes_single_inheritance_and_super() {
        let v = run_source(
            "class A { constructor(n) { this.n = n } } \
             class B : A { constructor(n) { super(n + 1) } } \
             return new B(2).n;",
        );
        assert_eq!(v, Value::Number(3.0));
    }

    #[test]
    fn for_in_over_array_sums_elements() {
        let v = run_source("var a = [1,2,3]; var sum = 0; for (var x in a) sum += x; return sum;");
        assert_eq!(v, Value::Number(6.0));
    }

    #[test]
    fn string_interpolation_lowers_to_array_join() {
        let (mut vm, v) = run_source_with_vm(r#"var x = "Hello, \(2 + 3)!"; return x;"#);
        assert_eq!(vm.to_string_value(v).unwrap(), "Hello, 5!");
    }

    #[test]
    fn fiber_yields_cooperatively_and_reports_done() {
        let (mut vm, v) = run_source_with_vm(
            "var fib = new Fiber((n) => { for (var i = 0; i < n; i++) Fiber.yield(i) }); \
             var out = []; \
             while (!fib.done) out.add(fib.run(3)); \
             return out;",
        );
        assert_eq!(vm.to_string_value(v).unwrap(), "[ 0, 1, 2, null ]");
    }
}
