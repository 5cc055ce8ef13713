//! emitter.rs — Émetteur mono-passe : AST -> bytecode (§4.3).
//!
//! Pas de représentation intermédiaire : chaque nœud de l'AST est visité
//! une fois et émet directement des [`Op`] dans le chunk de la fonction
//! en cours de compilation. Une pile de [`FunctionState`] modélise
//! l'imbrication des fonctions (une par `function`/lambda/méthode/corps
//! de classe implicite), chacune possédant ses propres locales, upvalues
//! et contexte de boucle ; résoudre un nom remonte cette pile (local de
//! la fonction courante -> upvalue capturée d'une fonction englobante ->
//! privée de module -> globale).

use vitte_core::bytecode::ops::{NameIx, PrivateIx};
use vitte_core::{Chunk, Handle, Heap, Object, Op, Value};
use vitte_core::object::{
    ClassObj, FunctionObj, ModuleObj, UpvalueDesc,
};
use vitte_core::table::Table;

use crate::ast::*;
use crate::error::{CompileError, Result};

/// Une locale déclarée dans la fonction en cours : son nom (pour la
/// résolution, pas conservé dans le bytecode) et la profondeur de scope
/// à laquelle elle a été déclarée.
struct Local {
    name: String,
    depth: u32,
    is_captured: bool,
}

/// Un point de boucle en cours d'émission : la cible de `continue`
/// (retour à la condition) et la liste des `break` à patcher une fois la
/// fin de boucle connue.
struct LoopCtx {
    /// pc du début de boucle (pour `continue` -> `JumpBack`).
    start_pc: u32,
    /// profondeur de scope au moment d'entrer dans la boucle, pour que
    /// `break`/`continue` sachent combien de locales dépiler (`PopLocals`).
    scope_depth: u32,
    /// pc des `Jump` émis par les `break`, à patcher vers la sortie.
    break_jumps: Vec<u32>,
}

/// `this` dans une méthode se comporte comme une locale implicite au
/// slot 0 ; `super.x` a besoin de savoir si la fonction courante est une
/// méthode et si sa classe a un parent.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FuncKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// État d'une fonction en cours d'émission : son chunk et sa table de
/// résolution de noms. Une pile de `FunctionState` modélise l'imbrication
/// lexicale (§4.3 : "function bodies compile to their own chunk").
struct FunctionState {
    chunk: Chunk,
    name: Handle,
    kind: FuncKind,
    arg_count: u8,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    upvalue_names: Vec<String>,
    scope_depth: u32,
    loops: Vec<LoopCtx>,
}

impl FunctionState {
    fn new(name: Handle, kind: FuncKind) -> Self {
        // Slot 0 est réservé : `this` pour une méthode, sinon inutilisé
        // (valeur de la fonction elle-même pour une closure récursive).
        let locals = vec![Local {
            name: if kind == FuncKind::Method || kind == FuncKind::Initializer {
                "this".to_string()
            } else {
                String::new()
            },
            depth: 0,
            is_captured: false,
        }];
        Self {
            chunk: Chunk::new(),
            name,
            kind,
            arg_count: 0,
            locals,
            upvalues: Vec::new(),
            upvalue_names: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
        }
    }
}

/// Contexte d'une classe en cours d'émission : son nom et si elle a un
/// parent, pour résoudre `super`.
struct ClassCtx {
    has_superclass: bool,
}

/// Émetteur mono-passe. Possède le tas, pour pouvoir interner les noms et
/// chaînes littérales au moment de l'émission plutôt qu'à l'exécution.
pub struct Emitter<'h> {
    heap: &'h mut Heap,
    file: String,
    funcs: Vec<FunctionState>,
    classes: Vec<ClassCtx>,
    /// Noms de privées du module en cours, dans l'ordre de déclaration.
    privates: Table<u32>,
    private_count: u32,
}

impl<'h> Emitter<'h> {
    pub fn new(heap: &'h mut Heap, file: &str) -> Self {
        Self {
            heap,
            file: file.to_string(),
            funcs: Vec::new(),
            classes: Vec::new(),
            privates: Table::new(),
            private_count: 0,
        }
    }

    fn err(&self, line: u32, message: impl Into<String>) -> CompileError {
        CompileError::Emit { file: self.file.clone(), line, message: message.into() }
    }

    fn func(&mut self) -> &mut FunctionState {
        self.funcs.last_mut().expect("no function being emitted")
    }

    fn emit(&mut self, op: Op, line: u32) -> u32 {
        self.func().chunk.push_op(op, line)
    }

    fn emit_const(&mut self, v: Value, line: u32) {
        let ix = self.func().chunk.add_const(v);
        self.emit(Op::Constant(ix), line);
    }

    fn intern_name(&mut self, s: &str) -> Handle {
        self.heap.intern_string(s)
    }

    fn name_const(&mut self, s: &str) -> NameIx {
        let h = self.intern_name(s);
        self.func().chunk.add_const(Value::Obj(h))
    }

    // ----- Scopes / locales -----

    fn begin_scope(&mut self) {
        self.func().scope_depth += 1;
    }

    /// Ferme le scope courant : dépile les locales qui en faisaient
    /// partie, en fermant (`CloseUpvalue`) celles capturées par une
    /// closure interne avant de les rendre inaccessibles.
    fn end_scope(&mut self, line: u32) {
        let f = self.func();
        f.scope_depth -= 1;
        let depth = f.scope_depth;
        let mut to_pop = 0u8;
        while let Some(local) = f.locals.last() {
            if local.depth <= depth {
                break;
            }
            if local.is_captured {
                // Les locales non capturées au-dessus se dépilent d'abord
                // via PopMultiple ; celle-ci nécessite une fermeture
                // individuelle avant de continuer.
                if to_pop > 0 {
                    self.emit(Op::PopMultiple(to_pop), line);
                    to_pop = 0;
                }
                self.func().locals.pop();
                self.emit(Op::CloseUpvalue, line);
            } else {
                self.func().locals.pop();
                to_pop += 1;
            }
        }
        if to_pop > 0 {
            self.emit(Op::PopMultiple(to_pop), line);
        }
    }

    fn declare_local(&mut self, name: &str, line: u32) -> Result<()> {
        let f = self.func();
        let depth = f.scope_depth;
        if f.locals.iter().rev().take_while(|l| l.depth == depth).any(|l| l.name == name) {
            return Err(self.err(line, format!("variable '{name}' déjà déclarée dans ce scope")));
        }
        self.func().locals.push(Local { name: name.to_string(), depth, is_captured: false });
        Ok(())
    }

    fn resolve_local(f: &FunctionState, name: &str) -> Option<u16> {
        f.locals.iter().enumerate().rev().find(|(_, l)| l.name == name).map(|(i, _)| i as u16)
    }

    /// Résout `name` comme upvalue de la fonction à l'index `depth` dans
    /// `self.funcs` (remonte récursivement vers les fonctions englobantes).
    fn resolve_upvalue(&mut self, depth: usize, name: &str) -> Option<u16> {
        if depth == 0 {
            return None;
        }
        let enclosing = depth - 1;
        if let Some(local_ix) = Self::resolve_local(&self.funcs[enclosing], name) {
            self.funcs[enclosing].locals[local_ix as usize].is_captured = true;
            return Some(self.add_upvalue(depth, name, true, local_ix));
        }
        if let Some(up_ix) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(depth, name, false, up_ix));
        }
        None
    }

    fn add_upvalue(&mut self, depth: usize, name: &str, is_local: bool, index: u16) -> u16 {
        let f = &mut self.funcs[depth];
        if let Some(pos) = f.upvalue_names.iter().position(|n| n == name) {
            return pos as u16;
        }
        f.upvalues.push(UpvalueDesc { is_local, index });
        f.upvalue_names.push(name.to_string());
        (f.upvalues.len() - 1) as u16
    }

    fn declare_private(&mut self, name: &str) -> u32 {
        let h = self.intern_name(name);
        if let Some(ix) = self.privates.get(h) {
            return *ix;
        }
        let ix = self.private_count;
        self.private_count += 1;
        self.privates.insert(h, ix);
        ix
    }

    fn resolve_private(&mut self, name: &str) -> Option<PrivateIx> {
        let h = self.intern_name(name);
        self.privates.get(h).map(|ix| *ix as PrivateIx)
    }

    // ----- Déclaration d'une variable (locale, privée de module, ou ignorée car globale implicite) -----

    /// `var`/`const` au scope 0 de la fonction *script* devient une
    /// privée de module (§4.3 : "module-level declarations become
    /// privates, not globals"); partout ailleurs (dans un bloc, une
    /// fonction, une méthode) c'est une locale de pile ordinaire.
    fn declare_variable(&mut self, name: &str, line: u32) -> Result<VarSlot> {
        let f = self.func();
        if f.scope_depth == 0 && f.kind == FuncKind::Script {
            Ok(VarSlot::Private(self.declare_private(name)))
        } else {
            self.declare_local(name, line)?;
            Ok(VarSlot::Local)
        }
    }

    fn emit_define_variable(&mut self, slot: VarSlot, line: u32) {
        match slot {
            VarSlot::Private(ix) => {
                self.emit(Op::SetPrivate(ix as PrivateIx), line);
                self.emit(Op::Pop, line);
            }
            VarSlot::Local => {
                // La valeur initiale reste sur la pile : c'est la locale.
            }
        }
    }

    // ----- Point d'entrée -----

    /// Compile un programme complet en une fonction "script" (corps
    /// principal du module), et renvoie au passage la table des privées
    /// de module déclarées à sa portée (§3 : "Module `privates` is a
    /// parallel array sized to `private_names.count` at emit time") —
    /// `compile_program`/`compile_module` en font ce qu'il faut de leur côté.
    fn compile_core(heap: &mut Heap, file: &str, program: &Program) -> Result<(Handle, u32, Table<u32>)> {
        let mut emitter = Emitter::new(heap, file);
        let script_name = emitter.intern_name(file);
        emitter.funcs.push(FunctionState::new(script_name, FuncKind::Script));

        for stmt in &program.stmts {
            emitter.emit_stmt(stmt)?;
        }

        let last_line = program.stmts.last().map(|s| emitter.stmt_line(s)).unwrap_or(0);
        emitter.emit_const(Value::Null, last_line);
        emitter.emit(Op::Return, last_line);

        let state = emitter.funcs.pop().expect("script function state missing");
        let func = FunctionObj {
            name: state.name,
            chunk: state.chunk,
            arg_count: 0,
            max_slots: (state.locals.len() as u16).max(1),
            is_vararg: false,
            upvalues: state.upvalues,
        };
        let handle = emitter.heap.alloc(Object::Function(func));
        Ok((handle, emitter.private_count, emitter.privates))
    }

    /// Compile un programme complet en une fonction "script" (corps
    /// principal du module) prête à être enveloppée dans un `ModuleObj`.
    pub fn compile_program(heap: &mut Heap, file: &str, program: &Program) -> Result<Handle> {
        let (handle, _, _) = Self::compile_core(heap, file, program)?;
        Ok(handle)
    }

    /// Compile un module nommé en plus de sa fonction principale, pour
    /// l'API d'incorporation (§6 : `interpret`/`require`). `ModuleObj.privates`
    /// est dimensionné sur le nombre de privées déclarées à l'émission,
    /// comme `lit_emitter.c:1478-1480` dimensionne `module->privates`
    /// avant de lancer le corps du module.
    pub fn compile_module(heap: &mut Heap, file: &str, program: &Program) -> Result<Handle> {
        let (main_fn, private_count, private_names) = Self::compile_core(heap, file, program)?;
        let module_name = heap.intern_string(file);
        let module = ModuleObj {
            name: module_name,
            main_function: main_fn,
            privates: vec![Value::Null; private_count as usize],
            private_names,
            return_value: Value::Null,
            ran: false,
        };
        Ok(heap.alloc(Object::Module(module)))
    }

    // ----- Statements -----

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(e) => {
                let line = e.line();
                self.emit_expr(e)?;
                self.emit(Op::Pop, line);
            }
            Stmt::VarDecl { name, init, line, .. } => {
                match init {
                    Some(e) => self.emit_expr(e)?,
                    None => self.emit_const(Value::Null, *line),
                }
                let slot = self.declare_variable(name, *line)?;
                self.emit_define_variable(slot, *line);
            }
            Stmt::Block(stmts) => {
                self.begin_scope();
                for s in stmts {
                    self.emit_stmt(s)?;
                }
                self.end_scope(stmts.last().map(|s| self.stmt_line(s)).unwrap_or(0));
            }
            Stmt::If { cond, then_branch, else_branch } => {
                self.emit_if(cond, then_branch, else_branch.as_deref())?;
            }
            Stmt::While { cond, body } => self.emit_while(cond, body)?,
            Stmt::ForIn { var, iterable, body, line } => {
                self.emit_for_in(var, iterable, body, *line)?;
            }
            Stmt::Function(decl) => self.emit_function_decl(decl)?,
            Stmt::Return { value, line } => self.emit_return(value.as_ref(), *line)?,
            Stmt::Break(line) => self.emit_break(*line)?,
            Stmt::Continue(line) => self.emit_continue(*line)?,
            Stmt::Class(decl) => self.emit_class_decl(decl)?,
        }
        Ok(())
    }

    fn stmt_line(&self, stmt: &Stmt) -> u32 {
        match stmt {
            Stmt::Expr(e) => e.line(),
            Stmt::VarDecl { line, .. }
            | Stmt::ForIn { line, .. }
            | Stmt::Return { line, .. } => *line,
            Stmt::Break(l) | Stmt::Continue(l) => *l,
            Stmt::Block(stmts) => stmts.last().map(|s| self.stmt_line(s)).unwrap_or(0),
            Stmt::If { cond, .. } => cond.line(),
            Stmt::While { cond, .. } => cond.line(),
            Stmt::Function(f) => f.line,
            Stmt::Class(c) => c.line,
        }
    }

    fn emit_return(&mut self, value: Option<&Expr>, line: u32) -> Result<()> {
        let is_init = self.func().kind == FuncKind::Initializer;
        if is_init {
            if value.is_some() {
                return Err(self.err(line, "un constructeur ne peut pas retourner de valeur"));
            }
            self.emit(Op::GetLocal(0), line);
        } else {
            match value {
                Some(e) => self.emit_expr(e)?,
                None => self.emit_const(Value::Null, line),
            }
        }
        self.emit(Op::Return, line);
        Ok(())
    }

    fn emit_break(&mut self, line: u32) -> Result<()> {
        let to_pop = {
            let f = self.funcs.last().expect("no function being emitted");
            match f.loops.last() {
                Some(ctx) => {
                    let target_depth = ctx.scope_depth;
                    f.locals.iter().filter(|l| l.depth > target_depth).count() as u16
                }
                None => return Err(self.err(line, "'break' hors d'une boucle")),
            }
        };
        if to_pop > 0 {
            self.emit(Op::PopLocals(to_pop), line);
        }
        let pc = self.emit(Op::Jump(0), line);
        self.func().loops.last_mut().unwrap().break_jumps.push(pc);
        Ok(())
    }

    fn emit_continue(&mut self, line: u32) -> Result<()> {
        let (start_pc, to_pop) = {
            let f = self.funcs.last().expect("no function being emitted");
            match f.loops.last() {
                Some(ctx) => {
                    let target_depth = ctx.scope_depth;
                    let to_pop = f.locals.iter().filter(|l| l.depth > target_depth).count() as u16;
                    (ctx.start_pc, to_pop)
                }
                None => return Err(self.err(line, "'continue' hors d'une boucle")),
            }
        };
        if to_pop > 0 {
            self.emit(Op::PopLocals(to_pop), line);
        }
        let pc = self.func().chunk.len() as u32;
        let back = pc + 1 - start_pc;
        self.emit(Op::JumpBack(back as i16), line);
        Ok(())
    }

    fn patch_jump(&mut self, pc: u32) {
        let f = self.func();
        let dest = f.chunk.len() as u32;
        let offset = (dest as i64 - pc as i64 - 1) as i16;
        match f.chunk.ops[pc as usize] {
            Op::Jump(_) => f.chunk.ops[pc as usize] = Op::Jump(offset),
            Op::JumpIfFalse(_) => f.chunk.ops[pc as usize] = Op::JumpIfFalse(offset),
            Op::JumpIfNull(_) => f.chunk.ops[pc as usize] = Op::JumpIfNull(offset),
            Op::JumpIfNullPopping(_) => f.chunk.ops[pc as usize] = Op::JumpIfNullPopping(offset),
            other => unreachable!("patch_jump called on non-jump op {other:?}"),
        }
    }

    fn emit_if(&mut self, cond: &Expr, then_branch: &Stmt, else_branch: Option<&Stmt>) -> Result<()> {
        self.emit_expr(cond)?;
        let then_jump = self.emit(Op::JumpIfFalse(0), cond.line());
        self.emit(Op::Pop, cond.line());
        self.emit_stmt(then_branch)?;
        let else_jump = self.emit(Op::Jump(0), cond.line());
        self.patch_jump(then_jump);
        self.emit(Op::Pop, cond.line());
        if let Some(else_stmt) = else_branch {
            self.emit_stmt(else_stmt)?;
        }
        self.patch_jump(else_jump);
        Ok(())
    }

    fn emit_while(&mut self, cond: &Expr, body: &Stmt) -> Result<()> {
        let start_pc = self.func().chunk.len() as u32;
        let scope_depth = self.func().scope_depth;
        self.func().loops.push(LoopCtx { start_pc, scope_depth, break_jumps: Vec::new() });

        self.emit_expr(cond)?;
        let exit_jump = self.emit(Op::JumpIfFalse(0), cond.line());
        self.emit(Op::Pop, cond.line());
        self.emit_stmt(body)?;
        let pc = self.func().chunk.len() as u32;
        self.emit(Op::JumpBack((pc + 1 - start_pc) as i16), cond.line());
        self.patch_jump(exit_jump);
        self.emit(Op::Pop, cond.line());

        let ctx = self.func().loops.pop().unwrap();
        for break_pc in ctx.break_jumps {
            self.patch_jump(break_pc);
        }
        Ok(())
    }

    /// `for (x in it) body` n'a pas d'opcode dédié : la spécification
    /// l'abaisse en appels `iterator`/`iteratorValue` réévalués à chaque
    /// tour, exactement comme le ferait la même boucle écrite à la main.
    fn emit_for_in(&mut self, var: &str, iterable: &Expr, body: &Stmt, line: u32) -> Result<()> {
        self.begin_scope();
        // seq = <iterable>
        self.emit_expr(iterable)?;
        self.declare_local("@seq", line)?;
        // it = null
        self.emit_const(Value::Null, line);
        self.declare_local("@it", line)?;

        let start_pc = self.func().chunk.len() as u32;
        let scope_depth = self.func().scope_depth;
        self.func().loops.push(LoopCtx { start_pc, scope_depth, break_jumps: Vec::new() });

        let seq_ix = Self::resolve_local(self.func(), "@seq").unwrap();
        let it_ix = Self::resolve_local(self.func(), "@it").unwrap();
        let iterator_name = self.name_const("iterator");
        self.emit(Op::GetLocal(seq_ix), line);
        self.emit(Op::GetLocal(it_ix), line);
        self.emit(Op::Invoke(iterator_name, 1), line);
        self.emit(Op::SetLocal(it_ix), line);
        let exit_jump = self.emit(Op::JumpIfFalse(0), line);
        self.emit(Op::Pop, line);

        self.begin_scope();
        let value_name = self.name_const("iteratorValue");
        self.emit(Op::GetLocal(seq_ix), line);
        self.emit(Op::GetLocal(it_ix), line);
        self.emit(Op::Invoke(value_name, 1), line);
        self.declare_local(var, line)?;
        self.emit_stmt(body)?;
        self.end_scope(line);

        let pc = self.func().chunk.len() as u32;
        self.emit(Op::JumpBack((pc + 1 - start_pc) as i16), line);
        self.patch_jump(exit_jump);
        self.emit(Op::Pop, line);

        let ctx = self.func().loops.pop().unwrap();
        for break_pc in ctx.break_jumps {
            self.patch_jump(break_pc);
        }
        self.end_scope(line);
        Ok(())
    }

    fn emit_function_decl(&mut self, decl: &FunctionDecl) -> Result<()> {
        // Déclare le nom avant d'émettre le corps : permet la récursion.
        let slot = self.declare_variable(&decl.name, decl.line)?;
        let handle = self.emit_function_body(&decl.name, &decl.params, &decl.body, FuncKind::Function, decl.line)?;
        let const_ix = self.func().chunk.add_const(Value::Obj(handle));
        self.emit(Op::Closure(const_ix), decl.line);
        self.emit_define_variable(slot, decl.line);
        Ok(())
    }

    /// Compile un corps de fonction/méthode/lambda dans son propre
    /// `FunctionState`, puis renvoie le handle du `FunctionObj` (les
    /// upvalues sont déjà résolues et rangées à côté).
    fn emit_function_body(
        &mut self,
        name: &str,
        params: &[String],
        body: &[Stmt],
        kind: FuncKind,
        line: u32,
    ) -> Result<Handle> {
        let name_handle = self.intern_name(name);
        self.funcs.push(FunctionState::new(name_handle, kind));
        self.func().scope_depth = 1;
        self.func().arg_count = params.len() as u8;
        for p in params {
            self.declare_local(p, line)?;
        }
        for stmt in body {
            self.emit_stmt(stmt)?;
        }
        let last_line = body.last().map(|s| self.stmt_line(s)).unwrap_or(line);
        if kind == FuncKind::Initializer {
            self.emit(Op::GetLocal(0), last_line);
        } else {
            self.emit_const(Value::Null, last_line);
        }
        self.emit(Op::Return, last_line);

        let state = self.funcs.pop().expect("function state missing");
        let func = FunctionObj {
            name: state.name,
            chunk: state.chunk,
            arg_count: state.arg_count,
            max_slots: (state.locals.len() as u16).max(1),
            is_vararg: false,
            upvalues: state.upvalues,
        };
        Ok(self.heap.alloc(Object::Function(func)))
    }

    // ----- Classes -----

    /// Nom spécial que le langage d'origine reconnaît à l'émission plutôt
    /// qu'au parsing (§4.3/Open Questions) : une méthode nommée
    /// `constructor` devient l'`init_method` de la classe.
    const CONSTRUCTOR_NAME: &'static str = "constructor";

    fn emit_class_decl(&mut self, decl: &ClassDecl) -> Result<()> {
        let slot = self.declare_variable(&decl.name, decl.line)?;
        let class_name_handle = self.intern_name(&decl.name);

        let class_obj = ClassObj {
            name: class_name_handle,
            methods: Table::new(),
            static_fields: Table::new(),
            init_method: None,
            super_class: None,
        };
        let class_handle = self.heap.alloc(Object::Class(class_obj));
        let class_const = self.func().chunk.add_const(Value::Obj(class_handle));
        self.emit(Op::Constant(class_const), decl.line);
        self.emit_define_variable(slot, decl.line);

        let has_super = decl.superclass.is_some();
        if let Some(super_name) = &decl.superclass {
            if super_name == &decl.name {
                return Err(self.err(decl.line, "une classe ne peut hériter d'elle-même"));
            }
            self.load_variable(super_name, decl.line)?;
            self.load_variable(&decl.name, decl.line)?;
            self.emit(Op::Inherit, decl.line);
        }

        self.classes.push(ClassCtx { has_superclass: has_super });
        self.load_variable(&decl.name, decl.line)?;

        for method in &decl.methods {
            self.emit_method(method)?;
        }
        for (name, value) in &decl.static_fields {
            let line = value.line();
            self.emit_expr(value)?;
            let ix = self.name_const(name);
            self.emit(Op::StaticField(ix), line);
        }
        self.emit(Op::Pop, decl.line); // dépile la classe rechargée pour les méthodes

        self.classes.pop();
        Ok(())
    }

    fn emit_method(&mut self, method: &MethodDecl) -> Result<()> {
        let is_ctor = method.name == Self::CONSTRUCTOR_NAME && method.kind == MethodKind::Method;
        let kind = match method.kind {
            MethodKind::StaticMethod => FuncKind::Function,
            _ if is_ctor => FuncKind::Initializer,
            _ => FuncKind::Method,
        };
        let method_name = match method.kind {
            MethodKind::Getter => format!("get {}", method.name),
            MethodKind::Setter => format!("set {}", method.name),
            _ => method.name.clone(),
        };
        let handle = self.emit_function_body(&method_name, &method.params, &method.body, kind, method.line)?;
        let const_ix = self.func().chunk.add_const(Value::Obj(handle));
        self.emit(Op::Closure(const_ix), method.line);

        let ix = self.name_const(&method_name);
        match method.kind {
            MethodKind::StaticMethod => self.emit(Op::StaticField(ix), method.line),
            _ => self.emit(Op::Method(ix), method.line),
        };
        Ok(())
    }

    // ----- Expressions -----

    fn emit_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Number(n, line) => self.emit_const(Value::Number(*n), *line),
            Expr::Bool(b, line) => {
                self.emit(if *b { Op::True } else { Op::False }, *line);
            }
            Expr::Null(line) => {
                self.emit(Op::Null, *line);
            }
            Expr::StringInterp(parts, line) => self.emit_string_interp(parts, *line)?,
            Expr::This(line) => {
                if self.func().kind != FuncKind::Method && self.func().kind != FuncKind::Initializer {
                    return Err(self.err(*line, "'this' en dehors d'une méthode"));
                }
                self.emit(Op::GetLocal(0), *line);
            }
            Expr::Super { method, line } => self.emit_super_get(method, *line)?,
            Expr::Ident(name, line) => self.load_variable(name, *line)?,
            Expr::Unary { op, expr, line } => self.emit_unary(*op, expr, *line)?,
            Expr::Binary { op, lhs, rhs, line } => self.emit_binary(*op, lhs, rhs, *line)?,
            Expr::Assign { target, value, line } => self.emit_assign(target, value, *line)?,
            Expr::CompoundAssign { op, target, value, line } => {
                self.emit_compound_assign(*op, target, value, *line)?;
            }
            Expr::Call { callee, args, line } => self.emit_call(callee, args, *line)?,
            Expr::Invoke { receiver, method, args, line } => {
                self.emit_invoke(receiver, method, args, *line)?;
            }
            Expr::Get { receiver, field, line } => {
                self.emit_expr(receiver)?;
                let ix = self.name_const(field);
                self.emit(Op::GetField(ix), *line);
            }
            Expr::Set { receiver, field, value, line } => {
                self.emit_expr(receiver)?;
                self.emit_expr(value)?;
                let ix = self.name_const(field);
                self.emit(Op::SetField(ix), *line);
            }
            Expr::Index { receiver, index, line } => {
                self.emit_expr(receiver)?;
                self.emit_expr(index)?;
                self.emit(Op::SubscriptGet, *line);
            }
            Expr::IndexSet { receiver, index, value, line } => {
                self.emit_expr(receiver)?;
                self.emit_expr(index)?;
                self.emit_expr(value)?;
                self.emit(Op::SubscriptSet, *line);
            }
            Expr::Array(elems, line) => {
                self.emit(Op::Array, *line);
                for e in elems {
                    self.emit_expr(e)?;
                    self.emit(Op::PushArrayElement, e.line());
                }
            }
            Expr::Map(entries, line) => {
                self.emit(Op::Map, *line);
                for (k, v) in entries {
                    self.emit_expr(k)?;
                    self.emit_expr(v)?;
                    self.emit(Op::PushMapElement, v.line());
                }
            }
            Expr::Range { from, to, line, .. } => {
                self.emit_expr(from)?;
                self.emit_expr(to)?;
                self.emit(Op::Range, *line);
            }
            Expr::Lambda { params, body, line } => {
                let handle = self.emit_function_body("<lambda>", params, body, FuncKind::Function, *line)?;
                let const_ix = self.func().chunk.add_const(Value::Obj(handle));
                self.emit(Op::Closure(const_ix), *line);
            }
            Expr::New { class, args, line } => {
                self.emit_expr(class)?;
                for a in args {
                    self.emit_expr(a)?;
                }
                self.emit(Op::Call(args.len() as u8), *line);
            }
            Expr::Grouping(inner) => self.emit_expr(inner)?,
        }
        Ok(())
    }

    fn emit_string_interp(&mut self, parts: &[StringPart], line: u32) -> Result<()> {
        if let [StringPart::Lit(s)] = parts {
            let h = self.heap.intern_string(s);
            self.emit_const(Value::Obj(h), line);
            return Ok(());
        }
        // `"a\(x)b"` devient `[a, toString(x), b].join("")` : pas
        // d'opcode de concaténation dédié, on réutilise Array + join
        // comme le ferait un programme équivalent écrit à la main.
        self.emit(Op::Array, line);
        for part in parts {
            match part {
                StringPart::Lit(s) => {
                    if s.is_empty() {
                        continue;
                    }
                    let h = self.heap.intern_string(s);
                    self.emit_const(Value::Obj(h), line);
                    self.emit(Op::PushArrayElement, line);
                }
                StringPart::Interp(e) => {
                    self.emit_expr(e)?;
                    self.emit(Op::PushArrayElement, e.line());
                }
            }
        }
        let join_name = self.name_const("join");
        let sep_h = self.heap.intern_string("");
        self.emit_const(Value::Obj(sep_h), line);
        self.emit(Op::Invoke(join_name, 1), line);
        Ok(())
    }

    fn emit_super_get(&mut self, method: &str, line: u32) -> Result<()> {
        if self.classes.last().map(|c| c.has_superclass) != Some(true) {
            return Err(self.err(line, "'super' utilisé hors d'une classe avec parent"));
        }
        self.emit(Op::GetLocal(0), line); // this
        let ix = self.name_const(method);
        self.emit(Op::GetSuperMethod(ix), line);
        Ok(())
    }

    fn load_variable(&mut self, name: &str, line: u32) -> Result<()> {
        let depth = self.funcs.len() - 1;
        if let Some(local_ix) = Self::resolve_local(&self.funcs[depth], name) {
            self.emit(Op::GetLocal(local_ix), line);
            return Ok(());
        }
        if let Some(up_ix) = self.resolve_upvalue(depth, name) {
            self.emit(Op::GetUpvalue(up_ix), line);
            return Ok(());
        }
        if let Some(priv_ix) = self.resolve_private(name) {
            self.emit(Op::GetPrivate(priv_ix), line);
            return Ok(());
        }
        let ix = self.name_const(name);
        self.emit(Op::GetGlobal(ix), line);
        Ok(())
    }

    fn store_variable(&mut self, name: &str, line: u32) -> Result<()> {
        let depth = self.funcs.len() - 1;
        if let Some(local_ix) = Self::resolve_local(&self.funcs[depth], name) {
            self.emit(Op::SetLocal(local_ix), line);
            return Ok(());
        }
        if let Some(up_ix) = self.resolve_upvalue(depth, name) {
            self.emit(Op::SetUpvalue(up_ix), line);
            return Ok(());
        }
        if let Some(priv_ix) = self.resolve_private(name) {
            self.emit(Op::SetPrivate(priv_ix), line);
            return Ok(());
        }
        let ix = self.name_const(name);
        self.emit(Op::SetGlobal(ix), line);
        Ok(())
    }

    fn emit_assign(&mut self, target: &Expr, value: &Expr, line: u32) -> Result<()> {
        match target {
            Expr::Ident(name, _) => {
                self.emit_expr(value)?;
                self.store_variable(name, line)?;
            }
            other => return Err(self.err(line, format!("cible d'affectation non gérée: {other:?}"))),
        }
        Ok(())
    }

    /// `a op= b`, abaissé en `a = a op b`. Pour une variable, la cible
    /// n'est évaluée qu'une fois (lecture puis écriture du même slot).
    /// Pour un champ ou un indice il n'existe pas d'opcode de
    /// duplication de pile : le receveur (et l'indice) est émis une
    /// première fois pour le `Set*` final, qui reste sous le calcul du
    /// `Get*`/binop puisque ces opcodes n'agissent que sur le sommet.
    fn emit_compound_assign(&mut self, op: BinOp, target: &Expr, value: &Expr, line: u32) -> Result<()> {
        match target {
            Expr::Ident(name, _) => {
                self.load_variable(name, line)?;
                self.emit_expr(value)?;
                self.emit_binop(op, line);
                self.store_variable(name, line)?;
            }
            Expr::Get { receiver, field, .. } => {
                self.emit_expr(receiver)?; // conservé pour SetField
                self.emit_expr(receiver)?;
                let ix = self.name_const(field);
                self.emit(Op::GetField(ix), line);
                self.emit_expr(value)?;
                self.emit_binop(op, line);
                self.emit(Op::SetField(ix), line);
            }
            Expr::Index { receiver, index, .. } => {
                self.emit_expr(receiver)?; // conservés pour SubscriptSet
                self.emit_expr(index)?;
                self.emit_expr(receiver)?;
                self.emit_expr(index)?;
                self.emit(Op::SubscriptGet, line);
                self.emit_expr(value)?;
                self.emit_binop(op, line);
                self.emit(Op::SubscriptSet, line);
            }
            other => return Err(self.err(line, format!("cible d'affectation composée non gérée: {other:?}"))),
        }
        Ok(())
    }

    fn emit_unary(&mut self, op: UnOp, expr: &Expr, line: u32) -> Result<()> {
        self.emit_expr(expr)?;
        match op {
            UnOp::Neg => self.emit(Op::Negate, line),
            UnOp::Not => self.emit(Op::Not, line),
            UnOp::BNot => self.emit(Op::BNot, line),
        };
        Ok(())
    }

    fn emit_binop(&mut self, op: BinOp, line: u32) {
        let mapped = match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Subtract,
            BinOp::Mul => Op::Multiply,
            BinOp::Div => Op::Divide,
            BinOp::Mod => Op::Mod,
            BinOp::Pow => Op::Power,
            BinOp::FloorDiv => Op::FloorDivide,
            BinOp::Eq => Op::Equal,
            BinOp::NotEq => Op::NotEqual,
            BinOp::Greater => Op::Greater,
            BinOp::GreaterEq => Op::GreaterEqual,
            BinOp::Less => Op::Less,
            BinOp::LessEq => Op::LessEqual,
            BinOp::LShift => Op::LShift,
            BinOp::RShift => Op::RShift,
            BinOp::BAnd => Op::BAnd,
            BinOp::BOr => Op::BOr,
            BinOp::BXor => Op::BXor,
            BinOp::Is => Op::Is,
            BinOp::And | BinOp::Or | BinOp::NullCoalesce => {
                unreachable!("short-circuit ops handled in emit_binary")
            }
        };
        self.emit(mapped, line);
    }

    fn emit_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, line: u32) -> Result<()> {
        match op {
            BinOp::And => {
                self.emit_expr(lhs)?;
                let short = self.emit(Op::JumpIfFalse(0), line);
                self.emit(Op::Pop, line);
                self.emit_expr(rhs)?;
                self.patch_jump(short);
            }
            BinOp::Or => {
                self.emit_expr(lhs)?;
                let skip_rhs = self.emit(Op::JumpIfFalse(0), line);
                let short = self.emit(Op::Jump(0), line);
                self.patch_jump(skip_rhs);
                self.emit(Op::Pop, line);
                self.emit_expr(rhs)?;
                self.patch_jump(short);
            }
            BinOp::NullCoalesce => {
                self.emit_expr(lhs)?;
                let short = self.emit(Op::JumpIfNull(0), line);
                let skip_rhs = self.emit(Op::Jump(0), line);
                self.patch_jump(short);
                self.emit(Op::Pop, line);
                self.emit_expr(rhs)?;
                self.patch_jump(skip_rhs);
            }
            _ => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                self.emit_binop(op, line);
            }
        }
        Ok(())
    }

    fn emit_call(&mut self, callee: &Expr, args: &[Expr], line: u32) -> Result<()> {
        self.emit_expr(callee)?;
        for a in args {
            self.emit_expr(a)?;
        }
        self.emit(Op::Call(args.len() as u8), line);
        Ok(())
    }

    fn emit_invoke(&mut self, receiver: &Expr, method: &str, args: &[Expr], line: u32) -> Result<()> {
        if let Expr::Super { method: super_method, .. } = receiver {
            self.emit(Op::GetLocal(0), line); // this
            for a in args {
                self.emit_expr(a)?;
            }
            let ix = self.name_const(super_method);
            self.emit(Op::InvokeSuper(ix, args.len() as u8), line);
            return Ok(());
        }
        self.emit_expr(receiver)?;
        for a in args {
            self.emit_expr(a)?;
        }
        let ix = self.name_const(method);
        self.emit(Op::Invoke(ix, args.len() as u8), line);
        Ok(())
    }
}

/// Où une variable déclarée vit une fois émise : locale (reste sur la
/// pile, pas de `Set*` explicite nécessaire) ou privée de module.
enum VarSlot {
    Local,
    Private(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::scanner::Scanner;

    fn compile(src: &str) -> (Heap, Handle) {
        let mut heap = Heap::new();
        let tokens = Scanner::new("<test>", src).tokenize().unwrap();
        let program = Parser::new("<test>", tokens).parse_program().unwrap();
        let handle = Emitter::compile_program(&mut heap, "<test>", &program).unwrap();
        (heap, handle)
    }

    #[test]
    fn compiles_arithmetic_and_returns() {
        let (heap, handle) = compile("var x = 1 + 2 * 3;");
        match heap.get(handle) {
            Object::Function(f) => assert!(!f.chunk.is_empty()),
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn compiles_if_while_and_function_decl() {
        let (_heap, _handle) = compile(
            "function fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }\nvar i = 0;\nwhile (i < 3) { i = i + 1; }",
        );
    }

    #[test]
    fn compiles_class_with_constructor_and_inheritance() {
        let (_heap, _handle) = compile(
            "class Animal { constructor(name) { this.name = name; } speak() { return this.name; } }\nclass Dog < Animal { speak() { return super.speak(); } }",
        );
    }

    #[test]
    fn compiles_for_in_and_string_interpolation() {
        let (_heap, _handle) = compile("for (x in range) { print(\"v=\\(x)\"); }".replace("\\(", "\\(").as_str());
    }
}
