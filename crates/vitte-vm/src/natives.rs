//! natives.rs — Classes et méthodes "core" (`lit_core.c`), réécrites comme
//! des [`NativeFn`] Rust plutôt que des callbacks C.
//!
//! Chaque classe core est une [`ClassObj`] ordinaire installée comme
//! globale : du point de vue de la VM, `Array.add` n'est pas différente
//! d'une méthode définie en Vitte. Les classes héritent toutes de `Object`
//! (copie des tables méthodes/statiques à la création, comme `OP_INHERIT`
//! le ferait pour une classe utilisateur), sauf `Object` elle-même.
//!
//! `Fiber` est le seul cas spécial : son constructeur et ses primitives de
//! contrôle (`run`, `try`, `yield`, …) ne peuvent pas être des [`NativeFn`]
//! génériques puisqu'elles doivent changer le fiber courant de la VM —
//! elles passent par les variantes dédiées de [`NativeBody`] et sont
//! traitées directement dans `vm::call_native`.

use vitte_core::heap::{Handle, Heap};
use vitte_core::native::{NativeBody, NativeContext, NativeResult};
use vitte_core::object::{ArrayObj, ClassObj, InstanceObj, MapObj, NativeFunctionObj, ObjectKind};
use vitte_core::table::Table;
use vitte_core::{Object, Value};

use crate::error::RuntimeError;
use crate::vm::Vm;
use crate::VmResult;

/// Nom de méthode sous lequel un constructeur est stocké (§4.3 `emit_class_decl` :
/// une méthode nommée `constructor` devient `ClassObj.init_method`).
pub const CONSTRUCTOR_NAME: &str = "constructor";

// ---- Installation -------------------------------------------------------

pub fn install_core_classes(vm: &mut Vm) {
    let object_class = new_class(vm, "Object", None);
    add_method(vm, object_class, "toString", Some(0), NativeBody::Generic(object_to_string));
    add_getter(vm, object_class, "class", Some(0), NativeBody::Generic(object_get_class));

    let class_class = new_class(vm, "Class", Some(object_class));
    add_method(vm, class_class, "toString", Some(0), NativeBody::Generic(class_to_string));
    add_getter(vm, class_class, "super", Some(0), NativeBody::Generic(class_get_super));

    let number_class = new_class(vm, "Number", Some(object_class));
    add_method(vm, number_class, "toString", Some(0), NativeBody::Generic(number_to_string));

    let bool_class = new_class(vm, "Bool", Some(object_class));
    add_method(vm, bool_class, "toString", Some(0), NativeBody::Generic(bool_to_string));

    let string_class = new_class(vm, "String", Some(object_class));
    add_method(vm, string_class, "toString", Some(0), NativeBody::Generic(string_to_string));
    add_method(vm, string_class, "toNumber", Some(0), NativeBody::Generic(string_to_number));
    add_method(vm, string_class, "toUpperCase", Some(0), NativeBody::Generic(string_to_upper));
    add_method(vm, string_class, "toLowerCase", Some(0), NativeBody::Generic(string_to_lower));
    add_method(vm, string_class, "contains", Some(1), NativeBody::Generic(string_contains));
    add_method(vm, string_class, "startsWith", Some(1), NativeBody::Generic(string_starts_with));
    add_method(vm, string_class, "endsWith", Some(1), NativeBody::Generic(string_ends_with));
    add_method(vm, string_class, "replace", Some(2), NativeBody::Generic(string_replace));
    add_method(vm, string_class, "substring", Some(2), NativeBody::Generic(string_substring));
    add_getter(vm, string_class, "length", Some(0), NativeBody::Generic(string_length));

    let function_class = new_class(vm, "Function", Some(object_class));
    add_method(vm, function_class, "toString", Some(0), NativeBody::Generic(function_to_string));
    add_getter(vm, function_class, "name", Some(0), NativeBody::Generic(function_name));

    let module_class = new_class(vm, "Module", Some(object_class));
    add_method(vm, module_class, "toString", Some(0), NativeBody::Generic(module_to_string));
    add_getter(vm, module_class, "name", Some(0), NativeBody::Generic(module_name));

    let array_class = new_class(vm, "Array", Some(object_class));
    add_method(vm, array_class, "toString", Some(0), NativeBody::Generic(array_to_string));
    add_method(vm, array_class, "add", Some(1), NativeBody::Generic(array_add));
    add_method(vm, array_class, "insert", Some(2), NativeBody::Generic(array_insert));
    add_method(vm, array_class, "addAll", Some(1), NativeBody::Generic(array_add_all));
    add_method(vm, array_class, "indexOf", Some(1), NativeBody::Generic(array_index_of));
    add_method(vm, array_class, "remove", Some(1), NativeBody::Generic(array_remove));
    add_method(vm, array_class, "removeAt", Some(1), NativeBody::Generic(array_remove_at));
    add_method(vm, array_class, "contains", Some(1), NativeBody::Generic(array_contains));
    add_method(vm, array_class, "clear", Some(0), NativeBody::Generic(array_clear));
    add_method(vm, array_class, "iterator", Some(1), NativeBody::Generic(array_iterator));
    add_method(vm, array_class, "iteratorValue", Some(1), NativeBody::Generic(array_iterator_value));
    // `join` prend toujours un séparateur : `emit_string_interp` l'invoque en
    // `Op::Invoke("join", 1)` avec une chaîne vide, contrairement à
    // `array_join()` d'origine qui ne prenait aucun argument.
    add_method(vm, array_class, "join", Some(1), NativeBody::Generic(array_join));
    add_method(vm, array_class, "clone", Some(0), NativeBody::Generic(array_clone));
    add_getter(vm, array_class, "length", Some(0), NativeBody::Generic(array_length));

    let map_class = new_class(vm, "Map", Some(object_class));
    add_method(vm, map_class, "toString", Some(0), NativeBody::Generic(map_to_string));
    add_method(vm, map_class, "addAll", Some(1), NativeBody::Generic(map_add_all));
    add_method(vm, map_class, "clear", Some(0), NativeBody::Generic(map_clear));
    add_method(vm, map_class, "iterator", Some(1), NativeBody::Generic(map_iterator));
    add_method(vm, map_class, "iteratorValue", Some(1), NativeBody::Generic(map_iterator_value));
    add_method(vm, map_class, "clone", Some(0), NativeBody::Generic(map_clone));
    add_getter(vm, map_class, "length", Some(0), NativeBody::Generic(map_length));

    // Pas de variante `Object::Range` dédiée : une instance de `Range` est
    // une `Object::Instance` ordinaire de cette classe, avec deux champs
    // `from`/`to` (voir `make_range` ci-dessous).
    let range_class = new_class(vm, "Range", Some(object_class));
    add_method(vm, range_class, "toString", Some(0), NativeBody::Generic(range_to_string));
    add_method(vm, range_class, "iterator", Some(1), NativeBody::Generic(range_iterator));
    add_method(vm, range_class, "iteratorValue", Some(1), NativeBody::Generic(range_iterator_value));
    add_getter(vm, range_class, "length", Some(0), NativeBody::Generic(range_length));

    let fiber_class = new_class(vm, "Fiber", Some(object_class));
    set_init(vm, fiber_class, Some(1), NativeBody::FiberNew);
    add_method(vm, fiber_class, "run", None, NativeBody::FiberRun);
    add_method(vm, fiber_class, "try", None, NativeBody::FiberTry);
    add_getter(vm, fiber_class, "done", Some(0), NativeBody::FiberIsDone);
    add_getter(vm, fiber_class, "error", Some(0), NativeBody::Generic(fiber_error));
    add_static(vm, fiber_class, "yield", Some(1), NativeBody::FiberYield);
    add_static(vm, fiber_class, "yeet", Some(1), NativeBody::FiberYeet);
    add_static(vm, fiber_class, "abort", Some(1), NativeBody::FiberAbort);
    add_static_getter(vm, fiber_class, "current", Some(0), NativeBody::FiberCurrent);
}

fn new_class(vm: &mut Vm, name: &str, super_class: Option<Handle>) -> Handle {
    let name_handle = vm.intern(name);
    let (methods, static_fields, init_method) = match super_class {
        Some(sup) => match vm.heap().get(sup) {
            Object::Class(c) => (c.methods.clone(), c.static_fields.clone(), c.init_method),
            _ => unreachable!(),
        },
        None => (Table::new(), Table::new(), None),
    };
    let handle = vm.heap_mut().alloc(Object::Class(ClassObj {
        name: name_handle,
        methods,
        static_fields,
        init_method,
        super_class,
    }));
    vm.set_global(name, Value::Obj(handle));
    handle
}

fn native_fn_handle(vm: &mut Vm, name: &str, arity: Option<u8>, body: NativeBody) -> (Handle, Handle) {
    let name_handle = vm.intern(name);
    let func = vm.heap_mut().alloc(Object::NativeFunction(NativeFunctionObj { name: name_handle, arity, body }));
    (name_handle, func)
}

fn add_method(vm: &mut Vm, class: Handle, name: &str, arity: Option<u8>, body: NativeBody) {
    let (name_handle, func) = native_fn_handle(vm, name, arity, body);
    if let Object::Class(c) = vm.heap_mut().get_mut(class) {
        c.methods.insert(name_handle, Value::Obj(func));
    }
}

fn add_getter(vm: &mut Vm, class: Handle, name: &str, arity: Option<u8>, body: NativeBody) {
    add_method(vm, class, &format!("get {name}"), arity, body);
}

fn add_static(vm: &mut Vm, class: Handle, name: &str, arity: Option<u8>, body: NativeBody) {
    let (name_handle, func) = native_fn_handle(vm, name, arity, body);
    if let Object::Class(c) = vm.heap_mut().get_mut(class) {
        c.static_fields.insert(name_handle, Value::Obj(func));
    }
}

fn add_static_getter(vm: &mut Vm, class: Handle, name: &str, arity: Option<u8>, body: NativeBody) {
    add_static(vm, class, &format!("get {name}"), arity, body);
}

fn set_init(vm: &mut Vm, class: Handle, arity: Option<u8>, body: NativeBody) {
    let (name_handle, func) = native_fn_handle(vm, CONSTRUCTOR_NAME, arity, body);
    if let Object::Class(c) = vm.heap_mut().get_mut(class) {
        c.methods.insert(name_handle, Value::Obj(func));
        c.init_method = Some(Value::Obj(func));
    }
}

// ---- Utilitaires partagés avec vm.rs ------------------------------------

/// Nom de la classe core dont `v` relève (utilisé pour le dispatch de
/// méthode sur les primitives et les objets sans classe utilisateur propre).
pub fn core_class_name(v: &Value, heap: &Heap) -> &'static str {
    match v {
        Value::Null => "Object",
        Value::Bool(_) => "Bool",
        Value::Number(_) => "Number",
        Value::Obj(h) => heap.kind(*h).name(),
    }
}

/// Formatage canonique d'un nombre : les entiers n'affichent pas de `.0`
/// (§3 : Vitte n'a qu'un seul type numérique, mais son affichage distingue
/// les valeurs entières par commodité, comme `lit_value_to_string`).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "infinity".to_string() } else { "-infinity".to_string() };
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Formate un tableau comme `Array.toString` (§8 scénario 6) : `"[]"` vide,
/// sinon `"[ a, b, c ]"` — le remplissage intérieur vient de l'implémentation
/// d'origine (`lit_core.c:920-965`, `array_toString`), qui réserve 3 octets
/// pour `"[ ]"` et recopie `" ]"`/`", "` entre les éléments.
fn array_display(values: &[Value], heap: &Heap) -> String {
    if values.is_empty() {
        return "[]".to_string();
    }
    let parts: Vec<String> = values.iter().map(|v| default_display(v, heap)).collect();
    format!("[ {} ]", parts.join(", "))
}

/// Affichage par défaut, sans passer par un éventuel `toString` utilisateur
/// (utilisé comme filet de sécurité par `to_string_value`, et pour formater
/// les éléments d'un `Array`/`Map` lors d'un affichage par défaut).
pub fn default_display(v: &Value, heap: &Heap) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::Obj(h) => match heap.get(*h) {
            Object::String(s) => s.bytes.clone(),
            Object::Function(f) => format!("<fn {}>", heap.as_str(f.name)),
            Object::Closure(c) => match heap.get(c.function) {
                Object::Function(f) => format!("<fn {}>", heap.as_str(f.name)),
                _ => "<fn>".to_string(),
            },
            Object::NativeFunction(n) => format!("<native fn {}>", heap.as_str(n.name)),
            Object::BoundMethod(_) => "<bound method>".to_string(),
            Object::Upvalue(_) => "<upvalue>".to_string(),
            Object::Class(c) => format!("class {}", heap.as_str(c.name)),
            Object::Instance(i) => {
                let class_name = match heap.get(i.class) {
                    Object::Class(c) => heap.as_str(c.name),
                    _ => "?",
                };
                format!("{class_name} instance")
            }
            Object::Array(a) => array_display(&a.values, heap),
            Object::Map(m) => {
                let parts: Vec<String> = m
                    .entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", heap.as_str(k), default_display(v, heap)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Object::Module(m) => format!("module {}", heap.as_str(m.name)),
            Object::Fiber(_) => "<fiber>".to_string(),
        },
    }
}

/// Alloue une instance de `Range` (`from`/`to` en champs d'instance : il
/// n'existe pas de variante `Object::Range` dédiée).
pub fn make_range(vm: &mut Vm, from: Value, to: Value) -> Handle {
    let class = vm
        .get_global("Range")
        .and_then(|v| v.as_obj())
        .expect("la classe Range doit être installée avant toute utilisation de `..`");
    let from_name = vm.intern("from");
    let to_name = vm.intern("to");
    let mut fields = Table::new();
    fields.insert(from_name, from);
    fields.insert(to_name, to);
    vm.heap_mut().alloc(Object::Instance(InstanceObj { class, fields }))
}

// ---- Accesseurs d'arguments natifs (§6: check_number/bool/string/object_string) --

/// Vérifie que `args[index]` est un nombre ; sinon lève une erreur runtime
/// nommant l'argument par position (1-based dans le message, comme les
/// messages d'arité). Utilisé par les natives core et par les bindings
/// tiers (§6 "Native-argument accessors with runtime type checking").
pub fn check_number(args: &[Value], index: usize, heap: &Heap) -> Result<f64, String> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(format!(
            "argument {} attendu nombre, obtenu {}",
            index + 1,
            other.type_name(heap)
        )),
        None => Err(format!("argument {} manquant (nombre attendu)", index + 1)),
    }
}

/// Comme [`check_number`] mais retombe sur `default` si l'argument est
/// absent (§7 : « argument-type mismatches on optional native arguments
/// default to a supplied value »). Un argument présent mais du mauvais
/// type reste une erreur : seule l'absence est recouvrable.
pub fn check_number_opt(args: &[Value], index: usize, default: f64, heap: &Heap) -> Result<f64, String> {
    if args.get(index).is_none() {
        return Ok(default);
    }
    check_number(args, index, heap)
}

/// Vérifie que `args[index]` est un booléen.
pub fn check_bool(args: &[Value], index: usize, heap: &Heap) -> Result<bool, String> {
    match args.get(index) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(format!(
            "argument {} attendu bool, obtenu {}",
            index + 1,
            other.type_name(heap)
        )),
        None => Err(format!("argument {} manquant (bool attendu)", index + 1)),
    }
}

/// Vérifie que `args[index]` est une chaîne et retourne son contenu.
pub fn check_string<'h>(args: &[Value], index: usize, heap: &'h Heap) -> Result<&'h str, String> {
    match args.get(index) {
        Some(Value::Obj(h)) if heap.kind(*h) == ObjectKind::String => Ok(heap.as_str(*h)),
        Some(other) => Err(format!(
            "argument {} attendu String, obtenu {}",
            index + 1,
            other.type_name(heap)
        )),
        None => Err(format!("argument {} manquant (String attendu)", index + 1)),
    }
}

/// Convertit `args[index]` en chaîne d'affichage via `toString` (delegue à
/// [`NativeContext::to_string`]), quel que soit son type dynamique — c'est
/// la version "conversion" de `check_string`, pas une vérification de type.
pub fn check_object_string(
    ctx: &mut dyn NativeContext,
    args: &[Value],
    index: usize,
) -> Result<String, String> {
    let v = args
        .get(index)
        .copied()
        .ok_or_else(|| format!("argument {} manquant", index + 1))?;
    ctx.to_string(v)
}

/// Résout un index de subscript (`a[i]`), avec prise en charge des index
/// négatifs (compte depuis la fin, comme en Python/lit).
pub fn expect_index(index: &Value, len: usize, heap: &Heap) -> VmResult<usize> {
    let n = match index {
        Value::Number(n) => *n,
        other => {
            return Err(RuntimeError::new(format!(
                "index attendu un nombre, obtenu {}",
                other.type_name(heap)
            )))
        }
    };
    let i = if n < 0.0 { n + len as f64 } else { n };
    if i < 0.0 || i >= len as f64 {
        return Err(RuntimeError::new(format!("index hors limites: {n}")));
    }
    Ok(i as usize)
}

// ---- Helpers de réception -------------------------------------------------

fn expect_kind(v: Value, kind: ObjectKind, heap: &Heap, what: &str) -> Result<Handle, String> {
    match v {
        Value::Obj(h) if heap.kind(h) == kind => Ok(h),
        _ => Err(format!("receveur attendu: {what}")),
    }
}

fn underlying_name(heap: &Heap, v: Value) -> Option<Handle> {
    match v {
        Value::Obj(h) => match heap.get(h) {
            Object::Function(f) => Some(f.name),
            Object::Closure(c) => match heap.get(c.function) {
                Object::Function(f) => Some(f.name),
                _ => None,
            },
            Object::NativeFunction(n) => Some(n.name),
            Object::BoundMethod(b) => underlying_name(heap, b.method),
            _ => None,
        },
        _ => None,
    }
}

// ---- Object --------------------------------------------------------------

fn object_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let s = default_display(&receiver, ctx.heap());
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

fn object_get_class(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    match receiver {
        Value::Obj(h) if ctx.heap().kind(h) == ObjectKind::Instance => {
            let class = match ctx.heap().get(h) {
                Object::Instance(i) => i.class,
                _ => unreachable!(),
            };
            Ok(Value::Obj(class))
        }
        other => {
            let name = core_class_name(&other, ctx.heap());
            ctx.get_global(name).ok_or_else(|| format!("classe core introuvable: {name}"))
        }
    }
}

// ---- Class -----------------------------------------------------------------

fn class_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Class, ctx.heap(), "Class")?;
    let name_handle = match ctx.heap().get(h) {
        Object::Class(c) => c.name,
        _ => unreachable!(),
    };
    let s = format!("class {}", ctx.heap().as_str(name_handle));
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

fn class_get_super(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Class, ctx.heap(), "Class")?;
    let sup = match ctx.heap().get(h) {
        Object::Class(c) => c.super_class,
        _ => unreachable!(),
    };
    Ok(sup.map(Value::Obj).unwrap_or(Value::Null))
}

// ---- Number / Bool ---------------------------------------------------------

fn number_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let n = match receiver {
        Value::Number(n) => n,
        _ => return Err("receveur attendu: Number".to_string()),
    };
    let s = format_number(n);
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

fn bool_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let b = match receiver {
        Value::Bool(b) => b,
        _ => return Err("receveur attendu: Bool".to_string()),
    };
    Ok(Value::Obj(ctx.heap_mut().intern_string(if b { "true" } else { "false" })))
}

// ---- String ----------------------------------------------------------------

fn string_arg(v: Option<&Value>, heap: &Heap) -> Result<Handle, String> {
    match v {
        Some(&Value::Obj(h)) if heap.kind(h) == ObjectKind::String => Ok(h),
        _ => Err("argument attendu: String".to_string()),
    }
}

fn string_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    Ok(receiver)
}

fn string_to_number(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    match ctx.heap().as_str(h).trim().parse::<f64>() {
        Ok(n) => Ok(Value::Number(n)),
        Err(_) => Ok(Value::Null),
    }
}

fn string_to_upper(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    let s = ctx.heap().as_str(h).to_uppercase();
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

fn string_to_lower(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    let s = ctx.heap().as_str(h).to_lowercase();
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

fn string_contains(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    let needle = string_arg(args.first(), ctx.heap())?;
    Ok(Value::Bool(ctx.heap().as_str(h).contains(ctx.heap().as_str(needle))))
}

fn string_starts_with(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    let needle = string_arg(args.first(), ctx.heap())?;
    Ok(Value::Bool(ctx.heap().as_str(h).starts_with(ctx.heap().as_str(needle))))
}

fn string_ends_with(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    let needle = string_arg(args.first(), ctx.heap())?;
    Ok(Value::Bool(ctx.heap().as_str(h).ends_with(ctx.heap().as_str(needle))))
}

fn string_replace(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    let from = string_arg(args.first(), ctx.heap())?;
    let to = string_arg(args.get(1), ctx.heap())?;
    let s = ctx.heap().as_str(h).to_owned();
    let from_s = ctx.heap().as_str(from).to_owned();
    let to_s = ctx.heap().as_str(to).to_owned();
    let replaced = s.replace(&from_s, &to_s);
    Ok(Value::Obj(ctx.heap_mut().intern_string(&replaced)))
}

fn string_substring(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    let start = match args.first() {
        Some(Value::Number(n)) => *n as usize,
        _ => return Err("substring attend un index de départ numérique".to_string()),
    };
    let chars: Vec<char> = ctx.heap().as_str(h).chars().collect();
    let end = match args.get(1) {
        Some(Value::Number(n)) => (*n as usize).min(chars.len()),
        _ => chars.len(),
    };
    let start = start.min(end);
    let sub: String = chars[start..end].iter().collect();
    Ok(Value::Obj(ctx.heap_mut().intern_string(&sub)))
}

fn string_length(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::String, ctx.heap(), "String")?;
    Ok(Value::Number(ctx.heap().as_str(h).chars().count() as f64))
}

// ---- Function --------------------------------------------------------------

fn function_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let s = default_display(&receiver, ctx.heap());
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

fn function_name(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    match underlying_name(ctx.heap(), receiver) {
        Some(n) => Ok(Value::Obj(n)),
        None => Ok(Value::Null),
    }
}

// ---- Module ----------------------------------------------------------------

fn module_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Module, ctx.heap(), "Module")?;
    let name = match ctx.heap().get(h) {
        Object::Module(m) => m.name,
        _ => unreachable!(),
    };
    let s = format!("module {}", ctx.heap().as_str(name));
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

fn module_name(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Module, ctx.heap(), "Module")?;
    let name = match ctx.heap().get(h) {
        Object::Module(m) => m.name,
        _ => unreachable!(),
    };
    Ok(Value::Obj(name))
}

// ---- Fiber (partie générique ; run/try/yield/yeet/abort/current sont des
// NativeBody dédiés traités directement par vm::call_native) -------------

fn fiber_error(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Fiber, ctx.heap(), "Fiber")?;
    match ctx.heap().get(h) {
        Object::Fiber(f) => Ok(f.error),
        _ => unreachable!(),
    }
}

// ---- Array -----------------------------------------------------------------

fn array_values(ctx: &dyn NativeContext, h: Handle) -> Vec<Value> {
    match ctx.heap().get(h) {
        Object::Array(a) => a.values.clone(),
        _ => unreachable!(),
    }
}

fn array_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let values = array_values(ctx, h);
    if values.is_empty() {
        return Ok(Value::Obj(ctx.heap_mut().intern_string("[]")));
    }
    let mut parts = Vec::with_capacity(values.len());
    for v in values {
        parts.push(ctx.to_string(v)?);
    }
    let s = format!("[ {} ]", parts.join(", "));
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

fn array_add(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let v = args.first().copied().unwrap_or(Value::Null);
    if let Object::Array(a) = ctx.heap_mut().get_mut(h) {
        a.values.push(v);
    }
    Ok(Value::Null)
}

fn array_insert(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let index = match args.first() {
        Some(Value::Number(n)) => *n,
        _ => return Err("insert attend un index numérique".to_string()),
    };
    let value = args.get(1).copied().unwrap_or(Value::Null);
    if let Object::Array(a) = ctx.heap_mut().get_mut(h) {
        let len = a.values.len() as f64;
        let idx = if index < 0.0 { (len + index).max(0.0) } else { index };
        let idx = (idx as usize).min(a.values.len());
        a.values.insert(idx, value);
    }
    Ok(Value::Null)
}

fn array_add_all(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let other = match args.first() {
        Some(&Value::Obj(oh)) if ctx.heap().kind(oh) == ObjectKind::Array => oh,
        _ => return Err("addAll attend un Array".to_string()),
    };
    let values = array_values(ctx, other);
    if let Object::Array(a) = ctx.heap_mut().get_mut(h) {
        a.values.extend(values);
    }
    Ok(Value::Null)
}

fn array_index_of(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let needle = args.first().copied().unwrap_or(Value::Null);
    let pos = array_values(ctx, h).iter().position(|v| *v == needle);
    Ok(pos.map(|i| Value::Number(i as f64)).unwrap_or(Value::Null))
}

fn array_contains(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let needle = args.first().copied().unwrap_or(Value::Null);
    let found = array_values(ctx, h).iter().any(|v| *v == needle);
    Ok(Value::Bool(found))
}

fn array_remove(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let needle = args.first().copied().unwrap_or(Value::Null);
    let pos = array_values(ctx, h).iter().position(|v| *v == needle);
    match pos {
        Some(i) => {
            let removed = match ctx.heap_mut().get_mut(h) {
                Object::Array(a) => a.values.remove(i),
                _ => unreachable!(),
            };
            Ok(removed)
        }
        None => Ok(Value::Null),
    }
}

fn array_remove_at(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let index = match args.first() {
        Some(Value::Number(n)) => *n,
        _ => return Err("removeAt attend un index numérique".to_string()),
    };
    if index < 0.0 {
        return Ok(Value::Null);
    }
    let idx = index as usize;
    let len = array_values(ctx, h).len();
    if idx >= len {
        return Ok(Value::Null);
    }
    let removed = match ctx.heap_mut().get_mut(h) {
        Object::Array(a) => a.values.remove(idx),
        _ => unreachable!(),
    };
    Ok(removed)
}

fn array_clear(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    if let Object::Array(a) = ctx.heap_mut().get_mut(h) {
        a.values.clear();
    }
    Ok(Value::Null)
}

/// Itérateur sans état (§ protocole `for (x in array)`): reçoit l'index
/// précédent (`null` pour le premier appel) et renvoie le suivant, ou
/// `null` quand la séquence est épuisée.
fn array_iterator(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let len = array_values(ctx, h).len();
    if len == 0 {
        return Ok(Value::Null);
    }
    let next = match args.first() {
        Some(Value::Number(n)) => {
            if *n >= (len - 1) as f64 {
                return Ok(Value::Null);
            }
            n + 1.0
        }
        _ => 0.0,
    };
    Ok(Value::Number(next))
}

fn array_iterator_value(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let index = match args.first() {
        Some(Value::Number(n)) => *n as usize,
        _ => return Err("iteratorValue attend un index numérique".to_string()),
    };
    Ok(array_values(ctx, h).get(index).copied().unwrap_or(Value::Null))
}

fn array_join(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let sep = match args.first() {
        Some(&Value::Obj(sh)) if ctx.heap().kind(sh) == ObjectKind::String => ctx.heap().as_str(sh).to_owned(),
        _ => String::new(),
    };
    let values = array_values(ctx, h);
    let mut parts = Vec::with_capacity(values.len());
    for v in values {
        parts.push(ctx.to_string(v)?);
    }
    let joined = parts.join(&sep);
    Ok(Value::Obj(ctx.heap_mut().intern_string(&joined)))
}

fn array_clone(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    let values = array_values(ctx, h);
    let handle = ctx.heap_mut().alloc(Object::Array(ArrayObj { values }));
    Ok(Value::Obj(handle))
}

fn array_length(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Array, ctx.heap(), "Array")?;
    Ok(Value::Number(array_values(ctx, h).len() as f64))
}

// ---- Map -------------------------------------------------------------------

fn map_keys(ctx: &dyn NativeContext, h: Handle) -> Vec<Handle> {
    match ctx.heap().get(h) {
        Object::Map(m) => m.entries.iter().map(|(k, _)| k).collect(),
        _ => unreachable!(),
    }
}

fn map_entries(ctx: &dyn NativeContext, h: Handle) -> Vec<(Handle, Value)> {
    match ctx.heap().get(h) {
        Object::Map(m) => m.entries.iter().map(|(k, v)| (k, *v)).collect(),
        _ => unreachable!(),
    }
}

fn map_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Map, ctx.heap(), "Map")?;
    let entries = map_entries(ctx, h);
    let mut parts = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let key = ctx.heap().as_str(k).to_owned();
        let val = ctx.to_string(v)?;
        parts.push(format!("{key}: {val}"));
    }
    let s = format!("{{{}}}", parts.join(", "));
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

fn map_add_all(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Map, ctx.heap(), "Map")?;
    let other = match args.first() {
        Some(&Value::Obj(oh)) if ctx.heap().kind(oh) == ObjectKind::Map => oh,
        _ => return Err("addAll attend une Map".to_string()),
    };
    let entries = map_entries(ctx, other);
    if let Object::Map(m) = ctx.heap_mut().get_mut(h) {
        for (k, v) in entries {
            m.entries.insert(k, v);
        }
    }
    Ok(Value::Null)
}

fn map_clear(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Map, ctx.heap(), "Map")?;
    if let Object::Map(m) = ctx.heap_mut().get_mut(h) {
        m.entries = Table::new();
    }
    Ok(Value::Null)
}

fn map_iterator(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Map, ctx.heap(), "Map")?;
    let keys = map_keys(ctx, h);
    if keys.is_empty() {
        return Ok(Value::Null);
    }
    let next = match args.first() {
        Some(Value::Number(n)) => {
            if *n >= (keys.len() - 1) as f64 {
                return Ok(Value::Null);
            }
            n + 1.0
        }
        _ => 0.0,
    };
    Ok(Value::Number(next))
}

fn map_iterator_value(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Map, ctx.heap(), "Map")?;
    let index = match args.first() {
        Some(Value::Number(n)) => *n as usize,
        _ => return Err("iteratorValue attend un index numérique".to_string()),
    };
    match map_keys(ctx, h).get(index) {
        Some(&k) => Ok(Value::Obj(k)),
        None => Ok(Value::Null),
    }
}

fn map_clone(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Map, ctx.heap(), "Map")?;
    let entries = match ctx.heap().get(h) {
        Object::Map(m) => m.entries.clone(),
        _ => unreachable!(),
    };
    let handle = ctx.heap_mut().alloc(Object::Map(MapObj { entries }));
    Ok(Value::Obj(handle))
}

fn map_length(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let h = expect_kind(receiver, ObjectKind::Map, ctx.heap(), "Map")?;
    match ctx.heap().get(h) {
        Object::Map(m) => Ok(Value::Number(m.entries.len() as f64)),
        _ => unreachable!(),
    }
}

// ---- Range -----------------------------------------------------------------

fn range_bounds(ctx: &mut dyn NativeContext, receiver: Value) -> Result<(f64, f64), String> {
    let h = expect_kind(receiver, ObjectKind::Instance, ctx.heap(), "Range")?;
    let from_name = ctx.heap_mut().intern_string("from");
    let to_name = ctx.heap_mut().intern_string("to");
    match ctx.heap().get(h) {
        Object::Instance(i) => {
            let from = i.fields.get(from_name).and_then(|v| v.as_number()).unwrap_or(0.0);
            let to = i.fields.get(to_name).and_then(|v| v.as_number()).unwrap_or(0.0);
            Ok((from, to))
        }
        _ => Err("receveur attendu: Range".to_string()),
    }
}

fn range_to_string(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let (from, to) = range_bounds(ctx, receiver)?;
    let s = format!("{}..{}", format_number(from), format_number(to));
    Ok(Value::Obj(ctx.heap_mut().intern_string(&s)))
}

/// Même protocole d'itération sans état que `Array`, mais la "valeur
/// précédente" est directement le nombre courant (pas une position) : une
/// `Range` énumère sa propre séquence, elle n'indexe rien.
fn range_iterator(ctx: &mut dyn NativeContext, receiver: Value, args: &[Value]) -> NativeResult {
    let (from, to) = range_bounds(ctx, receiver)?;
    let step = if to >= from { 1.0 } else { -1.0 };
    let next = match args.first() {
        Some(Value::Number(n)) => {
            if *n == to {
                return Ok(Value::Null);
            }
            n + step
        }
        _ => from,
    };
    Ok(Value::Number(next))
}

fn range_iterator_value(_ctx: &mut dyn NativeContext, _receiver: Value, args: &[Value]) -> NativeResult {
    Ok(args.first().copied().unwrap_or(Value::Null))
}

fn range_length(ctx: &mut dyn NativeContext, receiver: Value, _args: &[Value]) -> NativeResult {
    let (from, to) = range_bounds(ctx, receiver)?;
    Ok(Value::Number((to - from).abs() + 1.0))
}
