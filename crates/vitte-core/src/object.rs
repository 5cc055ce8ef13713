//! object.rs — Les variantes d'objets alloués sur le tas Vitte.
//!
//! Chaque variante correspond à un `Kind` de `lit_object.h` dans
//! l'implémentation d'origine, étendu avec les types que la spécification
//! ajoute (`Class`, `Instance`, `BoundMethod`, `Array`, `Map`, `Fiber`,
//! `Module`). §9 recommande explicitement un ensemble fermé de variantes
//! avec un `match`, plutôt qu'une hiérarchie à vtables : « a closed set of
//! kinds with a switch is simpler and faster ».

use crate::bytecode::Chunk;
use crate::frame::CallFrame;
use crate::heap::Handle;
use crate::native::NativeBody;
use crate::table::Table;
use crate::value::Value;

/// Nom stable de chaque variante, utilisé par `type_name`, les messages
/// d'erreur et `Object.toString`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    String,
    Function,
    Closure,
    Upvalue,
    NativeFunction,
    Class,
    Instance,
    BoundMethod,
    Array,
    Map,
    Fiber,
    Module,
}

impl ObjectKind {
    /// Nom dynamique tel qu'exposé au code source (`Fiber`, `Array`, …).
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::String => "String",
            ObjectKind::Function => "Function",
            ObjectKind::Closure => "Function",
            ObjectKind::Upvalue => "Upvalue",
            ObjectKind::NativeFunction => "Function",
            ObjectKind::Class => "Class",
            ObjectKind::Instance => "Instance",
            ObjectKind::BoundMethod => "Function",
            ObjectKind::Array => "Array",
            ObjectKind::Map => "Map",
            ObjectKind::Fiber => "Fiber",
            ObjectKind::Module => "Module",
        }
    }
}

/// Chaîne internée : les octets sont possédés, le hash est calculé une fois.
#[derive(Debug, Clone)]
pub struct StringObj {
    pub bytes: String,
    pub hash: u64,
}

/// Fonction compilée, immuable une fois émise par l'emitter.
#[derive(Debug, Clone)]
pub struct FunctionObj {
    pub name: Handle, // StringObj
    pub chunk: Chunk,
    pub arg_count: u8,
    pub max_slots: u16,
    /// Arité variable (dernier paramètre collecteur) — non utilisée par défaut.
    pub is_vararg: bool,
    /// Un descripteur par upvalue capturée ; lu par `OP_CLOSURE` pour
    /// décider de capturer une case de la pile du cadre englobant ou de
    /// réutiliser l'upvalue déjà présente de la closure englobante.
    pub upvalues: Vec<UpvalueDesc>,
}

/// Descripteur d'upvalue tel qu'émis par le compilateur pour `OP_CLOSURE`.
#[derive(Debug, Clone, Copy)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u16,
}

/// Closure : fonction + upvalues capturées (handles vers des `UpvalueObj`).
#[derive(Debug, Clone)]
pub struct ClosureObj {
    pub function: Handle,
    pub upvalues: Vec<Handle>,
}

/// Emplacement d'un upvalue : ouvert tant qu'il pointe une case vivante de
/// la pile d'une fibre ; fermé, il possède sa propre valeur.
#[derive(Debug, Clone)]
pub enum UpvalueLocation {
    /// Ouvert : index de la case dans la pile de la fibre propriétaire.
    Stack { fiber: Handle, slot: usize },
    /// Fermé : valeur possédée directement par l'upvalue.
    Closed(Value),
}

#[derive(Debug, Clone)]
pub struct UpvalueObj {
    pub location: UpvalueLocation,
}

/// Fonction ou méthode native : son corps est soit un pointeur de fonction
/// Rust ordinaire, soit une opération de contrôle de fibre que la VM traite
/// spécialement (voir `native::NativeBody`).
#[derive(Debug, Clone, Copy)]
pub struct NativeFunctionObj {
    pub name: Handle,
    pub arity: Option<u8>,
    pub body: NativeBody,
}

/// Classe : méthodes et champs statiques précalculés (copiés depuis le
/// parent par `OP_INHERIT`, cf. spec §4.3/§9 — dispatch à coût constant).
#[derive(Debug, Clone)]
pub struct ClassObj {
    pub name: Handle,
    pub methods: Table<Value>,
    pub static_fields: Table<Value>,
    pub init_method: Option<Value>,
    pub super_class: Option<Handle>,
}

/// Instance : champs dynamiques, classe d'appartenance.
#[derive(Debug, Clone)]
pub struct InstanceObj {
    pub class: Handle,
    pub fields: Table<Value>,
}

/// Méthode liée : receveur capturé + fonction/closure sous-jacente.
#[derive(Debug, Clone)]
pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ArrayObj {
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MapObj {
    pub entries: Table<Value>,
}

/// Cadre d'appel d'une fibre (voir `vitte_vm::frame`); dupliqué ici en
/// version "debug" minimale pour les traces d'erreur du module core.
#[derive(Debug, Clone)]
pub struct ModuleObj {
    pub name: Handle,
    pub main_function: Handle,
    pub privates: Vec<Value>,
    pub private_names: Table<u32>,
    pub return_value: Value,
    pub ran: bool,
}

/// Fibre : pile de valeurs + pile de frames + chaîne parent (cf. spec §4.7).
/// Vit dans `vitte-core` (et non `vitte-vm`) car c'est un `Object` de plein
/// droit référencé depuis d'autres objets (closures en cours, modules) et
/// parcouru par le GC au même titre que les autres variantes.
#[derive(Debug, Clone)]
pub struct FiberObj {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub parent: Option<Handle>,
    pub error: Value,
    pub abort: bool,
    /// `true` si créée par `Fiber.try`: une erreur runtime revient au
    /// parent comme valeur plutôt que de continuer à se propager.
    pub catcher: bool,
    pub arg_count: u8,
    /// Upvalues encore ouverts (pointant vers une case de `stack`), triés
    /// par ordre de création. Permet à deux fermetures capturant la même
    /// case de partager une seule instance tant qu'elle n'a pas été
    /// refermée (§4.5).
    pub open_upvalues: Vec<Handle>,
    /// Le module dont les privées (`GetPrivate`/`SetPrivate`) sont visibles
    /// à ce fiber, lié à sa création (`lit_vm.c:258`: `lit_create_fiber(state,
    /// module, ...)`) — jamais déduit en remontant la pile d'appels, puisque
    /// `require` exécute chaque module sur son propre fiber et qu'un fiber
    /// créé par `new Fiber(...)` hérite du module du fiber qui l'a créé
    /// (`lit_core.c:492-493`).
    pub module: Option<Handle>,
}

impl FiberObj {
    pub fn done(&self) -> bool {
        self.frames.is_empty() || self.abort
    }
}

/// Le contenu polymorphe d'un objet alloué ; le header (`marked`, `next`)
/// vit dans `heap::Slot`, pas ici.
#[derive(Debug, Clone)]
pub enum Object {
    String(StringObj),
    Function(FunctionObj),
    Closure(ClosureObj),
    Upvalue(UpvalueObj),
    NativeFunction(NativeFunctionObj),
    Class(ClassObj),
    Instance(InstanceObj),
    BoundMethod(BoundMethodObj),
    Array(ArrayObj),
    Map(MapObj),
    Module(ModuleObj),
    Fiber(FiberObj),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::String(_) => ObjectKind::String,
            Object::Function(_) => ObjectKind::Function,
            Object::Closure(_) => ObjectKind::Closure,
            Object::Upvalue(_) => ObjectKind::Upvalue,
            Object::NativeFunction(_) => ObjectKind::NativeFunction,
            Object::Class(_) => ObjectKind::Class,
            Object::Instance(_) => ObjectKind::Instance,
            Object::BoundMethod(_) => ObjectKind::BoundMethod,
            Object::Array(_) => ObjectKind::Array,
            Object::Map(_) => ObjectKind::Map,
            Object::Module(_) => ObjectKind::Module,
            Object::Fiber(_) => ObjectKind::Fiber,
        }
    }
}
