//! heap.rs — Tas à ramasse-miettes et table d'internement des chaînes.
//!
//! L'implémentation d'origine (`lit_object.h`) chaîne ses objets dans une
//! liste intrusive (`LitObject.next`) et marque/balaie directement les
//! pointeurs. Ce workspace interdit `unsafe_code`, donc le tas est une
//! arène (`Vec<Slot>`) indexée par [`Handle`] plutôt que par pointeur ;
//! `Slot.next` de la spécification devient ici une simple liste de
//! libres (`free`), et le marquage pose un booléen sur le slot au lieu
//! de suivre un pointeur `next`.
//!
//! Chaque `Handle` porte une génération : en réutilisant un slot libéré,
//! le ramasse-miettes incrémente sa génération, de sorte qu'un `Handle`
//! obsolète (détenu par du code qui a raté la libération) ne se
//! confonde jamais silencieusement avec l'objet qui occupe désormais
//! ce slot.

use std::collections::HashMap;

use crate::object::{Object, ObjectKind, StringObj};
use crate::value::Value;

/// Référence vers un objet alloué sur le tas. Copiable, comparable,
/// hashable : c'est la seule façon de désigner un objet depuis une
/// [`Value`] ou un autre objet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    marked: bool,
    object: Option<Object>,
}

/// Facteur de croissance du seuil de déclenchement après chaque collecte
/// (cf. spec §4.6 : `HEAP_GROW_FACTOR`).
const HEAP_GROW_FACTOR: usize = 2;
const INITIAL_NEXT_GC: usize = 1024 * 1024;

/// Le tas : arène d'objets, table d'internement des chaînes, et état du GC.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    strings: HashMap<String, Handle>,
    bytes_allocated: usize,
    next_gc: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            strings: HashMap::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Vrai si l'allocateur estime qu'une collecte devrait se produire
    /// avant la prochaine allocation. La VM appelle ceci, pas `Heap`
    /// lui-même : le tas ne connaît pas les racines.
    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    fn approx_size(object: &Object) -> usize {
        // Estimation grossière, suffisante pour piloter le déclenchement du
        // GC ; pas une comptabilité précise par octet.
        match object {
            Object::String(s) => 32 + s.bytes.len(),
            Object::Array(a) => 24 + a.values.len() * std::mem::size_of::<Value>(),
            _ => 48,
        }
    }

    /// Alloue un nouvel objet et retourne son handle.
    pub fn alloc(&mut self, object: Object) -> Handle {
        self.bytes_allocated += Self::approx_size(&object);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.marked = false;
            slot.object = Some(object);
            Handle { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, marked: false, object: Some(object) });
            Handle { index, generation: 0 }
        }
    }

    fn slot(&self, handle: Handle) -> &Slot {
        let slot = &self.slots[handle.index as usize];
        debug_assert_eq!(slot.generation, handle.generation, "use of stale handle");
        slot
    }

    fn slot_mut(&mut self, handle: Handle) -> &mut Slot {
        let slot = &mut self.slots[handle.index as usize];
        debug_assert_eq!(slot.generation, handle.generation, "use of stale handle");
        slot
    }

    pub fn get(&self, handle: Handle) -> &Object {
        self.slot(handle).object.as_ref().expect("dangling handle: object was collected")
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut Object {
        self.slot_mut(handle).object.as_mut().expect("dangling handle: object was collected")
    }

    pub fn kind(&self, handle: Handle) -> ObjectKind {
        self.get(handle).kind()
    }

    pub fn kind_name(&self, handle: Handle) -> &'static str {
        self.kind(handle).name()
    }

    /// Interne une chaîne : deux appels avec le même contenu retournent le
    /// même handle, garantissant que l'égalité de chaînes se réduit à une
    /// égalité de handle partout ailleurs dans la VM.
    pub fn intern_string(&mut self, s: &str) -> Handle {
        if let Some(handle) = self.strings.get(s) {
            return *handle;
        }
        let hash = {
            use std::hash::{Hash, Hasher};
            let mut hasher = ahash::AHasher::default();
            s.hash(&mut hasher);
            hasher.finish()
        };
        let handle = self.alloc(Object::String(StringObj { bytes: s.to_owned(), hash }));
        self.strings.insert(s.to_owned(), handle);
        handle
    }

    /// Recherche une chaîne déjà internée sans en créer une nouvelle.
    pub fn get_interned(&self, s: &str) -> Option<Handle> {
        self.strings.get(s).copied()
    }

    pub fn as_str(&self, handle: Handle) -> &str {
        match self.get(handle) {
            Object::String(s) => &s.bytes,
            _ => panic!("handle does not reference a string"),
        }
    }

    /// Marque `handle` et tous les objets qu'il référence transitivement,
    /// à l'aide d'une pile explicite plutôt que de la récursion : un
    /// graphe d'objets profond (longue liste chaînée via `Array`/`Map`)
    /// ne doit jamais faire déborder la pile native.
    fn mark_reachable(&mut self, roots: impl IntoIterator<Item = Handle>) {
        let mut worklist: Vec<Handle> = roots.into_iter().collect();
        while let Some(handle) = worklist.pop() {
            let index = handle.index as usize;
            if self.slots[index].marked {
                continue;
            }
            self.slots[index].marked = true;
            let children = self.trace_children(handle);
            worklist.extend(children);
        }
    }

    fn trace_children(&self, handle: Handle) -> Vec<Handle> {
        let mut out = Vec::new();
        let mut push_value = |out: &mut Vec<Handle>, v: &Value| {
            if let Value::Obj(h) = v {
                out.push(*h);
            }
        };
        match self.get(handle) {
            Object::String(_) => {}
            Object::Function(f) => {
                out.push(f.name);
                for konst in f.chunk.constants() {
                    push_value(&mut out, konst);
                }
            }
            Object::Closure(c) => {
                out.push(c.function);
                out.extend(c.upvalues.iter().copied());
            }
            Object::Upvalue(u) => {
                if let crate::object::UpvalueLocation::Closed(v) = &u.location {
                    push_value(&mut out, v);
                }
            }
            Object::NativeFunction(n) => out.push(n.name),
            Object::Class(c) => {
                out.push(c.name);
                for (k, v) in c.methods.iter() {
                    out.push(k);
                    push_value(&mut out, v);
                }
                for (k, v) in c.static_fields.iter() {
                    out.push(k);
                    push_value(&mut out, v);
                }
                if let Some(init) = &c.init_method {
                    push_value(&mut out, init);
                }
                if let Some(sup) = c.super_class {
                    out.push(sup);
                }
            }
            Object::Instance(i) => {
                out.push(i.class);
                for (k, v) in i.fields.iter() {
                    out.push(k);
                    push_value(&mut out, v);
                }
            }
            Object::BoundMethod(b) => {
                push_value(&mut out, &b.receiver);
                push_value(&mut out, &b.method);
            }
            Object::Array(a) => {
                for v in &a.values {
                    push_value(&mut out, v);
                }
            }
            Object::Map(m) => {
                for (k, v) in m.entries.iter() {
                    out.push(k);
                    push_value(&mut out, v);
                }
            }
            Object::Module(m) => {
                out.push(m.name);
                out.push(m.main_function);
                for v in &m.privates {
                    push_value(&mut out, v);
                }
                push_value(&mut out, &m.return_value);
            }
            Object::Fiber(f) => {
                for v in &f.stack {
                    push_value(&mut out, v);
                }
                push_value(&mut out, &f.error);
                if let Some(parent) = f.parent {
                    out.push(parent);
                }
                if let Some(module) = f.module {
                    out.push(module);
                }
                for frame in &f.frames {
                    match frame.callable {
                        crate::frame::Callable::Function(h) => out.push(h),
                        crate::frame::Callable::Closure(h) => out.push(h),
                    }
                }
                for &uv in &f.open_upvalues {
                    out.push(uv);
                }
            }
        }
        out
    }

    /// Marque depuis `roots`, balaie tout objet non atteint, puis relève
    /// le seuil de déclenchement. Le balayage rend les handles vers des
    /// objets collectés invalides ; c'est à l'appelant de garantir que
    /// `roots` couvre tout ce qui est encore vivant (pile de chaque
    /// fibre, globales, upvalues ouverts, pile de racines de compilation).
    pub fn collect_garbage(&mut self, roots: impl IntoIterator<Item = Handle>) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
        self.mark_reachable(roots);
        for index in 0..self.slots.len() {
            if self.slots[index].marked {
                continue;
            }
            if let Some(object) = self.slots[index].object.take() {
                self.bytes_allocated = self.bytes_allocated.saturating_sub(Self::approx_size(&object));
                if let Object::String(s) = &object {
                    self.strings.remove(&s.bytes);
                }
                self.free.push(index as u32);
            }
        }
        self.next_gc = self.bytes_allocated.max(1) * HEAP_GROW_FACTOR;
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_read_back() {
        let mut heap = Heap::new();
        let h = heap.intern_string("hi");
        assert_eq!(heap.as_str(h), "hi");
        assert_eq!(heap.kind_name(h), "String");
    }

    #[test]
    fn unreachable_objects_are_collected() {
        let mut heap = Heap::new();
        let _kept = heap.intern_string("kept");
        let garbage = heap.alloc(Object::Array(crate::object::ArrayObj::default()));
        heap.collect_garbage([_kept]);
        // le slot du tableau a été libéré ; le réallouer doit réutiliser l'index
        let reused = heap.alloc(Object::Array(crate::object::ArrayObj::default()));
        assert_eq!(reused.index, garbage.index);
        assert_ne!(reused.generation, garbage.generation);
    }
}
