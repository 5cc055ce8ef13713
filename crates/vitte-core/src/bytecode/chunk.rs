//! chunk.rs — Bytecode émis par le compilateur pour une fonction.
//!
//! Un chunk regroupe :
//! - le code (`ops`), une suite de [`Op`]
//! - le pool de constantes (`consts`), des [`Value`] déjà prêtes pour la
//!   pile : les chaînes y sont déjà internées dans le tas au moment de
//!   l'émission, donc `OP_CONSTANT` n'a jamais besoin d'interner à
//!   l'exécution
//! - la table des lignes (`lines`), un RLE `(pc_de_départ, ligne, longueur)`
//! - des informations de debug optionnelles
//!
//! La (dé)sérialisation binaire du bytecode n'est pas un objectif de ce
//! crate : un chunk ne voyage jamais hors du processus qui l'a compilé.

use std::fmt::{self, Write as _};
use std::ops::Range;

use crate::bytecode::Op;
use crate::heap::Heap;
use crate::value::Value;

/// Pool de constantes d'un chunk : des valeurs prêtes à être poussées
/// telles quelles par `OP_CONSTANT`.
#[derive(Debug, Clone, Default)]
pub struct ConstPool {
    values: Vec<Value>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn add(&mut self, v: Value) -> u32 {
        let idx = self.values.len() as u32;
        self.values.push(v);
        idx
    }

    pub fn get(&self, idx: u32) -> Option<&Value> {
        self.values.get(idx as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.values.iter().enumerate().map(|(i, v)| (i as u32, v))
    }
}

/// Entrée compressée de la table de lignes (RLE).
#[derive(Debug, Clone)]
struct LineRun {
    start_pc: u32,
    line: u32,
    len: u32,
}

/// Table des lignes : map PC -> ligne via segments RLE. La lecture est
/// séquentielle, ce qui convient puisqu'elle n'est consultée que sur les
/// chemins d'erreur/debug (§4.4).
#[derive(Debug, Clone, Default)]
pub struct LineTable {
    runs: Vec<LineRun>,
}

impl LineTable {
    pub fn new() -> Self {
        Self { runs: Vec::new() }
    }

    pub fn push_line(&mut self, pc: u32, line: u32) {
        match self.runs.last_mut() {
            Some(last) if last.line == line && last.start_pc + last.len == pc => {
                last.len += 1;
            }
            _ => self.runs.push(LineRun { start_pc: pc, line, len: 1 }),
        }
    }

    pub fn line_for_pc(&self, pc: u32) -> Option<u32> {
        for run in &self.runs {
            if pc >= run.start_pc && pc < run.start_pc + run.len {
                return Some(run.line);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn iter_ranges(&self) -> impl Iterator<Item = (Range<u32>, u32)> + '_ {
        self.runs.iter().map(|r| (r.start_pc..(r.start_pc + r.len), r.line))
    }
}

/// Informations de debug optionnelles (noms de fichier, symboles).
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub main_file: Option<String>,
    pub symbols: Vec<(String, u32)>,
}

/// Le chunk complet : code + constantes + métadonnées de debug.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub ops: Vec<Op>,
    pub consts: ConstPool,
    pub lines: LineTable,
    pub debug: DebugInfo,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_op(&mut self, op: Op, line: u32) -> u32 {
        let pc = self.ops.len() as u32;
        self.ops.push(op);
        self.lines.push_line(pc, line);
        pc
    }

    pub fn add_const(&mut self, v: Value) -> u32 {
        self.consts.add(v)
    }

    pub fn const_at(&self, idx: u32) -> Option<&Value> {
        self.consts.get(idx)
    }

    /// Toutes les constantes du chunk, pour le traçage GC.
    pub fn constants(&self) -> impl Iterator<Item = &Value> {
        self.consts.values.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Désassemblage lisible, constantes résolues via `heap` (les chaînes
    /// n'ont pas de représentation textuelle sans lui).
    pub fn disassemble(&self, title: &str, heap: &Heap) -> String {
        let mut out = String::new();
        let _ = writeln!(&mut out, "== {title} ==");

        if !self.consts.is_empty() {
            let _ = writeln!(&mut out, "\n# constants");
            for (i, v) in self.consts.iter() {
                let _ = writeln!(&mut out, "  [{i}] = {}", display_value(v, heap));
            }
        }

        let _ = writeln!(&mut out, "\n# code");
        for (pc, op) in self.ops.iter().enumerate() {
            let pc = pc as u32;
            let line = self.lines.line_for_pc(pc).unwrap_or(u32::MAX);
            let _ = writeln!(&mut out, "{pc:05}  (line {line:>4})  {op}");
        }

        out
    }
}

fn display_value(v: &Value, heap: &Heap) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() {
                format!("{n}")
            } else {
                format!("{n}")
            }
        }
        Value::Obj(h) => match heap.kind_name(*h) {
            "String" => format!("{:?}", heap.as_str(*h)),
            kind => format!("<{kind}>"),
        },
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<chunk: {} ops, {} consts>", self.ops.len(), self.consts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_read_lines() {
        let mut heap = Heap::new();
        let mut c = Chunk::new();
        let k_hello = c.add_const(Value::Obj(heap.intern_string("hello")));
        let k_num = c.add_const(Value::Number(42.0));

        c.push_op(Op::Nop, 1);
        c.push_op(Op::Constant(k_hello), 2);
        c.push_op(Op::Constant(k_num), 2);
        c.push_op(Op::Return, 3);

        assert_eq!(c.len(), 4);
        assert_eq!(c.lines.line_for_pc(0), Some(1));
        assert_eq!(c.lines.line_for_pc(1), Some(2));
        assert_eq!(c.lines.line_for_pc(2), Some(2));
        assert_eq!(c.lines.line_for_pc(3), Some(3));

        let text = c.disassemble("test", &heap);
        assert!(text.contains("\"hello\""));
        assert!(text.contains("const"));
    }
}
