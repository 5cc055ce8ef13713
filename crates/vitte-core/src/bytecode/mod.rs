//! Bytecode de la VM Vitte : jeu d'instructions et format de chunk.

pub mod chunk;
pub mod ops;

pub use chunk::{Chunk, ConstPool, DebugInfo, LineTable};
pub use ops::Op;
