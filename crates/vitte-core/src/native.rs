//! native.rs — Point de contact entre le tas/les valeurs et l'interpréteur.
//!
//! `vitte-core` ne sait pas exécuter d'appels (c'est le travail de
//! `vitte-vm`), mais les méthodes natives des classes core (`String.bytes`,
//! `Array.add`, …) ont besoin d'appeler des fonctions Vitte (callbacks de
//! tri, `toString` défini par l'utilisateur, etc.) et de convertir des
//! valeurs en chaîne d'affichage. [`NativeContext`] est l'interface étroite
//! que `vitte-vm::Vm` implémente pour leur donner ce pouvoir, sans que ce
//! crate dépende de la VM elle-même.

use crate::heap::{Handle, Heap};
use crate::value::Value;

/// Résultat d'une fonction native : `Ok` pousse la valeur, `Err` lève une
/// erreur runtime (message formaté par l'appelant avec la pile courante).
pub type NativeResult = Result<Value, String>;

/// Ce qu'une fonction native peut faire avec l'interpréteur, au-delà de la
/// simple lecture/écriture du tas.
pub trait NativeContext {
    /// Tas courant (lecture).
    fn heap(&self) -> &Heap;
    /// Tas courant (écriture : allocation, internement…).
    fn heap_mut(&mut self) -> &mut Heap;

    /// Invoque `callee` avec `args` et retourne sa valeur de résultat.
    /// Utilisé par exemple par `Array.sort` (callback de comparaison) ou par
    /// les méthodes qui délèguent à `toString`.
    fn call(&mut self, callee: Value, args: &[Value]) -> NativeResult;

    /// Convertit `v` en chaîne d'affichage via sa méthode `toString`
    /// (primitives: déterministe ; objets: `toString` défini par l'utilisateur
    /// sinon un rendu par défaut comme `<ClassName instance>`).
    fn to_string(&mut self, v: Value) -> Result<String, String>;

    /// Le handle de la fibre en cours d'exécution.
    fn current_fiber(&self) -> Handle;

    /// Lit une globale (utilisé par les méthodes natives qui doivent
    /// retrouver une classe core par son nom, ex. `Object.class`).
    fn get_global(&self, name: &str) -> Option<Value>;
}

/// Pointeur de fonction native "générique" : reçoit le contexte, le
/// receveur (ou `Value::Null` pour une fonction libre), et les arguments.
pub type NativeFn = fn(&mut dyn NativeContext, Value, &[Value]) -> NativeResult;

/// Distingue les natives ordinaires des opérations de contrôle de fibre,
/// qui ont besoin de manipuler directement la fibre courante de la VM
/// plutôt que de suivre le protocole d'appel générique (§4.7/§9 : le
/// changement de fibre est un changement de contexte synchrone, pas un
/// appel imbriqué ordinaire).
#[derive(Debug, Clone, Copy)]
pub enum NativeBody {
    Generic(NativeFn),
    FiberNew,
    FiberRun,
    FiberTry,
    FiberYield,
    FiberYeet,
    FiberAbort,
    FiberCurrent,
    FiberIsDone,
}
