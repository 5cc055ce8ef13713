//! config.rs — Tunables du runtime, externalisables sans recompiler.
//!
//! `spec.md` fige ces valeurs en constantes dans la prose
//! (`CALL_FRAMES_MAX = 64`, `HEAP_GROW_FACTOR = 2`, nesting
//! d'interpolation max = 4, …). [`Config`] les regroupe pour qu'un
//! embarqueur puisse les ajuster — un runtime embarqué dans un jeu
//! voudra par exemple une pile d'appels plus profonde qu'un script de
//! build. Les valeurs par défaut reproduisent exactement `spec.md`.

/// Tunables du runtime Vitte. Construit par défaut ou via [`Config::from_env`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Profondeur maximale de la pile de frames d'une fibre (§4.5, §8).
    /// Au-delà, le 65e appel lève "Stack overflow".
    pub call_frames_max: usize,
    /// Facteur de croissance du seuil `next_gc` après chaque collecte (§4.6).
    pub heap_grow_factor: usize,
    /// Profondeur maximale d'imbrication des interpolations de chaîne (§4.1).
    /// Au-delà, `ERROR_INTERPOLATION_NESTING_TOO_DEEP`.
    pub max_interpolation_nesting: usize,
    /// Taille initiale (en éléments) de la pile de valeurs d'une fibre neuve.
    pub initial_stack_size: usize,
    /// Nombre initial de cadres d'appel réservés pour une fibre neuve.
    pub initial_frame_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call_frames_max: vitte_vm::CALL_FRAMES_MAX,
            heap_grow_factor: 2,
            max_interpolation_nesting: 4,
            initial_stack_size: 256,
            initial_frame_capacity: 4,
        }
    }
}

impl Config {
    /// Construit une configuration par défaut puis applique les
    /// surcharges présentes dans l'environnement du processus
    /// (`VITTE_CALL_FRAMES_MAX`, `VITTE_HEAP_GROW_FACTOR`). Valeurs
    /// absentes ou invalides sont ignorées silencieusement : un
    /// embarqueur qui se soucie de la validité doit construire `Config`
    /// lui-même plutôt que de dépendre de l'environnement du process.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_usize("VITTE_CALL_FRAMES_MAX") {
            cfg.call_frames_max = v;
        }
        if let Some(v) = env_usize("VITTE_HEAP_GROW_FACTOR") {
            cfg.heap_grow_factor = v;
        }
        if let Some(v) = env_usize("VITTE_MAX_INTERPOLATION_NESTING") {
            cfg.max_interpolation_nesting = v;
        }
        cfg
    }

    pub(crate) fn vm_options(&self) -> vitte_vm::VmOptions {
        vitte_vm::VmOptions {
            call_frames_max: self.call_frames_max,
            heap_grow_factor: self.heap_grow_factor,
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_numbers() {
        let cfg = Config::default();
        assert_eq!(cfg.call_frames_max, 64);
        assert_eq!(cfg.heap_grow_factor, 2);
        assert_eq!(cfg.max_interpolation_nesting, 4);
    }
}
