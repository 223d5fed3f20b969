use rand::{RngCore, rngs::OsRng};

use crate::interpreter::Interpreter;

/// Holds the random seed of one logical run.
///
/// The seed is drawn once, when the run first needs it, and reapplied unchanged
/// before every attempt of that run, so replays draw the same random values as the
/// attempt they replace.
#[derive(Debug, Clone, Default)]
pub struct DeterminismGuard {
    fixed_seed: Option<u64>,
    seed: Option<u64>,
}

impl DeterminismGuard {
    /// A guard that draws seeds from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A guard whose every run uses `seed`.
    #[must_use]
    pub fn fixed(seed: u64) -> Self {
        Self {
            fixed_seed: Some(seed),
            seed: None,
        }
    }

    /// Uses `fixed_seed` when it is set, OS entropy otherwise.
    #[must_use]
    pub fn with_fixed_seed(fixed_seed: Option<u64>) -> Self {
        Self { fixed_seed, seed: None }
    }

    /// Returns the run's seed, generating it on first use.
    pub fn initialize(&mut self) -> u64 {
        if let Some(seed) = self.seed {
            return seed;
        }
        let seed = self.fixed_seed.unwrap_or_else(|| OsRng.next_u64());
        log::debug!("new run seed {seed:#018x}");
        self.seed = Some(seed);
        seed
    }

    /// Reseeds `interpreter` with the run's seed; call before every attempt.
    pub fn apply_seed(&mut self, interpreter: &mut dyn Interpreter) -> u64 {
        let seed = self.initialize();
        interpreter.reseed(seed);
        seed
    }

    /// Forgets the seed; only for the start of a brand-new logical run.
    pub fn reset(&mut self) {
        self.seed = None;
    }

    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_stable_until_reset() {
        let mut guard = DeterminismGuard::new();
        let first = guard.initialize();
        assert_eq!(guard.initialize(), first);
        assert_eq!(guard.seed(), Some(first));
        guard.reset();
        assert_eq!(guard.seed(), None);
    }

    #[test]
    fn fixed_seed_survives_reset() {
        let mut guard = DeterminismGuard::fixed(7);
        assert_eq!(guard.initialize(), 7);
        guard.reset();
        assert_eq!(guard.initialize(), 7);
    }
}
