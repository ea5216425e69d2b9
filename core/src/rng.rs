//! Deterministic random number generation.
//!
//! RULE: Nothing in the simulation may call any platform RNG.
//! All randomness flows through SlotRng instances derived from the
//! master seed stored on the ScenarioSpec (or the generator config).
//!
//! Each consumer gets its own stream per round, seeded from
//! (master_seed, slot, round). This means:
//!   - Adding a new slot never changes existing streams.
//!   - A round's draws do not depend on how many draws earlier rounds made.

use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for a single slot and round.
pub struct SlotRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl SlotRng {
    /// Create a slot RNG from the master seed and a stable stream index.
    /// The index must never change once assigned.
    pub fn new(master_seed: u64, stream_index: u64) -> Self {
        let derived_seed = master_seed ^ (stream_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Standard normal draw.
    pub fn standard_normal(&mut self) -> f64 {
        StandardNormal.sample(&mut self.inner)
    }

    /// Choose `amount` distinct indices from `0..length`, uniformly.
    /// Returned in ascending order so callers keep input order.
    pub fn sample_indices(&mut self, length: usize, amount: usize) -> Vec<usize> {
        let amount = amount.min(length);
        let mut picked = rand::seq::index::sample(&mut self.inner, length, amount).into_vec();
        picked.sort_unstable();
        picked
    }
}

/// All RNG streams for a single run, indexed by stable slot and round.
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// The stream for `slot` in `round`. Calling twice with the same
    /// arguments yields identical streams.
    pub fn for_slot_at_round(&self, slot: RngSlot, round: u32) -> SlotRng {
        let stream_index = ((slot as u64) << 32) | round as u64;
        SlotRng::new(self.master_seed, stream_index).with_name(slot.name())
    }
}

/// Stable slot assignments.
/// NEVER reorder or remove entries. Only append.
/// Reordering changes every consumer's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum RngSlot {
    ResearchSampling = 0,
    SyntheticApplicants = 1,
    // Add new slots here, append only.
}

impl RngSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResearchSampling => "research_sampling",
            Self::SyntheticApplicants => "synthetic_applicants",
        }
    }
}
