//! Jitter randomness for retry backoff.
//!
//! Each source gate owns its own stream. With a configured master seed
//! the stream is derived from (master_seed XOR source_index), so runs are
//! reproducible and the two sources never share a sequence. Without a
//! seed the stream comes from OS entropy, which is what keeps separate
//! processes from retrying in lockstep.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct JitterRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl JitterRng {
    /// Deterministic stream for a source. The index must never change
    /// once assigned.
    pub fn seeded(master_seed: u64, source_index: u64) -> Self {
        let derived_seed = master_seed ^ (source_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::from_entropy(),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Uniform draw in `[0, max]`, inclusive.
    pub fn jitter_ms(&mut self, max: u64) -> u64 {
        if max == 0 {
            return 0;
        }
        self.inner.gen_range(0..=max)
    }
}
