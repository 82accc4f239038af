//! Particle seeding patterns.
//!
//! Generates initial particle populations for a patch. Fresh injection
//! for moving-window patches goes through the same patterns.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::exchange::{MAX_DIM, ParticleRecord};

/// Initial particle distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SeedPattern {
    /// Uniform positions, Maxwellian momenta around a drift.
    UniformThermal {
        particles_per_patch: usize,
        /// Thermal spread; the momentum standard deviation is its square
        /// root.
        temperature: f64,
        drift: [f64; 3],
    },
    /// Uniform positions, every particle carrying the same momentum.
    ColdStream {
        particles_per_patch: usize,
        drift: [f64; 3],
    },
}

/// Seed pattern for one species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seed {
    pub pattern: SeedPattern,
}

impl Default for Seed {
    fn default() -> Self {
        Self {
            pattern: SeedPattern::UniformThermal {
                particles_per_patch: 64,
                temperature: 1e-2,
                drift: [0.0; 3],
            },
        }
    }
}

impl Seed {
    pub fn particles_per_patch(&self) -> usize {
        match self.pattern {
            SeedPattern::UniformThermal {
                particles_per_patch,
                ..
            }
            | SeedPattern::ColdStream {
                particles_per_patch,
                ..
            } => particles_per_patch,
        }
    }

    /// Generate records inside the given patch bounds. Ids are assigned
    /// consecutively from `first_id`.
    pub fn generate<R: Rng>(
        &self,
        min_local: &[f64; MAX_DIM],
        max_local: &[f64; MAX_DIM],
        ndim: usize,
        charge: f64,
        first_id: u64,
        rng: &mut R,
    ) -> Vec<ParticleRecord> {
        let (n, drift, sigma) = match self.pattern {
            SeedPattern::UniformThermal {
                particles_per_patch,
                temperature,
                drift,
            } => (particles_per_patch, drift, temperature.sqrt()),
            SeedPattern::ColdStream {
                particles_per_patch,
                drift,
            } => (particles_per_patch, drift, 0.0),
        };

        let thermal = if sigma > 0.0 {
            Some(Normal::new(0.0, sigma).expect("finite thermal spread"))
        } else {
            None
        };

        (0..n)
            .map(|k| {
                let mut rec = ParticleRecord {
                    position: [0.0; MAX_DIM],
                    momentum: drift,
                    weight: 1.0,
                    charge,
                    id: first_id + k as u64,
                };
                for d in 0..ndim {
                    rec.position[d] = rng.gen_range(min_local[d]..max_local[d]);
                }
                if let Some(normal) = &thermal {
                    for c in 0..3 {
                        rec.momentum[c] += normal.sample(rng);
                    }
                }
                rec
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_generate_count_and_bounds() {
        let seed = Seed::default();
        let mut rng = StdRng::seed_from_u64(1);
        let records = seed.generate(&[0.0; 3], &[8.0, 4.0, 0.0], 2, -1.0, 100, &mut rng);
        assert_eq!(records.len(), 64);
        for rec in &records {
            assert!(rec.position[0] >= 0.0 && rec.position[0] < 8.0);
            assert!(rec.position[1] >= 0.0 && rec.position[1] < 4.0);
            assert_eq!(rec.position[2], 0.0);
            assert_eq!(rec.charge, -1.0);
        }
        assert_eq!(records[0].id, 100);
        assert_eq!(records[63].id, 163);
    }

    #[test]
    fn test_cold_stream_momentum_is_uniform() {
        let seed = Seed {
            pattern: SeedPattern::ColdStream {
                particles_per_patch: 8,
                drift: [0.5, 0.0, -0.25],
            },
        };
        let mut rng = StdRng::seed_from_u64(2);
        let records = seed.generate(&[0.0; 3], &[1.0, 1.0, 1.0], 1, 1.0, 0, &mut rng);
        for rec in &records {
            assert_eq!(rec.momentum, [0.5, 0.0, -0.25]);
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let seed = Seed::default();
        let a = seed.generate(
            &[0.0; 3],
            &[4.0; 3],
            3,
            -1.0,
            0,
            &mut StdRng::seed_from_u64(9),
        );
        let b = seed.generate(
            &[0.0; 3],
            &[4.0; 3],
            3,
            -1.0,
            0,
            &mut StdRng::seed_from_u64(9),
        );
        assert_eq!(a, b);
    }
}
