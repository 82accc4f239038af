//! Configuration types and particle seeding.

pub mod config;
pub mod seed;

pub use config::{ConfigError, DomainConfig, SpeciesConfig};
pub use seed::{Seed, SeedPattern};
