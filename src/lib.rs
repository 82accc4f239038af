//! Patch-based particle-in-cell core.
//!
//! Space is split into rectangular patches, each owning bin-sorted
//! particle storage per species. This crate implements the cross-patch
//! particle migration protocol: once per timestep and per dimension,
//! particles that left a patch are removed, routed to the neighboring
//! patch that now contains them (direct memory copy when it shares the
//! process, message passing otherwise) and re-inserted into the
//! destination's bins without breaking the bin contiguity invariant.
//!
//! # Architecture
//!
//! - `schema`: configuration types and particle seeding
//! - `exchange`: the migration core (storage, topology, buffers,
//!   transport, protocol, coordinator, moving window)
//!
//! # Example
//!
//! ```rust,no_run
//! use picpatch::{
//!     exchange::{LoopbackHub, PatchSet},
//!     schema::{DomainConfig, Seed},
//! };
//!
//! let config = DomainConfig::default();
//! let hub = LoopbackHub::new();
//! let mut patches = PatchSet::single_process(config, hub.endpoint(0));
//!
//! // Populate the first species everywhere.
//! patches.seed_species(0, &Seed::default(), 42);
//!
//! // Each timestep: the pusher moves positions, flags candidates, and
//! // the migration pass relocates whatever crossed a patch boundary.
//! for patch in patches.patches_mut() {
//!     patch.flag_out_of_bounds(0);
//! }
//! patches.migrate().expect("migration failed");
//!
//! println!("live particles: {}", patches.total_live(0));
//! ```

pub mod exchange;
pub mod schema;

// Re-export commonly used types
pub use exchange::{
    BinnedParticleStore, LoopbackHub, LoopbackTransport, MigrationError, MovingWindow, Neighbor,
    ParticleRecord, Patch, PatchSet, Transport,
};
pub use schema::{DomainConfig, Seed, SeedPattern, SpeciesConfig};
