//! Cross-patch particle migration core.
//!
//! Particles live in per-patch, bin-sorted structure-of-arrays storage and
//! are relocated once per timestep and per spatial dimension: removed from
//! the patch they left, routed to the neighbor that now contains them
//! (direct copy for same-process neighbors, message passing otherwise),
//! and re-inserted into the destination's bins.
//!
//! The pieces, leaves first:
//!
//! - [`store`]: bin-partitioned particle storage with compaction and
//!   room-making primitives
//! - [`topology`]: per-patch neighbor identities
//! - [`buffers`]: pass-scoped staging state
//! - [`transport`]: non-blocking message passing abstraction
//! - [`protocol`]: the five-phase migration pass for one patch
//! - [`coordinator`]: the patch arena and pass driver
//! - [`window`]: moving-window domain shifts between timesteps

pub mod buffers;
pub mod coordinator;
pub mod patch;
pub mod protocol;
pub mod store;
pub mod topology;
pub mod transport;
pub mod window;

pub use coordinator::PatchSet;
pub use patch::{Patch, SpeciesSlot};
pub use store::{BinnedParticleStore, MAX_DIM, ParticleRecord, StoreError};
pub use topology::{Neighbor, NeighborTopology, PatchId, Rank};
pub use transport::{LoopbackHub, LoopbackTransport, MessageKind, MessageTag, Transport};
pub use window::MovingWindow;

/// Failures surfaced by a migration pass.
///
/// Migration is deterministic given particle positions, so every failure
/// indicates a defect rather than a transient condition; nothing is
/// retried and every variant carries enough context to locate the
/// offending patch.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("patch {patch} species {species}: {source}")]
    Store {
        patch: usize,
        species: usize,
        #[source]
        source: StoreError,
    },
    #[error(
        "count mismatch on patch {patch} species {species} dim {dim} side {side}: \
         expected {expected} particles, received {received}"
    )]
    CountMismatch {
        patch: usize,
        species: usize,
        dim: usize,
        side: usize,
        expected: usize,
        received: usize,
    },
    #[error("transport failure on patch {patch} dim {dim} side {side}: {reason}")]
    TransportFailure {
        patch: usize,
        dim: usize,
        side: usize,
        reason: String,
    },
}

impl MigrationError {
    pub(crate) fn store(patch: usize, species: usize, source: StoreError) -> Self {
        Self::Store {
            patch,
            species,
            source,
        }
    }

    pub(crate) fn transport(tag: MessageTag, reason: impl Into<String>) -> Self {
        Self::TransportFailure {
            patch: tag.patch,
            dim: tag.dim as usize,
            side: tag.side as usize,
            reason: reason.into(),
        }
    }
}
