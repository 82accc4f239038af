//! Pass-scoped staging buffers.
//!
//! All mutable state of one (patch, species, dimension) migration pass
//! lives in a [`PassContext`] rather than in fields mutated in place
//! across phases; the context is reset at Classify and shrunk by the
//! end-of-timestep cleanup hook. Buffers keep their capacity across
//! passes so the steady state allocates nothing.

use super::store::ParticleRecord;
use super::topology::PatchId;
use super::transport::{PendingRecv, PendingSend};

/// Outgoing state for one side of the pass dimension.
#[derive(Debug, Default)]
pub struct SideSend {
    /// Store indices selected for removal-and-send, sorted ascending.
    pub indices: Vec<usize>,
    /// Packed copies of the selected particles (the migration envelope).
    pub payload: Vec<ParticleRecord>,
    pub count_pending: Option<PendingSend>,
    pub payload_pending: Option<PendingSend>,
}

/// Incoming state for one side of the pass dimension.
#[derive(Debug, Default)]
pub struct SideRecv {
    /// Number of particles the neighbor announced it will send.
    pub expected: usize,
    /// Received particle records, either delivered directly by a local
    /// neighbor or decoded from transport bytes.
    pub payload: Vec<ParticleRecord>,
    pub count_pending: Option<PendingRecv>,
    pub payload_pending: Option<PendingRecv>,
}

/// Staging state for one (patch, species) pair during one dimension pass.
#[derive(Debug, Default)]
pub struct PassContext {
    pub send: [SideSend; 2],
    pub recv: [SideRecv; 2],
    /// Union of both sides' indices plus the diagonal departures, sorted
    /// ascending; this is the removal list handed to the store.
    pub leaving: Vec<usize>,
    /// Records of diagonal departures found at Classify: inside the slab
    /// along the pass dimension but out of bounds along a later one. They
    /// leave the store with the rest (keeping queued indices valid across
    /// compaction) and are reinserted and requeued at CornerCarry, only
    /// ever for dimensions strictly greater than the current pass.
    pub carry: Vec<ParticleRecord>,
}

impl PassContext {
    /// Clear for a new pass, keeping allocated capacity.
    pub fn reset(&mut self) {
        for side in 0..2 {
            self.send[side].indices.clear();
            self.send[side].payload.clear();
            self.send[side].count_pending = None;
            self.send[side].payload_pending = None;
            self.recv[side].expected = 0;
            self.recv[side].payload.clear();
            self.recv[side].count_pending = None;
            self.recv[side].payload_pending = None;
        }
        self.leaving.clear();
        self.carry.clear();
    }

    /// Release buffer capacity. End-of-timestep cleanup hook.
    pub fn shrink(&mut self) {
        self.reset();
        for side in 0..2 {
            self.send[side].indices.shrink_to_fit();
            self.send[side].payload.shrink_to_fit();
            self.recv[side].payload.shrink_to_fit();
        }
        self.leaving.shrink_to_fit();
        self.carry.shrink_to_fit();
    }

    /// True when no exchange state is pending (used by the cleanup hook).
    pub fn is_drained(&self) -> bool {
        self.carry.is_empty()
            && self.send.iter().all(|s| {
                s.count_pending.is_none() && s.payload_pending.is_none()
            })
            && self.recv.iter().all(|r| {
                r.count_pending.is_none() && r.payload_pending.is_none()
            })
    }
}

/// Announced particle count moved from a sending patch to a same-process
/// destination patch. Delivered by the coordinator between phases; the
/// destination's receive state is written by exactly one sender per side
/// per pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CountMsg {
    pub dest: PatchId,
    /// Receiving side at the destination.
    pub side: usize,
    pub count: usize,
}

/// Packed particle payload moved to a same-process destination patch.
/// The buffer itself is moved, not shared: ownership transfer is the
/// single-writer/single-reader handoff.
#[derive(Debug)]
pub(crate) struct PayloadMsg {
    pub dest: PatchId,
    pub side: usize,
    pub records: Vec<ParticleRecord>,
}
