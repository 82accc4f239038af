//! The five-phase migration pass for one patch.
//!
//! Classify → SizeExchange → PayloadExchange → Merge → CornerCarry,
//! strictly sequential for a given (patch, species, dimension). The three
//! entry points below correspond to the coordinator's driver stages;
//! suspension happens only at the explicit waits at the start of the
//! payload and merge steps, so sends and receives for different sides are
//! all in flight before anything blocks.
//!
//! Side convention: a particle below `min_local[dim]` goes to side 0, a
//! particle at or above `max_local[dim]` to side 1. Ownership is
//! half-open: a particle exactly at `max_local` belongs to the upper
//! neighbor.

use super::MigrationError;
use super::buffers::{CountMsg, PayloadMsg};
use super::patch::Patch;
use super::store::{ParticleRecord, StoreError};
use super::topology::{Neighbor, opposite};
use super::transport::{MessageKind, MessageTag, Transport};

impl Patch {
    /// Phase 1: split the candidate list by departure side.
    ///
    /// This is the only scan over candidates; the full particle array is
    /// never touched. A candidate inside the slab along `dim` but outside
    /// a *later* dimension is a diagonal departure: its record joins the
    /// carry set and it leaves the store with the rest.
    pub(crate) fn classify(&mut self, species: usize, dim: usize) -> Result<(), MigrationError> {
        let ndim = self.ndim;
        let index = self.index;
        let (min, max) = (self.min_local, self.max_local);

        let slot = &mut self.species[species];
        slot.ctx.reset();
        slot.candidates.sort_unstable();
        slot.candidates.dedup();

        let len = slot.store.len();
        for k in 0..slot.candidates.len() {
            let i = slot.candidates[k];
            if i >= len {
                return Err(MigrationError::store(
                    index,
                    species,
                    StoreError::IndexOutOfRange { index: i, len },
                ));
            }
            let x = slot.store.position(dim, i);
            if x < min[dim] {
                slot.ctx.send[0].indices.push(i);
                slot.ctx.leaving.push(i);
            } else if x >= max[dim] {
                slot.ctx.send[1].indices.push(i);
                slot.ctx.leaving.push(i);
            } else {
                let rec = slot.store.record(i);
                let out_later = (dim + 1..ndim)
                    .any(|d| rec.position[d] < min[d] || rec.position[d] >= max[d]);
                if out_later {
                    slot.ctx.carry.push(rec);
                    slot.ctx.leaving.push(i);
                }
                // Otherwise the candidate is resident and unaffected.
            }
        }
        slot.candidates.clear();
        Ok(())
    }

    /// Phase 2: exchange the number of particles about to move.
    ///
    /// Remote neighbors get an asynchronous count message and a posted
    /// receive. Local neighbors skip the round trip entirely: the count
    /// becomes a [`CountMsg`] the coordinator writes straight into the
    /// destination's expected-receive field. A side with no neighbor
    /// drops its departures permanently and its receive count stays 0.
    pub(crate) fn begin_size_exchange<T: Transport>(
        &mut self,
        species: usize,
        dim: usize,
        transport: &T,
        local_out: &mut Vec<CountMsg>,
    ) -> Result<(), MigrationError> {
        let index = self.index;
        for side in 0..2 {
            let n = self.species[species].ctx.send[side].indices.len();
            match self.topology.neighbor(dim, side) {
                Neighbor::None => {
                    self.species[species].escaped += n as u64;
                }
                Neighbor::Local(dest) => local_out.push(CountMsg {
                    dest,
                    side: opposite(side),
                    count: n,
                }),
                Neighbor::Remote { rank, .. } => {
                    let tag = MessageTag::new(index, dim, side, MessageKind::Count);
                    let pending =
                        transport.post_send(rank, tag, (n as u64).to_le_bytes().to_vec())?;
                    self.species[species].ctx.send[side].count_pending = Some(pending);
                }
            }
        }
        for side in 0..2 {
            if let Neighbor::Remote { rank, index: nbr } = self.topology.neighbor(dim, side) {
                let tag = MessageTag::new(nbr, dim, opposite(side), MessageKind::Count);
                let pending = transport.post_recv(rank, tag)?;
                self.species[species].ctx.recv[side].count_pending = Some(pending);
            }
        }
        Ok(())
    }

    /// Phase 3: move the particle payloads.
    ///
    /// Waits for the count exchange first, then packs each side's
    /// departures (applying the periodic fold when this patch sits at a
    /// wrapping physical boundary) and issues every send before any
    /// payload wait. Local payload buffers are moved whole to the
    /// destination; remote ones are serialized to bytes.
    pub(crate) fn exchange_payloads<T: Transport>(
        &mut self,
        species: usize,
        dim: usize,
        transport: &T,
        local_out: &mut Vec<PayloadMsg>,
    ) -> Result<(), MigrationError> {
        {
            let ctx = &mut self.species[species].ctx;
            for side in 0..2 {
                if let Some(p) = ctx.send[side].count_pending.take() {
                    transport.wait_send(p)?;
                }
                if let Some(p) = ctx.recv[side].count_pending.take() {
                    let bytes = transport.wait_recv(p)?;
                    let bytes: [u8; 8] = bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| MigrationError::transport(p.tag, "malformed count message"))?;
                    ctx.recv[side].expected = u64::from_le_bytes(bytes) as usize;
                }
            }
        }

        for side in 0..2 {
            let neighbor = self.topology.neighbor(dim, side);
            if !neighbor.exists() {
                continue;
            }
            let fold = self.topology.periodic_shift(dim, side);
            let slot = &mut self.species[species];
            if slot.ctx.send[side].indices.is_empty() {
                continue;
            }
            slot.ctx.send[side].payload.clear();
            for k in 0..slot.ctx.send[side].indices.len() {
                let i = slot.ctx.send[side].indices[k];
                let mut rec = slot.store.record(i);
                if let Some(shift) = fold {
                    rec.position[dim] += shift;
                }
                slot.ctx.send[side].payload.push(rec);
            }
            match neighbor {
                Neighbor::Local(dest) => {
                    let records = std::mem::take(&mut slot.ctx.send[side].payload);
                    local_out.push(PayloadMsg {
                        dest,
                        side: opposite(side),
                        records,
                    });
                }
                Neighbor::Remote { rank, .. } => {
                    let tag = MessageTag::new(self.index, dim, side, MessageKind::Payload);
                    let bytes = bytemuck::cast_slice(&slot.ctx.send[side].payload).to_vec();
                    slot.ctx.send[side].payload_pending = Some(transport.post_send(rank, tag, bytes)?);
                }
                Neighbor::None => unreachable!(),
            }
        }

        for side in 0..2 {
            if let Neighbor::Remote { rank, index: nbr } = self.topology.neighbor(dim, side) {
                if self.species[species].ctx.recv[side].expected > 0 {
                    let tag = MessageTag::new(nbr, dim, opposite(side), MessageKind::Payload);
                    let pending = transport.post_recv(rank, tag)?;
                    self.species[species].ctx.recv[side].payload_pending = Some(pending);
                }
            }
        }
        Ok(())
    }

    /// Phases 4 and 5: merge arrivals and queue corner departures.
    ///
    /// Blocks until this dimension's outstanding transfers complete, then
    /// removes the departed particles, opens per-bin room, and inserts
    /// the arrivals: for dimension 0 every arrival lands in the edge bin
    /// of its side, for later dimensions each is binned by its own
    /// position. Inserted arrivals still out of bounds along a later
    /// dimension are queued (by their fresh index) as candidates for the
    /// next pass, as are the reinserted classify-time diagonals. Nothing
    /// is ever requeued for an earlier dimension, which bounds a particle
    /// to `ndim` passes per timestep.
    pub(crate) fn finalize_exchange<T: Transport>(
        &mut self,
        species: usize,
        dim: usize,
        transport: &T,
    ) -> Result<(), MigrationError> {
        let ndim = self.ndim;
        let index = self.index;
        let (min, max) = (self.min_local, self.max_local);
        let bins = self.species[species].store.bin_count();
        let min0 = self.min_local[0];
        let bin_width = self.bin_width;
        let bin_of = |x: f64| -> usize {
            let b = ((x - min0) / bin_width).floor() as isize;
            b.clamp(0, bins as isize - 1) as usize
        };

        // Wait for payload completion and verify transferred counts; a
        // disagreement between the two ends is a protocol bug, not a
        // recoverable condition.
        for side in 0..2 {
            let slot = &mut self.species[species];
            if let Some(p) = slot.ctx.send[side].payload_pending.take() {
                transport.wait_send(p)?;
            }
            if let Some(p) = slot.ctx.recv[side].payload_pending.take() {
                let bytes = transport.wait_recv(p)?;
                if bytes.len() % std::mem::size_of::<ParticleRecord>() != 0 {
                    return Err(MigrationError::transport(
                        p.tag,
                        "payload is not a whole number of particle records",
                    ));
                }
                slot.ctx.recv[side].payload = bytemuck::pod_collect_to_vec(&bytes);
            }
            let received = slot.ctx.recv[side].payload.len();
            let expected = slot.ctx.recv[side].expected;
            if received != expected {
                return Err(MigrationError::CountMismatch {
                    patch: index,
                    species,
                    dim,
                    side,
                    expected,
                    received,
                });
            }
        }

        let slot = &mut self.species[species];

        // Remove everything that left this patch.
        slot.store
            .select_for_removal(&slot.ctx.leaving)
            .map_err(|e| MigrationError::store(index, species, e))?;
        slot.store.compact();

        // Count arrivals per bin, open the room, insert.
        let mut counts = vec![0usize; bins];
        if dim == 0 {
            counts[0] += slot.ctx.recv[0].payload.len();
            counts[bins - 1] += slot.ctx.recv[1].payload.len();
        } else {
            for side in 0..2 {
                for k in 0..slot.ctx.recv[side].payload.len() {
                    counts[bin_of(slot.ctx.recv[side].payload[k].position[0])] += 1;
                }
            }
        }
        counts[bins - 1] += slot.ctx.carry.len();
        slot.store.make_room(&counts);

        let mut inserted = Vec::with_capacity(
            slot.ctx.recv[0].payload.len() + slot.ctx.recv[1].payload.len(),
        );
        for side in 0..2 {
            for k in 0..slot.ctx.recv[side].payload.len() {
                let rec = slot.ctx.recv[side].payload[k];
                debug_assert!(
                    rec.position[dim] >= min[dim] && rec.position[dim] < max[dim],
                    "arrival crossed more than one patch along dim {dim}"
                );
                let bin = if dim == 0 {
                    if side == 0 { 0 } else { bins - 1 }
                } else {
                    bin_of(rec.position[0])
                };
                inserted.push(slot.store.insert_at(bin, &rec));
            }
            slot.ctx.recv[side].payload.clear();
        }

        // CornerCarry: an arrival that moved diagonally is still out of
        // bounds along a later dimension; its fresh index goes straight
        // into the next dimension's candidate list.
        for idx in inserted {
            let rec = slot.store.record(idx);
            let out_later =
                (dim + 1..ndim).any(|d| rec.position[d] < min[d] || rec.position[d] >= max[d]);
            if out_later {
                slot.candidates.push(idx);
            }
        }
        // Self-carried diagonals go to the end of the last bin and are
        // requeued; they leave again on a later pass, so their bin only
        // has to be valid, not position-exact.
        let carry = std::mem::take(&mut slot.ctx.carry);
        for rec in carry {
            let idx = slot.store.insert_at(bins - 1, &rec);
            slot.candidates.push(idx);
        }

        debug_assert!(slot.store.bins_contiguous());
        debug_assert!(
            dim + 1 < ndim || slot.candidates.is_empty(),
            "corner carry queued past the last dimension"
        );
        Ok(())
    }
}
