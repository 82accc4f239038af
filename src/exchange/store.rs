//! Bin-sorted structure-of-arrays particle storage.
//!
//! A store holds all macro-particles of one species on one patch,
//! partitioned into contiguous, disjoint, gapless index ranges ("bins",
//! one per cluster of cells along the first dimension). Bin b occupies
//! `[first_index[b], last_index[b])` with `first_index[b] == last_index[b-1]`;
//! migration relies on this invariant holding whenever a pass completes.

use bytemuck::{Pod, Zeroable};

/// Maximum number of spatial dimensions supported by the storage layout.
pub const MAX_DIM: usize = 3;

/// Fixed-layout copy of one particle.
///
/// This is the element type of the migration payload: every field is
/// 8 bytes wide, so the struct has no padding and a packed `&[ParticleRecord]`
/// can be reinterpreted as wire bytes. Position components beyond the
/// domain's dimensionality are zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    pub position: [f64; MAX_DIM],
    pub momentum: [f64; 3],
    pub weight: f64,
    pub charge: f64,
    pub id: u64,
}

/// Errors raised by store mutations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("particle index {index} out of range (store holds {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("removal list not sorted ascending")]
    UnsortedRemovalList,
}

/// Per-species, per-patch particle storage partitioned into bins.
///
/// Arrays are structure-of-arrays: one `Vec` per position component (only
/// the first `ndim` are populated), per momentum component, plus weight,
/// charge and id.
#[derive(Debug, Clone)]
pub struct BinnedParticleStore {
    ndim: usize,
    position: Vec<Vec<f64>>,
    momentum: [Vec<f64>; 3],
    weight: Vec<f64>,
    charge: Vec<f64>,
    id: Vec<u64>,
    first_index: Vec<usize>,
    last_index: Vec<usize>,
    /// Indices staged by `select_for_removal`, consumed by `compact`.
    pending_removal: Vec<usize>,
}

impl BinnedParticleStore {
    /// Create an empty store with `bins` empty bins.
    pub fn new(ndim: usize, bins: usize) -> Self {
        assert!(ndim >= 1 && ndim <= MAX_DIM);
        assert!(bins >= 1);
        Self {
            ndim,
            position: vec![Vec::new(); ndim],
            momentum: [Vec::new(), Vec::new(), Vec::new()],
            weight: Vec::new(),
            charge: Vec::new(),
            id: Vec::new(),
            first_index: vec![0; bins],
            last_index: vec![0; bins],
            pending_removal: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.weight.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.weight.is_empty()
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    #[inline]
    pub fn bin_count(&self) -> usize {
        self.first_index.len()
    }

    #[inline]
    pub fn first_index(&self) -> &[usize] {
        &self.first_index
    }

    #[inline]
    pub fn last_index(&self) -> &[usize] {
        &self.last_index
    }

    #[inline]
    pub fn position(&self, dim: usize, i: usize) -> f64 {
        self.position[dim][i]
    }

    #[inline]
    pub fn set_position(&mut self, dim: usize, i: usize, x: f64) {
        self.position[dim][i] = x;
    }

    #[inline]
    pub fn momentum(&self, c: usize, i: usize) -> f64 {
        self.momentum[c][i]
    }

    #[inline]
    pub fn set_momentum(&mut self, c: usize, i: usize, p: f64) {
        self.momentum[c][i] = p;
    }

    #[inline]
    pub fn weight(&self, i: usize) -> f64 {
        self.weight[i]
    }

    #[inline]
    pub fn charge(&self, i: usize) -> f64 {
        self.charge[i]
    }

    #[inline]
    pub fn id(&self, i: usize) -> u64 {
        self.id[i]
    }

    /// Copy particle `i` out as a fixed-layout record.
    pub fn record(&self, i: usize) -> ParticleRecord {
        let mut rec = ParticleRecord::zeroed();
        for d in 0..self.ndim {
            rec.position[d] = self.position[d][i];
        }
        for c in 0..3 {
            rec.momentum[c] = self.momentum[c][i];
        }
        rec.weight = self.weight[i];
        rec.charge = self.charge[i];
        rec.id = self.id[i];
        rec
    }

    fn write_record(&mut self, i: usize, rec: &ParticleRecord) {
        for d in 0..self.ndim {
            self.position[d][i] = rec.position[d];
        }
        for c in 0..3 {
            self.momentum[c][i] = rec.momentum[c];
        }
        self.weight[i] = rec.weight;
        self.charge[i] = rec.charge;
        self.id[i] = rec.id;
    }

    /// Overwrite particle `dst` with particle `src`.
    fn overwrite(&mut self, src: usize, dst: usize) {
        for d in 0..self.ndim {
            self.position[d][dst] = self.position[d][src];
        }
        for c in 0..3 {
            self.momentum[c][dst] = self.momentum[c][src];
        }
        self.weight[dst] = self.weight[src];
        self.charge[dst] = self.charge[src];
        self.id[dst] = self.id[src];
    }

    /// Move `n` particles from `src` to `dst` (overlapping ranges allowed).
    fn overwrite_range(&mut self, src: usize, dst: usize, n: usize) {
        for d in 0..self.ndim {
            self.position[d].copy_within(src..src + n, dst);
        }
        for c in 0..3 {
            self.momentum[c].copy_within(src..src + n, dst);
        }
        self.weight.copy_within(src..src + n, dst);
        self.charge.copy_within(src..src + n, dst);
        self.id.copy_within(src..src + n, dst);
    }

    fn grow(&mut self, new_len: usize) {
        for d in 0..self.ndim {
            self.position[d].resize(new_len, 0.0);
        }
        for c in 0..3 {
            self.momentum[c].resize(new_len, 0.0);
        }
        self.weight.resize(new_len, 0.0);
        self.charge.resize(new_len, 0.0);
        self.id.resize(new_len, 0);
    }

    /// Drop storage beyond the last bin's end.
    pub fn truncate_to_bins(&mut self) {
        let live = *self.last_index.last().expect("at least one bin");
        for d in 0..self.ndim {
            self.position[d].truncate(live);
        }
        for c in 0..3 {
            self.momentum[c].truncate(live);
        }
        self.weight.truncate(live);
        self.charge.truncate(live);
        self.id.truncate(live);
    }

    /// Stage `indices` (sorted ascending) for removal by [`compact`].
    ///
    /// Sortedness is a caller invariant on the hot path; it is validated
    /// in debug builds only. Out-of-range indices always fail.
    ///
    /// [`compact`]: Self::compact
    pub fn select_for_removal(&mut self, indices: &[usize]) -> Result<(), StoreError> {
        if let Some(&last) = indices.last() {
            if last >= self.len() {
                return Err(StoreError::IndexOutOfRange {
                    index: last,
                    len: self.len(),
                });
            }
        }
        #[cfg(debug_assertions)]
        if !indices.windows(2).all(|w| w[0] < w[1]) {
            return Err(StoreError::UnsortedRemovalList);
        }
        self.pending_removal.clear();
        self.pending_removal.extend_from_slice(indices);
        Ok(())
    }

    /// Physically remove the staged particles and close the gaps.
    ///
    /// Each bin is compacted from its end backward: the highest removed
    /// slot is overwritten with the bin's last live particle and the bin
    /// shrinks. Bins are then shifted down so `first_index[b] ==
    /// last_index[b-1]` again. The shift loop has a sequential dependency
    /// between bins and must not be parallelized. Particle order within a
    /// bin is not preserved. Returns the number of particles removed.
    pub fn compact(&mut self) -> usize {
        let removed = std::mem::take(&mut self.pending_removal);
        if removed.is_empty() {
            return 0;
        }
        let bins = self.bin_count();

        // Per-bin backward overwrite. Walk bins from the top so the slice
        // of removal indices belonging to each bin can be split off the
        // tail of the sorted list.
        let mut cursor = removed.len();
        for b in (0..bins).rev() {
            let lo = self.first_index[b];
            let start = removed[..cursor].partition_point(|&i| i < lo);
            let mut end = self.last_index[b];
            for k in (start..cursor).rev() {
                let idx = removed[k];
                debug_assert!(idx < end);
                end -= 1;
                if idx != end {
                    self.overwrite(end, idx);
                }
            }
            self.last_index[b] = end;
            cursor = start;
        }

        // Close the inter-bin gaps. Must run sequentially: each bin's new
        // position depends on the previous bin's final last_index.
        for b in 1..bins {
            let gap = self.first_index[b] - self.last_index[b - 1];
            if gap > 0 {
                let n = self.last_index[b] - self.first_index[b];
                let nmove = gap.min(n);
                if nmove > 0 {
                    self.overwrite_range(self.last_index[b] - nmove, self.last_index[b - 1], nmove);
                }
                self.last_index[b] -= gap;
            }
            self.first_index[b] = self.last_index[b - 1];
        }

        self.truncate_to_bins();
        removed.len()
    }

    /// Open `counts[b]` contiguous free slots immediately after each bin's
    /// current content.
    ///
    /// The store grows by the sum of counts, then bins are shifted upward
    /// from the highest bin to the lowest; each shift must complete before
    /// the next lower bin is processed since the ranges overlap.
    pub fn make_room(&mut self, counts: &[usize]) {
        assert_eq!(counts.len(), self.bin_count());
        let total: usize = counts.iter().sum();
        if total == 0 {
            return;
        }
        self.grow(self.len() + total);

        let mut shift = total;
        for b in (0..self.bin_count()).rev() {
            // After this subtraction, `shift` is the room opened below bin b.
            shift -= counts[b];
            if shift > 0 {
                let n = self.last_index[b] - self.first_index[b];
                if n > 0 {
                    self.overwrite_range(self.first_index[b], self.first_index[b] + shift, n);
                }
            }
            self.first_index[b] += shift;
            self.last_index[b] += shift;
        }
    }

    /// Write one record into the open slot at the end of `bin`.
    ///
    /// The slot must have been opened by a prior [`make_room`]. Returns
    /// the index the record was written to.
    ///
    /// [`make_room`]: Self::make_room
    pub fn insert_at(&mut self, bin: usize, rec: &ParticleRecord) -> usize {
        let idx = self.last_index[bin];
        debug_assert!(
            if bin + 1 < self.bin_count() {
                idx < self.first_index[bin + 1]
            } else {
                idx < self.len()
            },
            "insert_at without room in bin {bin}"
        );
        self.write_record(idx, rec);
        self.last_index[bin] += 1;
        idx
    }

    /// Replace the store's contents with `records`, counting-sorted into
    /// bins by `bin_of`.
    pub fn fill_sorted<F>(&mut self, records: &[ParticleRecord], bin_of: F)
    where
        F: Fn(&ParticleRecord) -> usize,
    {
        let bins = self.bin_count();
        let mut counts = vec![0usize; bins];
        for rec in records {
            counts[bin_of(rec)] += 1;
        }

        for d in 0..self.ndim {
            self.position[d].clear();
        }
        for c in 0..3 {
            self.momentum[c].clear();
        }
        self.weight.clear();
        self.charge.clear();
        self.id.clear();
        self.grow(records.len());

        let mut start = 0;
        for b in 0..bins {
            self.first_index[b] = start;
            self.last_index[b] = start;
            start += counts[b];
        }
        for rec in records {
            let b = bin_of(rec);
            let i = self.last_index[b];
            self.write_record(i, rec);
            self.last_index[b] += 1;
        }
    }

    /// True when the bin bounds describe contiguous, gapless ranges
    /// covering exactly the stored particles.
    pub fn bins_contiguous(&self) -> bool {
        if self.first_index[0] != 0 {
            return false;
        }
        for b in 1..self.bin_count() {
            if self.first_index[b] != self.last_index[b - 1] {
                return false;
            }
        }
        *self.last_index.last().unwrap() == self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(x: f64, id: u64) -> ParticleRecord {
        ParticleRecord {
            position: [x, 0.0, 0.0],
            momentum: [0.0, 0.0, 0.0],
            weight: 1.0,
            charge: -1.0,
            id,
        }
    }

    /// Store with 3 bins of 4 particles each, x = bin index, id = slot.
    fn three_bin_store() -> BinnedParticleStore {
        let mut store = BinnedParticleStore::new(1, 3);
        let records: Vec<_> = (0..12).map(|i| record((i / 4) as f64, i as u64)).collect();
        store.fill_sorted(&records, |r| r.position[0] as usize);
        store
    }

    #[test]
    fn test_fill_sorted_bins() {
        let store = three_bin_store();
        assert_eq!(store.first_index(), &[0, 4, 8]);
        assert_eq!(store.last_index(), &[4, 8, 12]);
        assert!(store.bins_contiguous());
    }

    #[test]
    fn test_record_roundtrip() {
        let store = three_bin_store();
        let rec = store.record(5);
        assert_eq!(rec.position[0], 1.0);
        assert_eq!(rec.id, 5);
    }

    #[test]
    fn test_compact_within_one_bin() {
        let mut store = three_bin_store();
        store.select_for_removal(&[1, 2]).unwrap();
        assert_eq!(store.compact(), 2);
        assert_eq!(store.len(), 10);
        assert_eq!(store.last_index(), &[2, 6, 10]);
        assert!(store.bins_contiguous());
        // Survivors of bin 0 are ids 0 and 3 in some order.
        let mut ids = [store.id(0), store.id(1)];
        ids.sort();
        assert_eq!(ids, [0, 3]);
    }

    #[test]
    fn test_compact_across_bins() {
        let mut store = three_bin_store();
        // Remove one particle from each bin, including bin ends.
        store.select_for_removal(&[3, 4, 11]).unwrap();
        store.compact();
        assert_eq!(store.len(), 9);
        assert_eq!(store.first_index(), &[0, 3, 6]);
        assert_eq!(store.last_index(), &[3, 6, 9]);
        // Every surviving particle still sits in the bin its position maps to.
        for b in 0..3 {
            for i in store.first_index()[b]..store.last_index()[b] {
                assert_eq!(store.position(0, i) as usize, b);
            }
        }
    }

    #[test]
    fn test_compact_empties_a_bin() {
        let mut store = three_bin_store();
        store.select_for_removal(&[4, 5, 6, 7]).unwrap();
        store.compact();
        assert_eq!(store.len(), 8);
        assert_eq!(store.first_index(), &[0, 4, 4]);
        assert_eq!(store.last_index(), &[4, 4, 8]);
        assert!(store.bins_contiguous());
    }

    #[test]
    fn test_compact_rejects_out_of_range() {
        let mut store = three_bin_store();
        let err = store.select_for_removal(&[5, 99]).unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfRange { index: 99, .. }));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_unsorted_removal_rejected_in_debug() {
        let mut store = three_bin_store();
        let err = store.select_for_removal(&[5, 3]).unwrap_err();
        assert!(matches!(err, StoreError::UnsortedRemovalList));
    }

    #[test]
    fn test_make_room_and_insert() {
        let mut store = three_bin_store();
        store.make_room(&[2, 0, 1]);
        assert_eq!(store.first_index(), &[0, 6, 10]);
        assert_eq!(store.last_index(), &[4, 10, 14]);

        let a = store.insert_at(0, &record(0.5, 100));
        let b = store.insert_at(0, &record(0.5, 101));
        let c = store.insert_at(2, &record(2.5, 102));
        assert_eq!((a, b, c), (4, 5, 14));
        assert_eq!(store.len(), 15);
        assert!(store.bins_contiguous());
        assert_eq!(store.id(4), 100);
        assert_eq!(store.id(14), 102);
    }

    #[test]
    fn test_make_room_zero_counts_is_noop() {
        let mut store = three_bin_store();
        store.make_room(&[0, 0, 0]);
        assert_eq!(store.len(), 12);
        assert!(store.bins_contiguous());
    }

    proptest! {
        /// Removing any subset then opening room for any arrivals keeps the
        /// bins contiguous and the particle count exact.
        #[test]
        fn prop_contiguity_under_compact_and_room(
            removals in proptest::collection::btree_set(0usize..12, 0..12),
            counts in proptest::collection::vec(0usize..4, 3),
        ) {
            let mut store = three_bin_store();
            let removals: Vec<usize> = removals.into_iter().collect();
            store.select_for_removal(&removals).unwrap();
            let removed = store.compact();
            prop_assert_eq!(removed, removals.len());
            prop_assert_eq!(store.len(), 12 - removals.len());
            prop_assert!(store.bins_contiguous());

            store.make_room(&counts);
            for (b, &n) in counts.iter().enumerate() {
                for k in 0..n {
                    store.insert_at(b, &record(b as f64, 200 + k as u64));
                }
            }
            prop_assert!(store.bins_contiguous());
            prop_assert_eq!(store.len(), 12 - removals.len() + counts.iter().sum::<usize>());
        }

        /// No particle id is duplicated or lost by compaction.
        #[test]
        fn prop_compact_preserves_survivors(
            removals in proptest::collection::btree_set(0usize..12, 0..12),
        ) {
            let mut store = three_bin_store();
            let removals: Vec<usize> = removals.into_iter().collect();
            let expect: std::collections::BTreeSet<u64> = (0..12u64)
                .filter(|&i| !removals.contains(&(i as usize)))
                .collect();
            store.select_for_removal(&removals).unwrap();
            store.compact();
            let got: std::collections::BTreeSet<u64> =
                (0..store.len()).map(|i| store.id(i)).collect();
            prop_assert_eq!(got, expect);
        }
    }
}
