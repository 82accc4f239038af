//! A rectangular spatial sub-domain owning per-species particle storage.

use super::buffers::PassContext;
use super::store::{BinnedParticleStore, MAX_DIM, ParticleRecord};
use super::topology::NeighborTopology;

/// Per-species state held by a patch.
#[derive(Debug)]
pub struct SpeciesSlot {
    pub store: BinnedParticleStore,
    /// Store indices flagged as possibly out of bounds, consumed by the
    /// next pass's Classify phase.
    pub candidates: Vec<usize>,
    pub(crate) ctx: PassContext,
    /// Particles that crossed a side with no neighbor and left the global
    /// domain permanently.
    pub escaped: u64,
}

/// A patch: local coordinate bounds, neighbor topology, and one
/// [`BinnedParticleStore`] per species. Owned by the coordinator's arena
/// and referenced by index only.
#[derive(Debug)]
pub struct Patch {
    /// Global patch index within the domain decomposition.
    pub index: usize,
    /// Cartesian coordinates in the patch grid.
    pub coords: [usize; MAX_DIM],
    pub min_local: [f64; MAX_DIM],
    pub max_local: [f64; MAX_DIM],
    pub topology: NeighborTopology,
    pub species: Vec<SpeciesSlot>,
    pub(crate) ndim: usize,
    pub(crate) bin_width: f64,
}

impl Patch {
    pub fn new(
        index: usize,
        coords: [usize; MAX_DIM],
        min_local: [f64; MAX_DIM],
        max_local: [f64; MAX_DIM],
        ndim: usize,
        bins: usize,
        bin_width: f64,
        n_species: usize,
    ) -> Self {
        let species = (0..n_species)
            .map(|_| SpeciesSlot {
                store: BinnedParticleStore::new(ndim, bins),
                candidates: Vec::new(),
                ctx: PassContext::default(),
                escaped: 0,
            })
            .collect();
        Self {
            index,
            coords,
            min_local,
            max_local,
            topology: NeighborTopology::default(),
            species,
            ndim,
            bin_width,
        }
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// Bin owning position `x` along the first dimension. Arrivals are
    /// always in-domain along dimension 0 when this is called; the clamp
    /// only absorbs floating-point edge cases at the patch boundary.
    #[inline]
    pub fn bin_of_x(&self, x: f64) -> usize {
        let bins = self.species[0].store.bin_count() as isize;
        let b = ((x - self.min_local[0]) / self.bin_width).floor() as isize;
        b.clamp(0, bins - 1) as usize
    }

    /// True when `rec` lies inside this patch's half-open bounds along
    /// every dimension in `dims`.
    pub fn record_in_bounds(&self, rec: &ParticleRecord, dims: std::ops::Range<usize>) -> bool {
        for d in dims {
            if rec.position[d] < self.min_local[d] || rec.position[d] >= self.max_local[d] {
                return false;
            }
        }
        true
    }

    /// Scan a species' store and flag every particle outside the patch
    /// bounds as a migration candidate. Drivers call this after the
    /// pusher has moved positions; the migration pass itself never scans
    /// the full array.
    pub fn flag_out_of_bounds(&mut self, species: usize) {
        let ndim = self.ndim;
        let (min, max) = (self.min_local, self.max_local);
        let slot = &mut self.species[species];
        slot.candidates.clear();
        for i in 0..slot.store.len() {
            let out = (0..ndim).any(|d| {
                let x = slot.store.position(d, i);
                x < min[d] || x >= max[d]
            });
            if out {
                slot.candidates.push(i);
            }
        }
    }

    /// Flag every particle of a species as a migration candidate.
    pub fn flag_all(&mut self, species: usize) {
        let slot = &mut self.species[species];
        slot.candidates.clear();
        slot.candidates.extend(0..slot.store.len());
    }

    /// Replace a species' particles, counting-sorted into bins by their
    /// position along the first dimension.
    pub fn load_records(&mut self, species: usize, records: &[ParticleRecord]) {
        let min0 = self.min_local[0];
        let bin_width = self.bin_width;
        let slot = &mut self.species[species];
        let bins = slot.store.bin_count() as isize;
        slot.store.fill_sorted(records, |rec| {
            let b = ((rec.position[0] - min0) / bin_width).floor() as isize;
            b.clamp(0, bins - 1) as usize
        });
    }

    /// Re-sort a species' particles into their position-correct bins.
    pub fn rebin(&mut self, species: usize) {
        let slot = &self.species[species];
        let records: Vec<ParticleRecord> =
            (0..slot.store.len()).map(|i| slot.store.record(i)).collect();
        self.load_records(species, &records);
    }

    /// Live particle count for one species.
    pub fn live_count(&self, species: usize) -> usize {
        *self.species[species].store.last_index().last().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(x: f64, y: f64) -> ParticleRecord {
        ParticleRecord {
            position: [x, y, 0.0],
            momentum: [0.0; 3],
            weight: 1.0,
            charge: -1.0,
            id: 0,
        }
    }

    fn test_patch() -> Patch {
        // [0,8) x [0,8), 4 bins of width 2 along x.
        Patch::new(0, [0; 3], [0.0; 3], [8.0, 8.0, 0.0], 2, 4, 2.0, 1)
    }

    #[test]
    fn test_bin_of_x() {
        let p = test_patch();
        assert_eq!(p.bin_of_x(0.0), 0);
        assert_eq!(p.bin_of_x(1.9), 0);
        assert_eq!(p.bin_of_x(2.0), 1);
        assert_eq!(p.bin_of_x(7.9), 3);
    }

    #[test]
    fn test_record_in_bounds_half_open() {
        let p = test_patch();
        assert!(p.record_in_bounds(&rec(0.0, 4.0), 0..2));
        assert!(!p.record_in_bounds(&rec(8.0, 4.0), 0..2));
        assert!(p.record_in_bounds(&rec(8.0, 4.0), 1..2));
    }

    #[test]
    fn test_flag_out_of_bounds() {
        let mut p = test_patch();
        p.load_records(0, &[rec(1.0, 1.0), rec(9.0, 1.0), rec(3.0, -0.5)]);
        p.flag_out_of_bounds(0);
        let slot = &p.species[0];
        assert_eq!(slot.candidates.len(), 2);
        for &i in &slot.candidates {
            let (x, y) = (slot.store.position(0, i), slot.store.position(1, i));
            assert!(x >= 8.0 || y < 0.0);
        }
    }

    #[test]
    fn test_load_records_bins_by_position() {
        let mut p = test_patch();
        p.load_records(0, &[rec(7.0, 1.0), rec(0.5, 1.0), rec(2.5, 1.0)]);
        let store = &p.species[0].store;
        assert!(store.bins_contiguous());
        assert_eq!(store.first_index(), &[0, 1, 2, 2]);
        assert_eq!(store.last_index(), &[1, 2, 2, 3]);
        assert_eq!(store.position(0, 0), 0.5);
        assert_eq!(store.position(0, 2), 7.0);
    }
}
