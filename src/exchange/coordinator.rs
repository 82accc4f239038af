//! Patch arena and migration pass driver.
//!
//! A `PatchSet` owns every patch of one process in a single arena indexed
//! by [`PatchId`]; cross-patch references are indices, so patch creation
//! and destruction (moving window) never invalidates a neighbor link.
//!
//! Phases for different patches run in parallel; the cross-patch local
//! fast path is a sequential drain of owned messages between phases, so a
//! patch's receive state is written by exactly one sender per side per
//! pass and read only after that sender's phase completed.

use rayon::prelude::*;

use super::MigrationError;
use super::buffers::{CountMsg, PayloadMsg};
use super::patch::Patch;
use super::store::MAX_DIM;
use super::topology::{Neighbor, NeighborTopology, PatchId, Rank};
use super::transport::Transport;
use crate::schema::{DomainConfig, Seed};

/// The set of patches owned by one process, plus the transport used to
/// reach patches owned by other processes.
pub struct PatchSet<T: Transport> {
    config: DomainConfig,
    rank: Rank,
    /// Global patch index → owning rank (the fixed decomposition mapping).
    ownership: Vec<Rank>,
    /// Global patch index → arena slot, for patches owned by this rank.
    local: Vec<Option<PatchId>>,
    patches: Vec<Patch>,
    transport: T,
}

impl<T: Transport + Sync> PatchSet<T> {
    /// Build the patches this rank owns under the given decomposition.
    ///
    /// # Panics
    /// Panics when the configuration is invalid or `ownership` does not
    /// cover the patch grid.
    pub fn new(config: DomainConfig, rank: Rank, ownership: Vec<Rank>, transport: T) -> Self {
        config.validate().expect("invalid domain configuration");
        assert_eq!(ownership.len(), config.total_patches());

        let mut local = vec![None; ownership.len()];
        let mut patches = Vec::new();
        for index in 0..ownership.len() {
            if ownership[index] == rank {
                local[index] = Some(PatchId(patches.len()));
                patches.push(build_patch(&config, index));
            }
        }
        let mut set = Self {
            config,
            rank,
            ownership,
            local,
            patches,
            transport,
        };
        set.rebuild_topology();
        set
    }

    /// All patches on a single rank: every neighbor uses the local fast
    /// path and the transport is never exercised.
    pub fn single_process(config: DomainConfig, transport: T) -> Self {
        let n = config.total_patches();
        Self::new(config, 0, vec![0; n], transport)
    }

    #[inline]
    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    #[inline]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patches_mut(&mut self) -> &mut [Patch] {
        &mut self.patches
    }

    pub fn patch(&self, id: PatchId) -> &Patch {
        &self.patches[id.0]
    }

    /// Look up a patch by its global index; `None` if another rank owns it.
    pub fn patch_by_index(&self, index: usize) -> Option<&Patch> {
        self.local[index].map(|id| &self.patches[id.0])
    }

    pub fn patch_by_index_mut(&mut self, index: usize) -> Option<&mut Patch> {
        match self.local[index] {
            Some(id) => Some(&mut self.patches[id.0]),
            None => None,
        }
    }

    /// Live particles of one species summed over this rank's patches.
    pub fn total_live(&self, species: usize) -> u64 {
        self.patches
            .iter()
            .map(|p| p.live_count(species) as u64)
            .sum()
    }

    /// Particles of one species that left the global domain from this
    /// rank's patches.
    pub fn total_escaped(&self, species: usize) -> u64 {
        self.patches.iter().map(|p| p.species[species].escaped).sum()
    }

    /// Recompute every patch's neighbor identities and periodic folds
    /// from the current patch grid. Called at construction and after any
    /// domain layout change.
    pub fn rebuild_topology(&mut self) {
        for p in 0..self.patches.len() {
            let coords = self.patches[p].coords;
            let mut topo = NeighborTopology::default();
            for dim in 0..self.config.ndim {
                for side in 0..2 {
                    topo.set_neighbor(dim, side, self.neighbor_of(coords, dim, side));
                    let at_edge = if side == 0 {
                        coords[dim] == 0
                    } else {
                        coords[dim] + 1 == self.config.patches_per_dim[dim]
                    };
                    let shift = if at_edge && self.config.periodic[dim] {
                        let length = self.config.domain_length(dim);
                        Some(if side == 0 { length } else { -length })
                    } else {
                        None
                    };
                    topo.set_periodic_shift(dim, side, shift);
                }
            }
            self.patches[p].topology = topo;
        }
    }

    fn neighbor_of(&self, coords: [usize; MAX_DIM], dim: usize, side: usize) -> Neighbor {
        let extent = self.config.patches_per_dim[dim] as isize;
        let mut c = coords[dim] as isize + if side == 0 { -1 } else { 1 };
        if c < 0 || c >= extent {
            if !self.config.periodic[dim] {
                return Neighbor::None;
            }
            c = (c + extent) % extent;
        }
        let mut ncoords = coords;
        ncoords[dim] = c as usize;
        let index = self.config.patch_index(&ncoords);
        match self.local[index] {
            Some(id) => Neighbor::Local(id),
            None => Neighbor::Remote {
                rank: self.ownership[index],
                index,
            },
        }
    }

    /// Stage 1: Classify and SizeExchange across all local patches, then
    /// drain the local count messages.
    pub fn begin_exchange(&mut self, species: usize, dim: usize) -> Result<(), MigrationError> {
        let transport = &self.transport;
        let msgs: Vec<Vec<CountMsg>> = self
            .patches
            .par_iter_mut()
            .map(|patch| -> Result<Vec<CountMsg>, MigrationError> {
                patch.classify(species, dim)?;
                let mut out = Vec::new();
                patch.begin_size_exchange(species, dim, transport, &mut out)?;
                Ok(out)
            })
            .collect::<Result<_, MigrationError>>()?;
        for msg in msgs.into_iter().flatten() {
            self.patches[msg.dest.0].species[species].ctx.recv[msg.side].expected = msg.count;
        }
        Ok(())
    }

    /// Stage 2: PayloadExchange across all local patches, then drain the
    /// local payload messages (buffer ownership moves to the receiver).
    pub fn exchange_payloads(&mut self, species: usize, dim: usize) -> Result<(), MigrationError> {
        let transport = &self.transport;
        let msgs: Vec<Vec<PayloadMsg>> = self
            .patches
            .par_iter_mut()
            .map(|patch| -> Result<Vec<PayloadMsg>, MigrationError> {
                let mut out = Vec::new();
                patch.exchange_payloads(species, dim, transport, &mut out)?;
                Ok(out)
            })
            .collect::<Result<_, MigrationError>>()?;
        for msg in msgs.into_iter().flatten() {
            self.patches[msg.dest.0].species[species].ctx.recv[msg.side].payload = msg.records;
        }
        Ok(())
    }

    /// Stage 3: Merge and CornerCarry across all local patches.
    pub fn finalize_exchange(&mut self, species: usize, dim: usize) -> Result<(), MigrationError> {
        let transport = &self.transport;
        self.patches
            .par_iter_mut()
            .try_for_each(|patch| patch.finalize_exchange(species, dim, transport))
    }

    /// One full migration pass for one species along one dimension.
    pub fn run_migration_pass(&mut self, species: usize, dim: usize) -> Result<(), MigrationError> {
        self.begin_exchange(species, dim)?;
        self.exchange_payloads(species, dim)?;
        self.finalize_exchange(species, dim)?;
        if log::log_enabled!(log::Level::Debug) {
            let moved: usize = self
                .patches
                .iter()
                .map(|p| p.species[species].ctx.leaving.len())
                .sum();
            log::debug!(
                "migration pass species {species} dim {dim}: {moved} departures across {} patches",
                self.patches.len()
            );
        }
        Ok(())
    }

    /// Run the whole timestep migration: every species along every
    /// dimension in ascending order. All patches finish dimension d
    /// before d+1 starts; corner-carried candidates cross that barrier.
    pub fn migrate(&mut self) -> Result<(), MigrationError> {
        for dim in 0..self.config.ndim {
            for species in 0..self.config.species.len() {
                self.run_migration_pass(species, dim)?;
            }
        }
        for species in 0..self.config.species.len() {
            self.finish_timestep(species);
        }
        Ok(())
    }

    /// End-of-timestep cleanup hook: release staging capacity and check
    /// that the last dimension left no candidates behind.
    pub fn finish_timestep(&mut self, species: usize) {
        for patch in &mut self.patches {
            let slot = &mut patch.species[species];
            debug_assert!(
                slot.candidates.is_empty(),
                "candidates left over after the final dimension"
            );
            debug_assert!(slot.ctx.is_drained());
            slot.ctx.shrink();
        }
    }

    /// Populate one species on every local patch from a seed pattern.
    /// Deterministic for a given master seed; particle ids are unique
    /// across the whole patch grid.
    pub fn seed_species(&mut self, species: usize, seed: &Seed, master_seed: u64) {
        use rand::SeedableRng;
        let charge = self.config.species[species].charge;
        let ndim = self.config.ndim;
        let per_patch = seed.particles_per_patch() as u64;
        for p in 0..self.patches.len() {
            let index = self.patches[p].index as u64;
            let mut rng = rand::rngs::StdRng::seed_from_u64(
                master_seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15),
            );
            let first_id = index * per_patch;
            let records = seed.generate(
                &self.patches[p].min_local,
                &self.patches[p].max_local,
                ndim,
                charge,
                first_id,
                &mut rng,
            );
            self.patches[p].load_records(species, &records);
        }
    }
}

fn build_patch(config: &DomainConfig, index: usize) -> Patch {
    let coords = config.patch_coords(index);
    let mut min_local = [0.0; MAX_DIM];
    let mut max_local = [0.0; MAX_DIM];
    for d in 0..config.ndim {
        min_local[d] = coords[d] as f64 * config.patch_length(d);
        max_local[d] = min_local[d] + config.patch_length(d);
    }
    Patch::new(
        index,
        coords,
        min_local,
        max_local,
        config.ndim,
        config.bins_per_patch(),
        config.bin_width(),
        config.species.len(),
    )
}
