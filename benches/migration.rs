//! Benchmarks for the cross-patch migration pass.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};

use picpatch::{
    exchange::{LoopbackHub, PatchSet},
    schema::{DomainConfig, Seed, SeedPattern, SpeciesConfig},
};

fn bench_migration_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("migration_step");

    for patches in [2usize, 4, 8] {
        let config = DomainConfig {
            ndim: 2,
            patches_per_dim: [patches, patches, 1],
            cells_per_patch: [32, 32, 1],
            cell_length: [1.0; 3],
            periodic: [true, true, false],
            cells_per_bin: 8,
            species: vec![SpeciesConfig::default()],
        };

        let hub = LoopbackHub::new();
        let mut set = PatchSet::single_process(config, hub.endpoint(0));
        let seed = Seed {
            pattern: SeedPattern::UniformThermal {
                particles_per_patch: 1000,
                temperature: 1e-3,
                drift: [0.0; 3],
            },
        };
        set.seed_species(0, &seed, 42);
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{patches}x{patches}")),
            &patches,
            |b, _| {
                b.iter(|| {
                    // Kick every particle, then relocate the crossers.
                    for patch in set.patches_mut() {
                        let store = &mut patch.species[0].store;
                        for i in 0..store.len() {
                            for d in 0..2 {
                                let x = store.position(d, i) + rng.gen_range(-2.0..2.0);
                                store.set_position(d, i, x);
                            }
                        }
                        patch.flag_out_of_bounds(0);
                    }
                    set.migrate().unwrap();
                    black_box(set.total_live(0));
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_migration_step);
criterion_main!(benches);
