//! Neighbor lists against brute force, and the overflow bound.

mod common;

use common::{add_tagged, host_engine, lattice, small_params};
use engine::neighbor::within_radius;
use engine::particle::real3;
use engine::{CapacityError, EngineError, ParticleInfo, Real, SimulationParams};

/// Every j within H of i, ascending.
fn brute_force(positions: &[[Real; 3]], h: Real) -> Vec<Vec<u32>> {
    positions
        .iter()
        .map(|p| {
            positions
                .iter()
                .enumerate()
                .filter(|(_, q)| within_radius(&real3(*p), &real3(**q), h))
                .map(|(j, _)| j as u32)
                .collect()
        })
        .collect()
}

#[test]
fn half_h_lattice_center_sees_whole_block() {
    let params = small_params();
    let h = params.h;
    let mut engine = host_engine(params);
    add_tagged(&mut engine, &lattice([0.4; 3], h / 2.0, 3));
    engine.calibrate_mass().unwrap();

    let colors = engine.colors().unwrap();
    let lists = engine.neighbor_lists().unwrap();
    let center = colors.iter().position(|&c| c == 13).unwrap();
    assert_eq!(lists[center].len(), 27);
    for list in &lists {
        assert!(list.len() >= 8, "corner particles see at least their octant");
    }
}

#[test]
fn lists_match_brute_force() {
    let params = small_params();
    let h = params.h;
    let mut engine = host_engine(params);
    let mut points = lattice([0.05; 3], 0.07, 6);
    points.extend(lattice([0.52, 0.61, 0.33], 0.045, 4));
    add_tagged(&mut engine, &points);
    engine.calibrate_mass().unwrap();

    let positions = engine.positions().unwrap();
    let lists = engine.neighbor_lists().unwrap();
    assert_eq!(lists, brute_force(&positions, h));

    let total: usize = lists.iter().map(Vec::len).sum();
    for (i, list) in lists.iter().enumerate() {
        assert!(list.contains(&(i as u32)), "particle {i} missing from its own list");
    }
    // A step reports the same entry count.
    let profile = engine.step().unwrap();
    assert_eq!(profile.neighbor_entries, total);
}

#[test]
fn isolated_particles_see_only_themselves() {
    let mut engine = host_engine(small_params());
    add_tagged(&mut engine, &[[0.1, 0.1, 0.1], [0.5, 0.5, 0.5], [0.9, 0.1, 0.9]]);
    engine.calibrate_mass().unwrap();

    let lists = engine.neighbor_lists().unwrap();
    assert_eq!(lists, vec![vec![0], vec![1], vec![2]]);
}

#[test]
fn lists_survive_a_later_flush() {
    let mut engine = host_engine(small_params());
    assert!(engine.neighbor_lists().unwrap().is_empty());

    add_tagged(&mut engine, &[[0.1, 0.1, 0.1], [0.5, 0.5, 0.5]]);
    engine.calibrate_mass().unwrap();
    engine
        .add_particle(ParticleInfo::fluid([0.9, 0.1, 0.9]))
        .unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.particle_count(), 3);

    let lists = engine.neighbor_lists().unwrap();
    assert_eq!(lists, vec![vec![0], vec![1]]);
}

#[test]
fn overflow_is_reported_not_truncated() {
    let params = SimulationParams {
        max_neighbors: 1,
        ..small_params()
    };
    let mut engine = host_engine(params);
    add_tagged(&mut engine, &[[0.5, 0.5, 0.5], [0.51, 0.5, 0.5]]);

    let err = engine.calibrate_mass().unwrap_err();
    match err {
        EngineError::Capacity(CapacityError::NeighborOverflow {
            total,
            limit,
            particles,
            max_neighbors,
        }) => {
            assert_eq!(total, 4);
            assert_eq!(limit, 2);
            assert_eq!(particles, 2);
            assert_eq!(max_neighbors, 1);
        }
        other => panic!("expected neighbor overflow, got {other}"),
    }
    assert!(engine.neighbor_lists().unwrap().is_empty());
}
