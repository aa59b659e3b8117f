//! wgpu spatial kernels against the host backend.
//!
//! Run with: cargo test --features gpu -p engine --test gpu_parity

#![cfg(feature = "gpu")]

mod common;

use std::collections::BTreeSet;

use common::{add_tagged, host_engine, lattice, small_params};
use engine::gpu::gpu_available;
use engine::{ComputeBackend, Kernel, SimulationEngine, WgpuBackend};

const DENSITY: &str = r#"
@group(0) @binding(1) var<storage, read> neighbor_offsets: array<u32>;
@group(0) @binding(4) var<storage, read_write> rho: array<real>;

@compute @workgroup_size(WORKGROUP_SIZE)
fn density(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= particle_count()) {
        return;
    }
    rho[i] = constants.mass * real(neighbor_offsets[i + 1u] - neighbor_offsets[i]);
}
"#;

fn noop(kernel: Kernel) -> String {
    format!(
        "@compute @workgroup_size(WORKGROUP_SIZE)\nfn {}(@builtin(global_invocation_id) gid: vec3<u32>) {{}}\n",
        kernel.name()
    )
}

fn gpu_backend() -> WgpuBackend {
    let mut backend = WgpuBackend::new().unwrap();
    for kernel in Kernel::ALL.into_iter().filter(|k| !k.is_spatial()) {
        if kernel == Kernel::Density {
            backend.register_source(kernel, DENSITY);
        } else {
            backend.register_source(kernel, noop(kernel));
        }
    }
    backend
}

/// Neighbor tags of every particle, keyed by its own tag.
fn tagged_lists<B: ComputeBackend>(engine: &mut SimulationEngine<B>) -> Vec<BTreeSet<i32>> {
    let colors = engine.colors().unwrap();
    let lists = engine.neighbor_lists().unwrap();
    let mut by_tag = vec![BTreeSet::new(); colors.len()];
    for (i, list) in lists.iter().enumerate() {
        by_tag[colors[i] as usize] = list.iter().map(|&j| colors[j as usize]).collect();
    }
    by_tag
}

#[test]
fn neighbor_sets_match_host() {
    if !gpu_available() {
        eprintln!("no GPU adapter, skipping");
        return;
    }
    let mut points = lattice([0.05; 3], 0.063, 7);
    points.extend(lattice([0.61, 0.12, 0.57], 0.041, 5));
    points.push([1.4, 0.5, 0.5]);

    let mut host = host_engine(small_params());
    add_tagged(&mut host, &points);
    let host_mass = host.calibrate_mass().unwrap();

    let mut gpu = SimulationEngine::configure(small_params(), gpu_backend()).unwrap();
    for (tag, p) in points.iter().enumerate() {
        gpu.add_particle(engine::ParticleInfo::fluid(*p).with_color(tag as i32))
            .unwrap();
    }
    let gpu_mass = gpu.calibrate_mass().unwrap();

    assert_eq!(gpu.particle_count(), host.particle_count());
    assert_eq!(gpu.particle_count(), points.len() - 1);
    assert_eq!(tagged_lists(&mut gpu), tagged_lists(&mut host));
    assert!((gpu_mass - host_mass).abs() <= 1e-6 * host_mass);

    // Cell order is deterministic up to the order within a cell.
    let layout = engine::GridLayout::from_constants(gpu.constants());
    let slots: Vec<usize> = gpu
        .positions()
        .unwrap()
        .iter()
        .map(|p| layout.slot_of(&engine::particle::real3(*p)))
        .collect();
    assert!(slots.windows(2).all(|w| w[0] <= w[1]));

    gpu.step().unwrap();
    assert_eq!(gpu.steps(), 1);
}
