//! Grid rebuild + neighbor build scaling on the host backend, and on the GPU
//! when built with `--features gpu`.
//!
//! Run with: cargo bench -p engine --bench grid_scaling

use std::time::Instant;

use engine::{
    ComputeBackend, DeviceError, HostBackend, HostInvocation, Kernel, ParticleInfo, Real,
    SimulationEngine, SimulationParams,
};

fn count_density(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let c = inv.constants()?;
    let offsets: Vec<u32> = inv.read(1)?;
    let mut density: Vec<Real> = inv.read(4)?;
    for i in inv.lanes(c.particle_count()) {
        density[i] = c.mass() * (offsets[i + 1] - offsets[i]) as Real;
    }
    inv.write(4, &density)
}

fn host_backend() -> HostBackend {
    let mut backend = HostBackend::new().with_kernel(Kernel::Density, count_density);
    for kernel in Kernel::ALL.into_iter().filter(|k| !k.is_spatial() && *k != Kernel::Density) {
        backend.register(kernel, |_: &mut HostInvocation<'_>| Ok(()));
    }
    backend
}

/// Cube of `n_per_axis^3` fluid particles at the lattice gap.
fn params_for(n_per_axis: usize) -> SimulationParams {
    let h = 0.03;
    let gap = h / 3.0;
    let side = gap * (n_per_axis as Real + 4.0);
    SimulationParams {
        max_particle_count: n_per_axis.pow(3),
        h,
        min_bound: [0.0; 3],
        max_bound: [side; 3],
        max_neighbors: 160,
        ingest_batch_size: 4096,
        ..Default::default()
    }
}

fn run<B: ComputeBackend>(label: &str, backend: B, n_per_axis: usize, steps: usize) {
    let params = params_for(n_per_axis);
    let gap = params.gap();
    let mut engine = match SimulationEngine::configure(params, backend) {
        Ok(engine) => engine,
        Err(e) => {
            println!("{label:>6} {n_per_axis:>6}: configure failed: {e}");
            return;
        }
    };
    for z in 0..n_per_axis {
        for y in 0..n_per_axis {
            for x in 0..n_per_axis {
                let p = [
                    (x as Real + 2.0) * gap,
                    (y as Real + 2.0) * gap,
                    (z as Real + 2.0) * gap,
                ];
                if let Err(e) = engine.add_particle(ParticleInfo::fluid(p)) {
                    println!("{label:>6}: ingest failed: {e}");
                    return;
                }
            }
        }
    }
    if let Err(e) = engine.calibrate_mass() {
        println!("{label:>6}: calibration failed: {e}");
        return;
    }

    let start = Instant::now();
    let mut entries = 0;
    for _ in 0..steps {
        match engine.step() {
            Ok(profile) => entries = profile.neighbor_entries,
            Err(e) => {
                println!("{label:>6}: step failed: {e}");
                return;
            }
        }
    }
    let elapsed = start.elapsed().as_secs_f64();
    let profile = engine.last_profile();
    println!(
        "{:>6} {:>10} {:>12} {:>10.2} {:>12} {:>12}",
        label,
        engine.particle_count(),
        entries,
        elapsed * 1000.0 / steps as f64,
        profile.stage_us(engine::Stage::GridRebuild),
        profile.stage_us(engine::Stage::NeighborBuild),
    );
}

fn main() {
    println!("=== Grid scaling ===\n");
    println!(
        "{:>6} {:>10} {:>12} {:>10} {:>12} {:>12}",
        "Device", "Particles", "Neighbors", "ms/step", "grid (us)", "nbr (us)"
    );

    for &(n, steps) in &[(10, 10), (20, 5), (30, 3)] {
        run("host", host_backend(), n, steps);
    }

    #[cfg(feature = "gpu")]
    {
        if !engine::gpu::gpu_available() {
            println!("no GPU adapter, skipping wgpu runs");
            return;
        }
        let density = "@group(0) @binding(1) var<storage, read> neighbor_offsets: array<u32>;\n\
            @group(0) @binding(4) var<storage, read_write> rho: array<real>;\n\
            @compute @workgroup_size(WORKGROUP_SIZE)\n\
            fn density(@builtin(global_invocation_id) gid: vec3<u32>) {\n\
                let i = gid.x;\n\
                if (i >= particle_count()) { return; }\n\
                rho[i] = constants.mass * real(neighbor_offsets[i + 1u] - neighbor_offsets[i]);\n\
            }\n";
        for &(n, steps) in &[(20, 20), (40, 10), (60, 5)] {
            let mut backend = match engine::WgpuBackend::new() {
                Ok(backend) => backend,
                Err(e) => {
                    println!("wgpu unavailable: {e}");
                    return;
                }
            };
            for kernel in Kernel::ALL.into_iter().filter(|k| !k.is_spatial()) {
                let source = if kernel == Kernel::Density {
                    density.to_string()
                } else {
                    format!(
                        "@compute @workgroup_size(WORKGROUP_SIZE)\nfn {}(@builtin(global_invocation_id) gid: vec3<u32>) {{}}\n",
                        kernel.name()
                    )
                };
                backend.register_source(kernel, source);
            }
            run("wgpu", backend, n, steps);
        }
    }
}
