//! Shared fixtures: toy numeric kernels for the host backend and small
//! particle layouts.
//!
//! The kernels are deliberately simple. Density is `mass x neighbor count`,
//! the non-pressure force is gravity, and the pressure force is zero, so tests
//! can predict every value exactly.

#![allow(dead_code)]

use engine::particle::real3;
use engine::{
    DeviceError, HostBackend, HostInvocation, Kernel, ParticleFlags, ParticleInfo, Real, Real3,
    SimulationEngine, SimulationParams,
};

/// Host backend with every numeric kernel installed.
pub fn host_backend() -> HostBackend {
    HostBackend::new()
        .with_kernel(Kernel::Density, count_density)
        .with_kernel(Kernel::NonPressureForce, gravity_force)
        .with_kernel(Kernel::Pressure, tait_pressure)
        .with_kernel(Kernel::PressureForce, zero_pressure_force)
        .with_kernel(Kernel::AdvectPredictor, euler_advect)
        .with_kernel(Kernel::AdvectCorrector, euler_advect)
}

/// Unit box, H = 0.1, no gravity.
pub fn small_params() -> SimulationParams {
    SimulationParams {
        max_particle_count: 512,
        h: 0.1,
        min_bound: [0.0; 3],
        max_bound: [1.0; 3],
        max_neighbors: 64,
        ingest_batch_size: 64,
        ..Default::default()
    }
}

/// Configure a host engine with `params`.
pub fn host_engine(params: SimulationParams) -> SimulationEngine<HostBackend> {
    SimulationEngine::configure(params, host_backend()).unwrap()
}

/// `per_axis^3` lattice of fluid particles at `spacing` from `origin`.
pub fn lattice(origin: [Real; 3], spacing: Real, per_axis: usize) -> Vec<[Real; 3]> {
    let mut points = Vec::with_capacity(per_axis.pow(3));
    for z in 0..per_axis {
        for y in 0..per_axis {
            for x in 0..per_axis {
                points.push([
                    origin[0] + x as Real * spacing,
                    origin[1] + y as Real * spacing,
                    origin[2] + z as Real * spacing,
                ]);
            }
        }
    }
    points
}

/// Add every point as a fluid particle tagged with its insertion index.
pub fn add_tagged(engine: &mut SimulationEngine<HostBackend>, points: &[[Real; 3]]) {
    for (tag, p) in points.iter().enumerate() {
        engine
            .add_particle(ParticleInfo::fluid(*p).with_color(tag as i32))
            .unwrap();
    }
}

fn count_density(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let c = inv.constants()?;
    let offsets: Vec<u32> = inv.read(1)?;
    let mut density: Vec<Real> = inv.read(4)?;
    let mut volume: Vec<Real> = inv.read(5)?;
    let flags: Vec<ParticleFlags> = inv.read(6)?;

    for i in inv.lanes(c.particle_count()) {
        density[i] = if flags[i].is_static() {
            c.static_rho()
        } else {
            c.mass() * (offsets[i + 1] - offsets[i]) as Real
        };
        volume[i] = if density[i] > 0.0 { c.mass() / density[i] } else { 0.0 };
    }

    inv.write(4, &density)?;
    inv.write(5, &volume)
}

fn gravity_force(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let c = inv.constants()?;
    let flags: Vec<ParticleFlags> = inv.read(6)?;
    let mut force: Vec<Real3> = inv.read(7)?;

    for i in inv.lanes(c.particle_count()) {
        force[i] = if flags[i].is_static() {
            [0.0; 4]
        } else {
            real3(c.gravity())
        };
    }
    inv.write(7, &force)
}

fn tait_pressure(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let c = inv.constants()?;
    let density: Vec<Real> = inv.read(1)?;
    let mut pressure: Vec<Real> = inv.read(3)?;

    for i in inv.lanes(c.particle_count()) {
        pressure[i] = c.pressure0() * ((density[i] / c.rho0()).powf(c.gamma()) - 1.0);
    }
    inv.write(3, &pressure)
}

fn zero_pressure_force(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let c = inv.constants()?;
    let mut force: Vec<Real3> = inv.read(7)?;
    for i in inv.lanes(c.particle_count()) {
        force[i] = [0.0; 4];
    }
    inv.write(7, &force)
}

/// Symplectic Euler over the force at argument 6.
fn euler_advect(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let c = inv.constants()?;
    let dt = c.dt();
    let flags: Vec<ParticleFlags> = inv.read(1)?;
    let mut smoothed: Vec<Real3> = inv.read(2)?;
    let mut position: Vec<Real3> = inv.read(3)?;
    let mut velocity: Vec<Real3> = inv.read(4)?;
    let force: Vec<Real3> = inv.read(6)?;

    for i in inv.lanes(c.particle_count()) {
        if flags[i].is_static() {
            continue;
        }
        for axis in 0..3 {
            velocity[i][axis] += dt * force[i][axis];
            position[i][axis] += dt * velocity[i][axis];
        }
        smoothed[i] = velocity[i];
    }

    inv.write(2, &smoothed)?;
    inv.write(3, &position)?;
    inv.write(4, &velocity)
}
