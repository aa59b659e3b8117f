//! Constants block: the POD snapshot of simulation parameters mirrored into
//! a device uniform buffer.
//!
//! Field order matches the `Constants` struct in the device prelude. Vector
//! fields come first and are padded to four lanes so both the `f32` and the
//! `f64` layouts are free of implicit padding.

use bytemuck::{Pod, Zeroable};
use tracing::info;

use crate::params::SimulationParams;
use crate::particle::{real3, xyz, Real, Real3};

/// Dispatch extents are rounded up to a multiple of this lane count.
pub const WORKGROUP_MULTIPLE: u32 = 16;

/// Grid cells are this much larger than the smoothing length.
pub const GRID_CELL_FACTOR: Real = 1.1;

/// Round `n` up to the workgroup multiple. Kernels mask lanes `>= N`.
pub fn dispatch_extent(n: usize) -> u32 {
    let n = n as u32;
    n.div_ceil(WORKGROUP_MULTIPLE) * WORKGROUP_MULTIPLE
}

/// Scalar and vector simulation parameters as seen by kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SimulationConstants {
    min_bound: Real3,
    max_bound: Real3,
    gravity: Real3,
    grid_size: [i32; 4],
    eta: Real,
    gap: Real,
    h: Real,
    inv_h: Real,
    grid_h: Real,
    grid_inv_h: Real,
    mu: Real,
    mass: Real,
    dt: Real,
    cs: Real,
    rho0: Real,
    gamma: Real,
    pressure0: Real,
    static_rho: Real,
    n: i32,
    max_neighbors: i32,
}

impl SimulationConstants {
    /// Size of the uniform buffer backing this block. Rounded up to 256
    /// bytes, which covers the device struct size at either precision.
    pub const DEVICE_SIZE: u64 = {
        let raw = std::mem::size_of::<SimulationConstants>() as u64;
        (raw + 255) / 256 * 256
    };

    /// Derive every constant from validated parameters. N starts at zero.
    pub fn from_params(params: &SimulationParams) -> Self {
        let gap = params.gap();
        let grid_h = GRID_CELL_FACTOR * params.h;
        let grid_inv_h = 1.0 / grid_h;

        let mut grid_size = [0i32; 4];
        for axis in 0..3 {
            let extent = (params.max_bound[axis] - params.min_bound[axis]) * grid_inv_h;
            grid_size[axis] = (extent.ceil() as i32).max(1);
        }

        Self {
            min_bound: real3(params.min_bound),
            max_bound: real3(params.max_bound),
            gravity: real3(params.gravity),
            grid_size,
            eta: params.eta,
            gap,
            h: params.h,
            inv_h: 1.0 / params.h,
            grid_h,
            grid_inv_h,
            mu: params.mu,
            mass: params.rho0 * gap * gap * gap,
            dt: params.timestep(),
            cs: params.cs,
            rho0: params.rho0,
            gamma: params.gamma,
            pressure0: params.cs * params.cs * params.rho0 / params.gamma,
            static_rho: params.static_rho,
            n: 0,
            max_neighbors: params.max_neighbors as i32,
        }
    }

    /// Minimum domain corner.
    pub fn min_bound(&self) -> [Real; 3] {
        xyz(&self.min_bound)
    }

    /// Maximum domain corner.
    pub fn max_bound(&self) -> [Real; 3] {
        xyz(&self.max_bound)
    }

    /// Body acceleration.
    pub fn gravity(&self) -> [Real; 3] {
        xyz(&self.gravity)
    }

    /// Grid dimensions in cells.
    pub fn grid_size(&self) -> [i32; 3] {
        [self.grid_size[0], self.grid_size[1], self.grid_size[2]]
    }

    /// Total number of grid cells.
    pub fn cell_count(&self) -> usize {
        self.grid_size()
            .iter()
            .map(|&d| d as usize)
            .product()
    }

    /// Spacing ratio.
    pub fn eta(&self) -> Real {
        self.eta
    }

    /// Particle gap H / eta.
    pub fn gap(&self) -> Real {
        self.gap
    }

    /// Smoothing length.
    pub fn h(&self) -> Real {
        self.h
    }

    /// 1 / H.
    pub fn inv_h(&self) -> Real {
        self.inv_h
    }

    /// Grid cell edge, 1.1 H.
    pub fn grid_h(&self) -> Real {
        self.grid_h
    }

    /// 1 / grid cell edge.
    pub fn grid_inv_h(&self) -> Real {
        self.grid_inv_h
    }

    /// Viscosity.
    pub fn mu(&self) -> Real {
        self.mu
    }

    /// Uniform particle mass.
    pub fn mass(&self) -> Real {
        self.mass
    }

    /// Fixed timestep.
    pub fn dt(&self) -> Real {
        self.dt
    }

    /// Speed of sound.
    pub fn cs(&self) -> Real {
        self.cs
    }

    /// Rest density.
    pub fn rho0(&self) -> Real {
        self.rho0
    }

    /// Equation-of-state exponent.
    pub fn gamma(&self) -> Real {
        self.gamma
    }

    /// Reference pressure Cs^2 rho0 / gamma.
    pub fn pressure0(&self) -> Real {
        self.pressure0
    }

    /// Boundary density.
    pub fn static_rho(&self) -> Real {
        self.static_rho
    }

    /// Live particle count N.
    pub fn particle_count(&self) -> usize {
        self.n as usize
    }

    /// Per-particle neighbor bound.
    pub fn max_neighbors(&self) -> usize {
        self.max_neighbors as usize
    }

    pub(crate) fn set_particle_count(&mut self, n: usize) {
        self.n = n as i32;
    }

    pub(crate) fn set_mass(&mut self, mass: Real) {
        self.mass = mass;
    }

    /// Log the full parameter set.
    pub fn log(&self) {
        info!(
            min_bound = ?self.min_bound(),
            max_bound = ?self.max_bound(),
            grid_size = ?self.grid_size(),
            gravity = ?self.gravity(),
            "domain"
        );
        info!(
            h = self.h as f64,
            eta = self.eta as f64,
            gap = self.gap as f64,
            grid_h = self.grid_h as f64,
            mass = self.mass as f64,
            dt = self.dt as f64,
            "resolution"
        );
        info!(
            rho0 = self.rho0 as f64,
            static_rho = self.static_rho as f64,
            cs = self.cs as f64,
            gamma = self.gamma as f64,
            pressure0 = self.pressure0 as f64,
            mu = self.mu as f64,
            max_neighbors = self.max_neighbors,
            "material"
        );
    }
}
