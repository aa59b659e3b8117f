//! One-shot mass calibration.

use tracing::info;

use crate::constants::dispatch_extent;
use crate::device::{ComputeBackend, Kernel};
use crate::engine::SimulationEngine;
use crate::error::{ConfigError, EngineError};
use crate::particle::{ParticleFlags, Real};
use crate::pipeline::Stage;

/// Largest density among non-static particles, if any is positive.
pub fn max_fluid_density(densities: &[Real], flags: &[ParticleFlags]) -> Option<Real> {
    densities
        .iter()
        .zip(flags)
        .filter(|(_, f)| !f.is_static())
        .map(|(&rho, _)| rho)
        .filter(|rho| rho.is_finite() && *rho > 0.0)
        .reduce(Real::max)
}

/// Mass that brings `max_density` to `rho0` under the current `mass`.
pub fn calibrated_mass(mass: Real, rho0: Real, max_density: Real) -> Real {
    mass * rho0 / max_density
}

impl<B: ComputeBackend> SimulationEngine<B> {
    /// Rescale the uniform particle mass so the densest fluid particle sits
    /// at the rest density.
    ///
    /// Flushes the waitlist, rebuilds the grid and neighbor lists, and runs
    /// one density pass. Must run once before the first [`step`](Self::step);
    /// running it again refines the estimate. Returns the new mass.
    pub fn calibrate_mass(&mut self) -> Result<Real, EngineError> {
        let phase = "calibrate_mass";
        self.flush()?;
        self.extent = dispatch_extent(self.particle_count());
        self.sync_constants(phase)?;
        self.rebuild_grid()?;
        self.build_neighbors()?;
        self.run_numeric(Stage::DensityPredict, Kernel::Density)?;

        let densities = self.densities()?;
        let flags = self.flags()?;
        let max_density =
            max_fluid_density(&densities, &flags).ok_or(ConfigError::NoFluidDensity)?;

        let before = self.constants.mass();
        let mass = calibrated_mass(before, self.constants.rho0(), max_density);
        self.constants.set_mass(mass);
        self.sync_constants(phase)?;
        self.calibrated = true;

        info!(
            max_density = max_density as f64,
            old_mass = before as f64,
            mass = mass as f64,
            "mass calibrated"
        );
        Ok(mass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_particles_are_ignored() {
        let densities = [5.0, 1.2, 0.9, 3.0];
        let flags = [
            ParticleFlags::BOUNDARY,
            ParticleFlags::NONE,
            ParticleFlags::NONE,
            ParticleFlags::STATIC,
        ];
        assert_eq!(max_fluid_density(&densities, &flags), Some(1.2));
    }

    #[test]
    fn no_fluid_means_no_density() {
        assert_eq!(max_fluid_density(&[2.0], &[ParticleFlags::BOUNDARY]), None);
        assert_eq!(max_fluid_density(&[0.0], &[ParticleFlags::NONE]), None);
        assert_eq!(max_fluid_density(&[], &[]), None);
    }

    #[test]
    fn rescale() {
        assert_eq!(calibrated_mass(2.0, 1.0, 4.0), 0.5);
    }
}
