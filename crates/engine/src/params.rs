//! Host configuration surface.

use serde::{Deserialize, Serialize};

use crate::constants::GRID_CELL_FACTOR;
use crate::error::ConfigError;
use crate::particle::Real;

/// Floating point precision of host and device arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    /// 32-bit floats.
    Single,
    /// 64-bit floats. Requires device support.
    Double,
}

impl Precision {
    /// Precision this build was compiled with.
    pub const NATIVE: Precision = if cfg!(feature = "double") {
        Precision::Double
    } else {
        Precision::Single
    };

    /// WGSL scalar type name.
    pub const fn wgsl_scalar(self) -> &'static str {
        match self {
            Precision::Single => "f32",
            Precision::Double => "f64",
        }
    }
}

/// Simulation parameters, consumed once by `SimulationEngine::configure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Hard particle capacity. Every device array is allocated at this size.
    #[serde(default = "default_max_particle_count")]
    pub max_particle_count: usize,
    /// Smoothing length H (interaction radius).
    #[serde(default = "default_h")]
    pub h: Real,
    /// Spacing ratio: particle gap = H / eta.
    #[serde(default = "default_eta")]
    pub eta: Real,
    /// Density assigned to static boundary particles.
    #[serde(default = "default_static_rho")]
    pub static_rho: Real,
    /// Minimum corner of the simulation domain.
    #[serde(default = "default_min_bound")]
    pub min_bound: [Real; 3],
    /// Maximum corner of the simulation domain.
    #[serde(default = "default_max_bound")]
    pub max_bound: [Real; 3],
    /// Rest density.
    #[serde(default = "default_rho0")]
    pub rho0: Real,
    /// Speed of sound.
    #[serde(default = "default_cs")]
    pub cs: Real,
    /// Equation-of-state exponent.
    #[serde(default = "default_gamma")]
    pub gamma: Real,
    /// Dynamic viscosity. Zero or negative disables the diffusion limit.
    #[serde(default = "default_mu")]
    pub mu: Real,
    /// Courant safety factor.
    #[serde(default = "default_courant")]
    pub courant_factor: Real,
    /// Viscous diffusion safety factor.
    #[serde(default = "default_diffusion")]
    pub diffusion_factor: Real,
    /// Body acceleration.
    #[serde(default)]
    pub gravity: [Real; 3],
    /// Per-particle neighbor bound.
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,
    /// Ingestion batch size that triggers an automatic flush.
    #[serde(default = "default_ingest_batch_size")]
    pub ingest_batch_size: usize,
}

fn default_max_particle_count() -> usize {
    10_000
}

fn default_h() -> Real {
    0.1
}

fn default_eta() -> Real {
    3.0
}

fn default_static_rho() -> Real {
    1.3
}

fn default_min_bound() -> [Real; 3] {
    [0.0; 3]
}

fn default_max_bound() -> [Real; 3] {
    [1.0; 3]
}

fn default_rho0() -> Real {
    1.0
}

fn default_cs() -> Real {
    10.0
}

fn default_gamma() -> Real {
    7.0
}

fn default_mu() -> Real {
    0.05
}

fn default_courant() -> Real {
    0.2
}

fn default_diffusion() -> Real {
    0.2
}

fn default_max_neighbors() -> usize {
    200
}

fn default_ingest_batch_size() -> usize {
    2048
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            max_particle_count: default_max_particle_count(),
            h: default_h(),
            eta: default_eta(),
            static_rho: default_static_rho(),
            min_bound: default_min_bound(),
            max_bound: default_max_bound(),
            rho0: default_rho0(),
            cs: default_cs(),
            gamma: default_gamma(),
            mu: default_mu(),
            courant_factor: default_courant(),
            diffusion_factor: default_diffusion(),
            gravity: [0.0; 3],
            max_neighbors: default_max_neighbors(),
            ingest_batch_size: default_ingest_batch_size(),
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

fn positive(name: &'static str, value: Real) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(name, format!("must be positive and finite, got {value}")))
    }
}

impl SimulationParams {
    /// Check every field. Called by `configure`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_particle_count == 0 {
            return Err(invalid("max_particle_count", "must be at least 1"));
        }
        if u32::try_from(self.max_particle_count).is_err() {
            return Err(invalid("max_particle_count", "must fit in 32 bits"));
        }
        if self.max_neighbors == 0 {
            return Err(invalid("max_neighbors", "must be at least 1"));
        }
        if self
            .max_particle_count
            .checked_mul(self.max_neighbors)
            .and_then(|total| u32::try_from(total).ok())
            .is_none()
        {
            return Err(invalid(
                "max_neighbors",
                "max_particle_count x max_neighbors must fit in 32 bits",
            ));
        }
        if self.ingest_batch_size == 0 {
            return Err(invalid("ingest_batch_size", "must be at least 1"));
        }

        positive("h", self.h)?;
        positive("eta", self.eta)?;
        positive("rho0", self.rho0)?;
        positive("cs", self.cs)?;
        positive("gamma", self.gamma)?;
        positive("courant_factor", self.courant_factor)?;
        positive("diffusion_factor", self.diffusion_factor)?;

        if !(self.static_rho >= 0.0) {
            return Err(invalid("static_rho", "must be non-negative"));
        }
        if !self.mu.is_finite() {
            return Err(invalid("mu", "must be finite"));
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(invalid("gravity", "must be finite"));
        }

        for axis in 0..3 {
            if !(self.min_bound[axis] < self.max_bound[axis]) {
                return Err(invalid(
                    "max_bound",
                    format!(
                        "axis {axis}: max {} must exceed min {}",
                        self.max_bound[axis], self.min_bound[axis]
                    ),
                ));
            }
        }

        // Cell indices are i32 on the device and offsets are u32, with one
        // trailing slot for out-of-grid particles.
        let cell_edge = GRID_CELL_FACTOR as f64 * self.h as f64;
        let mut cells = 1.0f64;
        for axis in 0..3 {
            let extent = (self.max_bound[axis] as f64 - self.min_bound[axis] as f64) / cell_edge;
            let dim = extent.ceil().max(1.0);
            if !(dim <= i32::MAX as f64) {
                return Err(invalid(
                    "h",
                    format!("grid has {dim} cells along axis {axis}"),
                ));
            }
            cells *= dim;
        }
        if !(cells + 1.0 <= i32::MAX as f64) {
            return Err(invalid("h", format!("grid has {cells} cells")));
        }
        Ok(())
    }

    /// Particle gap (lattice spacing) H / eta.
    pub fn gap(&self) -> Real {
        self.h / self.eta
    }

    /// Fixed timestep from the Courant and diffusion limits.
    ///
    /// The diffusion limit only applies when `mu > 0`.
    pub fn timestep(&self) -> Real {
        let gap = self.gap();
        let courant = self.courant_factor * gap / self.cs;
        let diffusion = if self.mu > 0.0 {
            self.diffusion_factor * gap * gap / self.mu
        } else {
            100_000.0
        };
        courant.min(diffusion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let params = SimulationParams::default();
        params.validate().unwrap();
        assert_eq!(params.max_neighbors, 200);
        assert_eq!(params.ingest_batch_size, 2048);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let params: SimulationParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, SimulationParams::default());
    }

    #[test]
    fn timestep_takes_the_tighter_limit() {
        let params = SimulationParams {
            h: 0.08,
            eta: 2.5,
            mu: 0.02,
            cs: 10.0,
            courant_factor: 0.8,
            diffusion_factor: 0.8,
            ..Default::default()
        };
        let gap: Real = 0.08 / 2.5;
        let courant = 0.8 * gap / 10.0;
        let diffusion = 0.8 * gap * gap / 0.02;
        let dt = params.timestep();
        assert!((dt - courant.min(diffusion)).abs() < 1e-7);
    }

    #[test]
    fn inviscid_timestep_is_courant_limited() {
        let params = SimulationParams {
            mu: 0.0,
            ..Default::default()
        };
        let expected = params.courant_factor * params.gap() / params.cs;
        assert!((params.timestep() - expected).abs() < 1e-7);
    }

    #[test]
    fn rejects_bad_fields() {
        let bounds = SimulationParams {
            min_bound: [0.0, 1.0, 0.0],
            max_bound: [1.0, 1.0, 1.0],
            ..Default::default()
        };
        assert!(matches!(
            bounds.validate(),
            Err(ConfigError::InvalidParameter { name: "max_bound", .. })
        ));

        let h = SimulationParams {
            h: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            h.validate(),
            Err(ConfigError::InvalidParameter { name: "h", .. })
        ));

        let batch = SimulationParams {
            ingest_batch_size: 0,
            ..Default::default()
        };
        assert!(batch.validate().is_err());
    }

    #[test]
    fn rejects_grids_too_large_to_index() {
        let fine = SimulationParams {
            h: 1e-6,
            max_bound: [1e4; 3],
            ..Default::default()
        };
        assert!(matches!(
            fine.validate(),
            Err(ConfigError::InvalidParameter { name: "h", .. })
        ));

        // 1000^3 cells fits; 2000^3 does not.
        let edge = GRID_CELL_FACTOR as f64 * 0.001;
        let fits = SimulationParams {
            h: 0.001,
            max_bound: [(1000.0 * edge) as Real; 3],
            ..Default::default()
        };
        fits.validate().unwrap();
        let too_many = SimulationParams {
            h: 0.001,
            max_bound: [(2000.0 * edge) as Real; 3],
            ..Default::default()
        };
        assert!(too_many.validate().is_err());
    }
}
