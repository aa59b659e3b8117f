//! Run configuration: engine parameters, scene extents, kernel sources and
//! the stopping/reporting schedule.

use std::fs;
use std::path::{Path, PathBuf};

use engine::{Real, SimulationParams};
use serde::{Deserialize, Serialize};

use crate::RunnerError;

/// A complete batch run, loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Human-readable run name
    pub name: String,
    /// Engine parameters
    #[serde(default)]
    pub params: SimulationParams,
    /// Container and fluid block
    #[serde(default)]
    pub scene: SceneConfig,
    /// Directory holding the numeric kernel WGSL, relative to the config file
    #[serde(default = "default_kernels_dir")]
    pub kernels_dir: PathBuf,
    /// Stop once simulated time reaches this (seconds)
    #[serde(default = "default_end_time")]
    pub end_time: f64,
    /// Simulated time between progress reports (seconds)
    #[serde(default = "default_report_interval")]
    pub report_interval: f64,
}

/// Dam-break scene: a walled container with a block of fluid inside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Inner minimum corner of the container
    #[serde(default = "default_container_min")]
    pub container_min: [Real; 3],
    /// Inner maximum corner of the container
    #[serde(default = "default_container_max")]
    pub container_max: [Real; 3],
    /// Minimum corner of the fluid block
    #[serde(default = "default_fluid_min")]
    pub fluid_min: [Real; 3],
    /// Maximum corner of the fluid block
    #[serde(default = "default_fluid_max")]
    pub fluid_max: [Real; 3],
    /// Wall thickness in units of H
    #[serde(default = "default_wall_factor")]
    pub wall_factor: Real,
}

fn default_kernels_dir() -> PathBuf {
    PathBuf::from("../kernels")
}

fn default_end_time() -> f64 {
    20.0
}

fn default_report_interval() -> f64 {
    0.02
}

fn default_container_min() -> [Real; 3] {
    [0.0; 3]
}

fn default_container_max() -> [Real; 3] {
    [2.0, 1.0, 1.0]
}

fn default_fluid_min() -> [Real; 3] {
    [0.0; 3]
}

fn default_fluid_max() -> [Real; 3] {
    [0.8, 1.0, 1.0]
}

fn default_wall_factor() -> Real {
    1.1
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            container_min: default_container_min(),
            container_max: default_container_max(),
            fluid_min: default_fluid_min(),
            fluid_max: default_fluid_max(),
            wall_factor: default_wall_factor(),
        }
    }
}

fn invalid(reason: impl Into<String>) -> RunnerError {
    RunnerError::Invalid(reason.into())
}

impl RunConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let contents = fs::read_to_string(path).map_err(|source| RunnerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig =
            serde_json::from_str(&contents).map_err(|source| RunnerError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the schedule, the scene, and the engine parameters.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if !(self.end_time > 0.0) {
            return Err(invalid("end_time must be positive"));
        }
        if !(self.report_interval > 0.0) {
            return Err(invalid("report_interval must be positive"));
        }
        self.params.validate().map_err(engine::EngineError::from)?;

        let scene = &self.scene;
        if !(scene.wall_factor >= 0.0) {
            return Err(invalid("scene.wall_factor must be non-negative"));
        }
        let wall = scene.wall_factor * self.params.h;
        for axis in 0..3 {
            if !(scene.container_min[axis] < scene.container_max[axis]) {
                return Err(invalid(format!("scene container is empty along axis {axis}")));
            }
            if scene.fluid_min[axis] < scene.container_min[axis]
                || scene.fluid_max[axis] > scene.container_max[axis]
            {
                return Err(invalid(format!(
                    "fluid block leaves the container along axis {axis}"
                )));
            }
            // Walls outside the simulation domain would be dropped on the first rebuild.
            if scene.container_min[axis] - wall < self.params.min_bound[axis]
                || scene.container_max[axis] + wall > self.params.max_bound[axis]
            {
                return Err(invalid(format!(
                    "container walls extend past the simulation bounds along axis {axis}"
                )));
            }
        }
        Ok(())
    }

    /// Kernel directory resolved against the directory of `config_path`.
    pub fn resolve_kernels_dir(&self, config_path: &Path) -> PathBuf {
        if self.kernels_dir.is_absolute() {
            return self.kernels_dir.clone();
        }
        config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.kernels_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig {
            name: "test".to_string(),
            params: SimulationParams {
                h: 0.1,
                min_bound: [-0.5; 3],
                max_bound: [2.5, 1.5, 1.5],
                ..Default::default()
            },
            scene: SceneConfig::default(),
            kernels_dir: default_kernels_dir(),
            end_time: 1.0,
            report_interval: 0.1,
        }
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config: RunConfig = serde_json::from_str(r#"{ "name": "bare" }"#).unwrap();
        assert_eq!(config.end_time, 20.0);
        assert_eq!(config.report_interval, 0.02);
        assert_eq!(config.scene.container_max, [2.0, 1.0, 1.0]);
        assert_eq!(config.params.max_neighbors, 200);
    }

    #[test]
    fn valid_config_passes() {
        config().validate().unwrap();
    }

    #[test]
    fn walls_must_fit_the_domain() {
        let mut config = config();
        config.params.min_bound = [-0.05, -0.5, -0.5];
        assert!(matches!(config.validate(), Err(RunnerError::Invalid(_))));
    }

    #[test]
    fn fluid_must_sit_in_the_container() {
        let mut config = config();
        config.scene.fluid_max = [2.2, 1.0, 1.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn engine_params_are_checked() {
        let mut config = config();
        config.params.cs = -1.0;
        assert!(matches!(config.validate(), Err(RunnerError::Engine(_))));
    }

    #[test]
    fn schedule_is_checked() {
        let mut config = config();
        config.report_interval = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn kernels_resolve_next_to_config() {
        let config = config();
        let dir = config.resolve_kernels_dir(Path::new("configs/dam_break.json"));
        assert_eq!(dir, Path::new("configs/../kernels"));
    }
}
