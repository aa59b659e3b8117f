//! Batch run loop: build the scene, calibrate, then step to the end time.

use engine::{ComputeBackend, Real, SimulationEngine, Stage};
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::scene::dam_break;
use crate::RunnerError;

/// Progress snapshot taken at each report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Simulated time (seconds).
    pub time: f64,
    /// Completed steps.
    pub steps: u64,
    /// Live particle count.
    pub particles: usize,
    /// Largest speed among non-static particles.
    pub max_fluid_speed: Real,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Steps taken.
    pub steps: u64,
    /// Final simulated time.
    pub time: f64,
    /// Live particles at the end.
    pub particles: usize,
    /// Particles lost to grid rebuilds.
    pub dropped: usize,
    /// Every report emitted, in order.
    pub reports: Vec<Report>,
}

/// Configure an engine on `backend`, ingest the scene and calibrate mass.
pub fn build_engine<B: ComputeBackend>(
    config: &RunConfig,
    backend: B,
) -> Result<SimulationEngine<B>, RunnerError> {
    let mut engine = SimulationEngine::configure(config.params.clone(), backend)?;
    let scene = dam_break(&config.scene, config.params.h, config.params.gap());
    for info in scene.particles {
        engine.add_particle(info)?;
    }
    let mass = engine.calibrate_mass()?;
    info!(
        name = %config.name,
        particles = engine.particle_count(),
        mass = mass as f64,
        dt = engine.dt() as f64,
        "engine ready"
    );
    Ok(engine)
}

/// Largest speed among non-static particles.
pub fn max_fluid_speed<B: ComputeBackend>(
    engine: &mut SimulationEngine<B>,
) -> Result<Real, RunnerError> {
    let velocities = engine.velocities()?;
    let flags = engine.flags()?;
    Ok(velocities
        .iter()
        .zip(&flags)
        .filter(|(_, f)| !f.is_static())
        .map(|(v, _)| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt())
        .fold(0.0, Real::max))
}

fn report<B: ComputeBackend>(engine: &mut SimulationEngine<B>) -> Result<Report, RunnerError> {
    let report = Report {
        time: engine.time(),
        steps: engine.steps(),
        particles: engine.particle_count(),
        max_fluid_speed: max_fluid_speed(engine)?,
    };
    let profile = engine.last_profile();
    info!(
        t = report.time,
        steps = report.steps,
        n = report.particles,
        max_speed = report.max_fluid_speed as f64,
        neighbors = profile.neighbor_entries,
        step_us = profile.total_us,
        "progress"
    );
    debug!(
        grid_us = profile.stage_us(Stage::GridRebuild),
        neighbor_us = profile.stage_us(Stage::NeighborBuild),
        density_us = profile.stage_us(Stage::DensityPredict) + profile.stage_us(Stage::DensityCorrect),
        force_us = profile.stage_us(Stage::NonPressureForce) + profile.stage_us(Stage::PressureForce),
        "stage profile"
    );
    Ok(report)
}

/// Step until `config.end_time`, reporting every `config.report_interval`
/// of simulated time. Any engine error ends the run.
pub fn run<B: ComputeBackend>(
    engine: &mut SimulationEngine<B>,
    config: &RunConfig,
) -> Result<RunSummary, RunnerError> {
    let mut summary = RunSummary::default();
    let mut next_report = 0.0;

    while engine.time() < config.end_time {
        let profile = engine.step()?;
        summary.dropped += profile.dropped;

        if engine.time() >= next_report {
            summary.reports.push(report(engine)?);
            next_report += config.report_interval;
        }
    }

    summary.steps = engine.steps();
    summary.time = engine.time();
    summary.particles = engine.particle_count();
    info!(
        steps = summary.steps,
        t = summary.time,
        n = summary.particles,
        dropped = summary.dropped,
        "run finished"
    );
    Ok(summary)
}
