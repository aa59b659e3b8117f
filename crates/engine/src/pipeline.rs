//! Step pipeline stages and the per-step profile.

use std::fmt;

use crate::device::Kernel;

/// One stage of [`SimulationEngine::step`](crate::SimulationEngine::step).
///
/// Stages run strictly in [`Stage::PIPELINE`] order; there is no branching
/// back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Flush the ingestion waitlist.
    Ingest,
    /// Round N up to the workgroup multiple.
    RecomputeDispatchExtent,
    /// Upload the constants block.
    SyncConstants,
    /// Count, scan and scatter into cell order.
    GridRebuild,
    /// Count, scan, check and fill neighbor lists.
    NeighborBuild,
    /// Density at the current state.
    DensityPredict,
    /// Viscous and body forces.
    NonPressureForce,
    /// Advance under non-pressure forces.
    PredictorAdvect,
    /// Density at the predicted state.
    DensityCorrect,
    /// Equation of state.
    Pressure,
    /// Pressure gradient force.
    PressureForce,
    /// Final advance under pressure forces.
    CorrectorAdvect,
}

impl Stage {
    /// Number of stages.
    pub const COUNT: usize = 12;

    /// Execution order.
    pub const PIPELINE: [Stage; Stage::COUNT] = [
        Stage::Ingest,
        Stage::RecomputeDispatchExtent,
        Stage::SyncConstants,
        Stage::GridRebuild,
        Stage::NeighborBuild,
        Stage::DensityPredict,
        Stage::NonPressureForce,
        Stage::PredictorAdvect,
        Stage::DensityCorrect,
        Stage::Pressure,
        Stage::PressureForce,
        Stage::CorrectorAdvect,
    ];

    /// Position in [`PIPELINE`](Self::PIPELINE).
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The following stage, or `None` once the step is complete.
    pub fn next(self) -> Option<Stage> {
        Stage::PIPELINE.get(self.index() + 1).copied()
    }

    /// Stage name used in logs and error phases.
    pub const fn name(self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::RecomputeDispatchExtent => "recompute_dispatch_extent",
            Stage::SyncConstants => "sync_constants",
            Stage::GridRebuild => "grid_rebuild",
            Stage::NeighborBuild => "neighbor_build",
            Stage::DensityPredict => "density_predict",
            Stage::NonPressureForce => "nonpressure_force",
            Stage::PredictorAdvect => "predictor_advect",
            Stage::DensityCorrect => "density_correct",
            Stage::Pressure => "pressure",
            Stage::PressureForce => "pressure_force",
            Stage::CorrectorAdvect => "corrector_advect",
        }
    }

    /// The numeric kernel this stage dispatches, if it is a numeric stage.
    pub const fn numeric_kernel(self) -> Option<Kernel> {
        match self {
            Stage::DensityPredict | Stage::DensityCorrect => Some(Kernel::Density),
            Stage::NonPressureForce => Some(Kernel::NonPressureForce),
            Stage::PredictorAdvect => Some(Kernel::AdvectPredictor),
            Stage::Pressure => Some(Kernel::Pressure),
            Stage::PressureForce => Some(Kernel::PressureForce),
            Stage::CorrectorAdvect => Some(Kernel::AdvectCorrector),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wall-clock timing of one step, per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepProfile {
    stage_us: [u64; Stage::COUNT],
    /// Whole step (microseconds).
    pub total_us: u64,
    /// Neighbor entries MN built this step.
    pub neighbor_entries: usize,
    /// Particles dropped by this step's grid rebuild.
    pub dropped: usize,
}

impl StepProfile {
    /// Time spent in `stage` (microseconds).
    pub fn stage_us(&self, stage: Stage) -> u64 {
        self.stage_us[stage.index()]
    }

    pub(crate) fn record(&mut self, stage: Stage, us: u64) {
        self.stage_us[stage.index()] = us;
    }

    /// Stages with their timings, in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, u64)> + '_ {
        Stage::PIPELINE.iter().map(|&s| (s, self.stage_us(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_is_linear() {
        let mut stage = Stage::Ingest;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            visited.push(next);
            stage = next;
        }
        assert_eq!(visited, Stage::PIPELINE.to_vec());
        assert_eq!(stage, Stage::CorrectorAdvect);
    }

    #[test]
    fn index_matches_order() {
        for (i, stage) in Stage::PIPELINE.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
    }

    #[test]
    fn density_runs_twice() {
        let density: Vec<Stage> = Stage::PIPELINE
            .iter()
            .copied()
            .filter(|s| s.numeric_kernel() == Some(Kernel::Density))
            .collect();
        assert_eq!(density, vec![Stage::DensityPredict, Stage::DensityCorrect]);
    }
}
