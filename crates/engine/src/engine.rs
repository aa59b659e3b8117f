//! The simulation engine: owns every device buffer and drives the step
//! pipeline.

use std::time::Instant;

use tracing::{debug, info};

use crate::constants::{dispatch_extent, SimulationConstants};
use crate::device::{launch, BufferRole, ComputeBackend, Kernel, KernelArg};
use crate::error::{AtPhase, ConfigError, DeviceError, EngineError};
use crate::grid::{GridIndex, RebuildOutcome};
use crate::neighbor::NeighborIndex;
use crate::params::{Precision, SimulationParams};
use crate::particle::{
    xyz, Attribute, AttributeData, ElementType, ParticleFlags, ParticleInfo, ParticleStore, Real,
    Real3,
};
use crate::pipeline::{Stage, StepProfile};
use crate::waitlist::IngestionWaitlist;

const CONFIGURE: &str = "configure";
const READBACK: &str = "readback";

/// A configured SPH engine bound to one compute backend.
///
/// Construction allocates every array at capacity; nothing is reallocated
/// afterwards. N only grows through ingestion and only shrinks when a grid
/// rebuild drops particles that left the domain.
pub struct SimulationEngine<B: ComputeBackend> {
    backend: B,
    params: SimulationParams,
    pub(crate) constants: SimulationConstants,
    constants_buffer: B::Buffer,
    store: ParticleStore<B::Buffer>,
    grid: GridIndex<B::Buffer>,
    neighbors: NeighborIndex<B::Buffer>,
    waitlist: IngestionWaitlist,
    pub(crate) extent: u32,
    pub(crate) calibrated: bool,
    time: f64,
    steps: u64,
    last_profile: StepProfile,
}

impl<B: ComputeBackend> SimulationEngine<B> {
    /// Validate `params`, derive the constants, allocate every buffer and
    /// prepare all ten kernels on `backend`.
    pub fn configure(params: SimulationParams, mut backend: B) -> Result<Self, EngineError> {
        params.validate()?;
        if !backend.supports_precision(Precision::NATIVE) {
            return Err(ConfigError::UnsupportedPrecision {
                requested: Precision::NATIVE,
                device: backend.describe(),
            }
            .into());
        }

        let constants = SimulationConstants::from_params(&params);
        let capacity = params.max_particle_count;

        let constants_buffer = backend
            .create_buffer("constants", BufferRole::Constants, SimulationConstants::DEVICE_SIZE)
            .at(CONFIGURE)?;
        let store = ParticleStore::allocate(&mut backend, capacity).at(CONFIGURE)?;
        let grid = GridIndex::allocate(&mut backend, &constants, capacity).at(CONFIGURE)?;
        let neighbors =
            NeighborIndex::allocate(&mut backend, capacity, params.max_neighbors).at(CONFIGURE)?;
        for kernel in Kernel::ALL {
            backend.prepare(kernel).at(CONFIGURE)?;
        }

        let mut engine = Self {
            waitlist: IngestionWaitlist::new(params.ingest_batch_size),
            backend,
            params,
            constants,
            constants_buffer,
            store,
            grid,
            neighbors,
            extent: 0,
            calibrated: false,
            time: 0.0,
            steps: 0,
            last_profile: StepProfile::default(),
        };
        engine.sync_constants(CONFIGURE)?;

        info!(
            device = %engine.backend.describe(),
            precision = ?Precision::NATIVE,
            capacity,
            cells = engine.grid.layout().cell_count(),
            "engine configured"
        );
        engine.constants.log();
        Ok(engine)
    }

    /// Stage a particle. Flushes automatically once the batch is full.
    pub fn add_particle(&mut self, info: ParticleInfo) -> Result<(), EngineError> {
        if self.waitlist.push(&info) {
            self.flush()?;
        }
        Ok(())
    }

    /// Commit the staged batch. A no-op when nothing is pending.
    pub fn flush(&mut self) -> Result<(), EngineError> {
        let live = self.particle_count();
        let committed = self.waitlist.commit(&mut self.backend, &self.store, live)?;
        if committed != live {
            self.constants.set_particle_count(committed);
            self.sync_constants(Stage::Ingest.name())?;
        }
        Ok(())
    }

    /// Particles staged but not yet committed.
    pub fn pending(&self) -> usize {
        self.waitlist.len()
    }

    /// Advance one timestep.
    ///
    /// Fails with [`ConfigError::NotCalibrated`] until
    /// [`calibrate_mass`](Self::calibrate_mass) has run.
    pub fn step(&mut self) -> Result<&StepProfile, EngineError> {
        if !self.calibrated {
            return Err(ConfigError::NotCalibrated.into());
        }

        let started = Instant::now();
        let mut profile = StepProfile::default();
        let mut stage = Some(Stage::Ingest);
        while let Some(current) = stage {
            let t0 = Instant::now();
            self.run_stage(current, &mut profile)?;
            profile.record(current, t0.elapsed().as_micros() as u64);
            stage = current.next();
        }
        profile.total_us = started.elapsed().as_micros() as u64;

        self.time += self.constants.dt() as f64;
        self.steps += 1;
        self.last_profile = profile;
        Ok(&self.last_profile)
    }

    fn run_stage(&mut self, stage: Stage, profile: &mut StepProfile) -> Result<(), EngineError> {
        debug!(stage = stage.name(), n = self.particle_count(), "stage");
        match stage {
            Stage::Ingest => self.flush(),
            Stage::RecomputeDispatchExtent => {
                self.extent = dispatch_extent(self.particle_count());
                Ok(())
            }
            Stage::SyncConstants => self.sync_constants(stage.name()),
            Stage::GridRebuild => {
                profile.dropped = self.rebuild_grid()?.dropped;
                Ok(())
            }
            Stage::NeighborBuild => {
                profile.neighbor_entries = self.build_neighbors()?;
                Ok(())
            }
            _ => match stage.numeric_kernel() {
                Some(kernel) => self.run_numeric(stage, kernel),
                None => Ok(()),
            },
        }
    }

    pub(crate) fn sync_constants(&mut self, phase: &'static str) -> Result<(), EngineError> {
        self.backend
            .write_slice(&self.constants_buffer, 0, std::slice::from_ref(&self.constants))
            .at(phase)
    }

    /// Counting-sort rebuild, then publish the new N and dispatch extent.
    pub(crate) fn rebuild_grid(&mut self) -> Result<RebuildOutcome, EngineError> {
        let outcome = self.grid.rebuild(
            &mut self.backend,
            &mut self.store,
            &self.constants,
            &self.constants_buffer,
            self.extent,
        )?;
        self.constants.set_particle_count(outcome.live);
        self.sync_constants(Stage::GridRebuild.name())?;
        self.extent = dispatch_extent(outcome.live);
        Ok(outcome)
    }

    pub(crate) fn build_neighbors(&mut self) -> Result<usize, EngineError> {
        self.neighbors.build(
            &mut self.backend,
            &self.store,
            &self.grid,
            &self.constants,
            &self.constants_buffer,
            self.extent,
        )
    }

    /// Bind a numeric kernel's schema by parameter name and dispatch it.
    pub(crate) fn run_numeric(&mut self, stage: Stage, kernel: Kernel) -> Result<(), EngineError> {
        let phase = stage.name();
        let mut args = Vec::with_capacity(kernel.params().len());
        for param in kernel.params() {
            let buffer = bind(&self.store, &self.neighbors, &self.constants_buffer, param.name)
                .ok_or_else(|| DeviceError::Signature {
                    kernel,
                    reason: format!("no buffer for argument `{}`", param.name),
                })
                .at(phase)?;
            args.push(KernelArg::Buffer(buffer));
        }
        launch(&mut self.backend, kernel, &args, self.extent).at(phase)
    }

    /// Live particle count N.
    pub fn particle_count(&self) -> usize {
        self.constants.particle_count()
    }

    /// Current constants block.
    pub fn constants(&self) -> &SimulationConstants {
        &self.constants
    }

    /// Parameters the engine was configured with.
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Fixed timestep.
    pub fn dt(&self) -> Real {
        self.constants.dt()
    }

    /// Simulated time advanced so far.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Completed steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Lanes per dispatch: N rounded up to the workgroup multiple.
    pub fn dispatch_extent(&self) -> u32 {
        self.extent
    }

    /// Whether mass calibration has run.
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Profile of the last completed step.
    pub fn last_profile(&self) -> &StepProfile {
        &self.last_profile
    }

    /// The compute backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The compute backend, mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Copy the first N elements of `attr` back to the host.
    pub fn read_attribute(&mut self, attr: Attribute) -> Result<AttributeData, EngineError> {
        let n = self.particle_count();
        let buffer = self.store.buffer(attr);
        let data = match attr.element() {
            ElementType::Real3 => {
                AttributeData::Real3(self.backend.read_slice(buffer, 0, n).at(READBACK)?)
            }
            ElementType::Real => {
                AttributeData::Real(self.backend.read_slice(buffer, 0, n).at(READBACK)?)
            }
            ElementType::Int => {
                AttributeData::Int(self.backend.read_slice(buffer, 0, n).at(READBACK)?)
            }
        };
        Ok(data)
    }

    fn read_vectors(&mut self, attr: Attribute) -> Result<Vec<[Real; 3]>, EngineError> {
        let n = self.particle_count();
        let raw: Vec<Real3> = self
            .backend
            .read_slice(self.store.buffer(attr), 0, n)
            .at(READBACK)?;
        Ok(raw.iter().map(xyz).collect())
    }

    /// Positions of the live particles.
    pub fn positions(&mut self) -> Result<Vec<[Real; 3]>, EngineError> {
        self.read_vectors(Attribute::Position)
    }

    /// Velocities of the live particles.
    pub fn velocities(&mut self) -> Result<Vec<[Real; 3]>, EngineError> {
        self.read_vectors(Attribute::Velocity)
    }

    /// Densities of the live particles.
    pub fn densities(&mut self) -> Result<Vec<Real>, EngineError> {
        let n = self.particle_count();
        self.backend
            .read_slice(self.store.buffer(Attribute::Density), 0, n)
            .at(READBACK)
    }

    /// Flags of the live particles.
    pub fn flags(&mut self) -> Result<Vec<ParticleFlags>, EngineError> {
        let n = self.particle_count();
        self.backend
            .read_slice(self.store.buffer(Attribute::Flags), 0, n)
            .at(READBACK)
    }

    /// Color tags of the live particles.
    pub fn colors(&mut self) -> Result<Vec<i32>, EngineError> {
        let n = self.particle_count();
        self.backend
            .read_slice(self.store.buffer(Attribute::Color), 0, n)
            .at(READBACK)
    }

    /// Neighbor lists from the last neighbor build, one per particle live
    /// at that build. Ids index the particle order of that build; particles
    /// flushed since are not included. Empty before the first build.
    pub fn neighbor_lists(&mut self) -> Result<Vec<Vec<u32>>, EngineError> {
        let Some(n) = self.neighbors.built_for() else {
            return Ok(Vec::new());
        };
        let offsets: Vec<u32> = self
            .backend
            .read_slice(self.neighbors.offsets(), 0, n + 1)
            .at(READBACK)?;
        let total = offsets[n] as usize;
        let flat: Vec<u32> = self
            .backend
            .read_slice(self.neighbors.list(), 0, total)
            .at(READBACK)?;
        offsets
            .windows(2)
            .map(|w| {
                flat.get(w[0] as usize..w[1] as usize)
                    .map(<[u32]>::to_vec)
                    .ok_or_else(|| DeviceError::Readback("neighbor offsets are stale".into()))
                    .at(READBACK)
            })
            .collect()
    }
}

/// Buffer for a numeric kernel parameter, looked up by name.
fn bind<'a, Buf>(
    store: &'a ParticleStore<Buf>,
    neighbors: &'a NeighborIndex<Buf>,
    constants: &'a Buf,
    name: &str,
) -> Option<&'a Buf> {
    match name {
        "constants" => Some(constants),
        "neighbor_offsets" => Some(neighbors.offsets()),
        "neighbors" => Some(neighbors.list()),
        _ => Attribute::ALL
            .iter()
            .find(|attr| attr.label() == name)
            .map(|&attr| store.buffer(attr)),
    }
}
