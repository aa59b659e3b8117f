//! Uniform spatial grid and the counting-sort rebuild.
//!
//! Cells have edge `1.1 H`. Cell `(cx, cy, cz)` has linear index
//! `cx + gx * (cy + gy * cz)`. The offsets array has one slot per cell plus a
//! trailing slot that collects every particle outside the grid; after the
//! exclusive scan, that slot's start offset is the new live count, so such
//! particles are scattered past N and dropped.

use tracing::{debug, warn};

use crate::constants::SimulationConstants;
use crate::device::{launch, BufferRole, ComputeBackend, HostInvocation, Kernel, KernelArg};
use crate::error::{AtPhase, DeviceError, EngineError};
use crate::particle::{Attribute, ParticleStore, Real, Real3, Reordered};
use crate::pipeline::Stage;
use crate::scan::scan_device;

/// Geometry of the uniform grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    origin: [Real; 3],
    inv_cell: Real,
    dims: [i32; 3],
}

impl GridLayout {
    /// Grid of `dims` cells of edge `cell_size` starting at `origin`.
    pub fn new(origin: [Real; 3], cell_size: Real, dims: [i32; 3]) -> Self {
        Self {
            origin,
            inv_cell: 1.0 / cell_size,
            dims,
        }
    }

    /// Layout of the grid described by `constants`.
    pub fn from_constants(constants: &SimulationConstants) -> Self {
        Self {
            origin: constants.min_bound(),
            inv_cell: constants.grid_inv_h(),
            dims: constants.grid_size(),
        }
    }

    /// Dimensions in cells.
    pub fn dims(&self) -> [i32; 3] {
        self.dims
    }

    /// Number of cells, excluding the trailing out-of-grid slot.
    pub fn cell_count(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Integer cell coordinate of `position`. May lie outside the grid.
    pub fn coord_of(&self, position: &Real3) -> [i32; 3] {
        let mut coord = [0i32; 3];
        for axis in 0..3 {
            coord[axis] = ((position[axis] - self.origin[axis]) * self.inv_cell).floor() as i32;
        }
        coord
    }

    /// Linear index of an in-grid coordinate.
    pub fn slot(&self, coord: [i32; 3]) -> Option<usize> {
        let [gx, gy, gz] = self.dims;
        let [cx, cy, cz] = coord;
        if cx < 0 || cy < 0 || cz < 0 || cx >= gx || cy >= gy || cz >= gz {
            return None;
        }
        let [cx, cy, cz] = [cx as usize, cy as usize, cz as usize];
        Some(cx + gx as usize * (cy + gy as usize * cz))
    }

    /// Counting-sort slot of `position`: its cell index, or
    /// [`cell_count`](Self::cell_count) if it lies outside the grid or is not
    /// finite.
    pub fn slot_of(&self, position: &Real3) -> usize {
        if position[..3].iter().any(|v| !v.is_finite()) {
            return self.cell_count();
        }
        self.slot(self.coord_of(position))
            .unwrap_or_else(|| self.cell_count())
    }
}

/// Outcome of one rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildOutcome {
    /// Live count after the rebuild.
    pub live: usize,
    /// Particles dropped for leaving the grid.
    pub dropped: usize,
}

/// Device arrays of the grid: per-cell offsets and per-particle cell /
/// local indices.
pub struct GridIndex<B> {
    layout: GridLayout,
    cell_offsets: B,
    cell_index: B,
    local_index: B,
}

impl<B> GridIndex<B> {
    /// Allocate grid arrays for `capacity` particles.
    pub fn allocate<C>(
        backend: &mut C,
        constants: &SimulationConstants,
        capacity: usize,
    ) -> Result<Self, DeviceError>
    where
        C: ComputeBackend<Buffer = B>,
    {
        let layout = GridLayout::from_constants(constants);
        let word = std::mem::size_of::<u32>() as u64;
        let slots = capacity.max(1) as u64;
        Ok(Self {
            layout,
            cell_offsets: backend.create_buffer(
                "cell_offsets",
                BufferRole::Storage,
                (layout.cell_count() as u64 + 1) * word,
            )?,
            cell_index: backend.create_buffer("cell_index", BufferRole::Storage, slots * word)?,
            local_index: backend.create_buffer("local_index", BufferRole::Storage, slots * word)?,
        })
    }

    /// Grid geometry.
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Per-cell start offsets (`cell_count + 1` entries).
    pub fn cell_offsets(&self) -> &B {
        &self.cell_offsets
    }

    /// Reorder every carried attribute into cell order.
    ///
    /// Runs the count pass, scans the counts on the host, and scatters each
    /// attribute in [`Reordered::ALL`] through its pong buffer.
    pub fn rebuild<C>(
        &mut self,
        backend: &mut C,
        store: &mut ParticleStore<B>,
        constants: &SimulationConstants,
        constants_buffer: &B,
        extent: u32,
    ) -> Result<RebuildOutcome, EngineError>
    where
        C: ComputeBackend<Buffer = B>,
    {
        let phase = Stage::GridRebuild.name();
        let n = constants.particle_count();
        let slots = self.layout.cell_count() + 1;

        backend
            .clear_buffer(&self.cell_offsets, 0, (slots * std::mem::size_of::<u32>()) as u64)
            .at(phase)?;
        launch(
            backend,
            Kernel::GridCount,
            &[
                KernelArg::Buffer(constants_buffer),
                KernelArg::Buffer(&self.cell_offsets),
                KernelArg::Buffer(&self.local_index),
                KernelArg::Buffer(store.buffer(Attribute::Position)),
                KernelArg::Buffer(&self.cell_index),
            ],
            extent,
        )
        .at(phase)?;

        let totals = scan_device(backend, &self.cell_offsets, slots).at(phase)?;
        let live = totals.last_offset as usize;
        let counted = totals.total as usize;
        if counted != n {
            return Err(EngineError::Device {
                phase,
                source: DeviceError::Launch {
                    kernel: Kernel::GridCount,
                    message: format!("binned {counted} particles, expected {n}"),
                },
            });
        }
        let dropped = n - live;
        if dropped > 0 {
            warn!(dropped, live, "particles left the grid and were dropped");
        }

        for attr in Reordered::ALL {
            let element = attr.attribute().element();
            let (source, destination) = store.scatter_pair(attr);
            launch(
                backend,
                Kernel::GridScatter,
                &[
                    KernelArg::Buffer(constants_buffer),
                    KernelArg::Buffer(&self.cell_offsets),
                    KernelArg::Buffer(&self.local_index),
                    KernelArg::Buffer(&self.cell_index),
                    KernelArg::Buffer(source),
                    KernelArg::Buffer(destination),
                    KernelArg::Uint(element.words()),
                ],
                extent,
            )
            .at(phase)?;
            store.exchange(attr);
        }

        debug!(n, live, cells = slots - 1, "grid rebuilt");
        Ok(RebuildOutcome { live, dropped })
    }
}

/// Host implementation of `grid_count`.
pub(crate) fn host_grid_count(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let constants = inv.constants()?;
    let layout = GridLayout::from_constants(&constants);
    let n = constants.particle_count();

    let mut counts: Vec<u32> = inv.read(1)?;
    let mut local: Vec<u32> = inv.read(2)?;
    let position: Vec<Real3> = inv.read(3)?;
    let mut cell: Vec<u32> = inv.read(4)?;

    for i in inv.lanes(n) {
        let slot = layout.slot_of(&position[i]);
        local[i] = counts[slot];
        counts[slot] += 1;
        cell[i] = slot as u32;
    }

    inv.write(1, &counts)?;
    inv.write(2, &local)?;
    inv.write(4, &cell)
}

/// Host implementation of `grid_scatter`.
pub(crate) fn host_grid_scatter(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let constants = inv.constants()?;
    let n = constants.particle_count();

    let offsets: Vec<u32> = inv.read(1)?;
    let local: Vec<u32> = inv.read(2)?;
    let cell: Vec<u32> = inv.read(3)?;
    let source: Vec<u32> = inv.read(4)?;
    let mut destination: Vec<u32> = inv.read(5)?;
    let words = inv.uint(6)? as usize;

    for i in inv.lanes(n) {
        let start = offsets
            .get(cell[i] as usize)
            .ok_or_else(|| inv.fail(format!("cell index {} out of range", cell[i])))?;
        let target = (*start + local[i]) as usize;
        let src = i * words..(i + 1) * words;
        let dst = target * words..(target + 1) * words;
        if dst.end > destination.len() || src.end > source.len() {
            return Err(inv.fail(format!("scatter of lane {i} to slot {target} out of range")));
        }
        destination[dst].copy_from_slice(&source[src]);
    }

    inv.write(5, &destination)
}
