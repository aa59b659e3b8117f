//! Bounded neighbor lists built from the cell-sorted particle order.
//!
//! Two passes over the 27 cells around each particle: the first counts
//! particles within H, the counts are scanned into offsets into one flat
//! array, and the second writes the ids. A particle's own id is part of its
//! list.

use tracing::debug;

use crate::constants::SimulationConstants;
use crate::device::{launch, BufferRole, ComputeBackend, HostInvocation, Kernel, KernelArg};
use crate::error::{AtPhase, CapacityError, DeviceError, EngineError};
use crate::grid::{GridIndex, GridLayout};
use crate::particle::{Attribute, ParticleStore, Real, Real3};
use crate::pipeline::Stage;
use crate::scan::scan_device;

/// True if `a` and `b` are at most `radius` apart.
#[inline]
pub fn within_radius(a: &Real3, b: &Real3, radius: Real) -> bool {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz <= radius * radius
}

/// Read-only view of a scanned cell-offset array over cell-sorted positions.
///
/// Cell `c` owns slots `offsets[c]..offsets[c + 1]`; the trailing entry holds
/// the live count.
pub struct CellRanges<'a> {
    layout: &'a GridLayout,
    offsets: &'a [u32],
}

impl<'a> CellRanges<'a> {
    /// Wrap `offsets`, which must hold `layout.cell_count() + 1` entries.
    pub fn new(layout: &'a GridLayout, offsets: &'a [u32]) -> Self {
        Self { layout, offsets }
    }

    /// Visit every particle within `radius` of particle `i`, including `i`.
    ///
    /// Cells are visited z-major over the 3x3x3 block, and particles in
    /// ascending slot order within each cell.
    pub fn for_each_neighbor<F>(&self, i: usize, positions: &[Real3], radius: Real, mut f: F)
    where
        F: FnMut(usize),
    {
        let p = &positions[i];
        let [cx, cy, cz] = self.layout.coord_of(p);
        for dz in -1i32..=1 {
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let Some(cell) = self.layout.slot([cx + dx, cy + dy, cz + dz]) else {
                        continue;
                    };
                    let start = self.offsets[cell] as usize;
                    let end = self.offsets[cell + 1] as usize;
                    for j in start..end {
                        if within_radius(p, &positions[j], radius) {
                            f(j);
                        }
                    }
                }
            }
        }
    }
}

/// Device arrays of the neighbor lists.
pub struct NeighborIndex<B> {
    offsets: B,
    list: B,
    max_neighbors: usize,
    built_for: Option<usize>,
}

impl<B> NeighborIndex<B> {
    /// Allocate `capacity + 1` offsets and `capacity x max_neighbors` ids.
    pub fn allocate<C>(
        backend: &mut C,
        capacity: usize,
        max_neighbors: usize,
    ) -> Result<Self, DeviceError>
    where
        C: ComputeBackend<Buffer = B>,
    {
        let word = std::mem::size_of::<u32>() as u64;
        let capacity = capacity.max(1) as u64;
        Ok(Self {
            offsets: backend.create_buffer(
                "neighbor_offsets",
                BufferRole::Storage,
                (capacity + 1) * word,
            )?,
            list: backend.create_buffer(
                "neighbors",
                BufferRole::Storage,
                capacity * max_neighbors as u64 * word,
            )?,
            max_neighbors,
            built_for: None,
        })
    }

    /// Per-particle offsets into [`list`](Self::list), N + 1 entries after a
    /// build.
    pub fn offsets(&self) -> &B {
        &self.offsets
    }

    /// Flat neighbor id array.
    pub fn list(&self) -> &B {
        &self.list
    }

    /// Particle count of the last completed build, if any.
    pub fn built_for(&self) -> Option<usize> {
        self.built_for
    }

    /// Count, scan, check and fill. Returns the total entry count MN.
    pub fn build<C>(
        &mut self,
        backend: &mut C,
        store: &ParticleStore<B>,
        grid: &GridIndex<B>,
        constants: &SimulationConstants,
        constants_buffer: &B,
        extent: u32,
    ) -> Result<usize, EngineError>
    where
        C: ComputeBackend<Buffer = B>,
    {
        let phase = Stage::NeighborBuild.name();
        let n = constants.particle_count();
        self.built_for = None;
        let position = store.buffer(Attribute::Position);
        let flags = store.buffer(Attribute::Flags);

        launch(
            backend,
            Kernel::NeighborCount,
            &[
                KernelArg::Buffer(constants_buffer),
                KernelArg::Buffer(grid.cell_offsets()),
                KernelArg::Buffer(position),
                KernelArg::Buffer(flags),
                KernelArg::Buffer(&self.offsets),
            ],
            extent,
        )
        .at(phase)?;

        let totals = scan_device(backend, &self.offsets, n + 1).at(phase)?;
        let total = totals.last_offset as usize;
        let limit = n * self.max_neighbors;
        if total > limit {
            return Err(CapacityError::NeighborOverflow {
                total,
                limit,
                particles: n,
                max_neighbors: self.max_neighbors,
            }
            .into());
        }

        launch(
            backend,
            Kernel::NeighborFill,
            &[
                KernelArg::Buffer(constants_buffer),
                KernelArg::Buffer(grid.cell_offsets()),
                KernelArg::Buffer(position),
                KernelArg::Buffer(flags),
                KernelArg::Buffer(&self.offsets),
                KernelArg::Buffer(&self.list),
            ],
            extent,
        )
        .at(phase)?;

        self.built_for = Some(n);
        debug!(n, total, "neighbor lists built");
        Ok(total)
    }
}

/// Host implementation of `neighbor_count`.
pub(crate) fn host_neighbor_count(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let constants = inv.constants()?;
    let layout = GridLayout::from_constants(&constants);
    let cell_offsets: Vec<u32> = inv.read(1)?;
    let position: Vec<Real3> = inv.read(2)?;
    let mut counts: Vec<u32> = inv.read(4)?;
    let ranges = CellRanges::new(&layout, &cell_offsets);

    for i in inv.lanes(constants.particle_count()) {
        let mut count = 0u32;
        ranges.for_each_neighbor(i, &position, constants.h(), |_| count += 1);
        counts[i] = count;
    }

    inv.write(4, &counts)
}

/// Host implementation of `neighbor_fill`.
pub(crate) fn host_neighbor_fill(inv: &mut HostInvocation<'_>) -> Result<(), DeviceError> {
    let constants = inv.constants()?;
    let layout = GridLayout::from_constants(&constants);
    let cell_offsets: Vec<u32> = inv.read(1)?;
    let position: Vec<Real3> = inv.read(2)?;
    let offsets: Vec<u32> = inv.read(4)?;
    let mut list: Vec<u32> = inv.read(5)?;
    let ranges = CellRanges::new(&layout, &cell_offsets);

    for i in inv.lanes(constants.particle_count()) {
        let mut cursor = offsets[i] as usize;
        let end = offsets[i + 1] as usize;
        let mut overrun = false;
        ranges.for_each_neighbor(i, &position, constants.h(), |j| {
            if cursor < end && cursor < list.len() {
                list[cursor] = j as u32;
                cursor += 1;
            } else {
                overrun = true;
            }
        });
        if overrun {
            return Err(inv.fail(format!("neighbor list of particle {i} overran its offset range")));
        }
    }

    inv.write(5, &list)
}
