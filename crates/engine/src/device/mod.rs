//! Compute backend abstraction.
//!
//! A kernel is bound once by name and fixed argument schema
//! ([`ComputeBackend::prepare`]) and then invoked with an argument list and a
//! dispatch extent ([`ComputeBackend::dispatch`]). The step pipeline depends
//! only on this trait; [`HostBackend`] runs kernels as Rust closures and the
//! wgpu backend (feature `gpu`) runs them as WGSL compute shaders.

mod host;

pub use host::{HostBackend, HostBuffer, HostInvocation, KernelFn, DISPATCH_LOG_CAPACITY};

use bytemuck::Pod;

use crate::error::DeviceError;
use crate::params::Precision;

/// How a buffer is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// The constants block (uniform).
    Constants,
    /// A particle, grid or neighbor array (storage).
    Storage,
}

/// Access mode of one kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The constants block.
    Constants,
    /// Read-only storage buffer.
    Read,
    /// Read-write storage buffer.
    ReadWrite,
    /// A 32-bit scalar passed by value.
    Uint,
}

/// One entry of a kernel's parameter schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    /// Parameter name, as used in kernel source.
    pub name: &'static str,
    /// Access mode.
    pub access: Access,
}

const fn p(name: &'static str, access: Access) -> Param {
    Param { name, access }
}

use Access::{Constants as C, Read as R, ReadWrite as RW, Uint as U};

const GRID_COUNT: &[Param] = &[
    p("constants", C),
    p("cell_counts", RW),
    p("local_index", RW),
    p("position", R),
    p("cell_index", RW),
];

const GRID_SCATTER: &[Param] = &[
    p("constants", C),
    p("cell_offsets", R),
    p("local_index", R),
    p("cell_index", R),
    p("source", R),
    p("destination", RW),
    p("element_words", U),
];

const NEIGHBOR_COUNT: &[Param] = &[
    p("constants", C),
    p("cell_offsets", R),
    p("position", R),
    p("flags", R),
    p("neighbor_counts", RW),
];

const NEIGHBOR_FILL: &[Param] = &[
    p("constants", C),
    p("cell_offsets", R),
    p("position", R),
    p("flags", R),
    p("neighbor_offsets", R),
    p("neighbors", RW),
];

const DENSITY: &[Param] = &[
    p("constants", C),
    p("neighbor_offsets", R),
    p("neighbors", R),
    p("position", R),
    p("density", RW),
    p("volume", RW),
    p("flags", R),
];

const NON_PRESSURE_FORCE: &[Param] = &[
    p("constants", C),
    p("neighbor_offsets", R),
    p("neighbors", R),
    p("position", R),
    p("density", R),
    p("velocity", R),
    p("flags", R),
    p("non_pressure_force", RW),
    p("volume", R),
];

const PRESSURE: &[Param] = &[
    p("constants", C),
    p("density", R),
    p("flags", R),
    p("pressure", RW),
];

const PRESSURE_FORCE: &[Param] = &[
    p("constants", C),
    p("neighbor_offsets", R),
    p("neighbors", R),
    p("position", R),
    p("density", R),
    p("pressure", R),
    p("flags", R),
    p("pressure_force", RW),
    p("volume", R),
];

const ADVECT_PREDICTOR: &[Param] = &[
    p("constants", C),
    p("flags", R),
    p("smoothed_velocity", RW),
    p("position", RW),
    p("velocity", RW),
    p("density", R),
    p("non_pressure_force", R),
];

const ADVECT_CORRECTOR: &[Param] = &[
    p("constants", C),
    p("flags", R),
    p("smoothed_velocity", RW),
    p("position", RW),
    p("velocity", RW),
    p("density", R),
    p("pressure_force", R),
];

/// The ten kernels the engine dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Bin particles into cells; count per cell.
    GridCount,
    /// Scatter one attribute into cell order.
    GridScatter,
    /// Count neighbors within H.
    NeighborCount,
    /// Write neighbor ids.
    NeighborFill,
    /// Density and volume.
    Density,
    /// Viscous and body forces.
    NonPressureForce,
    /// Equation of state.
    Pressure,
    /// Pressure gradient force.
    PressureForce,
    /// Predictor integration.
    AdvectPredictor,
    /// Corrector integration.
    AdvectCorrector,
}

impl Kernel {
    /// Every kernel, spatial kernels first.
    pub const ALL: [Kernel; 10] = [
        Kernel::GridCount,
        Kernel::GridScatter,
        Kernel::NeighborCount,
        Kernel::NeighborFill,
        Kernel::Density,
        Kernel::NonPressureForce,
        Kernel::Pressure,
        Kernel::PressureForce,
        Kernel::AdvectPredictor,
        Kernel::AdvectCorrector,
    ];

    /// Entry point name.
    pub const fn name(self) -> &'static str {
        match self {
            Kernel::GridCount => "grid_count",
            Kernel::GridScatter => "grid_scatter",
            Kernel::NeighborCount => "neighbor_count",
            Kernel::NeighborFill => "neighbor_fill",
            Kernel::Density => "density",
            Kernel::NonPressureForce => "nonpressure_force",
            Kernel::Pressure => "pressure",
            Kernel::PressureForce => "pressure_force",
            Kernel::AdvectPredictor => "advect_predictor",
            Kernel::AdvectCorrector => "advect_corrector",
        }
    }

    /// Ordered parameter schema.
    pub const fn params(self) -> &'static [Param] {
        match self {
            Kernel::GridCount => GRID_COUNT,
            Kernel::GridScatter => GRID_SCATTER,
            Kernel::NeighborCount => NEIGHBOR_COUNT,
            Kernel::NeighborFill => NEIGHBOR_FILL,
            Kernel::Density => DENSITY,
            Kernel::NonPressureForce => NON_PRESSURE_FORCE,
            Kernel::Pressure => PRESSURE,
            Kernel::PressureForce => PRESSURE_FORCE,
            Kernel::AdvectPredictor => ADVECT_PREDICTOR,
            Kernel::AdvectCorrector => ADVECT_CORRECTOR,
        }
    }

    /// True for the grid and neighbor kernels, which backends ship built in.
    /// The rest are numeric kernels supplied by the caller.
    pub const fn is_spatial(self) -> bool {
        matches!(
            self,
            Kernel::GridCount | Kernel::GridScatter | Kernel::NeighborCount | Kernel::NeighborFill
        )
    }

    /// Check an argument list against the schema.
    pub fn check_args<B>(self, args: &[KernelArg<'_, B>]) -> Result<(), DeviceError> {
        let params = self.params();
        if args.len() != params.len() {
            return Err(DeviceError::Signature {
                kernel: self,
                reason: format!("expected {} arguments, got {}", params.len(), args.len()),
            });
        }
        for (param, arg) in params.iter().zip(args) {
            let ok = matches!(
                (param.access, arg),
                (Access::Uint, KernelArg::Uint(_))
                    | (Access::Constants | Access::Read | Access::ReadWrite, KernelArg::Buffer(_))
            );
            if !ok {
                return Err(DeviceError::Signature {
                    kernel: self,
                    reason: format!("argument `{}` expects {:?}", param.name, param.access),
                });
            }
        }
        Ok(())
    }
}

/// One bound kernel argument.
#[derive(Debug)]
pub enum KernelArg<'a, B> {
    /// A device buffer.
    Buffer(&'a B),
    /// A 32-bit scalar.
    Uint(u32),
}

/// A device that owns buffers and runs kernels over them.
///
/// Operations are issued in order on a single queue. The engine calls
/// [`finish`](ComputeBackend::finish) after every dispatch.
pub trait ComputeBackend {
    /// Buffer handle. Exclusively owned by whoever created it.
    type Buffer;

    /// Human-readable device description.
    fn describe(&self) -> String;

    /// Whether kernels can run at `precision`.
    fn supports_precision(&self, precision: Precision) -> bool;

    /// Allocate a zero-initialized buffer of `size` bytes.
    fn create_buffer(
        &mut self,
        label: &str,
        role: BufferRole,
        size: u64,
    ) -> Result<Self::Buffer, DeviceError>;

    /// Copy `data` into `buffer` at byte `offset`.
    fn write_buffer(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    /// Copy `len` bytes at byte `offset` back to the host. Blocks.
    fn read_buffer(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, DeviceError>;

    /// Zero `len` bytes at byte `offset`.
    fn clear_buffer(&mut self, buffer: &Self::Buffer, offset: u64, len: u64)
        -> Result<(), DeviceError>;

    /// Bind `kernel` to its implementation. Idempotent.
    fn prepare(&mut self, kernel: Kernel) -> Result<(), DeviceError>;

    /// Launch `kernel` over `extent` lanes.
    fn dispatch(
        &mut self,
        kernel: Kernel,
        args: &[KernelArg<'_, Self::Buffer>],
        extent: u32,
    ) -> Result<(), DeviceError>;

    /// Block until every issued operation has completed.
    fn finish(&mut self) -> Result<(), DeviceError>;

    /// Typed [`write_buffer`](ComputeBackend::write_buffer) starting at
    /// element `first`.
    fn write_slice<T: Pod>(
        &mut self,
        buffer: &Self::Buffer,
        first: usize,
        data: &[T],
    ) -> Result<(), DeviceError>
    where
        Self: Sized,
    {
        if data.is_empty() {
            return Ok(());
        }
        let offset = (first * std::mem::size_of::<T>()) as u64;
        self.write_buffer(buffer, offset, bytemuck::cast_slice(data))
    }

    /// Typed [`read_buffer`](ComputeBackend::read_buffer) of `count` elements
    /// starting at element `first`.
    fn read_slice<T: Pod>(
        &mut self,
        buffer: &Self::Buffer,
        first: usize,
        count: usize,
    ) -> Result<Vec<T>, DeviceError>
    where
        Self: Sized,
    {
        if count == 0 {
            return Ok(Vec::new());
        }
        let size = std::mem::size_of::<T>();
        let bytes = self.read_buffer(buffer, (first * size) as u64, (count * size) as u64)?;
        Ok(cast_vec(&bytes))
    }
}

/// Copy bytes into a typed vector without assuming alignment.
pub(crate) fn cast_vec<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Validate, dispatch and wait.
pub(crate) fn launch<B: ComputeBackend>(
    backend: &mut B,
    kernel: Kernel,
    args: &[KernelArg<'_, B::Buffer>],
    extent: u32,
) -> Result<(), DeviceError> {
    kernel.check_args(args)?;
    backend.dispatch(kernel, args, extent)?;
    backend.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_start_with_constants() {
        for kernel in Kernel::ALL {
            let params = kernel.params();
            assert_eq!(params[0].access, Access::Constants, "{}", kernel.name());
            assert!(
                params.iter().any(|p| p.access == Access::ReadWrite),
                "{} writes nothing",
                kernel.name()
            );
        }
    }

    #[test]
    fn check_args_rejects_mismatch() {
        let buf = 0u8;
        let ok = [
            KernelArg::Buffer(&buf),
            KernelArg::Buffer(&buf),
            KernelArg::Buffer(&buf),
            KernelArg::Buffer(&buf),
        ];
        Kernel::Pressure.check_args(&ok).unwrap();

        let short = &ok[..3];
        assert!(matches!(
            Kernel::Pressure.check_args(short),
            Err(DeviceError::Signature { kernel: Kernel::Pressure, .. })
        ));

        let wrong = [
            KernelArg::Buffer(&buf),
            KernelArg::Uint(3),
            KernelArg::Buffer(&buf),
            KernelArg::Buffer(&buf),
        ];
        assert!(Kernel::Pressure.check_args(&wrong).is_err());
    }

    #[test]
    fn spatial_kernels() {
        let spatial: Vec<_> = Kernel::ALL.iter().filter(|k| k.is_spatial()).collect();
        assert_eq!(spatial.len(), 4);
        assert_eq!(Kernel::NonPressureForce.name(), "nonpressure_force");
    }
}
