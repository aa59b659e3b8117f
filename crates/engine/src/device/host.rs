//! Host (CPU) reference backend.
//!
//! Buffers are byte vectors and kernels are Rust closures keyed by
//! [`Kernel`]. Each lane loop runs sequentially, so counting passes are
//! deterministic: within a cell, particles keep their pre-sort order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;

use bytemuck::Pod;
use tracing::debug;

use super::{cast_vec, Access, BufferRole, ComputeBackend, Kernel, KernelArg};
use crate::constants::SimulationConstants;
use crate::error::DeviceError;
use crate::params::Precision;

/// Host kernel implementation.
pub type KernelFn = Box<dyn FnMut(&mut HostInvocation<'_>) -> Result<(), DeviceError>>;

/// Handle to a host buffer.
#[derive(Debug)]
pub struct HostBuffer {
    slot: usize,
    size: u64,
}

impl HostBuffer {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

enum Bound {
    Buffer(usize),
    Uint(u32),
}

/// Arguments of one host dispatch, as seen by a kernel.
///
/// Buffers are copied in with [`read`](Self::read) and written back whole
/// with [`write`](Self::write). Writes to parameters not declared
/// `ReadWrite` are rejected.
pub struct HostInvocation<'a> {
    kernel: Kernel,
    extent: u32,
    bound: Vec<Bound>,
    memory: &'a mut [Vec<u8>],
}

impl HostInvocation<'_> {
    /// Kernel being run.
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Dispatch extent.
    pub fn extent(&self) -> u32 {
        self.extent
    }

    /// Lanes that fall below both the extent and `n`.
    pub fn lanes(&self, n: usize) -> Range<usize> {
        0..n.min(self.extent as usize)
    }

    fn slot(&self, index: usize) -> Result<usize, DeviceError> {
        match self.bound.get(index) {
            Some(Bound::Buffer(slot)) => Ok(*slot),
            _ => Err(DeviceError::Signature {
                kernel: self.kernel,
                reason: format!("argument {index} is not a buffer"),
            }),
        }
    }

    /// The constants block (argument 0).
    pub fn constants(&self) -> Result<SimulationConstants, DeviceError> {
        let slot = self.slot(0)?;
        let bytes = &self.memory[slot];
        let size = std::mem::size_of::<SimulationConstants>();
        if bytes.len() < size {
            return Err(DeviceError::Launch {
                kernel: self.kernel,
                message: "constants buffer too small".to_string(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
    }

    /// Copy of the whole buffer bound at `index`.
    pub fn read<T: Pod>(&self, index: usize) -> Result<Vec<T>, DeviceError> {
        let slot = self.slot(index)?;
        Ok(cast_vec(&self.memory[slot]))
    }

    /// Overwrite the start of the buffer bound at `index` with `data`.
    pub fn write<T: Pod>(&mut self, index: usize, data: &[T]) -> Result<(), DeviceError> {
        let access = self.kernel.params().get(index).map(|p| p.access);
        if access != Some(Access::ReadWrite) {
            return Err(DeviceError::AccessViolation {
                kernel: self.kernel,
                index,
            });
        }
        let slot = self.slot(index)?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let target = &mut self.memory[slot];
        if bytes.len() > target.len() {
            return Err(DeviceError::OutOfRange {
                label: self.kernel.params()[index].name.to_string(),
                offset: 0,
                len: bytes.len() as u64,
                size: target.len() as u64,
            });
        }
        target[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Scalar argument at `index`.
    pub fn uint(&self, index: usize) -> Result<u32, DeviceError> {
        match self.bound.get(index) {
            Some(Bound::Uint(value)) => Ok(*value),
            _ => Err(DeviceError::Signature {
                kernel: self.kernel,
                reason: format!("argument {index} is not a scalar"),
            }),
        }
    }

    /// Launch error for this kernel, for kernels that detect corrupt input.
    pub fn fail(&self, message: impl Into<String>) -> DeviceError {
        DeviceError::Launch {
            kernel: self.kernel,
            message: message.into(),
        }
    }
}

/// Dispatches remembered by [`HostBackend::dispatch_log`]; older entries are
/// discarded.
pub const DISPATCH_LOG_CAPACITY: usize = 256;

/// CPU backend. The spatial kernels are registered at construction; numeric
/// kernels are supplied with [`register`](Self::register).
pub struct HostBackend {
    memory: Vec<Vec<u8>>,
    labels: Vec<String>,
    kernels: HashMap<Kernel, KernelFn>,
    prepared: HashSet<Kernel>,
    dispatch_log: VecDeque<Kernel>,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    /// Backend with the four spatial kernels installed.
    pub fn new() -> Self {
        let mut backend = Self {
            memory: Vec::new(),
            labels: Vec::new(),
            kernels: HashMap::new(),
            prepared: HashSet::new(),
            dispatch_log: VecDeque::with_capacity(DISPATCH_LOG_CAPACITY),
        };
        backend.register(Kernel::GridCount, crate::grid::host_grid_count);
        backend.register(Kernel::GridScatter, crate::grid::host_grid_scatter);
        backend.register(Kernel::NeighborCount, crate::neighbor::host_neighbor_count);
        backend.register(Kernel::NeighborFill, crate::neighbor::host_neighbor_fill);
        backend
    }

    /// Install or replace the implementation of `kernel`.
    pub fn register<F>(&mut self, kernel: Kernel, f: F)
    where
        F: FnMut(&mut HostInvocation<'_>) -> Result<(), DeviceError> + 'static,
    {
        self.prepared.remove(&kernel);
        self.kernels.insert(kernel, Box::new(f));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_kernel<F>(mut self, kernel: Kernel, f: F) -> Self
    where
        F: FnMut(&mut HostInvocation<'_>) -> Result<(), DeviceError> + 'static,
    {
        self.register(kernel, f);
        self
    }

    /// The most recent dispatches, oldest first, at most
    /// [`DISPATCH_LOG_CAPACITY`].
    pub fn dispatch_log(&self) -> Vec<Kernel> {
        self.dispatch_log.iter().copied().collect()
    }

    /// Forget the dispatch history.
    pub fn clear_dispatch_log(&mut self) {
        self.dispatch_log.clear();
    }

    fn check_range(&self, buffer: &HostBuffer, offset: u64, len: u64) -> Result<(), DeviceError> {
        match offset.checked_add(len) {
            Some(end) if end <= buffer.size => Ok(()),
            _ => Err(DeviceError::OutOfRange {
                label: self.labels[buffer.slot].clone(),
                offset,
                len,
                size: buffer.size,
            }),
        }
    }
}

impl ComputeBackend for HostBackend {
    type Buffer = HostBuffer;

    fn describe(&self) -> String {
        "host reference backend".to_string()
    }

    fn supports_precision(&self, _precision: Precision) -> bool {
        true
    }

    fn create_buffer(
        &mut self,
        label: &str,
        _role: BufferRole,
        size: u64,
    ) -> Result<HostBuffer, DeviceError> {
        let slot = self.memory.len();
        self.memory.push(vec![0u8; size as usize]);
        self.labels.push(label.to_string());
        Ok(HostBuffer { slot, size })
    }

    fn write_buffer(
        &mut self,
        buffer: &HostBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.check_range(buffer, offset, data.len() as u64)?;
        let start = offset as usize;
        self.memory[buffer.slot][start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: &HostBuffer,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, DeviceError> {
        self.check_range(buffer, offset, len)?;
        let start = offset as usize;
        Ok(self.memory[buffer.slot][start..start + len as usize].to_vec())
    }

    fn clear_buffer(
        &mut self,
        buffer: &HostBuffer,
        offset: u64,
        len: u64,
    ) -> Result<(), DeviceError> {
        self.check_range(buffer, offset, len)?;
        let start = offset as usize;
        self.memory[buffer.slot][start..start + len as usize].fill(0);
        Ok(())
    }

    fn prepare(&mut self, kernel: Kernel) -> Result<(), DeviceError> {
        if !self.kernels.contains_key(&kernel) {
            return Err(DeviceError::MissingKernel(kernel));
        }
        self.prepared.insert(kernel);
        Ok(())
    }

    fn dispatch(
        &mut self,
        kernel: Kernel,
        args: &[KernelArg<'_, HostBuffer>],
        extent: u32,
    ) -> Result<(), DeviceError> {
        if !self.prepared.contains(&kernel) {
            return Err(DeviceError::MissingKernel(kernel));
        }
        kernel.check_args(args)?;
        let bound = args
            .iter()
            .map(|arg| match arg {
                KernelArg::Buffer(buffer) => Bound::Buffer(buffer.slot),
                KernelArg::Uint(value) => Bound::Uint(*value),
            })
            .collect();

        let f = self
            .kernels
            .get_mut(&kernel)
            .ok_or(DeviceError::MissingKernel(kernel))?;
        let mut invocation = HostInvocation {
            kernel,
            extent,
            bound,
            memory: &mut self.memory,
        };
        debug!(kernel = kernel.name(), extent, "host dispatch");
        f(&mut invocation)?;
        if self.dispatch_log.len() == DISPATCH_LOG_CAPACITY {
            self.dispatch_log.pop_front();
        }
        self.dispatch_log.push_back(kernel);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}
