//! Grid-sorted SPH particle engine.
//!
//! The engine keeps fluid and boundary particles in device-resident parallel
//! arrays, rebuilds a uniform grid every step with a counting sort, builds
//! bounded neighbor lists from that grid, and drives a predictor-corrector
//! pipeline of numeric kernels over them. The numeric kernels themselves are
//! supplied by the caller; the engine owns ordering, data dependencies and
//! buffer lifetimes.
//!
//! # Modules
//! - [`params`] -- Host configuration surface (`SimulationParams`).
//! - [`constants`] -- POD constants block mirrored into a uniform buffer.
//! - [`particle`] -- Scalar types, flags and the struct-of-arrays store.
//! - [`waitlist`] -- Batched particle ingestion with a hard capacity.
//! - [`scan`] -- Exclusive prefix sum.
//! - [`grid`] -- Uniform grid and counting-sort reorder.
//! - [`neighbor`] -- Two-pass bounded neighbor lists.
//! - [`pipeline`] -- Step stages and the step profile.
//! - [`mass`] -- One-shot mass calibration.
//! - [`device`] -- Compute backend trait, kernel schemas and the host backend.
//! - `gpu` -- wgpu compute backend (feature `gpu`).

#![warn(missing_docs)]

pub mod constants;
pub mod device;
pub mod engine;
pub mod error;
pub mod grid;
pub mod mass;
pub mod neighbor;
pub mod params;
pub mod particle;
pub mod pipeline;
pub mod scan;
pub mod waitlist;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use constants::{dispatch_extent, SimulationConstants, WORKGROUP_MULTIPLE};
pub use device::{
    Access, BufferRole, ComputeBackend, HostBackend, HostBuffer, HostInvocation, Kernel,
    KernelArg, Param, DISPATCH_LOG_CAPACITY,
};
pub use engine::SimulationEngine;
pub use error::{CapacityError, ConfigError, DeviceError, EngineError};
pub use grid::GridLayout;
pub use params::{Precision, SimulationParams};
pub use particle::{
    Attribute, AttributeData, ElementType, ParticleFlags, ParticleInfo, Real, Real3,
};
pub use pipeline::{Stage, StepProfile};

#[cfg(feature = "gpu")]
pub use gpu::WgpuBackend;
