//! Particle data model: scalar types, flags, ingestion records and the
//! device-resident struct-of-arrays store.
//!
//! All arrays in [`ParticleStore`] are parallel: slot `i` in every buffer
//! refers to the same particle for the duration of one step. A grid rebuild
//! reorders the attributes listed in [`Reordered`] together, in one pass.

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::device::{BufferRole, ComputeBackend};
use crate::error::DeviceError;

/// Floating point type used on host and device.
#[cfg(not(feature = "double"))]
pub type Real = f32;
/// Floating point type used on host and device.
#[cfg(feature = "double")]
pub type Real = f64;

/// Device-side 3-vector. Padded to four lanes so the host layout matches a
/// `vec4<real>` / `vec3<real>` array stride on the device.
pub type Real3 = [Real; 4];

/// Pad a plain 3-vector to the device layout.
#[inline]
pub fn real3(v: [Real; 3]) -> Real3 {
    [v[0], v[1], v[2], 0.0]
}

/// Drop the padding lane.
#[inline]
pub fn xyz(v: &Real3) -> [Real; 3] {
    [v[0], v[1], v[2]]
}

/// Per-particle flag bitset, stored on the device as `i32`.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash,
    bytemuck::Pod, bytemuck::Zeroable, Serialize, Deserialize,
)]
pub struct ParticleFlags(i32);

impl ParticleFlags {
    /// Ordinary fluid particle.
    pub const NONE: ParticleFlags = ParticleFlags(0);
    /// Immovable boundary particle.
    pub const STATIC: ParticleFlags = ParticleFlags(1);
    /// Boundary particle that may be translated externally.
    pub const STATIC_MOVE: ParticleFlags = ParticleFlags(2);
    /// Excluded from force accumulation.
    pub const NO_FORCE: ParticleFlags = ParticleFlags(4);
    /// The usual wall particle: all three boundary bits.
    pub const BOUNDARY: ParticleFlags = ParticleFlags(1 | 2 | 4);

    /// Raw bits as stored on the device.
    pub const fn bits(self) -> i32 {
        self.0
    }

    /// Build from raw device bits.
    pub const fn from_bits(bits: i32) -> Self {
        ParticleFlags(bits)
    }

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: ParticleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Shorthand for `contains(STATIC)`.
    pub const fn is_static(self) -> bool {
        self.contains(ParticleFlags::STATIC)
    }
}

impl BitOr for ParticleFlags {
    type Output = ParticleFlags;

    fn bitor(self, rhs: ParticleFlags) -> ParticleFlags {
        ParticleFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ParticleFlags {
    fn bitor_assign(&mut self, rhs: ParticleFlags) {
        self.0 |= rhs.0;
    }
}

/// One particle awaiting ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParticleInfo {
    /// Position.
    pub position: [Real; 3],
    /// Velocity.
    pub velocity: [Real; 3],
    /// Smoothed (XSPH-style) velocity.
    pub smoothed_velocity: [Real; 3],
    /// Boundary / force flags.
    pub flags: ParticleFlags,
    /// Classification tag, not used by the physics.
    pub color: i32,
}

impl ParticleInfo {
    /// A resting fluid particle at `position` (color 1).
    pub fn fluid(position: [Real; 3]) -> Self {
        Self {
            position,
            color: 1,
            ..Default::default()
        }
    }

    /// A resting wall particle at `position` (color 0).
    pub fn boundary(position: [Real; 3]) -> Self {
        Self {
            position,
            flags: ParticleFlags::BOUNDARY,
            ..Default::default()
        }
    }

    /// Set both the velocity and the smoothed velocity.
    pub fn with_velocity(mut self, velocity: [Real; 3]) -> Self {
        self.velocity = velocity;
        self.smoothed_velocity = velocity;
        self
    }

    /// Override the color tag.
    pub fn with_color(mut self, color: i32) -> Self {
        self.color = color;
        self
    }
}

/// Element layout of a device array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// Padded 3-vector of `Real`.
    Real3,
    /// One `Real`.
    Real,
    /// One 32-bit integer.
    Int,
}

impl ElementType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            ElementType::Real3 => std::mem::size_of::<Real3>(),
            ElementType::Real => std::mem::size_of::<Real>(),
            ElementType::Int => std::mem::size_of::<i32>(),
        }
    }

    /// Size of one element in 32-bit words, as the scatter kernel copies it.
    pub const fn words(self) -> u32 {
        (self.size() / 4) as u32
    }
}

/// Every per-particle array of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Position (`Real3`).
    Position,
    /// Velocity (`Real3`).
    Velocity,
    /// Smoothed velocity (`Real3`).
    SmoothedVelocity,
    /// Flags (`Int`).
    Flags,
    /// Color tag (`Int`).
    Color,
    /// Density (`Real`).
    Density,
    /// Volume (`Real`).
    Volume,
    /// Pressure (`Real`).
    Pressure,
    /// Non-pressure force accumulator (`Real3`).
    NonPressureForce,
    /// Pressure force accumulator (`Real3`).
    PressureForce,
}

impl Attribute {
    /// All attributes, in allocation order.
    pub const ALL: [Attribute; 10] = [
        Attribute::Position,
        Attribute::Velocity,
        Attribute::SmoothedVelocity,
        Attribute::Flags,
        Attribute::Color,
        Attribute::Density,
        Attribute::Volume,
        Attribute::Pressure,
        Attribute::NonPressureForce,
        Attribute::PressureForce,
    ];

    /// Element layout of this attribute.
    pub const fn element(self) -> ElementType {
        match self {
            Attribute::Position
            | Attribute::Velocity
            | Attribute::SmoothedVelocity
            | Attribute::NonPressureForce
            | Attribute::PressureForce => ElementType::Real3,
            Attribute::Density | Attribute::Volume | Attribute::Pressure => ElementType::Real,
            Attribute::Flags | Attribute::Color => ElementType::Int,
        }
    }

    /// Buffer label.
    pub const fn label(self) -> &'static str {
        match self {
            Attribute::Position => "position",
            Attribute::Velocity => "velocity",
            Attribute::SmoothedVelocity => "smoothed_velocity",
            Attribute::Flags => "flags",
            Attribute::Color => "color",
            Attribute::Density => "density",
            Attribute::Volume => "volume",
            Attribute::Pressure => "pressure",
            Attribute::NonPressureForce => "non_pressure_force",
            Attribute::PressureForce => "pressure_force",
        }
    }
}

/// Attributes carried across steps, and therefore reordered by every grid
/// rebuild. The remaining attributes are recomputed each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reordered {
    /// Position.
    Position,
    /// Velocity.
    Velocity,
    /// Smoothed velocity.
    SmoothedVelocity,
    /// Flags.
    Flags,
    /// Color.
    Color,
}

impl Reordered {
    /// Scatter order used by the grid rebuild.
    pub const ALL: [Reordered; 5] = [
        Reordered::Position,
        Reordered::Velocity,
        Reordered::SmoothedVelocity,
        Reordered::Flags,
        Reordered::Color,
    ];

    /// The store attribute this refers to.
    pub const fn attribute(self) -> Attribute {
        match self {
            Reordered::Position => Attribute::Position,
            Reordered::Velocity => Attribute::Velocity,
            Reordered::SmoothedVelocity => Attribute::SmoothedVelocity,
            Reordered::Flags => Attribute::Flags,
            Reordered::Color => Attribute::Color,
        }
    }
}

/// Host copy of one attribute array.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeData {
    /// 3-vector attribute.
    Real3(Vec<Real3>),
    /// Scalar attribute.
    Real(Vec<Real>),
    /// Integer attribute.
    Int(Vec<i32>),
}

impl AttributeData {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            AttributeData::Real3(v) => v.len(),
            AttributeData::Real(v) => v.len(),
            AttributeData::Int(v) => v.len(),
        }
    }

    /// True if no elements were read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The 3-vector payload, if this is one.
    pub fn into_real3(self) -> Option<Vec<Real3>> {
        match self {
            AttributeData::Real3(v) => Some(v),
            _ => None,
        }
    }

    /// The scalar payload, if this is one.
    pub fn into_real(self) -> Option<Vec<Real>> {
        match self {
            AttributeData::Real(v) => Some(v),
            _ => None,
        }
    }

    /// The integer payload, if this is one.
    pub fn into_int(self) -> Option<Vec<i32>> {
        match self {
            AttributeData::Int(v) => Some(v),
            _ => None,
        }
    }
}

/// Device-resident particle arrays, allocated once at capacity.
///
/// Two scratch ("pong") buffers, one per reordered element width, back the
/// counting-sort scatter. After each scatter the live array and its pong
/// exchange ownership, so the pong never holds authoritative data outside a
/// rebuild.
pub struct ParticleStore<B> {
    position: B,
    velocity: B,
    smoothed_velocity: B,
    flags: B,
    color: B,
    density: B,
    volume: B,
    pressure: B,
    non_pressure_force: B,
    pressure_force: B,
    real3_pong: B,
    int_pong: B,
    capacity: usize,
}

impl<B> ParticleStore<B> {
    /// Allocate every array for `capacity` particles.
    pub fn allocate<C>(backend: &mut C, capacity: usize) -> Result<Self, DeviceError>
    where
        C: ComputeBackend<Buffer = B>,
    {
        let slots = capacity.max(1) as u64;
        let mut alloc = |attr: Attribute| {
            backend.create_buffer(
                attr.label(),
                BufferRole::Storage,
                slots * attr.element().size() as u64,
            )
        };
        let position = alloc(Attribute::Position)?;
        let velocity = alloc(Attribute::Velocity)?;
        let smoothed_velocity = alloc(Attribute::SmoothedVelocity)?;
        let flags = alloc(Attribute::Flags)?;
        let color = alloc(Attribute::Color)?;
        let density = alloc(Attribute::Density)?;
        let volume = alloc(Attribute::Volume)?;
        let pressure = alloc(Attribute::Pressure)?;
        let non_pressure_force = alloc(Attribute::NonPressureForce)?;
        let pressure_force = alloc(Attribute::PressureForce)?;

        let real3_pong = backend.create_buffer(
            "real3_pong",
            BufferRole::Storage,
            slots * ElementType::Real3.size() as u64,
        )?;
        let int_pong = backend.create_buffer(
            "int_pong",
            BufferRole::Storage,
            slots * ElementType::Int.size() as u64,
        )?;

        Ok(Self {
            position,
            velocity,
            smoothed_velocity,
            flags,
            color,
            density,
            volume,
            pressure,
            non_pressure_force,
            pressure_force,
            real3_pong,
            int_pong,
            capacity,
        })
    }

    /// Maximum number of particles.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current authoritative buffer for `attr`.
    pub fn buffer(&self, attr: Attribute) -> &B {
        match attr {
            Attribute::Position => &self.position,
            Attribute::Velocity => &self.velocity,
            Attribute::SmoothedVelocity => &self.smoothed_velocity,
            Attribute::Flags => &self.flags,
            Attribute::Color => &self.color,
            Attribute::Density => &self.density,
            Attribute::Volume => &self.volume,
            Attribute::Pressure => &self.pressure,
            Attribute::NonPressureForce => &self.non_pressure_force,
            Attribute::PressureForce => &self.pressure_force,
        }
    }

    /// Live buffer and the scratch buffer it scatters into.
    pub(crate) fn scatter_pair(&self, attr: Reordered) -> (&B, &B) {
        match attr {
            Reordered::Position => (&self.position, &self.real3_pong),
            Reordered::Velocity => (&self.velocity, &self.real3_pong),
            Reordered::SmoothedVelocity => (&self.smoothed_velocity, &self.real3_pong),
            Reordered::Flags => (&self.flags, &self.int_pong),
            Reordered::Color => (&self.color, &self.int_pong),
        }
    }

    /// Make the freshly scattered scratch buffer authoritative for `attr`.
    pub(crate) fn exchange(&mut self, attr: Reordered) {
        let (live, pong) = match attr {
            Reordered::Position => (&mut self.position, &mut self.real3_pong),
            Reordered::Velocity => (&mut self.velocity, &mut self.real3_pong),
            Reordered::SmoothedVelocity => (&mut self.smoothed_velocity, &mut self.real3_pong),
            Reordered::Flags => (&mut self.flags, &mut self.int_pong),
            Reordered::Color => (&mut self.color, &mut self.int_pong),
        };
        std::mem::swap(live, pong);
    }
}
