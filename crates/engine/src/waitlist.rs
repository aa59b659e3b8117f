//! Host-side staging of new particles.

use tracing::debug;

use crate::device::ComputeBackend;
use crate::error::{AtPhase, CapacityError, EngineError};
use crate::particle::{real3, Attribute, ParticleFlags, ParticleInfo, ParticleStore, Real3};
use crate::pipeline::Stage;

/// Batch of particles waiting for one bulk write into the store.
#[derive(Debug, Default)]
pub struct IngestionWaitlist {
    position: Vec<Real3>,
    velocity: Vec<Real3>,
    smoothed_velocity: Vec<Real3>,
    flags: Vec<ParticleFlags>,
    color: Vec<i32>,
    max_batch: usize,
}

impl IngestionWaitlist {
    /// Empty waitlist that asks to be flushed at `max_batch` entries.
    pub fn new(max_batch: usize) -> Self {
        Self {
            max_batch,
            ..Default::default()
        }
    }

    /// Pending particles.
    pub fn len(&self) -> usize {
        self.position.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Append one particle. Returns true once the batch is full.
    pub fn push(&mut self, info: &ParticleInfo) -> bool {
        self.position.push(real3(info.position));
        self.velocity.push(real3(info.velocity));
        self.smoothed_velocity.push(real3(info.smoothed_velocity));
        self.flags.push(info.flags);
        self.color.push(info.color);
        self.len() >= self.max_batch
    }

    /// Discard the batch.
    pub fn clear(&mut self) {
        self.position.clear();
        self.velocity.clear();
        self.smoothed_velocity.clear();
        self.flags.clear();
        self.color.clear();
    }

    /// Write the batch at slot `live` and clear it. Returns the new live count.
    ///
    /// Fails without touching the store if the batch does not fit.
    pub fn commit<C>(
        &mut self,
        backend: &mut C,
        store: &ParticleStore<C::Buffer>,
        live: usize,
    ) -> Result<usize, EngineError>
    where
        C: ComputeBackend,
    {
        if self.is_empty() {
            return Ok(live);
        }
        let batch = self.len();
        let capacity = store.capacity();
        if live + batch > capacity {
            return Err(CapacityError::ParticleCapacity {
                live,
                batch,
                capacity,
            }
            .into());
        }

        let phase = Stage::Ingest.name();
        backend
            .write_slice(store.buffer(Attribute::Position), live, &self.position)
            .at(phase)?;
        backend
            .write_slice(store.buffer(Attribute::Velocity), live, &self.velocity)
            .at(phase)?;
        backend
            .write_slice(
                store.buffer(Attribute::SmoothedVelocity),
                live,
                &self.smoothed_velocity,
            )
            .at(phase)?;
        backend
            .write_slice(store.buffer(Attribute::Flags), live, &self.flags)
            .at(phase)?;
        backend
            .write_slice(store.buffer(Attribute::Color), live, &self.color)
            .at(phase)?;

        debug!(live, batch, "waitlist flushed");
        self.clear();
        Ok(live + batch)
    }
}
