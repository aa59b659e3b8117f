//! wgpu buffer handles, upload/readback and bind group layout helpers.

use wgpu::util::DeviceExt;

use crate::device::{Access, BufferRole};
use crate::error::DeviceError;

/// A device buffer owned by the engine.
#[derive(Debug)]
pub struct GpuBuffer {
    pub(crate) buffer: wgpu::Buffer,
    label: String,
    size: u64,
}

impl GpuBuffer {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn check_range(&self, offset: u64, len: u64) -> Result<(), DeviceError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(DeviceError::OutOfRange {
                label: self.label.clone(),
                offset,
                len,
                size: self.size,
            }),
        }
    }
}

/// Round up to the copy alignment.
fn aligned(size: u64) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    size.div_ceil(align).max(1) * align
}

/// Allocate a zero-initialized buffer for `role`.
pub fn create(device: &wgpu::Device, label: &str, role: BufferRole, size: u64) -> GpuBuffer {
    let usage = match role {
        BufferRole::Constants => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        BufferRole::Storage => {
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC
        }
    };
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: aligned(size),
        usage,
        mapped_at_creation: false,
    });
    GpuBuffer {
        buffer,
        label: label.to_string(),
        size,
    }
}

/// 16-byte uniform carrying one `u32` kernel argument.
pub fn uint_uniform(device: &wgpu::Device, value: u32) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("uint_arg"),
        contents: bytemuck::cast_slice(&[value, 0, 0, 0]),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

/// Copy `len` bytes at `offset` through a staging buffer and block until
/// mapped.
pub fn read(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &GpuBuffer,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>, DeviceError> {
    source.check_range(offset, len)?;
    let copy_len = aligned(len);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size: copy_len,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    let copy_len = copy_len.min(source.buffer.size() - offset);
    encoder.copy_buffer_to_buffer(&source.buffer, offset, &staging, 0, copy_len);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| DeviceError::Readback(format!("{}: {e}", source.label)))?
        .map_err(|e| DeviceError::Readback(format!("{}: {e}", source.label)))?;

    let data = slice.get_mapped_range();
    let bytes = data[..len as usize].to_vec();
    drop(data);
    staging.unmap();
    Ok(bytes)
}

/// Bind group layout entry for one schema parameter.
pub fn layout_entry(binding: u32, access: Access) -> wgpu::BindGroupLayoutEntry {
    match access {
        Access::Constants | Access::Uint => bgl_uniform(binding),
        Access::Read => bgl_storage_ro(binding),
        Access::ReadWrite => bgl_storage_rw(binding),
    }
}

/// Workgroup count covering `total` lanes.
pub fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
