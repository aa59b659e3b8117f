//! wgpu compute backend.
//!
//! Each [`Kernel`] becomes one compute pipeline. Its bind group layout is
//! derived from the parameter schema: group 0, binding `i` is parameter `i`.
//! `Uint` parameters are passed as a 16-byte uniform.
//!
//! Every shader is compiled as a generated prelude followed by the kernel
//! source. The prelude defines the `real` / `real4` scalar aliases for the
//! compiled precision, the `Constants` struct bound at binding 0, and grid
//! cell helpers. The four spatial kernels ship with the crate; the six
//! numeric kernels are WGSL supplied through
//! [`WgpuBackend::register_source`].

pub mod buffers;

use std::collections::HashMap;

use tracing::{error, info};

use buffers::GpuBuffer;

use crate::constants::WORKGROUP_MULTIPLE;
use crate::device::{BufferRole, ComputeBackend, Kernel, KernelArg};
use crate::error::DeviceError;
use crate::params::Precision;

const GRID_COUNT_WGSL: &str = include_str!("shaders/grid_count.wgsl");
const GRID_SCATTER_WGSL: &str = include_str!("shaders/grid_scatter.wgsl");
const NEIGHBOR_COUNT_WGSL: &str = include_str!("shaders/neighbor_count.wgsl");
const NEIGHBOR_FILL_WGSL: &str = include_str!("shaders/neighbor_fill.wgsl");
const PRELUDE_WGSL: &str = include_str!("shaders/prelude.wgsl");

/// Shader prelude for `precision`.
pub fn prelude(precision: Precision) -> String {
    let scalar = precision.wgsl_scalar();
    format!(
        "alias real = {scalar};\nalias real3 = vec3<{scalar}>;\nalias real4 = vec4<{scalar}>;\n\
         const WORKGROUP_SIZE: u32 = {WORKGROUP_MULTIPLE}u;\n\n{PRELUDE_WGSL}"
    )
}

struct Prepared {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// Check whether a compute adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

/// Compute backend on a wgpu device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    shader_f64: bool,
    sources: HashMap<Kernel, String>,
    pipelines: HashMap<Kernel, Prepared>,
}

impl WgpuBackend {
    /// Open the high-performance adapter.
    ///
    /// `SHADER_F64` is requested whenever the adapter offers it.
    pub fn new() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| DeviceError::Init("no suitable GPU adapter found".into()))?;

        let adapter_name = adapter.get_info().name;
        let shader_f64 = adapter.features().contains(wgpu::Features::SHADER_F64);
        info!(adapter = %adapter_name, shader_f64, "GPU adapter");

        // The force kernels bind up to eight storage buffers; take whatever
        // the adapter allows for storage bindings and sizes.
        let adapter_limits = adapter.limits();
        let mut required_limits = wgpu::Limits::default();
        required_limits.max_storage_buffers_per_shader_stage =
            adapter_limits.max_storage_buffers_per_shader_stage;
        required_limits.max_storage_buffer_binding_size =
            adapter_limits.max_storage_buffer_binding_size;
        required_limits.max_buffer_size = adapter_limits.max_buffer_size;

        let required_features = if shader_f64 {
            wgpu::Features::SHADER_F64
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sph_engine_device"),
                required_features,
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| DeviceError::Init(format!("failed to create device: {e}")))?;

        device.on_uncaptured_error(Box::new(|e| {
            error!("uncaptured wgpu error: {e}");
        }));

        Ok(Self {
            device,
            queue,
            adapter_name,
            shader_f64,
            sources: HashMap::new(),
            pipelines: HashMap::new(),
        })
    }

    /// Supply WGSL for a numeric kernel. The source is appended to the
    /// prelude and must define an entry point named [`Kernel::name`].
    pub fn register_source(&mut self, kernel: Kernel, source: impl Into<String>) {
        self.pipelines.remove(&kernel);
        self.sources.insert(kernel, source.into());
    }

    fn source(&self, kernel: Kernel) -> Result<&str, DeviceError> {
        match kernel {
            Kernel::GridCount => Ok(GRID_COUNT_WGSL),
            Kernel::GridScatter => Ok(GRID_SCATTER_WGSL),
            Kernel::NeighborCount => Ok(NEIGHBOR_COUNT_WGSL),
            Kernel::NeighborFill => Ok(NEIGHBOR_FILL_WGSL),
            _ => self
                .sources
                .get(&kernel)
                .map(String::as_str)
                .ok_or(DeviceError::MissingKernel(kernel)),
        }
    }

    fn pop_validation(&self) -> Option<String> {
        pollster::block_on(self.device.pop_error_scope()).map(|e| e.to_string())
    }
}

impl ComputeBackend for WgpuBackend {
    type Buffer = GpuBuffer;

    fn describe(&self) -> String {
        format!("wgpu: {}", self.adapter_name)
    }

    fn supports_precision(&self, precision: Precision) -> bool {
        match precision {
            Precision::Single => true,
            Precision::Double => self.shader_f64,
        }
    }

    fn create_buffer(
        &mut self,
        label: &str,
        role: BufferRole,
        size: u64,
    ) -> Result<GpuBuffer, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = buffers::create(&self.device, label, role, size);
        match self.pop_validation() {
            Some(message) => Err(DeviceError::Init(format!("allocating `{label}`: {message}"))),
            None => Ok(buffer),
        }
    }

    fn write_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        buffer.check_range(offset, data.len() as u64)?;
        self.queue.write_buffer(&buffer.buffer, offset, data);
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, DeviceError> {
        buffers::read(&self.device, &self.queue, buffer, offset, len)
    }

    fn clear_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        len: u64,
    ) -> Result<(), DeviceError> {
        buffer.check_range(offset, len)?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clear"),
        });
        encoder.clear_buffer(&buffer.buffer, offset, Some(len));
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn prepare(&mut self, kernel: Kernel) -> Result<(), DeviceError> {
        if self.pipelines.contains_key(&kernel) {
            return Ok(());
        }
        let source = format!("{}\n{}", prelude(Precision::NATIVE), self.source(kernel)?);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.name()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let entries: Vec<wgpu::BindGroupLayoutEntry> = kernel
            .params()
            .iter()
            .enumerate()
            .map(|(binding, param)| buffers::layout_entry(binding as u32, param.access))
            .collect();
        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(kernel.name()),
            entries: &entries,
        });
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kernel.name()),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.name()),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(kernel.name()),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(message) = self.pop_validation() {
            return Err(DeviceError::Build { kernel, message });
        }

        self.pipelines.insert(kernel, Prepared { pipeline, layout });
        Ok(())
    }

    fn dispatch(
        &mut self,
        kernel: Kernel,
        args: &[KernelArg<'_, GpuBuffer>],
        extent: u32,
    ) -> Result<(), DeviceError> {
        kernel.check_args(args)?;
        let prepared = self
            .pipelines
            .get(&kernel)
            .ok_or(DeviceError::MissingKernel(kernel))?;

        let uniforms: Vec<Option<wgpu::Buffer>> = args
            .iter()
            .map(|arg| match arg {
                KernelArg::Uint(value) => Some(buffers::uint_uniform(&self.device, *value)),
                KernelArg::Buffer(_) => None,
            })
            .collect();

        let bound: Vec<&wgpu::Buffer> = args
            .iter()
            .zip(&uniforms)
            .filter_map(|(arg, uniform)| match arg {
                KernelArg::Buffer(buffer) => Some(&buffer.buffer),
                KernelArg::Uint(_) => uniform.as_ref(),
            })
            .collect();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let entries: Vec<wgpu::BindGroupEntry> = bound
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name()),
            layout: &prepared.layout,
            entries: &entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(kernel.name()),
        });
        let workgroups = buffers::dispatch_size(extent, WORKGROUP_MULTIPLE);
        if workgroups > 0 {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&prepared.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        match self.pop_validation() {
            Some(message) => Err(DeviceError::Launch { kernel, message }),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<(), DeviceError> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_uses_compiled_precision() {
        let single = prelude(Precision::Single);
        assert!(single.starts_with("alias real = f32;"));
        assert!(single.contains("struct Constants"));
        assert!(prelude(Precision::Double).contains("alias real4 = vec4<f64>;"));
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn spatial_kernels_build() {
        if !gpu_available() {
            return;
        }
        let mut backend = WgpuBackend::new().unwrap();
        for kernel in Kernel::ALL.into_iter().filter(|k| k.is_spatial()) {
            backend.prepare(kernel).unwrap();
        }
        assert!(matches!(
            backend.prepare(Kernel::Density),
            Err(DeviceError::MissingKernel(Kernel::Density))
        ));
    }
}
