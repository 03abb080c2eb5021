//! GPU compute backend via wgpu.
//!
//! Implements [`ComputeBackend`] with a WGSL compute shader that assigns one
//! invocation to each output element. Operands are uploaded per call and the
//! result is read back through a staging buffer.
//!
//! # Limits
//!
//! Each operand must fit in a single storage binding, so the largest matrix
//! is bounded by the adapter's `max_storage_buffer_binding_size`. Oversized
//! requests fail with [`ComputeError::OutOfMemory`] rather than being split.

use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};

use crate::backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, MatmulShape};

/// Workgroup edge length; must match `@workgroup_size` in the shader.
const TILE: u32 = 16;

/// Uniform buffer parameters passed to the WGSL shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ShaderParams {
    m: u32,
    n: u32,
    k: u32,
    _pad: u32,
}

/// GPU compute backend using wgpu.
///
/// The backend holds the wgpu device, queue, and compiled compute pipeline.
/// Every worker builds its own instance, so no device memory is shared.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    device_name: String,
}

impl GpuBackend {
    /// Create a new GPU backend asynchronously.
    ///
    /// Requests a high-performance adapter. Software adapters are refused so
    /// that "no accelerator" surfaces as [`ComputeError::Unavailable`].
    pub async fn new_async() -> Result<Self, ComputeError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| ComputeError::Unavailable("No GPU adapter found".into()))?;

        let adapter_info = adapter.get_info();
        let device_name = adapter_info.name.clone();
        if adapter_info.device_type == wgpu::DeviceType::Cpu {
            return Err(ComputeError::Unavailable(format!(
                "Only a software adapter is available ({})",
                device_name
            )));
        }
        let limits = adapter.limits();
        log::debug!(
            "GPU adapter: {} ({:?}, {:?}), max storage binding {} bytes, max workgroups per dimension {}",
            device_name,
            adapter_info.backend,
            adapter_info.device_type,
            limits.max_storage_buffer_binding_size,
            limits.max_compute_workgroups_per_dimension
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("shardmm-compute"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| ComputeError::DeviceError(format!("Failed to create device: {}", e)))?;

        let shader_source = include_str!("shaders/matmul.wgsl");
        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("matmul_shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader_source)),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("matmul_bind_group_layout"),
                entries: &[
                    // binding 0: lhs, binding 1: rhs, binding 2: output
                    storage_entry(0, true),
                    storage_entry(1, true),
                    storage_entry(2, false),
                    // binding 3: params uniform
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("matmul_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("matmul_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            device_name,
        })
    }

    /// Create a new GPU backend, blocking the current thread.
    ///
    /// This is a convenience wrapper around [`new_async`](Self::new_async)
    /// using `pollster` to block on the async initialisation.
    pub fn new_blocking() -> Result<Self, ComputeError> {
        pollster::block_on(Self::new_async())
    }

    /// Reject shapes the device cannot bind or dispatch in one pass.
    fn check_limits(&self, shape: MatmulShape) -> Result<(), ComputeError> {
        let limits = self.device.limits();
        let max_binding = limits.max_storage_buffer_binding_size as usize;
        for len in [shape.lhs_len(), shape.rhs_len(), shape.out_len()] {
            let bytes = len * std::mem::size_of::<f32>();
            if bytes > max_binding {
                return Err(ComputeError::OutOfMemory {
                    requested: bytes,
                    available: max_binding,
                });
            }
        }

        let max_groups = limits.max_compute_workgroups_per_dimension as usize;
        let groups_x = shape.k.div_ceil(TILE as usize);
        let groups_y = shape.m.div_ceil(TILE as usize);
        if groups_x > max_groups || groups_y > max_groups || shape.n > u32::MAX as usize {
            return Err(ComputeError::DeviceError(format!(
                "Dispatch of {}x{} workgroups exceeds device limit {}",
                groups_x, groups_y, max_groups
            )));
        }
        Ok(())
    }

    fn storage_buffer(&self, label: &str, data: &[f32]) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of_val(data) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(data));
        buffer
    }
}

impl ComputeBackend for GpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("GPU ({})", self.device_name),
            backend_type: BackendType::Gpu,
            memory_bytes: None,
            compute_units: None,
        }
    }

    fn multiply(
        &self,
        a: &[f32],
        b: &[f32],
        shape: MatmulShape,
    ) -> Result<Vec<f32>, ComputeError> {
        shape.check_operands(a, b)?;
        self.check_limits(shape)?;

        let lhs_buffer = self.storage_buffer("lhs", a);
        let rhs_buffer = self.storage_buffer("rhs", b);

        let out_byte_size = (shape.out_len() * std::mem::size_of::<f32>()) as u64;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("output"),
            size: out_byte_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        // Create staging buffer for readback.
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: out_byte_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params = ShaderParams {
            m: shape.m as u32,
            n: shape.n as u32,
            k: shape.k as u32,
            _pad: 0,
        };
        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("params"),
            size: std::mem::size_of::<ShaderParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("matmul_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: lhs_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: rhs_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("matmul_encoder"),
            });

        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("matmul_pass"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(
                (shape.k as u32).div_ceil(TILE),
                (shape.m as u32).div_ceil(TILE),
                1,
            );
        }

        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, out_byte_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let staging_slice = staging_buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        staging_slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver only disappears if this call already returned.
            let _ = sender.send(result);
        });

        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|e| ComputeError::DeviceError(format!("Map recv failed: {}", e)))?
            .map_err(|e| ComputeError::DeviceError(format!("Buffer map failed: {}", e)))?;

        let data = staging_slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging_buffer.unmap();

        Ok(result)
    }
}
