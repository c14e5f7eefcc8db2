use crate::error::{Result, SplatError};
use crate::gpu::context::{GpuContext, dispatch_for_items};
use crate::gpu::shader_loader::load_with_common;
use crate::gpu::types::SortParams;
use crate::sort_network::{bitonic_stages, check_sort_len};
use bytemuck::bytes_of;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutEntry, BindingResource,
    BindingType, Buffer, BufferBinding, BufferBindingType, BufferDescriptor, BufferSize,
    BufferUsages, CommandEncoder, ComputePipeline, ComputePipelineDescriptor, ShaderStages,
};

const WG_SIZE: u32 = 256;

struct Resources {
    // Scratch copy of the caller's keys; permuted in place alongside the indices.
    keys_buffer: Buffer,
    indices_buffer: Buffer,
    // Slot 0 holds the init parameters, slot s + 1 the parameters of stage s.
    params_buffer: Buffer,
    params_stride: u64,
    num_stages: usize,
}

impl Resources {
    fn new(device: &wgpu::Device, len: u32) -> Self {
        let bytes = len as u64 * size_of::<u32>() as u64;
        let keys_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("sort keys buffer"),
            size: bytes,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let indices_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("sort indices buffer"),
            size: bytes,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let params_stride = (size_of::<SortParams>() as u64).next_multiple_of(alignment);
        let stages = bitonic_stages(len);
        let mut contents = vec![0u8; params_stride as usize * (stages.len() + 1)];
        let slots = std::iter::once(SortParams {
            k: 0,
            j: 0,
            len,
            _pad: 0,
        })
        .chain(stages.iter().map(|stage| SortParams {
            k: stage.k,
            j: stage.j,
            len,
            _pad: 0,
        }));
        for (slot, params) in slots.enumerate() {
            let start = slot * params_stride as usize;
            contents[start..start + size_of::<SortParams>()].copy_from_slice(bytes_of(&params));
        }
        let params_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("sort params buffer"),
            contents: &contents,
            usage: BufferUsages::UNIFORM,
        });

        Self {
            keys_buffer,
            indices_buffer,
            params_buffer,
            params_stride,
            num_stages: stages.len(),
        }
    }

    fn params_offset(&self, slot: usize) -> u32 {
        (slot as u64 * self.params_stride) as u32
    }
}

struct Pipelines {
    init_indices: ComputePipeline,
    exchange: ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

impl Pipelines {
    fn new(device: &wgpu::Device) -> Self {
        let shader = load_with_common(device, "bitonic sort shader", include_str!("bitonic.wgsl"));

        let storage_entry = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sort bind group layout"),
            entries: &[
                storage_entry(0),
                storage_entry(1),
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: BufferSize::new(size_of::<SortParams>() as u64),
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sort pl"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });

        let init_indices = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("sort init indices pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("init_indices"),
            compilation_options: Default::default(),
            cache: Default::default(),
        });
        let exchange = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("sort exchange pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("exchange"),
            compilation_options: Default::default(),
            cache: Default::default(),
        });
        Self {
            init_indices,
            exchange,
            layout,
        }
    }
}

/// GPU argsort for one fixed key count.
pub struct BitonicSorter {
    len: u32,
    max_dim: u32,
    pipelines: Pipelines,
    resources: Resources,
    bind_group: BindGroup,
}

impl BitonicSorter {
    /// Fails with [`SplatError::NonPowerOfTwoSortLength`] unless `len` is a power of two.
    pub fn new(ctx: &GpuContext, len: usize) -> Result<Self> {
        check_sort_len(len)?;
        let len = len as u32;
        let device = &ctx.device;
        let pipelines = Pipelines::new(device);
        let resources = Resources::new(device, len);
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("sort bind group"),
            layout: &pipelines.layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: resources.keys_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: resources.indices_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Buffer(BufferBinding {
                        buffer: &resources.params_buffer,
                        offset: 0,
                        size: BufferSize::new(size_of::<SortParams>() as u64),
                    }),
                },
            ],
        });
        tracing::debug!(len, stages = resources.num_stages, "built bitonic sorter");
        Ok(Self {
            len,
            max_dim: ctx.max_workgroups_per_dimension(),
            pipelines,
            resources,
            bind_group,
        })
    }

    /// Encode a full argsort of `key_buffer` into `encoder`.
    ///
    /// The returned index buffer is owned by the sorter and overwritten by the
    /// next call. `key_buffer` itself is left untouched and must allow `COPY_SRC`.
    pub fn argsort(&self, encoder: &mut CommandEncoder, key_buffer: &Buffer) -> Result<&Buffer> {
        let expected = self.len as u64 * size_of::<f32>() as u64;
        if key_buffer.size() != expected {
            return Err(SplatError::KeyBufferSizeMismatch {
                expected,
                actual: key_buffer.size(),
            });
        }

        encoder.copy_buffer_to_buffer(key_buffer, 0, &self.resources.keys_buffer, 0, expected);

        let [x, y, z] = dispatch_for_items(self.len, WG_SIZE, self.max_dim);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("bitonic sort pass"),
            timestamp_writes: None,
        });

        pass.set_pipeline(&self.pipelines.init_indices);
        pass.set_bind_group(0, &self.bind_group, &[self.resources.params_offset(0)]);
        pass.dispatch_workgroups(x, y, z);

        // Each dispatch is its own usage scope: stage t finishes before stage t + 1 reads.
        pass.set_pipeline(&self.pipelines.exchange);
        for stage in 0..self.resources.num_stages {
            let offset = self.resources.params_offset(stage + 1);
            pass.set_bind_group(0, &self.bind_group, &[offset]);
            pass.dispatch_workgroups(x, y, z);
        }
        drop(pass);

        Ok(&self.resources.indices_buffer)
    }

    pub fn indices_buffer(&self) -> &Buffer {
        &self.resources.indices_buffer
    }

    /// Read the permutation produced by the last submitted [`argsort`](Self::argsort).
    pub fn read_indices(&self, ctx: &GpuContext) -> Result<Vec<u32>> {
        ctx.readback(&self.resources.indices_buffer)
    }
}
