use crate::gpu::context::{GpuContext, dispatch_for_items};
use crate::gpu::shader_loader::load_with_common;
use crate::gpu::types::ExpandParams;
use crate::sort_network::VERTICES_PER_SPLAT;
use bytemuck::bytes_of;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, Buffer, BufferDescriptor, BufferUsages,
    CommandEncoder, ComputePipeline, ComputePipelineDescriptor,
};

const WG_SIZE: u32 = 256;

/// Fans a point permutation out into the vertex index buffer of the splat draw.
pub struct DrawOrderExpander {
    pipeline: ComputePipeline,
    bind_group: BindGroup,
    index_buffer: Buffer,
    _params_buffer: Buffer,
    num_points: u32,
    max_dim: u32,
}

impl DrawOrderExpander {
    /// `permutation` is read through rank `num_points - 1` only.
    pub fn new(ctx: &GpuContext, num_points: u32, permutation: &Buffer) -> Self {
        let device = &ctx.device;
        let index_count = num_points as u64 * VERTICES_PER_SPLAT as u64;
        let index_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("draw index buffer"),
            size: index_count.max(1) * size_of::<u32>() as u64,
            usage: BufferUsages::INDEX | BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("expand params buffer"),
            contents: bytes_of(&ExpandParams {
                count: num_points,
                _pad: [0; 3],
            }),
            usage: BufferUsages::UNIFORM,
        });

        let shader = load_with_common(
            device,
            "expand draw order shader",
            include_str!("expand_draw_order.wgsl"),
        );
        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("expand draw order pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: Default::default(),
        });
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("expand draw order bind group"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: permutation.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: index_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        Self {
            pipeline,
            bind_group,
            index_buffer,
            _params_buffer: params_buffer,
            num_points,
            max_dim: ctx.max_workgroups_per_dimension(),
        }
    }

    pub fn encode(&self, encoder: &mut CommandEncoder) {
        if self.num_points == 0 {
            return;
        }
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("expand draw order pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        let [x, y, z] = dispatch_for_items(self.num_points, WG_SIZE, self.max_dim);
        pass.dispatch_workgroups(x, y, z);
    }

    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    pub fn index_count(&self) -> u32 {
        self.num_points * VERTICES_PER_SPLAT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::tests::test_context;
    use crate::gpu::depth::DepthKeyPipeline;
    use crate::gpu::depth::tests::scene_at;
    use crate::gpu::sort::BitonicSorter;
    use glam::Mat4;

    #[test]
    fn depth_sort_expand_orders_points_nearest_first() {
        let Some(ctx) = test_context() else { return };
        let scene = scene_at(&[
            [0.0, 0.0, 5.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, 3.0],
            [0.0, 0.0, 2.0],
        ]);
        let depth = DepthKeyPipeline::new(&ctx, &scene);
        let sorter = BitonicSorter::new(&ctx, depth.padded_len() as usize).unwrap();
        let expander = DrawOrderExpander::new(&ctx, scene.num_points, sorter.indices_buffer());

        let mut encoder = ctx.device.create_command_encoder(&Default::default());
        depth.encode(&ctx.queue, &mut encoder, &Mat4::IDENTITY);
        sorter.argsort(&mut encoder, depth.key_buffer()).unwrap();
        expander.encode(&mut encoder);
        ctx.queue.submit([encoder.finish()]);

        assert_eq!(sorter.read_indices(&ctx).unwrap(), vec![1, 3, 2, 0]);
        let indices: Vec<u32> = ctx.readback(expander.index_buffer()).unwrap();
        assert_eq!(
            indices,
            vec![
                6, 7, 8, 9, 10, 11, 18, 19, 20, 21, 22, 23, 12, 13, 14, 15, 16, 17, 0, 1, 2, 3, 4,
                5
            ]
        );
    }

    #[test]
    fn padded_ranks_are_not_expanded() {
        let Some(ctx) = test_context() else { return };
        let scene = scene_at(&[[0.0, 0.0, 4.0], [0.0, 0.0, -2.0], [0.0, 0.0, 1.0]]);
        let depth = DepthKeyPipeline::new(&ctx, &scene);
        let sorter = BitonicSorter::new(&ctx, depth.padded_len() as usize).unwrap();
        let expander = DrawOrderExpander::new(&ctx, scene.num_points, sorter.indices_buffer());
        assert_eq!(expander.index_count(), 18);

        let mut encoder = ctx.device.create_command_encoder(&Default::default());
        depth.encode(&ctx.queue, &mut encoder, &Mat4::IDENTITY);
        sorter.argsort(&mut encoder, depth.key_buffer()).unwrap();
        expander.encode(&mut encoder);
        ctx.queue.submit([encoder.finish()]);

        let indices: Vec<u32> = ctx.readback(expander.index_buffer()).unwrap();
        assert_eq!(indices.len(), 18);
        assert_eq!(&indices[..6], &[6, 7, 8, 9, 10, 11]);
        assert!(indices.iter().all(|&v| v < 18));
    }
}
