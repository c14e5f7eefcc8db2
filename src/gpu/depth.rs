use crate::gpu::context::{GpuContext, dispatch_for_items};
use crate::gpu::shader_loader::load_with_common;
use crate::gpu::types::{DepthParams, PositionGpu};
use crate::scene::PackedScene;
use crate::sort_network::{DEPTH_SENTINEL, padded_len};
use bytemuck::bytes_of;
use glam::Mat4;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, Buffer, BufferDescriptor, BufferUsages,
    CommandEncoder, ComputePipeline, ComputePipelineDescriptor, Queue,
};

const WG_SIZE: u32 = 256;

/// Per-frame depth keys for one scene, padded to a power of two with [`DEPTH_SENTINEL`].
pub struct DepthKeyPipeline {
    pipeline: ComputePipeline,
    bind_group: BindGroup,
    // Kept alive for the bind group; uploaded once per scene.
    _positions_buffer: Buffer,
    keys_buffer: Buffer,
    params_buffer: Buffer,
    num_points: u32,
    padded_len: u32,
    max_dim: u32,
}

impl DepthKeyPipeline {
    pub fn new(ctx: &GpuContext, scene: &PackedScene) -> Self {
        let device = &ctx.device;
        let num_points = scene.num_points;
        let padded_len = padded_len(num_points);

        let positions_buffer = if scene.positions.is_empty() {
            device.create_buffer_init(&BufferInitDescriptor {
                label: Some("depth positions buffer"),
                contents: bytes_of(&PositionGpu::new([0.0; 3])),
                usage: BufferUsages::STORAGE,
            })
        } else {
            device.create_buffer_init(&BufferInitDescriptor {
                label: Some("depth positions buffer"),
                contents: bytemuck::cast_slice(&scene.positions),
                usage: BufferUsages::STORAGE,
            })
        };
        let keys_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("depth keys buffer"),
            size: padded_len as u64 * size_of::<f32>() as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("depth params buffer"),
            size: size_of::<DepthParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader = load_with_common(device, "depth keys shader", include_str!("depth_keys.wgsl"));
        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("depth keys pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: Default::default(),
        });
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("depth keys bind group"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: positions_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: keys_buffer.as_entire_binding(),
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
            _positions_buffer: positions_buffer,
            keys_buffer,
            params_buffer,
            num_points,
            padded_len,
            max_dim: ctx.max_workgroups_per_dimension(),
        }
    }

    /// Write `(transform · [p, 1]).z` for every point, sentinel keys for the padding.
    pub fn encode(&self, queue: &Queue, encoder: &mut CommandEncoder, transform: &Mat4) {
        let params = DepthParams {
            transform: transform.to_cols_array_2d(),
            count: self.num_points,
            padded_count: self.padded_len,
            sentinel: DEPTH_SENTINEL,
            _pad: 0,
        };
        queue.write_buffer(&self.params_buffer, 0, bytes_of(&params));

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("depth keys pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        let [x, y, z] = dispatch_for_items(self.padded_len, WG_SIZE, self.max_dim);
        pass.dispatch_workgroups(x, y, z);
    }

    pub fn key_buffer(&self) -> &Buffer {
        &self.keys_buffer
    }

    pub fn padded_len(&self) -> u32 {
        self.padded_len
    }

    pub fn num_points(&self) -> u32 {
        self.num_points
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gpu::context::tests::test_context;
    use crate::scene::{GaussianPoint, GaussianScene, ShDegree};
    use crate::sort_network;
    use glam::Vec3;

    pub(crate) fn scene_at(positions: &[[f32; 3]]) -> PackedScene {
        let points = positions
            .iter()
            .map(|&position| GaussianPoint {
                position,
                log_scale: [0.0; 3],
                rotation: [1.0, 0.0, 0.0, 0.0],
                opacity_logit: 0.0,
                sh: vec![[0.0; 3]],
            })
            .collect();
        let scene = GaussianScene::new(ShDegree::new(0).unwrap(), points).unwrap();
        PackedScene::from_scene(&scene)
    }

    fn run(ctx: &GpuContext, depth: &DepthKeyPipeline, transform: &Mat4) -> Vec<f32> {
        let mut encoder = ctx.device.create_command_encoder(&Default::default());
        depth.encode(&ctx.queue, &mut encoder, transform);
        ctx.queue.submit([encoder.finish()]);
        ctx.readback(depth.key_buffer()).unwrap()
    }

    #[test]
    fn pads_with_sentinel_and_matches_cpu() {
        let Some(ctx) = test_context() else { return };
        let positions = [[0.0, 0.0, 5.0], [1.0, 2.0, -1.0], [3.0, 0.5, 2.5]];
        let depth = DepthKeyPipeline::new(&ctx, &scene_at(&positions));
        assert_eq!(depth.padded_len(), 4);

        let transform = Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0))
            * Mat4::from_rotation_x(0.3);
        let keys = run(&ctx, &depth, &transform);
        let points: Vec<Vec3> = positions.iter().copied().map(Vec3::from).collect();
        let expected = sort_network::depth_keys(&points, &transform);
        assert_eq!(keys.len(), 4);
        for (got, want) in keys[..3].iter().zip(&expected) {
            assert!((got - want).abs() < 1e-4, "{got} vs {want}");
        }
        assert_eq!(keys[3], f32::INFINITY);
    }

    #[test]
    fn power_of_two_count_has_no_padding() {
        let Some(ctx) = test_context() else { return };
        let depth = DepthKeyPipeline::new(&ctx, &scene_at(&[[0.0, 0.0, 1.0], [0.0, 0.0, 2.0]]));
        assert_eq!(depth.padded_len(), 2);
        let keys = run(&ctx, &depth, &Mat4::IDENTITY);
        assert_eq!(keys, vec![1.0, 2.0]);
    }

    #[test]
    fn empty_scene_yields_single_sentinel() {
        let Some(ctx) = test_context() else { return };
        let depth = DepthKeyPipeline::new(&ctx, &scene_at(&[]));
        assert_eq!(depth.num_points(), 0);
        assert_eq!(run(&ctx, &depth, &Mat4::IDENTITY), vec![f32::INFINITY]);
    }
}
