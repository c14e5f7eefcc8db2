use crate::error::Result;
use crate::gpu::context::GpuContext;
use crate::gpu::depth::DepthKeyPipeline;
use crate::gpu::expand::DrawOrderExpander;
use crate::gpu::shader_loader::{ShaderCache, SplatShaderConfig};
use crate::gpu::sort::BitonicSorter;
use crate::gpu::types::CameraUniform;
use crate::scene::{PackedScene, ShDegree};
use bytemuck::bytes_of;
use glam::Mat4;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry,
    BindingType, BlendComponent, BlendFactor, BlendOperation, BlendState, Buffer,
    BufferBindingType, BufferDescriptor, BufferUsages, Color, ColorTargetState, ColorWrites,
    FragmentState, IndexFormat, LoadOp, MultisampleState, Operations, PipelineLayout,
    PrimitiveState, PrimitiveTopology, RenderPassColorAttachment, RenderPassDescriptor,
    RenderPipeline, RenderPipelineDescriptor, ShaderStages, StoreOp, TextureFormat, TextureView,
    VertexState,
};

/// `src · (1 − dst.a) + dst`: nearest splats land first and later ones fill in behind them.
pub const UNDER_BLEND: BlendComponent = BlendComponent {
    src_factor: BlendFactor::OneMinusDstAlpha,
    dst_factor: BlendFactor::One,
    operation: BlendOperation::Add,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

fn create_render_pipeline(
    ctx: &GpuContext,
    layout: &PipelineLayout,
    cache: &mut ShaderCache,
    target: RenderTarget,
    sh_degree: ShDegree,
) -> RenderPipeline {
    let shader = cache.splat_shader(
        &ctx.device,
        SplatShaderConfig {
            width: target.width,
            height: target.height,
            sh_degree,
        },
    );
    ctx.device
        .create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("splat pipeline"),
            layout: Some(layout),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format: target.format,
                    blend: Some(BlendState {
                        color: UNDER_BLEND,
                        alpha: UNDER_BLEND,
                    }),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            multiview_mask: None,
            cache: None,
        })
}

/// Everything needed to draw one scene. Dropping it releases the scene's device buffers.
pub struct SplatRasterizer {
    target: RenderTarget,
    sh_degree: ShDegree,
    pipeline_layout: PipelineLayout,
    pipeline: RenderPipeline,
    bind_group: BindGroup,
    camera_buffer: Buffer,
    _points_buffer: Buffer,
    depth: DepthKeyPipeline,
    sorter: BitonicSorter,
    expander: DrawOrderExpander,
    last_camera: Option<CameraUniform>,
    force_draw: bool,
}

impl SplatRasterizer {
    pub fn new(
        ctx: &GpuContext,
        scene: &PackedScene,
        target: RenderTarget,
        cache: &mut ShaderCache,
    ) -> Result<Self> {
        let device = &ctx.device;

        let points_buffer = if scene.points.is_empty() {
            device.create_buffer(&BufferDescriptor {
                label: Some("splat points buffer"),
                size: scene.point_stride() as u64,
                usage: BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        } else {
            device.create_buffer_init(&BufferInitDescriptor {
                label: Some("splat points buffer"),
                contents: &scene.points,
                usage: BufferUsages::STORAGE,
            })
        };
        let camera_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("camera uniform buffer"),
            size: size_of::<CameraUniform>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("splat bind group layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::VERTEX,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::VERTEX,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("splat pl"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        let bind_group = create_bind_group(ctx, &bind_group_layout, &camera_buffer, &points_buffer);
        let pipeline = create_render_pipeline(ctx, &pipeline_layout, cache, target, scene.sh_degree);

        let depth = DepthKeyPipeline::new(ctx, scene);
        let sorter = BitonicSorter::new(ctx, depth.padded_len() as usize)?;
        let expander = DrawOrderExpander::new(ctx, scene.num_points, sorter.indices_buffer());

        tracing::info!(
            points = scene.num_points,
            padded = depth.padded_len(),
            sh_degree = scene.sh_degree.get(),
            width = target.width,
            height = target.height,
            "built splat rasterizer"
        );
        Ok(Self {
            target,
            sh_degree: scene.sh_degree,
            pipeline_layout,
            pipeline,
            bind_group,
            camera_buffer,
            _points_buffer: points_buffer,
            depth,
            sorter,
            expander,
            last_camera: None,
            force_draw: true,
        })
    }

    /// Rebuild the pipeline for a new attachment size. The next frame is always drawn.
    pub fn resize(&mut self, ctx: &GpuContext, target: RenderTarget, cache: &mut ShaderCache) {
        if target != self.target {
            self.pipeline =
                create_render_pipeline(ctx, &self.pipeline_layout, cache, target, self.sh_degree);
            self.target = target;
        }
        self.force_draw = true;
    }

    pub fn force_draw(&mut self) {
        self.force_draw = true;
    }

    /// False when `camera` equals the last drawn camera and no forced draw is pending.
    pub fn needs_redraw(&self, camera: &CameraUniform) -> bool {
        self.force_draw || self.last_camera.as_ref() != Some(camera)
    }

    /// Upload `camera`, reorder the splats for it and draw them into `view`.
    pub fn render(&mut self, ctx: &GpuContext, camera: &CameraUniform, view: &TextureView) -> Result<()> {
        ctx.queue.write_buffer(&self.camera_buffer, 0, bytes_of(camera));

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("splat frame encoder"),
            });
        let projection = Mat4::from_cols_array_2d(&camera.projection);
        self.depth.encode(&ctx.queue, &mut encoder, &projection);
        self.sorter.argsort(&mut encoder, self.depth.key_buffer())?;
        self.expander.encode(&mut encoder);
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("splat pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::TRANSPARENT),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            if self.depth.num_points() > 0 {
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &self.bind_group, &[]);
                pass.set_index_buffer(self.expander.index_buffer().slice(..), IndexFormat::Uint32);
                pass.draw_indexed(0..self.expander.index_count(), 0, 0..1);
            }
        }
        ctx.queue.submit([encoder.finish()]);

        self.last_camera = Some(*camera);
        self.force_draw = false;
        Ok(())
    }

    pub fn read_draw_order(&self, ctx: &GpuContext) -> Result<Vec<u32>> {
        let mut order = self.sorter.read_indices(ctx)?;
        order.truncate(self.depth.num_points() as usize);
        Ok(order)
    }
}

fn create_bind_group(
    ctx: &GpuContext,
    layout: &BindGroupLayout,
    camera_buffer: &Buffer,
    points_buffer: &Buffer,
) -> BindGroup {
    ctx.device.create_bind_group(&BindGroupDescriptor {
        label: Some("splat bind group"),
        layout,
        entries: &[
            BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: points_buffer.as_entire_binding(),
            },
        ],
    })
}
