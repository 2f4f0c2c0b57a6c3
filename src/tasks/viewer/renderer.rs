//! GPU side of the effect: one instanced quad pipeline for the image surfaces,
//! one for the link regions, and four texture slots shared by every surface.

use anyhow::{Result, ensure};
use wgpu::util::DeviceExt;

use crate::blend::TEXTURE_SLOTS;
use crate::effect::FrameInputs;
use crate::events::ImageLoaded;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

// Unit quad centered on the origin, drawn as a triangle strip.
const QUAD: [Vertex; 4] = [
    Vertex {
        pos: [-0.5, -0.5],
        uv: [0.0, 1.0],
    },
    Vertex {
        pos: [0.5, -0.5],
        uv: [1.0, 1.0],
    },
    Vertex {
        pos: [-0.5, 0.5],
        uv: [0.0, 0.0],
    },
    Vertex {
        pos: [0.5, 0.5],
        uv: [1.0, 0.0],
    },
];

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub time: f32,
    pub timeline: f32,
    pub start_index: u32,
    pub end_index: u32,
}

impl From<&FrameInputs> for FrameUniforms {
    #[allow(clippy::cast_possible_truncation)]
    fn from(inputs: &FrameInputs) -> Self {
        Self {
            view_proj: inputs.view_proj,
            time: inputs.time,
            timeline: inputs.blend.progress,
            start_index: inputs.blend.start_index as u32,
            end_index: inputs.blend.end_index as u32,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SurfaceInstance {
    pub rect: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LinkInstance {
    pub rect: [f32; 4],
    pub color: [f32; 4],
}

struct Slot {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub struct Renderer {
    surface_pipeline: wgpu::RenderPipeline,
    link_pipeline: wgpu::RenderPipeline,
    bind_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,
    uniforms: wgpu::Buffer,
    quad: wgpu::Buffer,
    surface_instances: wgpu::Buffer,
    surface_capacity: u32,
    surface_count: u32,
    link_instances: wgpu::Buffer,
    link_capacity: u32,
    link_count: u32,
    slots: Vec<Slot>,
    clear: wgpu::Color,
}

impl Renderer {
    #[allow(clippy::cast_possible_truncation, clippy::too_many_lines)]
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        format: wgpu::TextureFormat,
        surface_capacity: usize,
        link_capacity: usize,
        clear_color: [f32; 4],
    ) -> Self {
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blend-bind-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                texture_entry(2),
                texture_entry(3),
                texture_entry(4),
                texture_entry(5),
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blend-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blend-frame-uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blend-quad"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        // Buffers keep at least one element so slicing stays valid with no links.
        let surface_capacity = surface_capacity.max(1) as u32;
        let link_capacity = link_capacity.max(1) as u32;
        let surface_instances = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blend-surface-instances"),
            size: u64::from(surface_capacity) * std::mem::size_of::<SurfaceInstance>() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let link_instances = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blend-link-instances"),
            size: u64::from(link_capacity) * std::mem::size_of::<LinkInstance>() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blend-shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                "../../shaders/blend.wgsl"
            ))),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blend-pipeline-layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let quad_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
        };
        // The link pass only reads the quad position.
        let quad_pos_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x2],
        };
        let surface_instance_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SurfaceInstance>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &wgpu::vertex_attr_array![2 => Float32x4],
        };
        let link_instance_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<LinkInstance>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &wgpu::vertex_attr_array![1 => Float32x4, 2 => Float32x4],
        };

        let make_pipeline = |label: &str,
                             vs: &str,
                             fs: &str,
                             buffers: &[wgpu::VertexBufferLayout<'_>]| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some(vs),
                    buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fs),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            })
        };

        let surface_pipeline = make_pipeline(
            "blend-surface-pipeline",
            "vs_surface",
            "fs_surface",
            &[quad_layout, surface_instance_layout],
        );
        let link_pipeline = make_pipeline(
            "blend-link-pipeline",
            "vs_link",
            "fs_link",
            &[quad_pos_layout, link_instance_layout],
        );

        // Transparent placeholders until the loader delivers pixels.
        let slots: Vec<Slot> = (0..TEXTURE_SLOTS)
            .map(|_| upload_slot(device, queue, 1, 1, &[0, 0, 0, 0]))
            .collect();
        let bind_group = create_bind_group(device, &bind_layout, &uniforms, &sampler, &slots);

        let [r, g, b, a] = clear_color.map(f64::from);
        Self {
            surface_pipeline,
            link_pipeline,
            bind_layout,
            bind_group,
            sampler,
            uniforms,
            quad,
            surface_instances,
            surface_capacity,
            surface_count: 0,
            link_instances,
            link_capacity,
            link_count: 0,
            slots,
            clear: wgpu::Color { r, g, b, a },
        }
    }

    /// Replaces the texture in `image.slot` with freshly decoded pixels.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &ImageLoaded,
    ) -> Result<()> {
        let prepared = &image.prepared;
        ensure!(
            image.slot < self.slots.len(),
            "texture slot {} out of range",
            image.slot
        );
        ensure!(
            prepared.width > 0 && prepared.height > 0,
            "image {} has no pixels",
            prepared.path.display()
        );
        ensure!(
            prepared.pixels.len() == (prepared.width as usize) * (prepared.height as usize) * 4,
            "image {} pixel buffer does not match {}x{}",
            prepared.path.display(),
            prepared.width,
            prepared.height
        );
        let limit = device.limits().max_texture_dimension_2d;
        ensure!(
            prepared.width <= limit && prepared.height <= limit,
            "image {} exceeds device texture limit {limit}",
            prepared.path.display()
        );

        let slot = upload_slot(
            device,
            queue,
            prepared.width,
            prepared.height,
            &prepared.pixels,
        );
        let old = std::mem::replace(&mut self.slots[image.slot], slot);
        old.texture.destroy();
        self.bind_group = create_bind_group(
            device,
            &self.bind_layout,
            &self.uniforms,
            &self.sampler,
            &self.slots,
        );
        tracing::debug!(
            slot = image.slot,
            width = self.slots[image.slot].width,
            height = self.slots[image.slot].height,
            "texture slot uploaded"
        );
        Ok(())
    }

    pub fn write_frame(&self, queue: &wgpu::Queue, inputs: &FrameInputs) {
        let uniforms = FrameUniforms::from(inputs);
        queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn write_instances(
        &mut self,
        queue: &wgpu::Queue,
        surfaces: &[SurfaceInstance],
        links: &[LinkInstance],
    ) {
        let surfaces = &surfaces[..surfaces.len().min(self.surface_capacity as usize)];
        let links = &links[..links.len().min(self.link_capacity as usize)];
        if !surfaces.is_empty() {
            queue.write_buffer(&self.surface_instances, 0, bytemuck::cast_slice(surfaces));
        }
        if !links.is_empty() {
            queue.write_buffer(&self.link_instances, 0, bytemuck::cast_slice(links));
        }
        self.surface_count = surfaces.len() as u32;
        self.link_count = links.len() as u32;
    }

    pub fn draw(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("blend-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_bind_group(0, &self.bind_group, &[]);
        rpass.set_vertex_buffer(0, self.quad.slice(..));

        if self.link_count > 0 {
            rpass.set_pipeline(&self.link_pipeline);
            rpass.set_vertex_buffer(1, self.link_instances.slice(..));
            rpass.draw(0..4, 0..self.link_count);
        }
        if self.surface_count > 0 {
            rpass.set_pipeline(&self.surface_pipeline);
            rpass.set_vertex_buffer(1, self.surface_instances.slice(..));
            rpass.draw(0..4, 0..self.surface_count);
        }
    }

    /// Destroys every texture and buffer; the renderer is unusable afterwards.
    pub fn release(self) {
        for slot in &self.slots {
            slot.texture.destroy();
        }
        self.uniforms.destroy();
        self.quad.destroy();
        self.surface_instances.destroy();
        self.link_instances.destroy();
        tracing::debug!(slots = self.slots.len(), "renderer resources released");
    }
}

fn upload_slot(device: &wgpu::Device, queue: &wgpu::Queue, w: u32, h: u32, pixels: &[u8]) -> Slot {
    let size = wgpu::Extent3d {
        width: w,
        height: h,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("blend-image"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        texture.as_image_copy(),
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * w),
            rows_per_image: Some(h),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Slot {
        texture,
        view,
        width: w,
        height: h,
    }
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniforms: &wgpu::Buffer,
    sampler: &wgpu::Sampler,
    slots: &[Slot],
) -> wgpu::BindGroup {
    let mut entries = vec![
        wgpu::BindGroupEntry {
            binding: 0,
            resource: uniforms.as_entire_binding(),
        },
        wgpu::BindGroupEntry {
            binding: 1,
            resource: wgpu::BindingResource::Sampler(sampler),
        },
    ];
    for (binding, slot) in (2u32..).zip(slots) {
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(&slot.view),
        });
    }
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("blend-bind-group"),
        layout,
        entries: &entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendState;

    #[test]
    fn frame_uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 80);
        assert_eq!(std::mem::size_of::<SurfaceInstance>(), 16);
        assert_eq!(std::mem::size_of::<LinkInstance>(), 32);
    }

    #[test]
    fn uniforms_carry_blend_state() {
        let inputs = FrameInputs {
            time: 1.5,
            blend: BlendState {
                start_index: 2,
                end_index: 3,
                progress: 0.75,
            },
            view_proj: [[0.0; 4]; 4],
            commits: vec![],
        };
        let uniforms = FrameUniforms::from(&inputs);
        assert_eq!((uniforms.start_index, uniforms.end_index), (2, 3));
        assert_eq!(uniforms.timeline, 0.75);
        assert_eq!(uniforms.time, 1.5);
    }
}
