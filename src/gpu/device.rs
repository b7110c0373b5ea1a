//! wgpu implementation of [`GraphicsDevice`].
//!
//! Immediate-mode calls are turned into one command buffer per clear or draw.
//! Validation and out-of-memory errors are captured with error scopes, so a
//! rejected call comes back as an error instead of a panic in the uncaptured
//! error handler.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use wgpu::util::DeviceExt;
use wgpu::{
    BufferDescriptor, BufferUsages, Extent3d, ImageCopyTexture, ImageDataLayout, Origin3d,
    TextureAspect, TextureFormat, TextureUsages,
};

use super::context::{align_copy_bpr, GpuContext};
use super::effect::WgpuEffect;
use crate::assets::{LookupFormat, LookupImage};
use crate::device::{GraphicsDevice, PixelCenter, RenderTargetDesc, VertexElement, VertexFormat};
use crate::error::{MlaaError, MlaaResult};
use crate::quad::QuadVertex;
use crate::shader::ShaderSource;

/// Format of every intermediate render target
pub const RENDER_TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Filterable single-channel format used for depth inputs
pub const DEPTH_INPUT_FORMAT: TextureFormat = TextureFormat::R16Float;

struct TextureInner {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    label: String,
    format: TextureFormat,
    width: u32,
    height: u32,
    renderable: bool,
}

/// Shared texture handle; the GPU texture is released with the last clone
#[derive(Clone)]
pub struct WgpuTexture(Arc<TextureInner>);

impl WgpuTexture {
    pub fn raw(&self) -> &wgpu::Texture {
        &self.0.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.0.view
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn format(&self) -> TextureFormat {
        self.0.format
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.0.width, self.0.height)
    }

    /// Both handles refer to the same GPU texture
    pub fn same_as(&self, other: &WgpuTexture) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for WgpuTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuTexture")
            .field("label", &self.0.label)
            .field("format", &self.0.format)
            .field("extent", &self.extent())
            .finish()
    }
}

struct SurfaceInner {
    texture: WgpuTexture,
    view: wgpu::TextureView,
    level: u32,
}

/// Render attachment view of one mip level
#[derive(Clone)]
pub struct WgpuSurface(Arc<SurfaceInner>);

impl WgpuSurface {
    pub fn texture(&self) -> &WgpuTexture {
        &self.0.texture
    }

    pub fn level(&self) -> u32 {
        self.0.level
    }
}

impl fmt::Debug for WgpuSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuSurface")
            .field("texture", &self.0.texture)
            .field("level", &self.0.level)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct WgpuVertexLayout {
    stride: u64,
    attributes: Vec<wgpu::VertexAttribute>,
}

impl WgpuVertexLayout {
    pub fn buffer_layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }
}

#[derive(Default)]
struct DeviceState {
    render_target: Option<Weak<SurfaceInner>>,
    vertex_layout: Option<WgpuVertexLayout>,
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    state: RefCell<DeviceState>,
}

impl WgpuDevice {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            state: RefCell::new(DeviceState::default()),
        }
    }

    /// Device on the shared headless context, `None` without an adapter
    pub fn shared() -> Option<Self> {
        super::context::ctx().map(Self::from_context)
    }

    pub fn from_context(ctx: &GpuContext) -> Self {
        Self::new(Arc::clone(&ctx.device), Arc::clone(&ctx.queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Run `f` inside validation and out-of-memory error scopes
    fn scoped<T>(&self, call: &str, f: impl FnOnce() -> T) -> MlaaResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        if let Some(err) = out_of_memory {
            return Err(MlaaError::resource(format!("{call}: {err}")));
        }
        if let Some(err) = validation {
            return Err(MlaaError::submission(format!("{call}: {err}")));
        }
        Ok(value)
    }

    fn texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsages,
    ) -> MlaaResult<WgpuTexture> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > limit || height > limit {
            return Err(MlaaError::resource(format!(
                "{label}: {width}x{height} is outside 1..={limit}"
            )));
        }
        let texture = self.scoped("CreateTexture", || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTexture(Arc::new(TextureInner {
            texture,
            view,
            label: label.to_string(),
            format,
            width,
            height,
            renderable: usage.contains(TextureUsages::RENDER_ATTACHMENT),
        })))
    }

    fn upload(&self, texture: &WgpuTexture, data: &[u8], bytes_per_row: u32) {
        let (width, height) = texture.extent();
        self.queue.write_texture(
            ImageCopyTexture {
                texture: texture.raw(),
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            data,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// RGBA8 texture usable both as a source and as a render target
    pub fn create_color_texture(&self, width: u32, height: u32, rgba: &[u8]) -> MlaaResult<WgpuTexture> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(MlaaError::invalid(format!(
                "{width}x{height} RGBA8 texture needs {expected} bytes, got {}",
                rgba.len()
            )));
        }
        let texture = self.texture(
            "mlaa.color",
            width,
            height,
            RENDER_TARGET_FORMAT,
            TextureUsages::TEXTURE_BINDING
                | TextureUsages::RENDER_ATTACHMENT
                | TextureUsages::COPY_SRC
                | TextureUsages::COPY_DST,
        )?;
        self.upload(&texture, rgba, width * 4);
        Ok(texture)
    }

    /// Half-float depth input for [`crate::InputMode::Depth`]
    pub fn create_depth_texture(&self, width: u32, height: u32, depth: &[f32]) -> MlaaResult<WgpuTexture> {
        if depth.len() != width as usize * height as usize {
            return Err(MlaaError::invalid(format!(
                "{width}x{height} depth texture needs {} values, got {}",
                width as usize * height as usize,
                depth.len()
            )));
        }
        let texture = self.texture(
            "mlaa.depth",
            width,
            height,
            DEPTH_INPUT_FORMAT,
            TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        )?;
        // f16 is not Pod; go through little-endian bytes
        let bytes: Vec<u8> = depth
            .iter()
            .flat_map(|&d| half::f16::from_f32(d).to_le_bytes())
            .collect();
        self.upload(&texture, &bytes, width * 2);
        Ok(texture)
    }

    /// Read an RGBA8 texture back, rows tightly packed
    pub fn read_rgba8(&self, texture: &WgpuTexture) -> MlaaResult<Vec<u8>> {
        if texture.format() != RENDER_TARGET_FORMAT {
            return Err(MlaaError::invalid(format!(
                "cannot read back {:?} as RGBA8",
                texture.format()
            )));
        }
        let (width, height) = texture.extent();
        let unpadded_bytes_per_row = width * 4;
        let padded_bytes_per_row = align_copy_bpr(unpadded_bytes_per_row);

        let staging_buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some("mlaa.readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mlaa.readback.encoder"),
            });
        encoder.copy_texture_to_buffer(
            ImageCopyTexture {
                texture: texture.raw(),
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging_buffer,
                layout: ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| MlaaError::submission(format!("readback channel closed: {e}")))?
            .map_err(|e| MlaaError::submission(format!("buffer mapping failed: {e:?}")))?;

        let data = buffer_slice.get_mapped_range();
        let mut rgba = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for y in 0..height {
            let row_offset = (y * padded_bytes_per_row) as usize;
            rgba.extend_from_slice(&data[row_offset..row_offset + unpadded_bytes_per_row as usize]);
        }
        drop(data);
        staging_buffer.unmap();

        Ok(rgba)
    }

    fn current_target(&self, call: &str) -> MlaaResult<WgpuSurface> {
        self.state
            .borrow()
            .render_target
            .as_ref()
            .and_then(Weak::upgrade)
            .map(WgpuSurface)
            .ok_or_else(|| MlaaError::submission(format!("{call}: no render target")))
    }

    fn submit_pass(
        &self,
        call: &str,
        target: &WgpuSurface,
        load: wgpu::LoadOp<wgpu::Color>,
        draw: Option<DrawCall<'_>>,
    ) -> MlaaResult<()> {
        self.scoped(call, || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(call) });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some(call),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.0.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                if let Some(draw) = draw {
                    pass.set_pipeline(draw.pipeline);
                    pass.set_bind_group(0, draw.bind_group, &[]);
                    pass.set_vertex_buffer(0, draw.vertices.slice(..));
                    pass.draw(0..draw.vertex_count, 0..1);
                }
            }
            self.queue.submit(Some(encoder.finish()));
        })
    }
}

/// Resources of one strip draw
struct DrawCall<'a> {
    pipeline: &'a wgpu::RenderPipeline,
    bind_group: &'a wgpu::BindGroup,
    vertices: &'a wgpu::Buffer,
    vertex_count: u32,
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float3 => wgpu::VertexFormat::Float32x3,
    }
}

impl GraphicsDevice for WgpuDevice {
    type Texture = WgpuTexture;
    type Surface = WgpuSurface;
    type Effect = WgpuEffect;
    type VertexLayout = WgpuVertexLayout;

    fn pixel_center(&self) -> PixelCenter {
        PixelCenter::Centered
    }

    fn create_effect(&self, source: &ShaderSource) -> MlaaResult<WgpuEffect> {
        let fallback = self.texture(
            "mlaa.unbound",
            1,
            1,
            RENDER_TARGET_FORMAT,
            TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        )?;
        self.upload(&fallback, &[0; 4], 4);

        let mut effect = None;
        let created = self.scoped("CreateEffect", || {
            effect = Some(WgpuEffect::compile(Arc::clone(&self.device), source, fallback));
        });
        match created {
            // Validation errors raised by wgpu after naga accepted the module
            Err(MlaaError::Submission(msg)) => Err(MlaaError::shader(msg)),
            Err(err) => Err(err),
            Ok(()) => effect.unwrap_or_else(|| Err(MlaaError::shader("effect was not compiled"))),
        }
    }

    fn create_vertex_layout(&self, elements: &[VertexElement]) -> MlaaResult<WgpuVertexLayout> {
        if elements.is_empty() {
            return Err(MlaaError::invalid("vertex layout is empty"));
        }
        let stride = elements
            .iter()
            .map(|e| e.offset + e.format.size())
            .max()
            .unwrap_or(0) as u64;
        let attributes = elements
            .iter()
            .enumerate()
            .map(|(location, e)| wgpu::VertexAttribute {
                format: vertex_format(e.format),
                offset: e.offset as u64,
                shader_location: location as u32,
            })
            .collect();
        Ok(WgpuVertexLayout { stride, attributes })
    }

    fn create_render_target(&self, desc: &RenderTargetDesc) -> MlaaResult<WgpuTexture> {
        self.texture(
            &desc.label,
            desc.width,
            desc.height,
            RENDER_TARGET_FORMAT,
            TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_SRC,
        )
    }

    fn surface_level(&self, texture: &WgpuTexture, level: u32) -> MlaaResult<WgpuSurface> {
        if level != 0 {
            return Err(MlaaError::invalid(format!(
                "{} has a single level, asked for {level}",
                texture.label()
            )));
        }
        if !texture.0.renderable {
            return Err(MlaaError::invalid(format!("{} is not a render target", texture.label())));
        }
        let view = texture.raw().create_view(&wgpu::TextureViewDescriptor {
            label: Some(texture.label()),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        });
        Ok(WgpuSurface(Arc::new(SurfaceInner {
            texture: texture.clone(),
            view,
            level,
        })))
    }

    fn create_lookup_texture(&self, image: &LookupImage, label: &str) -> MlaaResult<WgpuTexture> {
        let format = match image.format() {
            LookupFormat::Rgba8 => TextureFormat::Rgba8Unorm,
            LookupFormat::R8 => TextureFormat::R8Unorm,
        };
        let texture = self.texture(
            label,
            image.width(),
            image.height(),
            format,
            TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        )?;
        self.upload(&texture, image.data(), image.bytes_per_row());
        Ok(texture)
    }

    fn texture_extent(&self, texture: &WgpuTexture) -> (u32, u32) {
        texture.extent()
    }

    fn set_vertex_layout(&self, layout: &WgpuVertexLayout) -> MlaaResult<()> {
        self.state.borrow_mut().vertex_layout = Some(layout.clone());
        Ok(())
    }

    fn set_render_target(&self, surface: &WgpuSurface) -> MlaaResult<()> {
        self.state.borrow_mut().render_target = Some(Arc::downgrade(&surface.0));
        Ok(())
    }

    fn clear(&self, color: [f32; 4]) -> MlaaResult<()> {
        let target = self.current_target("Clear")?;
        let color = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
        self.submit_pass("Clear", &target, wgpu::LoadOp::Clear(color), None)
    }

    fn draw_triangle_strip(&self, effect: &WgpuEffect, vertices: &[QuadVertex]) -> MlaaResult<()> {
        let target = self.current_target("DrawPrimitive")?;
        let layout = self
            .state
            .borrow()
            .vertex_layout
            .clone()
            .ok_or_else(|| MlaaError::submission("DrawPrimitive: no vertex layout set"))?;
        let technique = effect.active_technique()?;

        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mlaa.quad"),
            contents: bytemuck::cast_slice(vertices),
            usage: BufferUsages::VERTEX,
        });
        let uniform_buffer = (!effect.uniform_bytes().is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mlaa.params"),
                contents: effect.uniform_bytes(),
                usage: BufferUsages::UNIFORM,
            })
        });

        let format = target.texture().format();
        let buffer_layout = layout.buffer_layout();
        let pipeline = match effect.cached_pipeline(technique, format, &buffer_layout) {
            Some(pipeline) => pipeline,
            None => {
                let pipeline = self.scoped("CreateRenderPipeline", || {
                    effect.create_pipeline(technique, format, &buffer_layout)
                })?;
                effect.cache_pipeline(technique, format, &buffer_layout, pipeline)
            }
        };
        let bind_group = self.scoped("CreateBindGroup", || effect.bind_group(uniform_buffer.as_ref(), target.texture()))?;

        let draw = DrawCall {
            pipeline: &pipeline,
            bind_group: &bind_group,
            vertices: &vertex_buffer,
            vertex_count: vertices.len() as u32,
        };
        self.submit_pass("DrawPrimitive", &target, wgpu::LoadOp::Load, Some(draw))
    }
}

impl fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuDevice").finish_non_exhaustive()
    }
}
