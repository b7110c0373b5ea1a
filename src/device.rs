//! Device and effect capabilities the pipeline drives.
//!
//! The pipeline issues immediate-mode commands to one device: switch render
//! target, clear, bind effect parameters, select a technique, draw a quad.
//! Backends implement [`GraphicsDevice`] and [`EffectProgram`]; the trait methods
//! take `&self` and backends keep their mutable command state behind interior
//! mutability, so a caller can keep using the device while a pipeline borrows it.

use std::fmt;

use crate::assets::LookupImage;
use crate::error::MlaaResult;
use crate::quad::QuadVertex;
use crate::shader::ShaderSource;

/// Handle to a named effect parameter, resolved once at load time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParameterHandle(u32);

impl ParameterHandle {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Handle to a named effect technique, resolved once at load time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TechniqueHandle(u32);

impl TechniqueHandle {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Where a device samples pixel centers in clip space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelCenter {
    /// Pixel centers on integer coordinates (D3D9 rules); quads need a half-texel shift
    HalfTexel,
    /// Pixel centers on half-integer coordinates (D3D10+, Vulkan, Metal, wgpu)
    Centered,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexFormat {
    Float2,
    Float3,
}

impl VertexFormat {
    pub const fn size(self) -> u32 {
        match self {
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexUsage {
    Position,
    TexCoord,
}

/// One attribute of a vertex stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexElement {
    pub offset: u32,
    pub format: VertexFormat,
    pub usage: VertexUsage,
    pub usage_index: u32,
}

/// Description of an intermediate render target. Always RGBA8, single mip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

/// Compiled effect: named parameters, named techniques and pass bracketing.
pub trait EffectProgram {
    type Texture;

    fn parameter_by_name(&self, name: &str) -> Option<ParameterHandle>;
    fn technique_by_name(&self, name: &str) -> Option<TechniqueHandle>;

    fn set_float(&mut self, parameter: ParameterHandle, value: f32) -> MlaaResult<()>;
    fn set_texture(&mut self, parameter: ParameterHandle, texture: &Self::Texture) -> MlaaResult<()>;
    fn set_technique(&mut self, technique: TechniqueHandle) -> MlaaResult<()>;

    /// Start applying the current technique; returns its pass count
    fn begin(&mut self) -> MlaaResult<u32>;
    fn begin_pass(&mut self, pass: u32) -> MlaaResult<()>;
    fn end_pass(&mut self) -> MlaaResult<()>;
    fn end(&mut self) -> MlaaResult<()>;
}

/// Immediate-mode rendering device.
///
/// Resource handles are RAII: dropping the last clone of a texture, surface,
/// effect or vertex layout releases it.
pub trait GraphicsDevice {
    type Texture: Clone + fmt::Debug;
    type Surface: Clone + fmt::Debug;
    type Effect: EffectProgram<Texture = Self::Texture>;
    type VertexLayout;

    fn pixel_center(&self) -> PixelCenter;

    fn create_effect(&self, source: &ShaderSource) -> MlaaResult<Self::Effect>;
    fn create_vertex_layout(&self, elements: &[VertexElement]) -> MlaaResult<Self::VertexLayout>;
    fn create_render_target(&self, desc: &RenderTargetDesc) -> MlaaResult<Self::Texture>;
    /// Renderable view of one mip level of `texture`
    fn surface_level(&self, texture: &Self::Texture, level: u32) -> MlaaResult<Self::Surface>;
    /// Immutable sampled texture holding `image` at its native size
    fn create_lookup_texture(&self, image: &LookupImage, label: &str) -> MlaaResult<Self::Texture>;
    fn texture_extent(&self, texture: &Self::Texture) -> (u32, u32);

    fn set_vertex_layout(&self, layout: &Self::VertexLayout) -> MlaaResult<()>;
    fn set_render_target(&self, surface: &Self::Surface) -> MlaaResult<()>;
    /// Clear the color channels of the current render target; depth/stencil untouched
    fn clear(&self, color: [f32; 4]) -> MlaaResult<()>;
    /// Draw a triangle strip with the effect's current technique, pass and bindings
    fn draw_triangle_strip(&self, effect: &Self::Effect, vertices: &[QuadVertex]) -> MlaaResult<()>;
}
