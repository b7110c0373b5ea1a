//! CPU implementation of [`GraphicsDevice`] with D3D9 pixel-center rules.
//!
//! Every state change and draw is appended to a command log, every resource is
//! counted by a [`ResourceRegistry`], and faults can be injected to make calls
//! fail the way an out-of-memory or lost device would.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use glam::{Vec2, Vec4};

use super::image::SoftImage;
use super::program::{SoftwareEffect, SoftwareProgram};
use super::tracker::{ResourceHandle, ResourceKind, ResourceRegistry, ResourceStats};
use crate::assets::LookupImage;
use crate::device::{
    GraphicsDevice, PixelCenter, RenderTargetDesc, VertexElement, VertexUsage,
};
use crate::error::{MlaaError, MlaaResult};
use crate::quad::QuadVertex;
use crate::shader::{ShaderDefine, ShaderSource};

pub type ResourceId = u64;

pub(crate) type CommandLog = Rc<RefCell<Vec<DeviceCommand>>>;

/// One recorded device or effect call
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    CreateEffect { defines: Vec<ShaderDefine> },
    CreateVertexLayout { layout: ResourceId, stride: u32 },
    CreateRenderTarget { texture: ResourceId, width: u32, height: u32 },
    SurfaceLevel { texture: ResourceId, level: u32 },
    CreateLookupTexture { texture: ResourceId, width: u32, height: u32 },
    SetVertexLayout { layout: ResourceId },
    SetRenderTarget { texture: ResourceId },
    Clear { color: [f32; 4] },
    SetFloat { parameter: String, value: f32 },
    SetTexture { parameter: String, texture: ResourceId },
    SetTechnique { technique: String },
    BeginPass { pass: u32 },
    EndPass,
    Draw {
        technique: String,
        target: ResourceId,
        vertices: Vec<QuadVertex>,
    },
    /// A call that failed; nothing else is recorded for it
    Rejected { call: String },
}

/// Failure injected into subsequent device calls until cleared
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// The `nth` resource creation after injection (0-based) runs out of memory
    CreationFailure { nth: u32 },
    /// Every device call fails
    DeviceLost,
    /// Every draw fails
    DrawFailure,
}

struct TextureInner {
    id: ResourceId,
    label: String,
    render_target: bool,
    image: RefCell<SoftImage>,
    _tracking: ResourceHandle,
}

/// Shared handle to a software texture; the last clone releases it
#[derive(Clone)]
pub struct SoftwareTexture(Rc<TextureInner>);

impl SoftwareTexture {
    pub fn id(&self) -> ResourceId {
        self.0.id
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn extent(&self) -> (u32, u32) {
        self.0.image.borrow().extent()
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> SoftImage {
        self.0.image.borrow().clone()
    }
}

impl fmt::Debug for SoftwareTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareTexture")
            .field("id", &self.0.id)
            .field("label", &self.0.label)
            .field("extent", &self.extent())
            .finish()
    }
}

struct SurfaceInner {
    texture: SoftwareTexture,
    level: u32,
    _tracking: ResourceHandle,
}

/// Renderable level of a [`SoftwareTexture`]
#[derive(Clone)]
pub struct SoftwareSurface(Rc<SurfaceInner>);

impl SoftwareSurface {
    pub fn texture(&self) -> &SoftwareTexture {
        &self.0.texture
    }

    pub fn level(&self) -> u32 {
        self.0.level
    }
}

impl fmt::Debug for SoftwareSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareSurface")
            .field("texture", &self.0.texture.id())
            .field("level", &self.0.level)
            .finish()
    }
}

#[derive(Debug)]
pub struct SoftwareVertexLayout {
    id: ResourceId,
    elements: Vec<VertexElement>,
    stride: u32,
    _tracking: ResourceHandle,
}

impl SoftwareVertexLayout {
    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }
}

#[derive(Default)]
struct DeviceState {
    render_target: Option<Weak<SurfaceInner>>,
    vertex_layout: Option<ResourceId>,
    faults: Vec<Fault>,
    creations_since_fault: u32,
}

/// Single-threaded CPU rasterizer driving [`SoftwareProgram`] kernels
pub struct SoftwareDevice {
    program: SoftwareProgram,
    registry: Rc<ResourceRegistry>,
    log: CommandLog,
    state: RefCell<DeviceState>,
    next_id: Cell<ResourceId>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// Device whose effects run the reference MLAA kernels
    pub fn new() -> Self {
        Self::with_program(SoftwareProgram::mlaa_reference())
    }

    pub fn with_program(program: SoftwareProgram) -> Self {
        Self {
            program,
            registry: ResourceRegistry::new(),
            log: Rc::new(RefCell::new(Vec::new())),
            state: RefCell::new(DeviceState::default()),
            next_id: Cell::new(1),
        }
    }

    pub fn stats(&self) -> ResourceStats {
        self.registry.snapshot()
    }

    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.log.borrow().clone()
    }

    pub fn clear_commands(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn inject_fault(&self, fault: Fault) {
        let mut state = self.state.borrow_mut();
        state.faults.push(fault);
        state.creations_since_fault = 0;
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.borrow_mut();
        state.faults.clear();
        state.creations_since_fault = 0;
    }

    /// RGBA8 texture usable both as a source and as a render target
    pub fn create_color_texture(&self, width: u32, height: u32, rgba: &[u8]) -> MlaaResult<SoftwareTexture> {
        let image = SoftImage::from_rgba8(width, height, rgba).ok_or_else(|| {
            MlaaError::invalid(format!(
                "{width}x{height} RGBA8 texture needs {} bytes, got {}",
                width as usize * height as usize * 4,
                rgba.len()
            ))
        })?;
        self.creation_gate("create color texture")?;
        Ok(self.new_texture("color", true, image))
    }

    /// Single-channel float texture for depth edge detection
    pub fn create_depth_texture(&self, width: u32, height: u32, depth: &[f32]) -> MlaaResult<SoftwareTexture> {
        let image = SoftImage::from_depth(width, height, depth).ok_or_else(|| {
            MlaaError::invalid(format!(
                "{width}x{height} depth texture needs {} values, got {}",
                width as usize * height as usize,
                depth.len()
            ))
        })?;
        self.creation_gate("create depth texture")?;
        Ok(self.new_texture("depth", false, image))
    }

    pub fn read_rgba8(&self, texture: &SoftwareTexture) -> Vec<u8> {
        texture.0.image.borrow().to_rgba8()
    }

    pub fn read_image(&self, texture: &SoftwareTexture) -> SoftImage {
        texture.snapshot()
    }

    fn allocate_id(&self) -> ResourceId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn record(&self, command: DeviceCommand) {
        self.log.borrow_mut().push(command);
    }

    fn reject(&self, call: &str, err: MlaaError) -> MlaaError {
        self.record(DeviceCommand::Rejected {
            call: call.to_string(),
        });
        err
    }

    fn lost(&self) -> bool {
        self.state.borrow().faults.contains(&Fault::DeviceLost)
    }

    /// Any non-creation call: fails only on a lost device
    fn call_gate(&self, call: &str) -> MlaaResult<()> {
        if self.lost() {
            return Err(self.reject(call, MlaaError::submission(format!("{call}: device lost"))));
        }
        Ok(())
    }

    fn creation_gate(&self, call: &str) -> MlaaResult<()> {
        if self.lost() {
            return Err(self.reject(call, MlaaError::resource(format!("{call}: device lost"))));
        }
        let mut state = self.state.borrow_mut();
        let count = state.creations_since_fault;
        state.creations_since_fault += 1;
        let out_of_memory = state
            .faults
            .iter()
            .any(|f| matches!(f, Fault::CreationFailure { nth } if *nth == count));
        drop(state);

        if out_of_memory {
            return Err(self.reject(call, MlaaError::resource(format!("{call}: out of memory"))));
        }
        Ok(())
    }

    fn new_texture(&self, label: &str, render_target: bool, image: SoftImage) -> SoftwareTexture {
        SoftwareTexture(Rc::new(TextureInner {
            id: self.allocate_id(),
            label: label.to_string(),
            render_target,
            image: RefCell::new(image),
            _tracking: ResourceHandle::register(&self.registry, ResourceKind::Texture),
        }))
    }

    fn current_target(&self, call: &str) -> MlaaResult<SoftwareSurface> {
        let target = self
            .state
            .borrow()
            .render_target
            .as_ref()
            .and_then(Weak::upgrade)
            .map(SoftwareSurface);
        target.ok_or_else(|| self.reject(call, MlaaError::submission(format!("{call}: no render target"))))
    }
}

/// Samples this close outside a triangle still count as covered; the shared
/// diagonal is resolved by first-come coverage instead
const COVERAGE_EPSILON: f32 = 1e-6;

/// Window-space position of a clip-space vertex on a `w × h` target
fn to_window(position: [f32; 3], w: f32, h: f32) -> Vec2 {
    Vec2::new((position[0] + 1.0) * 0.5 * w, (1.0 - position[1]) * 0.5 * h)
}

fn edge_function(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

impl GraphicsDevice for SoftwareDevice {
    type Texture = SoftwareTexture;
    type Surface = SoftwareSurface;
    type Effect = SoftwareEffect;
    type VertexLayout = SoftwareVertexLayout;

    fn pixel_center(&self) -> PixelCenter {
        PixelCenter::HalfTexel
    }

    fn create_effect(&self, source: &ShaderSource) -> MlaaResult<SoftwareEffect> {
        self.creation_gate("CreateEffect")?;
        if source.code.trim().is_empty() {
            return Err(self.reject("CreateEffect", MlaaError::shader("effect source is empty")));
        }
        let effect = SoftwareEffect::compile(&self.program, source, Rc::clone(&self.log), &self.registry)
            .map_err(|e| self.reject("CreateEffect", e))?;
        self.record(DeviceCommand::CreateEffect {
            defines: source.defines.clone(),
        });
        Ok(effect)
    }

    fn create_vertex_layout(&self, elements: &[VertexElement]) -> MlaaResult<SoftwareVertexLayout> {
        if !elements.iter().any(|e| e.usage == VertexUsage::Position) {
            return Err(self.reject(
                "CreateVertexDeclaration",
                MlaaError::invalid("vertex layout has no position element"),
            ));
        }
        self.creation_gate("CreateVertexDeclaration")?;

        let stride = elements
            .iter()
            .map(|e| e.offset + e.format.size())
            .max()
            .unwrap_or(0);
        let layout = SoftwareVertexLayout {
            id: self.allocate_id(),
            elements: elements.to_vec(),
            stride,
            _tracking: ResourceHandle::register(&self.registry, ResourceKind::VertexLayout),
        };
        self.record(DeviceCommand::CreateVertexLayout {
            layout: layout.id,
            stride,
        });
        Ok(layout)
    }

    fn create_render_target(&self, desc: &RenderTargetDesc) -> MlaaResult<SoftwareTexture> {
        if desc.width == 0 || desc.height == 0 {
            return Err(self.reject(
                "CreateTexture",
                MlaaError::invalid(format!("{} must not be empty", desc.label)),
            ));
        }
        self.creation_gate("CreateTexture")?;
        let texture = self.new_texture(&desc.label, true, SoftImage::new(desc.width, desc.height));
        self.record(DeviceCommand::CreateRenderTarget {
            texture: texture.id(),
            width: desc.width,
            height: desc.height,
        });
        Ok(texture)
    }

    fn surface_level(&self, texture: &SoftwareTexture, level: u32) -> MlaaResult<SoftwareSurface> {
        if level != 0 {
            return Err(self.reject(
                "GetSurfaceLevel",
                MlaaError::invalid(format!("{} has a single level, asked for {level}", texture.label())),
            ));
        }
        if !texture.0.render_target {
            return Err(self.reject(
                "GetSurfaceLevel",
                MlaaError::invalid(format!("{} is not a render target", texture.label())),
            ));
        }
        self.creation_gate("GetSurfaceLevel")?;
        self.record(DeviceCommand::SurfaceLevel {
            texture: texture.id(),
            level,
        });
        Ok(SoftwareSurface(Rc::new(SurfaceInner {
            texture: texture.clone(),
            level,
            _tracking: ResourceHandle::register(&self.registry, ResourceKind::Surface),
        })))
    }

    fn create_lookup_texture(&self, image: &LookupImage, label: &str) -> MlaaResult<SoftwareTexture> {
        self.creation_gate("CreateTexture")?;
        let texture = self.new_texture(label, false, SoftImage::from_lookup(image));
        self.record(DeviceCommand::CreateLookupTexture {
            texture: texture.id(),
            width: image.width(),
            height: image.height(),
        });
        Ok(texture)
    }

    fn texture_extent(&self, texture: &SoftwareTexture) -> (u32, u32) {
        texture.extent()
    }

    fn set_vertex_layout(&self, layout: &SoftwareVertexLayout) -> MlaaResult<()> {
        self.call_gate("SetVertexDeclaration")?;
        self.state.borrow_mut().vertex_layout = Some(layout.id);
        self.record(DeviceCommand::SetVertexLayout { layout: layout.id });
        Ok(())
    }

    fn set_render_target(&self, surface: &SoftwareSurface) -> MlaaResult<()> {
        self.call_gate("SetRenderTarget")?;
        self.state.borrow_mut().render_target = Some(Rc::downgrade(&surface.0));
        self.record(DeviceCommand::SetRenderTarget {
            texture: surface.texture().id(),
        });
        Ok(())
    }

    fn clear(&self, color: [f32; 4]) -> MlaaResult<()> {
        self.call_gate("Clear")?;
        let target = self.current_target("Clear")?;
        target.texture().0.image.borrow_mut().fill(Vec4::from_array(color));
        self.record(DeviceCommand::Clear { color });
        Ok(())
    }

    fn draw_triangle_strip(&self, effect: &SoftwareEffect, vertices: &[QuadVertex]) -> MlaaResult<()> {
        self.call_gate("DrawPrimitive")?;
        if self.state.borrow().faults.contains(&Fault::DrawFailure) {
            return Err(self.reject("DrawPrimitive", MlaaError::submission("DrawPrimitive: draw rejected")));
        }
        if self.state.borrow().vertex_layout.is_none() {
            return Err(self.reject(
                "DrawPrimitive",
                MlaaError::submission("DrawPrimitive: no vertex layout set"),
            ));
        }
        if vertices.len() < 3 {
            return Err(self.reject(
                "DrawPrimitive",
                MlaaError::invalid(format!("triangle strip needs 3 vertices, got {}", vertices.len())),
            ));
        }
        let target = self.current_target("DrawPrimitive")?;
        // Sources are snapshotted here, before the target is written.
        let (technique, kernel, context) = effect
            .prepare_draw()
            .map_err(|e| self.reject("DrawPrimitive", e))?;

        let mut image = target.texture().0.image.borrow_mut();
        let (width, height) = image.extent();
        let (w, h) = (width as f32, height as f32);
        let center = match self.pixel_center() {
            PixelCenter::HalfTexel => Vec2::ZERO,
            PixelCenter::Centered => Vec2::splat(0.5),
        };

        let mut covered = vec![false; width as usize * height as usize];
        for tri in vertices.windows(3) {
            let p = [0, 1, 2].map(|i| to_window(tri[i].position, w, h));
            let uv = [0, 1, 2].map(|i| Vec2::from_array(tri[i].texcoord));
            let area = edge_function(p[0], p[1], p[2]);
            if area == 0.0 {
                continue;
            }

            let min = p[0].min(p[1]).min(p[2]) - center;
            let max = p[0].max(p[1]).max(p[2]) - center;
            let x0 = min.x.ceil().max(0.0) as u32;
            let y0 = min.y.ceil().max(0.0) as u32;
            let x1 = (max.x.floor().min(w - 1.0)).max(-1.0);
            let y1 = (max.y.floor().min(h - 1.0)).max(-1.0);
            if x1 < 0.0 || y1 < 0.0 {
                continue;
            }

            for y in y0..=y1 as u32 {
                for x in x0..=x1 as u32 {
                    let index = y as usize * width as usize + x as usize;
                    if covered[index] {
                        continue;
                    }
                    let sample = Vec2::new(x as f32, y as f32) + center;
                    let b0 = edge_function(p[1], p[2], sample) / area;
                    let b1 = edge_function(p[2], p[0], sample) / area;
                    let b2 = edge_function(p[0], p[1], sample) / area;
                    if b0 < -COVERAGE_EPSILON || b1 < -COVERAGE_EPSILON || b2 < -COVERAGE_EPSILON {
                        continue;
                    }
                    covered[index] = true;
                    let texcoord = uv[0] * b0 + uv[1] * b1 + uv[2] * b2;
                    if let Some(color) = kernel(&context, texcoord) {
                        image.write(x, y, color);
                    }
                }
            }
        }
        drop(image);

        self.record(DeviceCommand::Draw {
            technique,
            target: target.texture().id(),
            vertices: vertices.to_vec(),
        });
        Ok(())
    }
}

impl fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("stats", &self.stats())
            .field("commands", &self.log.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quad::FullscreenQuad;

    #[test]
    fn creation_fault_hits_only_the_nth_call() {
        let device = SoftwareDevice::new();
        device.inject_fault(Fault::CreationFailure { nth: 1 });
        let desc = RenderTargetDesc {
            label: "t".into(),
            width: 2,
            height: 2,
        };
        assert!(device.create_render_target(&desc).is_ok());
        assert!(matches!(
            device.create_render_target(&desc),
            Err(MlaaError::ResourceCreation(_))
        ));
        assert!(device.create_render_target(&desc).is_ok());
        assert!(device
            .commands()
            .contains(&DeviceCommand::Rejected { call: "CreateTexture".into() }));
    }

    #[test]
    fn clear_needs_a_live_target() {
        let device = SoftwareDevice::new();
        assert!(device.clear([0.0; 4]).is_err());

        let texture = device.create_color_texture(2, 2, &[255; 16]).unwrap();
        let surface = device.surface_level(&texture, 0).unwrap();
        device.set_render_target(&surface).unwrap();
        device.clear([0.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(device.read_rgba8(&texture), [0, 0, 0, 255].repeat(4));

        drop(surface);
        assert!(device.clear([0.0; 4]).is_err());
    }

    #[test]
    fn half_texel_quad_covers_every_pixel_once() {
        use crate::device::EffectProgram;
        use crate::software::program::FragmentContext;

        fn write_uv(_: &FragmentContext, uv: Vec2) -> Option<Vec4> {
            Some(Vec4::new(uv.x, uv.y, 0.0, 1.0))
        }
        let program = SoftwareProgram::new().with_technique("uv", write_uv);
        let device = SoftwareDevice::with_program(program);

        let (w, h) = (5u32, 3u32);
        let mut effect = device
            .create_effect(&ShaderSource::for_frame("uv", w, h))
            .unwrap();
        let layout = device.create_vertex_layout(&crate::quad::QUAD_VERTEX_ELEMENTS).unwrap();
        let target = device
            .create_render_target(&RenderTargetDesc {
                label: "uv".into(),
                width: w,
                height: h,
            })
            .unwrap();
        let surface = device.surface_level(&target, 0).unwrap();

        device.set_vertex_layout(&layout).unwrap();
        device.set_render_target(&surface).unwrap();
        let technique = effect.technique_by_name("uv").unwrap();
        effect.set_technique(technique).unwrap();
        effect.begin().unwrap();
        effect.begin_pass(0).unwrap();
        FullscreenQuad::new(w, h, PixelCenter::HalfTexel)
            .emit(&device, &effect)
            .unwrap();
        effect.end_pass().unwrap();
        effect.end().unwrap();

        let image = device.read_image(&target);
        for y in 0..h {
            for x in 0..w {
                let texel = image.texel(x, y);
                let expected_u = (x as f32 + 0.5) / w as f32;
                let expected_v = (y as f32 + 0.5) / h as f32;
                assert!((texel.x - expected_u).abs() <= 0.5 / 255.0 + 1e-6, "u at ({x},{y})");
                assert!((texel.y - expected_v).abs() <= 0.5 / 255.0 + 1e-6, "v at ({x},{y})");
                assert_eq!(texel.w, 1.0);
            }
        }
    }
}
