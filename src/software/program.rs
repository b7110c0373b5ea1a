//! Effect programs the software device interprets.
//!
//! A [`SoftwareProgram`] plays the role of compiled shader code: a table of
//! named parameters plus named techniques, each technique being a fragment
//! kernel run once per covered pixel.

use std::rc::Rc;

use glam::{Vec2, Vec4};

use super::device::{CommandLog, DeviceCommand, SoftwareTexture};
use super::image::SoftImage;
use super::kernels;
use super::tracker::{ResourceHandle, ResourceKind, ResourceRegistry};
use crate::device::{EffectProgram, ParameterHandle, TechniqueHandle};
use crate::error::{MlaaError, MlaaResult};
use crate::shader::{params, techniques, DefineValue, ShaderSource, PIXEL_SIZE_DEFINE};

/// Fragment kernel: `None` discards the fragment and leaves the target untouched
pub type Kernel = fn(&FragmentContext, Vec2) -> Option<Vec4>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    Float,
    Texture,
}

#[derive(Clone, Debug)]
struct ParameterDecl {
    name: String,
    kind: ParameterKind,
}

#[derive(Clone)]
struct TechniqueDecl {
    name: String,
    kernel: Kernel,
}

/// Parameter and technique table of a software effect
#[derive(Clone, Default)]
pub struct SoftwareProgram {
    parameters: Vec<ParameterDecl>,
    techniques: Vec<TechniqueDecl>,
}

impl SoftwareProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, name: &str, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDecl {
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn with_technique(mut self, name: &str, kernel: Kernel) -> Self {
        self.techniques.push(TechniqueDecl {
            name: name.to_string(),
            kernel,
        });
        self
    }

    /// Reference MLAA kernels exposing the full parameter/technique contract
    pub fn mlaa_reference() -> Self {
        Self::new()
            .with_parameter(params::THRESHOLD, ParameterKind::Float)
            .with_parameter(params::MAX_SEARCH_STEPS, ParameterKind::Float)
            .with_parameter(params::AREA_TEX, ParameterKind::Texture)
            .with_parameter(params::SEARCH_TEX, ParameterKind::Texture)
            .with_parameter(params::COLOR_TEX, ParameterKind::Texture)
            .with_parameter(params::DEPTH_TEX, ParameterKind::Texture)
            .with_parameter(params::EDGES_TEX, ParameterKind::Texture)
            .with_parameter(params::BLEND_TEX, ParameterKind::Texture)
            .with_technique(techniques::LUMA_EDGE_DETECTION, kernels::luma_edge_detection)
            .with_technique(techniques::COLOR_EDGE_DETECTION, kernels::color_edge_detection)
            .with_technique(techniques::DEPTH_EDGE_DETECTION, kernels::depth_edge_detection)
            .with_technique(
                techniques::BLEND_WEIGHT_CALCULATION,
                kernels::blend_weight_calculation,
            )
            .with_technique(techniques::NEIGHBORHOOD_BLENDING, kernels::neighborhood_blending)
    }

    /// Same program without one parameter or technique
    pub fn without(mut self, name: &str) -> Self {
        self.parameters.retain(|p| p.name != name);
        self.techniques.retain(|t| t.name != name);
        self
    }
}

#[derive(Clone, Debug)]
enum ParameterValue {
    Unset,
    Float(f32),
    Texture(SoftwareTexture),
}

/// Values visible to a kernel during one draw
pub struct FragmentContext {
    pixel_size: Vec2,
    names: Vec<String>,
    floats: Vec<Option<f32>>,
    textures: Vec<Option<SoftImage>>,
}

impl FragmentContext {
    pub fn pixel_size(&self) -> Vec2 {
        self.pixel_size
    }

    fn slot(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Float parameter, 0.0 when unset
    pub fn float(&self, name: &str) -> f32 {
        self.slot(name)
            .and_then(|i| self.floats[i])
            .unwrap_or(0.0)
    }

    pub fn texture(&self, name: &str) -> Option<&SoftImage> {
        self.slot(name).and_then(|i| self.textures[i].as_ref())
    }

    /// Unbound textures read as transparent black
    pub fn sample_point(&self, name: &str, uv: Vec2) -> Vec4 {
        self.texture(name)
            .map_or(Vec4::ZERO, |t| t.sample_point(uv))
    }

    pub fn sample_linear(&self, name: &str, uv: Vec2) -> Vec4 {
        self.texture(name)
            .map_or(Vec4::ZERO, |t| t.sample_linear(uv))
    }

    /// `uv` lies on the render target
    pub fn in_bounds(&self, uv: Vec2) -> bool {
        uv.cmpge(Vec2::ZERO).all() && uv.cmplt(Vec2::ONE).all()
    }
}

#[derive(Debug, Default)]
struct PassState {
    technique: Option<usize>,
    begun: bool,
    pass: Option<u32>,
}

/// Effect instance created by [`super::SoftwareDevice::create_effect`]
pub struct SoftwareEffect {
    program: SoftwareProgram,
    pixel_size: Vec2,
    values: Vec<ParameterValue>,
    state: PassState,
    log: CommandLog,
    _tracking: ResourceHandle,
}

impl SoftwareEffect {
    pub(crate) fn compile(
        program: &SoftwareProgram,
        source: &ShaderSource,
        log: CommandLog,
        registry: &Rc<ResourceRegistry>,
    ) -> MlaaResult<Self> {
        let pixel_size = match source.define(PIXEL_SIZE_DEFINE) {
            Some(DefineValue::Vec2(size)) => *size,
            Some(other) => {
                return Err(MlaaError::shader(format!(
                    "{PIXEL_SIZE_DEFINE} must be a vec2, got {other:?}"
                )))
            }
            None => return Err(MlaaError::shader(format!("{PIXEL_SIZE_DEFINE} is not defined"))),
        };

        Ok(Self {
            program: program.clone(),
            pixel_size,
            values: vec![ParameterValue::Unset; program.parameters.len()],
            state: PassState::default(),
            log,
            _tracking: ResourceHandle::register(registry, ResourceKind::Effect),
        })
    }

    pub fn pixel_size(&self) -> Vec2 {
        self.pixel_size
    }

    fn parameter(&self, handle: ParameterHandle) -> MlaaResult<&ParameterDecl> {
        self.program
            .parameters
            .get(handle.index() as usize)
            .ok_or_else(|| MlaaError::invalid(format!("no parameter #{}", handle.index())))
    }

    fn record(&self, command: DeviceCommand) {
        self.log.borrow_mut().push(command);
    }

    /// Kernel and context for a draw; fails outside of a begun pass
    pub(crate) fn prepare_draw(&self) -> MlaaResult<(String, Kernel, FragmentContext)> {
        let technique = self
            .state
            .technique
            .ok_or_else(|| MlaaError::submission("draw without a technique"))?;
        if !self.state.begun || self.state.pass.is_none() {
            return Err(MlaaError::submission("draw outside of an effect pass"));
        }
        let decl = &self.program.techniques[technique];

        let mut floats = Vec::with_capacity(self.values.len());
        let mut textures = Vec::with_capacity(self.values.len());
        for value in &self.values {
            match value {
                ParameterValue::Float(v) => {
                    floats.push(Some(*v));
                    textures.push(None);
                }
                ParameterValue::Texture(t) => {
                    floats.push(None);
                    textures.push(Some(t.snapshot()));
                }
                ParameterValue::Unset => {
                    floats.push(None);
                    textures.push(None);
                }
            }
        }

        let context = FragmentContext {
            pixel_size: self.pixel_size,
            names: self.program.parameters.iter().map(|p| p.name.clone()).collect(),
            floats,
            textures,
        };
        Ok((decl.name.clone(), decl.kernel, context))
    }
}

impl EffectProgram for SoftwareEffect {
    type Texture = SoftwareTexture;

    fn parameter_by_name(&self, name: &str) -> Option<ParameterHandle> {
        self.program
            .parameters
            .iter()
            .position(|p| p.name == name)
            .map(|i| ParameterHandle::new(i as u32))
    }

    fn technique_by_name(&self, name: &str) -> Option<TechniqueHandle> {
        self.program
            .techniques
            .iter()
            .position(|t| t.name == name)
            .map(|i| TechniqueHandle::new(i as u32))
    }

    fn set_float(&mut self, parameter: ParameterHandle, value: f32) -> MlaaResult<()> {
        let decl = self.parameter(parameter)?;
        if decl.kind != ParameterKind::Float {
            return Err(MlaaError::invalid(format!("'{}' is not a float", decl.name)));
        }
        let name = decl.name.clone();
        self.values[parameter.index() as usize] = ParameterValue::Float(value);
        self.record(DeviceCommand::SetFloat {
            parameter: name,
            value,
        });
        Ok(())
    }

    fn set_texture(&mut self, parameter: ParameterHandle, texture: &SoftwareTexture) -> MlaaResult<()> {
        let decl = self.parameter(parameter)?;
        if decl.kind != ParameterKind::Texture {
            return Err(MlaaError::invalid(format!("'{}' is not a texture", decl.name)));
        }
        let name = decl.name.clone();
        self.values[parameter.index() as usize] = ParameterValue::Texture(texture.clone());
        self.record(DeviceCommand::SetTexture {
            parameter: name,
            texture: texture.id(),
        });
        Ok(())
    }

    fn set_technique(&mut self, technique: TechniqueHandle) -> MlaaResult<()> {
        let index = technique.index() as usize;
        let decl = self
            .program
            .techniques
            .get(index)
            .ok_or_else(|| MlaaError::invalid(format!("no technique #{index}")))?;
        let name = decl.name.clone();
        self.state.technique = Some(index);
        self.record(DeviceCommand::SetTechnique { technique: name });
        Ok(())
    }

    fn begin(&mut self) -> MlaaResult<u32> {
        if self.state.technique.is_none() {
            return Err(MlaaError::submission("Begin without a technique"));
        }
        self.state.begun = true;
        Ok(1)
    }

    fn begin_pass(&mut self, pass: u32) -> MlaaResult<()> {
        if !self.state.begun {
            return Err(MlaaError::submission("BeginPass outside of Begin/End"));
        }
        if pass != 0 {
            return Err(MlaaError::invalid(format!("technique has one pass, asked for {pass}")));
        }
        self.state.pass = Some(pass);
        self.record(DeviceCommand::BeginPass { pass });
        Ok(())
    }

    fn end_pass(&mut self) -> MlaaResult<()> {
        if self.state.pass.take().is_none() {
            return Err(MlaaError::submission("EndPass without BeginPass"));
        }
        self.record(DeviceCommand::EndPass);
        Ok(())
    }

    fn end(&mut self) -> MlaaResult<()> {
        self.state.begun = false;
        Ok(())
    }
}

impl std::fmt::Debug for SoftwareEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareEffect")
            .field("pixel_size", &self.pixel_size)
            .field("parameters", &self.program.parameters.len())
            .field("techniques", &self.program.techniques.len())
            .finish()
    }
}
