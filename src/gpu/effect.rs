//! WGSL effects: naga reflection of parameters and techniques plus a render
//! pipeline cache.
//!
//! Conventions the reflection relies on, all in bind group 0:
//! - one `var<uniform>` struct whose `f32` members are the float parameters;
//! - sampled 2D float textures, one per texture parameter;
//! - samplers, nearest-filtered when their name contains `point`, linear otherwise;
//! - a vertex entry point `PassThroughVS`; every fragment entry point is a technique.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga::{
    AddressSpace, GlobalVariable, Handle, ImageClass, ImageDimension, ScalarKind, ShaderStage, TypeInner,
};

use super::device::WgpuTexture;
use crate::device::{EffectProgram, ParameterHandle, TechniqueHandle};
use crate::error::{MlaaError, MlaaResult};
use crate::shader::ShaderSource;

pub const VERTEX_ENTRY_POINT: &str = "PassThroughVS";

/// Bind group every effect binding lives in
pub const EFFECT_GROUP: u32 = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParameterSlot {
    /// Byte offset inside the uniform block
    Float { offset: u32 },
    /// Binding index of the texture
    Texture { binding: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReflectedParameter {
    pub name: String,
    pub slot: ParameterSlot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReflectedSampler {
    pub binding: u32,
    pub point: bool,
}

/// What an effect exposes, read from the naga module
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EffectLayout {
    pub parameters: Vec<ReflectedParameter>,
    pub techniques: Vec<String>,
    /// Uniform block binding and its size padded to 16 bytes
    pub uniform: Option<(u32, u32)>,
    pub samplers: Vec<ReflectedSampler>,
}

fn is_f32(inner: &TypeInner) -> bool {
    matches!(
        inner,
        TypeInner::Scalar(naga::Scalar {
            kind: ScalarKind::Float,
            width: 4
        })
    )
}

fn is_sampled_2d(inner: &TypeInner) -> bool {
    matches!(
        inner,
        TypeInner::Image {
            dim: ImageDimension::D2,
            arrayed: false,
            class: ImageClass::Sampled {
                kind: ScalarKind::Float,
                multi: false
            },
        }
    )
}

/// Parse, validate and reflect a WGSL effect
pub fn reflect(code: &str) -> MlaaResult<EffectLayout> {
    let module = naga::front::wgsl::parse_str(code).map_err(|e| MlaaError::shader(e.emit_to_string(code)))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| MlaaError::shader(e.emit_to_string(code)))?;

    let mut layout = EffectLayout::default();

    for (_, var) in module.global_variables.iter() {
        let Some(binding) = var.binding.as_ref() else {
            continue;
        };
        if binding.group != EFFECT_GROUP {
            return Err(MlaaError::shader(format!(
                "binding {}.{} is outside group {EFFECT_GROUP}",
                binding.group, binding.binding
            )));
        }
        let inner = &module.types[var.ty].inner;
        let name = var.name.clone().unwrap_or_default();

        match (var.space, inner) {
            (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                if layout.uniform.is_some() {
                    return Err(MlaaError::shader("more than one uniform block"));
                }
                layout.uniform = Some((binding.binding, (*span).max(16).next_multiple_of(16)));
                for member in members {
                    if !is_f32(&module.types[member.ty].inner) {
                        continue;
                    }
                    if let Some(member_name) = &member.name {
                        layout.parameters.push(ReflectedParameter {
                            name: member_name.clone(),
                            slot: ParameterSlot::Float {
                                offset: member.offset,
                            },
                        });
                    }
                }
            }
            (AddressSpace::Handle, inner) if is_sampled_2d(inner) => {
                layout.parameters.push(ReflectedParameter {
                    name,
                    slot: ParameterSlot::Texture {
                        binding: binding.binding,
                    },
                });
            }
            (AddressSpace::Handle, TypeInner::Sampler { comparison: false }) => {
                layout.samplers.push(ReflectedSampler {
                    binding: binding.binding,
                    point: name.to_ascii_lowercase().contains("point"),
                });
            }
            _ => {
                return Err(MlaaError::shader(format!(
                    "unsupported binding '{name}' at {}.{}",
                    binding.group, binding.binding
                )))
            }
        }
    }

    let mut has_vertex = false;
    for (index, entry) in module.entry_points.iter().enumerate() {
        match entry.stage {
            ShaderStage::Vertex if entry.name == VERTEX_ENTRY_POINT => has_vertex = true,
            ShaderStage::Fragment => {
                check_single_sampler(&module, &info, index)?;
                layout.techniques.push(entry.name.clone());
            }
            _ => {}
        }
    }
    if !has_vertex {
        return Err(MlaaError::shader(format!(
            "vertex entry point '{VERTEX_ENTRY_POINT}' not found"
        )));
    }

    Ok(layout)
}

/// GL pairs each texture with one sampler per entry point; reject effects that
/// would only fail there, at pipeline creation.
fn check_single_sampler(module: &naga::Module, info: &ModuleInfo, entry_index: usize) -> MlaaResult<()> {
    let entry = &module.entry_points[entry_index];
    let mut samplers: HashMap<Handle<GlobalVariable>, Handle<GlobalVariable>> = HashMap::new();
    for key in &info.get_entry_point(entry_index).sampling_set {
        match samplers.insert(key.image, key.sampler) {
            Some(previous) if previous != key.sampler => {
                let texture = module.global_variables[key.image].name.as_deref().unwrap_or("?");
                return Err(MlaaError::shader(format!(
                    "entry point '{}' samples '{texture}' through more than one sampler",
                    entry.name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct PassState {
    technique: Option<usize>,
    begun: bool,
    pass: Option<u32>,
}

type PipelineKey = (usize, wgpu::TextureFormat, u64);

/// Effect created by [`super::WgpuDevice::create_effect`]
pub struct WgpuEffect {
    device: Arc<wgpu::Device>,
    module: wgpu::ShaderModule,
    layout: EffectLayout,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    samplers: Vec<(u32, wgpu::Sampler)>,
    fallback: WgpuTexture,
    uniform_data: Vec<u8>,
    textures: Vec<Option<WgpuTexture>>,
    state: PassState,
    pipelines: RefCell<HashMap<PipelineKey, Arc<wgpu::RenderPipeline>>>,
}

impl WgpuEffect {
    pub(crate) fn compile(
        device: Arc<wgpu::Device>,
        source: &ShaderSource,
        fallback: WgpuTexture,
    ) -> MlaaResult<Self> {
        let code = source.to_wgsl();
        let layout = reflect(&code)?;

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mlaa.effect"),
            source: wgpu::ShaderSource::Wgsl(code.into()),
        });

        let mut entries = Vec::new();
        if let Some((binding, _)) = layout.uniform {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        for parameter in &layout.parameters {
            if let ParameterSlot::Texture { binding } = parameter.slot {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                });
            }
        }
        for sampler in &layout.samplers {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: sampler.binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mlaa.effect.bgl"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mlaa.effect.layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let samplers = layout
            .samplers
            .iter()
            .map(|s| {
                let filter = if s.point {
                    wgpu::FilterMode::Nearest
                } else {
                    wgpu::FilterMode::Linear
                };
                let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some(if s.point { "mlaa.point" } else { "mlaa.linear" }),
                    address_mode_u: wgpu::AddressMode::ClampToEdge,
                    address_mode_v: wgpu::AddressMode::ClampToEdge,
                    address_mode_w: wgpu::AddressMode::ClampToEdge,
                    mag_filter: filter,
                    min_filter: filter,
                    mipmap_filter: wgpu::FilterMode::Nearest,
                    ..Default::default()
                });
                (s.binding, sampler)
            })
            .collect();

        let uniform_size = layout.uniform.map_or(0, |(_, size)| size as usize);
        let texture_slots = layout.parameters.len();

        log::debug!(
            target: "mlaa",
            "effect reflected: {} parameters, techniques {:?}",
            layout.parameters.len(),
            layout.techniques
        );

        Ok(Self {
            device,
            module,
            layout,
            bind_group_layout,
            pipeline_layout,
            samplers,
            fallback,
            uniform_data: vec![0; uniform_size],
            textures: vec![None; texture_slots],
            state: PassState::default(),
            pipelines: RefCell::new(HashMap::new()),
        })
    }

    pub fn layout(&self) -> &EffectLayout {
        &self.layout
    }

    pub fn technique_name(&self, technique: usize) -> Option<&str> {
        self.layout.techniques.get(technique).map(String::as_str)
    }

    /// Technique ready to draw; fails outside of a begun pass
    pub(crate) fn active_technique(&self) -> MlaaResult<usize> {
        let technique = self
            .state
            .technique
            .ok_or_else(|| MlaaError::submission("draw without a technique"))?;
        if !self.state.begun || self.state.pass.is_none() {
            return Err(MlaaError::submission("draw outside of an effect pass"));
        }
        Ok(technique)
    }

    /// Pipeline already built for `technique`, `format` and `vertex`
    pub(crate) fn cached_pipeline(
        &self,
        technique: usize,
        format: wgpu::TextureFormat,
        vertex: &wgpu::VertexBufferLayout<'_>,
    ) -> Option<Arc<wgpu::RenderPipeline>> {
        self.pipelines
            .borrow()
            .get(&(technique, format, vertex.array_stride))
            .cloned()
    }

    /// Keep a pipeline whose creation passed validation
    pub(crate) fn cache_pipeline(
        &self,
        technique: usize,
        format: wgpu::TextureFormat,
        vertex: &wgpu::VertexBufferLayout<'_>,
        pipeline: wgpu::RenderPipeline,
    ) -> Arc<wgpu::RenderPipeline> {
        let pipeline = Arc::new(pipeline);
        self.pipelines
            .borrow_mut()
            .insert((technique, format, vertex.array_stride), Arc::clone(&pipeline));
        pipeline
    }

    pub fn cached_pipelines(&self) -> usize {
        self.pipelines.borrow().len()
    }

    /// Render pipeline for `technique` drawing into `format` with `vertex` layout.
    ///
    /// Not cached here: the caller checks its error scope first.
    pub(crate) fn create_pipeline(
        &self,
        technique: usize,
        format: wgpu::TextureFormat,
        vertex: &wgpu::VertexBufferLayout<'_>,
    ) -> wgpu::RenderPipeline {
        let entry_point = self.layout.techniques[technique].as_str();
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(entry_point),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.module,
                entry_point: VERTEX_ENTRY_POINT,
                buffers: std::slice::from_ref(vertex),
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
                module: &self.module,
                entry_point,
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
        })
    }

    pub(crate) fn uniform_bytes(&self) -> &[u8] {
        &self.uniform_data
    }

    /// Bind group over the current parameter values.
    ///
    /// Unbound textures, and any texture that is also the render target, read the
    /// fallback texture instead.
    pub(crate) fn bind_group(&self, uniform: Option<&wgpu::Buffer>, target: &WgpuTexture) -> wgpu::BindGroup {
        let mut entries = Vec::new();
        if let (Some((binding, _)), Some(buffer)) = (self.layout.uniform, uniform) {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            });
        }
        for (parameter, texture) in self.layout.parameters.iter().zip(&self.textures) {
            if let ParameterSlot::Texture { binding } = parameter.slot {
                let texture = texture
                    .as_ref()
                    .filter(|t| !t.same_as(target))
                    .unwrap_or(&self.fallback);
                entries.push(wgpu::BindGroupEntry {
                    binding,
                    resource: wgpu::BindingResource::TextureView(texture.view()),
                });
            }
        }
        for (binding, sampler) in &self.samplers {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mlaa.effect.bg"),
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }

    fn parameter(&self, handle: ParameterHandle) -> MlaaResult<&ReflectedParameter> {
        self.layout
            .parameters
            .get(handle.index() as usize)
            .ok_or_else(|| MlaaError::invalid(format!("no parameter #{}", handle.index())))
    }
}

impl EffectProgram for WgpuEffect {
    type Texture = WgpuTexture;

    fn parameter_by_name(&self, name: &str) -> Option<ParameterHandle> {
        self.layout
            .parameters
            .iter()
            .position(|p| p.name == name)
            .map(|i| ParameterHandle::new(i as u32))
    }

    fn technique_by_name(&self, name: &str) -> Option<TechniqueHandle> {
        self.layout
            .techniques
            .iter()
            .position(|t| t == name)
            .map(|i| TechniqueHandle::new(i as u32))
    }

    fn set_float(&mut self, parameter: ParameterHandle, value: f32) -> MlaaResult<()> {
        let offset = match self.parameter(parameter)?.slot {
            ParameterSlot::Float { offset } => offset as usize,
            ParameterSlot::Texture { .. } => {
                return Err(MlaaError::invalid(format!(
                    "'{}' is not a float",
                    self.layout.parameters[parameter.index() as usize].name
                )))
            }
        };
        self.uniform_data[offset..offset + 4].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    fn set_texture(&mut self, parameter: ParameterHandle, texture: &WgpuTexture) -> MlaaResult<()> {
        if let ParameterSlot::Float { .. } = self.parameter(parameter)?.slot {
            return Err(MlaaError::invalid(format!(
                "'{}' is not a texture",
                self.layout.parameters[parameter.index() as usize].name
            )));
        }
        self.textures[parameter.index() as usize] = Some(texture.clone());
        Ok(())
    }

    fn set_technique(&mut self, technique: TechniqueHandle) -> MlaaResult<()> {
        let index = technique.index() as usize;
        if index >= self.layout.techniques.len() {
            return Err(MlaaError::invalid(format!("no technique #{index}")));
        }
        self.state.technique = Some(index);
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
        Ok(())
    }

    fn end_pass(&mut self) -> MlaaResult<()> {
        if self.state.pass.take().is_none() {
            return Err(MlaaError::submission("EndPass without BeginPass"));
        }
        Ok(())
    }

    fn end(&mut self) -> MlaaResult<()> {
        self.state.begun = false;
        Ok(())
    }
}

impl std::fmt::Debug for WgpuEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuEffect")
            .field("layout", &self.layout)
            .field("pipelines", &self.pipelines.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::BUILTIN_WGSL;
    use crate::shader::{params, techniques};

    #[test]
    fn builtin_effect_reflects_full_contract() {
        let source = ShaderSource::for_frame(BUILTIN_WGSL, 64, 32);
        let layout = reflect(&source.to_wgsl()).unwrap();

        for name in params::ALL {
            assert!(
                layout.parameters.iter().any(|p| p.name == name),
                "missing parameter {name}"
            );
        }
        for name in techniques::ALL {
            assert!(layout.techniques.iter().any(|t| t == name), "missing technique {name}");
        }
        let (_, size) = layout.uniform.unwrap();
        assert_eq!(size % 16, 0);
        assert!(layout.samplers.iter().any(|s| s.point));
        assert!(layout.samplers.iter().any(|s| !s.point));
    }

    #[test]
    fn missing_vertex_entry_is_a_shader_error() {
        let code = "@fragment fn Only() -> @location(0) vec4<f32> { return vec4<f32>(0.0); }";
        assert!(matches!(reflect(code), Err(MlaaError::ShaderCompilation(_))));
    }

    #[test]
    fn builtin_techniques_keep_one_sampler_per_texture() {
        let source = ShaderSource::for_frame(BUILTIN_WGSL, 16, 16);
        assert!(reflect(&source.to_wgsl()).is_ok());

        // The blending early-out read through the point sampler again
        let mixed = BUILTIN_WGSL.replace(
            "return linearSample(colorTex2D, uv);",
            "return pointSample(colorTex2D, uv);",
        );
        assert_ne!(mixed, BUILTIN_WGSL);
        let err = reflect(&ShaderSource::for_frame(&mixed, 16, 16).to_wgsl()).unwrap_err();
        assert!(matches!(err, MlaaError::ShaderCompilation(_)));
        assert!(err.to_string().contains("NeighborhoodBlending"), "{err}");
        assert!(err.to_string().contains("colorTex2D"), "{err}");
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(matches!(reflect("fn ("), Err(MlaaError::ShaderCompilation(_))));
    }
}
