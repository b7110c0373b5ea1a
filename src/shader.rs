//! Effect contract: compile-time defines, parameter and technique names, and the
//! handle table resolved from a loaded effect.

use glam::Vec2;

use crate::config::InputMode;
use crate::device::{EffectProgram, ParameterHandle, TechniqueHandle};
use crate::error::{MlaaError, MlaaResult};

/// Name of the injected reciprocal pixel size
pub const PIXEL_SIZE_DEFINE: &str = "MLAA_PIXEL_SIZE";

pub mod params {
    pub const THRESHOLD: &str = "threshold";
    pub const MAX_SEARCH_STEPS: &str = "maxSearchSteps";
    pub const AREA_TEX: &str = "areaTex2D";
    pub const SEARCH_TEX: &str = "searchTex2D";
    pub const COLOR_TEX: &str = "colorTex2D";
    pub const DEPTH_TEX: &str = "depthTex2D";
    pub const EDGES_TEX: &str = "edgesTex2D";
    pub const BLEND_TEX: &str = "blendTex2D";

    pub const ALL: [&str; 8] = [
        THRESHOLD,
        MAX_SEARCH_STEPS,
        AREA_TEX,
        SEARCH_TEX,
        COLOR_TEX,
        DEPTH_TEX,
        EDGES_TEX,
        BLEND_TEX,
    ];
}

pub mod techniques {
    pub const LUMA_EDGE_DETECTION: &str = "LumaEdgeDetection";
    pub const COLOR_EDGE_DETECTION: &str = "ColorEdgeDetection";
    pub const DEPTH_EDGE_DETECTION: &str = "DepthEdgeDetection";
    pub const BLEND_WEIGHT_CALCULATION: &str = "BlendWeightCalculation";
    pub const NEIGHBORHOOD_BLENDING: &str = "NeighborhoodBlending";

    pub const ALL: [&str; 5] = [
        LUMA_EDGE_DETECTION,
        COLOR_EDGE_DETECTION,
        DEPTH_EDGE_DETECTION,
        BLEND_WEIGHT_CALCULATION,
        NEIGHBORHOOD_BLENDING,
    ];
}

/// Reciprocal of the frame size, (1/width, 1/height)
pub fn pixel_size(width: u32, height: u32) -> Vec2 {
    Vec2::new(1.0 / width as f32, 1.0 / height as f32)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DefineValue {
    Float(f32),
    Vec2(Vec2),
}

impl DefineValue {
    /// WGSL constant expression. `{:?}` prints the shortest text that parses back
    /// to the same f32, so the constant is bit-exact.
    pub fn wgsl_expr(&self) -> String {
        match self {
            DefineValue::Float(v) => format!("{v:?}"),
            DefineValue::Vec2(v) => format!("vec2<f32>({:?}, {:?})", v.x, v.y),
        }
    }

    pub fn wgsl_type(&self) -> &'static str {
        match self {
            DefineValue::Float(_) => "f32",
            DefineValue::Vec2(_) => "vec2<f32>",
        }
    }
}

/// Compile-time definition injected ahead of the effect source
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderDefine {
    pub name: String,
    pub value: DefineValue,
}

impl ShaderDefine {
    pub fn new(name: impl Into<String>, value: DefineValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn to_wgsl(&self) -> String {
        format!(
            "const {}: {} = {};",
            self.name,
            self.value.wgsl_type(),
            self.value.wgsl_expr()
        )
    }
}

/// Effect source text plus its compile-time defines
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderSource {
    pub code: String,
    pub defines: Vec<ShaderDefine>,
}

impl ShaderSource {
    /// Source for a `width × height` pipeline, with the pixel size injected
    pub fn for_frame(code: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            code: code.into(),
            defines: vec![ShaderDefine::new(
                PIXEL_SIZE_DEFINE,
                DefineValue::Vec2(pixel_size(width, height)),
            )],
        }
    }

    pub fn define(&self, name: &str) -> Option<&DefineValue> {
        self.defines.iter().find(|d| d.name == name).map(|d| &d.value)
    }

    /// Defines prepended as WGSL `const` declarations
    pub fn to_wgsl(&self) -> String {
        let mut out = String::with_capacity(self.code.len() + 64 * self.defines.len());
        for define in &self.defines {
            out.push_str(&define.to_wgsl());
            out.push('\n');
        }
        out.push_str(&self.code);
        out
    }
}

/// Every parameter and technique handle the three stages use
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectBindings {
    pub threshold: ParameterHandle,
    pub max_search_steps: ParameterHandle,
    pub area_tex: ParameterHandle,
    pub search_tex: ParameterHandle,
    pub color_tex: ParameterHandle,
    pub depth_tex: ParameterHandle,
    pub edges_tex: ParameterHandle,
    pub blend_tex: ParameterHandle,
    pub luma_edge_detection: TechniqueHandle,
    pub color_edge_detection: TechniqueHandle,
    pub depth_edge_detection: TechniqueHandle,
    pub blend_weight_calculation: TechniqueHandle,
    pub neighborhood_blending: TechniqueHandle,
}

impl EffectBindings {
    /// Resolve all names, failing on the first one the effect lacks
    pub fn resolve<E: EffectProgram + ?Sized>(effect: &E) -> MlaaResult<Self> {
        let param = |name: &str| {
            effect
                .parameter_by_name(name)
                .ok_or_else(|| MlaaError::MissingParameter(name.to_string()))
        };
        let technique = |name: &str| {
            effect
                .technique_by_name(name)
                .ok_or_else(|| MlaaError::MissingTechnique(name.to_string()))
        };

        Ok(Self {
            threshold: param(params::THRESHOLD)?,
            max_search_steps: param(params::MAX_SEARCH_STEPS)?,
            area_tex: param(params::AREA_TEX)?,
            search_tex: param(params::SEARCH_TEX)?,
            color_tex: param(params::COLOR_TEX)?,
            depth_tex: param(params::DEPTH_TEX)?,
            edges_tex: param(params::EDGES_TEX)?,
            blend_tex: param(params::BLEND_TEX)?,
            luma_edge_detection: technique(techniques::LUMA_EDGE_DETECTION)?,
            color_edge_detection: technique(techniques::COLOR_EDGE_DETECTION)?,
            depth_edge_detection: technique(techniques::DEPTH_EDGE_DETECTION)?,
            blend_weight_calculation: technique(techniques::BLEND_WEIGHT_CALCULATION)?,
            neighborhood_blending: technique(techniques::NEIGHBORHOOD_BLENDING)?,
        })
    }

    /// Input slot and technique the edge stage uses for `mode`
    pub fn edge_detection(&self, mode: InputMode) -> (ParameterHandle, TechniqueHandle) {
        match mode {
            InputMode::Luma => (self.color_tex, self.luma_edge_detection),
            InputMode::Color => (self.color_tex, self.color_edge_detection),
            InputMode::Depth => (self.depth_tex, self.depth_edge_detection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_size_is_exact_reciprocal() {
        for (w, h) in [(1, 1), (4, 4), (640, 480), (1920, 1080), (7, 13), (16384, 3)] {
            let source = ShaderSource::for_frame("", w, h);
            let Some(DefineValue::Vec2(size)) = source.define(PIXEL_SIZE_DEFINE) else {
                panic!("pixel size define missing");
            };
            assert_eq!(size.x, 1.0 / w as f32);
            assert_eq!(size.y, 1.0 / h as f32);
        }
    }

    #[test]
    fn wgsl_define_parses_back_to_same_bits() {
        let source = ShaderSource::for_frame("// body", 1920, 1080);
        let text = source.to_wgsl();
        let line = text.lines().next().unwrap();
        assert!(line.starts_with("const MLAA_PIXEL_SIZE: vec2<f32> = vec2<f32>("));

        let inner = line
            .trim_start_matches("const MLAA_PIXEL_SIZE: vec2<f32> = vec2<f32>(")
            .trim_end_matches(");");
        let parts: Vec<f32> = inner.split(", ").map(|p| p.parse().unwrap()).collect();
        assert_eq!(parts[0].to_bits(), (1.0f32 / 1920.0).to_bits());
        assert_eq!(parts[1].to_bits(), (1.0f32 / 1080.0).to_bits());
        assert!(text.ends_with("// body"));
    }
}
