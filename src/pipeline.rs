//! Three-pass MLAA pipeline: edge detection, blend-weight calculation and
//! neighborhood blending.
//!
//! Built once per frame size. Every [`Mlaa::run`] submits the three passes in
//! fixed order on the borrowed device; each pass reads the previous pass's target.

use glam::Vec2;

use crate::assets::AssetSource;
use crate::config::{validate_max_search_steps, validate_threshold, InputMode, MlaaConfig};
use crate::device::{EffectProgram, GraphicsDevice, TechniqueHandle};
use crate::error::{self, ErrorPolicy, MlaaError, MlaaResult, StatusLatch};
use crate::quad::{FullscreenQuad, QUAD_VERTEX_ELEMENTS};
use crate::shader::{pixel_size, EffectBindings, ShaderSource};
use crate::storage::{ExternalStorage, RenderSurface};

const TRANSPARENT_BLACK: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

/// MLAA pipeline bound to one device and one frame size.
///
/// Owns the effect, the vertex layout, both lookup tables and whichever of the
/// edge/blend targets it allocated. Borrowed targets and the device are never
/// released here. To change resolution, drop the pipeline and build a new one.
pub struct Mlaa<'a, D: GraphicsDevice> {
    device: &'a D,
    width: u32,
    height: u32,
    threshold: f32,
    max_search_steps: u32,
    policy: ErrorPolicy,
    status: StatusLatch,
    effect: D::Effect,
    bindings: EffectBindings,
    vertex_layout: D::VertexLayout,
    quad: FullscreenQuad,
    edges: RenderSurface<'a, D>,
    blend: RenderSurface<'a, D>,
    area_texture: D::Texture,
    search_texture: D::Texture,
}

/// Trace a construction failure the way the policy asks and hand it back.
fn init_failure(policy: ErrorPolicy, call: &str, err: MlaaError) -> MlaaError {
    match policy {
        ErrorPolicy::Strict => {
            log::error!(target: "mlaa", "[{}] {} failed: {}", err.category(), call, err)
        }
        ErrorPolicy::Permissive => {
            log::warn!(target: "mlaa", "[{}] {} failed: {}", err.category(), call, err)
        }
    }
    err
}

impl<'a, D: GraphicsDevice> Mlaa<'a, D> {
    /// Build a pipeline with default tunables (threshold 0.1, 8 search steps)
    pub fn new(
        device: &'a D,
        width: u32,
        height: u32,
        storage: ExternalStorage<'a, D>,
        assets: &dyn AssetSource,
    ) -> MlaaResult<Self> {
        Self::with_config(device, width, height, storage, assets, MlaaConfig::default())
    }

    /// Build a pipeline.
    ///
    /// Any failing step aborts construction; resources created before it are
    /// released as they drop.
    pub fn with_config(
        device: &'a D,
        width: u32,
        height: u32,
        storage: ExternalStorage<'a, D>,
        assets: &dyn AssetSource,
        config: MlaaConfig,
    ) -> MlaaResult<Self> {
        let policy = config.error_policy;
        let step = |call: &str, err: MlaaError| init_failure(policy, call, err);

        config.validate().map_err(|e| step("validate config", e))?;
        if width == 0 || height == 0 {
            return Err(step(
                "validate extent",
                MlaaError::invalid(format!("frame size must be positive, got {width}x{height}")),
            ));
        }

        let code = assets.shader_code().map_err(|e| step("load effect source", e))?;
        let source = ShaderSource::for_frame(code, width, height);
        let effect = device
            .create_effect(&source)
            .map_err(|e| step("CreateEffect", e))?;

        let vertex_layout = device
            .create_vertex_layout(&QUAD_VERTEX_ELEMENTS)
            .map_err(|e| step("CreateVertexDeclaration", e))?;

        let edges = RenderSurface::adopt_or_create(device, storage.edges, "mlaa.edges", width, height)
            .map_err(|e| step("create edge storage", e))?;
        let blend = RenderSurface::adopt_or_create(device, storage.blend, "mlaa.blend", width, height)
            .map_err(|e| step("create blend storage", e))?;

        let area_image = assets.area_table().map_err(|e| step("load area table", e))?;
        let area_texture = device
            .create_lookup_texture(&area_image, "mlaa.area")
            .map_err(|e| step("create area texture", e))?;

        let search_image = assets
            .search_table()
            .map_err(|e| step("load search table", e))?;
        let search_texture = device
            .create_lookup_texture(&search_image, "mlaa.search")
            .map_err(|e| step("create search texture", e))?;

        let bindings = EffectBindings::resolve(&effect).map_err(|e| step("resolve effect handles", e))?;

        log::info!(
            target: "mlaa",
            "MLAA pipeline {}x{} ready: edges {}, blend {}, area {}x{}, search {}x{}, policy {}",
            width,
            height,
            if edges.is_owned() { "owned" } else { "borrowed" },
            if blend.is_owned() { "owned" } else { "borrowed" },
            area_image.width(),
            area_image.height(),
            search_image.width(),
            search_image.height(),
            policy,
        );

        Ok(Self {
            device,
            width,
            height,
            threshold: config.threshold,
            max_search_steps: config.max_search_steps,
            policy,
            status: StatusLatch::new(),
            effect,
            bindings,
            vertex_layout,
            quad: FullscreenQuad::new(width, height, device.pixel_center()),
            edges,
            blend,
            area_texture,
            search_texture,
        })
    }

    /// Antialias `source` into `destination`.
    ///
    /// `input` feeds edge detection: usually `source` itself for luma/color, a
    /// depth texture for [`InputMode::Depth`]. Returns after all three passes are
    /// submitted. Under the permissive policy, failing calls do not stop the later
    /// passes; the first one is returned at the end and stays in [`Mlaa::status`].
    pub fn run(
        &mut self,
        input: &D::Texture,
        source: &D::Texture,
        destination: &D::Surface,
        mode: InputMode,
    ) -> MlaaResult<()> {
        self.status.begin_frame();

        let result = self.device.set_vertex_layout(&self.vertex_layout);
        self.check("SetVertexDeclaration", result)?;

        self.edges_detection_pass(input, mode)?;
        self.blending_weights_calculation_pass()?;
        self.neighborhood_blending_pass(source, destination)?;

        self.status.frame_result()
    }

    /// [`Mlaa::run`] for callers holding an untyped mode (0 luma, 1 color, 2 depth).
    ///
    /// An unknown value aborts before any device call, under either policy.
    pub fn run_raw(
        &mut self,
        input: &D::Texture,
        source: &D::Texture,
        destination: &D::Surface,
        mode: u32,
    ) -> MlaaResult<()> {
        let mode = match InputMode::try_from(mode) {
            Ok(mode) => mode,
            Err(err) => {
                log::error!(target: "mlaa", "[{}] edge detection aborted: {}", err.category(), err);
                self.status.latch(err.clone());
                return Err(err);
            }
        };
        self.run(input, source, destination, mode)
    }

    fn edges_detection_pass(&mut self, input: &D::Texture, mode: InputMode) -> MlaaResult<()> {
        let device = self.device;

        let result = device.set_render_target(&self.edges.surface);
        self.check("SetRenderTarget(edges)", result)?;
        let result = device.clear(TRANSPARENT_BLACK);
        self.check("Clear(edges)", result)?;

        let result = self.effect.set_float(self.bindings.threshold, self.threshold);
        self.check("SetFloat(threshold)", result)?;
        let result = self
            .effect
            .set_float(self.bindings.max_search_steps, self.max_search_steps as f32);
        self.check("SetFloat(maxSearchSteps)", result)?;

        let (slot, technique) = self.bindings.edge_detection(mode);
        let result = self.effect.set_texture(slot, input);
        self.check("SetTexture(edge input)", result)?;
        let result = self.effect.set_technique(technique);
        self.check("SetTechnique(edge detection)", result)?;

        self.render_quad(technique)
    }

    fn blending_weights_calculation_pass(&mut self) -> MlaaResult<()> {
        let device = self.device;

        let result = device.set_render_target(&self.blend.surface);
        self.check("SetRenderTarget(blend)", result)?;
        let result = device.clear(TRANSPARENT_BLACK);
        self.check("Clear(blend)", result)?;

        let result = self.effect.set_texture(self.bindings.edges_tex, &self.edges.texture);
        self.check("SetTexture(edgesTex2D)", result)?;
        let result = self.effect.set_texture(self.bindings.area_tex, &self.area_texture);
        self.check("SetTexture(areaTex2D)", result)?;
        let result = self.effect.set_texture(self.bindings.search_tex, &self.search_texture);
        self.check("SetTexture(searchTex2D)", result)?;

        let technique = self.bindings.blend_weight_calculation;
        let result = self.effect.set_technique(technique);
        self.check("SetTechnique(blend weights)", result)?;

        self.render_quad(technique)
    }

    fn neighborhood_blending_pass(
        &mut self,
        source: &D::Texture,
        destination: &D::Surface,
    ) -> MlaaResult<()> {
        let device = self.device;

        // No clear: the quad overwrites every destination pixel.
        let result = device.set_render_target(destination);
        self.check("SetRenderTarget(destination)", result)?;

        let result = self.effect.set_texture(self.bindings.color_tex, source);
        self.check("SetTexture(colorTex2D)", result)?;
        let result = self.effect.set_texture(self.bindings.blend_tex, &self.blend.texture);
        self.check("SetTexture(blendTex2D)", result)?;

        let technique = self.bindings.neighborhood_blending;
        let result = self.effect.set_technique(technique);
        self.check("SetTechnique(neighborhood blending)", result)?;

        self.render_quad(technique)
    }

    /// One pass of the selected technique over the full-screen quad
    fn render_quad(&mut self, technique: TechniqueHandle) -> MlaaResult<()> {
        let result = self.effect.begin().map(|passes| {
            if passes != 1 {
                log::debug!(
                    target: "mlaa",
                    "technique {} has {} passes, running pass 0 only",
                    technique.index(),
                    passes
                );
            }
        });
        self.check("Begin", result)?;

        let result = self.effect.begin_pass(0);
        self.check("BeginPass", result)?;
        let result = self.quad.emit(self.device, &self.effect);
        self.check("DrawPrimitive(quad)", result)?;
        let result = self.effect.end_pass();
        self.check("EndPass", result)?;
        let result = self.effect.end();
        self.check("End", result)
    }

    fn check(&mut self, call: &str, result: MlaaResult<()>) -> MlaaResult<()> {
        error::check(self.policy, &mut self.status, call, result)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Reciprocal pixel size injected into the effect
    pub fn pixel_size(&self) -> Vec2 {
        pixel_size(self.width, self.height)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Takes effect on the next run
    pub fn set_threshold(&mut self, threshold: f32) -> MlaaResult<()> {
        validate_threshold(threshold)?;
        self.threshold = threshold;
        Ok(())
    }

    pub fn max_search_steps(&self) -> u32 {
        self.max_search_steps
    }

    /// Takes effect on the next run
    pub fn set_max_search_steps(&mut self, steps: u32) -> MlaaResult<()> {
        validate_max_search_steps(steps)?;
        self.max_search_steps = steps;
        Ok(())
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// First failure since construction or the last [`Mlaa::clear_status`]
    pub fn status(&self) -> MlaaResult<()> {
        self.status.status()
    }

    pub fn failure_count(&self) -> u32 {
        self.status.failure_count()
    }

    pub fn clear_status(&mut self) {
        self.status.clear();
    }

    pub fn owns_edge_storage(&self) -> bool {
        self.edges.is_owned()
    }

    pub fn owns_blend_storage(&self) -> bool {
        self.blend.is_owned()
    }

    /// Edge map written by the first pass
    pub fn edge_texture(&self) -> &D::Texture {
        &self.edges.texture
    }

    /// Blend-weight map written by the second pass
    pub fn blend_texture(&self) -> &D::Texture {
        &self.blend.texture
    }

    pub fn area_texture(&self) -> &D::Texture {
        &self.area_texture
    }

    pub fn search_texture(&self) -> &D::Texture {
        &self.search_texture
    }

    pub fn quad(&self) -> &FullscreenQuad {
        &self.quad
    }

    pub fn bindings(&self) -> &EffectBindings {
        &self.bindings
    }

    pub fn effect(&self) -> &D::Effect {
        &self.effect
    }
}
