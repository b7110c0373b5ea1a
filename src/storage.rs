//! Edge and blend storage: owned or borrowed per slot

use std::fmt;
use std::ops::Deref;

use crate::device::{GraphicsDevice, RenderTargetDesc};
use crate::error::{MlaaError, MlaaResult};

/// A 2D render target and its level-0 renderable surface
pub struct SurfacePair<D: GraphicsDevice> {
    pub texture: D::Texture,
    pub surface: D::Surface,
}

impl<D: GraphicsDevice> SurfacePair<D> {
    pub fn new(texture: D::Texture, surface: D::Surface) -> Self {
        Self { texture, surface }
    }

    /// Allocate an RGBA8 render target of `width × height` with its top surface
    pub fn create(device: &D, label: &str, width: u32, height: u32) -> MlaaResult<Self> {
        let texture = device.create_render_target(&RenderTargetDesc {
            label: label.to_string(),
            width,
            height,
        })?;
        let surface = device.surface_level(&texture, 0)?;
        Ok(Self { texture, surface })
    }
}

impl<D: GraphicsDevice> Clone for SurfacePair<D> {
    fn clone(&self) -> Self {
        Self {
            texture: self.texture.clone(),
            surface: self.surface.clone(),
        }
    }
}

impl<D: GraphicsDevice> fmt::Debug for SurfacePair<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfacePair")
            .field("texture", &self.texture)
            .field("surface", &self.surface)
            .finish()
    }
}

/// Storage slot of the pipeline. An owned pair is released when the slot drops;
/// a borrowed pair stays with the caller.
pub enum RenderSurface<'a, D: GraphicsDevice> {
    Owned(SurfacePair<D>),
    Borrowed(&'a SurfacePair<D>),
}

impl<'a, D: GraphicsDevice> RenderSurface<'a, D> {
    /// Adopt `external` when given, otherwise allocate a pair of `width × height`
    pub fn adopt_or_create(
        device: &D,
        external: Option<&'a SurfacePair<D>>,
        label: &str,
        width: u32,
        height: u32,
    ) -> MlaaResult<Self> {
        match external {
            Some(pair) => {
                let extent = device.texture_extent(&pair.texture);
                if extent != (width, height) {
                    return Err(MlaaError::invalid(format!(
                        "external {label} storage is {}x{}, pipeline is {width}x{height}",
                        extent.0, extent.1
                    )));
                }
                Ok(RenderSurface::Borrowed(pair))
            }
            None => Ok(RenderSurface::Owned(SurfacePair::create(
                device, label, width, height,
            )?)),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, RenderSurface::Owned(_))
    }
}

impl<D: GraphicsDevice> Deref for RenderSurface<'_, D> {
    type Target = SurfacePair<D>;

    fn deref(&self) -> &Self::Target {
        match self {
            RenderSurface::Owned(pair) => pair,
            RenderSurface::Borrowed(pair) => pair,
        }
    }
}

impl<D: GraphicsDevice> fmt::Debug for RenderSurface<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderSurface::Owned(pair) => f.debug_tuple("Owned").field(pair).finish(),
            RenderSurface::Borrowed(pair) => f.debug_tuple("Borrowed").field(pair).finish(),
        }
    }
}

/// Caller-provided edge and blend storage; each slot is independent
pub struct ExternalStorage<'a, D: GraphicsDevice> {
    pub edges: Option<&'a SurfacePair<D>>,
    pub blend: Option<&'a SurfacePair<D>>,
}

impl<'a, D: GraphicsDevice> ExternalStorage<'a, D> {
    /// Let the pipeline allocate both targets
    pub fn none() -> Self {
        Self {
            edges: None,
            blend: None,
        }
    }

    pub fn new(edges: Option<&'a SurfacePair<D>>, blend: Option<&'a SurfacePair<D>>) -> Self {
        Self { edges, blend }
    }
}

impl<D: GraphicsDevice> Default for ExternalStorage<'_, D> {
    fn default() -> Self {
        Self::none()
    }
}

impl<D: GraphicsDevice> Clone for ExternalStorage<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: GraphicsDevice> Copy for ExternalStorage<'_, D> {}
