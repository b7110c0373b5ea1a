//! Morphological antialiasing (MLAA) as a three-pass post-process.
//!
//! [`Mlaa`] drives edge detection, blend-weight calculation and neighborhood
//! blending through any [`GraphicsDevice`]. Two devices ship with the crate:
//! [`gpu::WgpuDevice`] runs the WGSL effect on wgpu, and
//! [`software::SoftwareDevice`] runs the same kernels on the CPU while recording
//! every call it receives.

pub mod assets;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod gpu;
pub mod pipeline;
pub mod quad;
pub mod shader;
pub mod software;
pub mod storage;
pub mod util;

pub use assets::{
    AssetSource, DirectoryAssets, LookupFormat, LookupImage, MemoryAssets, BUILTIN_WGSL,
};
pub use config::{InputMode, MlaaConfig, DEFAULT_MAX_SEARCH_STEPS, DEFAULT_THRESHOLD};
pub use device::{
    EffectProgram, GraphicsDevice, ParameterHandle, PixelCenter, RenderTargetDesc,
    TechniqueHandle, VertexElement,
};
pub use error::{ErrorPolicy, MlaaError, MlaaResult};
pub use pipeline::Mlaa;
pub use quad::{FullscreenQuad, QuadVertex};
pub use shader::{EffectBindings, ShaderSource};
pub use storage::{ExternalStorage, RenderSurface, SurfacePair};
