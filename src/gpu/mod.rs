//! wgpu backend: WGSL effects compiled and reflected through naga.

pub mod context;
pub mod device;
pub mod effect;

pub use context::{align_copy_bpr, ctx, engine_info, EngineInfo, GpuContext};
pub use device::{
    WgpuDevice, WgpuSurface, WgpuTexture, WgpuVertexLayout, DEPTH_INPUT_FORMAT, RENDER_TARGET_FORMAT,
};
pub use effect::{reflect, EffectLayout, WgpuEffect, VERTEX_ENTRY_POINT};
