//! Headless GPU context shared by every [`super::WgpuDevice`] built from it.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter: wgpu::Adapter,
}

static CTX: OnceCell<Option<GpuContext>> = OnceCell::new();

fn create_context() -> Option<GpuContext> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;

    let (device, queue) = match pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            label: Some("mlaa-device"),
        },
        None,
    )) {
        Ok(pair) => pair,
        Err(err) => {
            log::warn!(target: "mlaa", "request_device failed: {err}");
            return None;
        }
    };

    Some(GpuContext {
        device: Arc::new(device),
        queue: Arc::new(queue),
        adapter,
    })
}

/// Process-wide headless context, `None` when no adapter is available
pub fn ctx() -> Option<&'static GpuContext> {
    CTX.get_or_init(create_context).as_ref()
}

/// Align to WebGPU's required bytes-per-row for copies.
#[inline]
pub fn align_copy_bpr(unpadded: u32) -> u32 {
    let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    ((unpadded + a - 1) / a) * a
}

/// Adapter information of the shared context
#[derive(Debug, Clone)]
pub struct EngineInfo {
    /// Backend identifier (e.g., "vulkan", "metal", "dx12", "gl").
    pub backend: String,
    pub adapter_name: String,
    /// Maximum 2D texture dimension, the largest frame the pipeline can target.
    pub max_texture_dimension_2d: u32,
}

impl fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineInfo(backend={}, adapter={}, max_tex2d={})",
            self.backend, self.adapter_name, self.max_texture_dimension_2d
        )
    }
}

pub fn engine_info() -> Option<EngineInfo> {
    let ctx = ctx()?;
    let adapter_info = ctx.adapter.get_info();
    Some(EngineInfo {
        backend: format!("{:?}", adapter_info.backend).to_lowercase(),
        adapter_name: adapter_info.name,
        max_texture_dimension_2d: ctx.device.limits().max_texture_dimension_2d,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_rows_align_to_256() {
        assert_eq!(align_copy_bpr(4), 256);
        assert_eq!(align_copy_bpr(256), 256);
        assert_eq!(align_copy_bpr(257), 512);
    }
}
