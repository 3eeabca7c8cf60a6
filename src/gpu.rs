//! Memoized wgpu device acquisition.
//!
//! The adapter request runs once per process; both the device and a
//! `BackendUnavailable` outcome are cached so later callers never retry.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::PolyResult;
#[cfg(feature = "gpu")]
use crate::error::PolyError;

/// Device and queue shared by every GPU engine in the process.
#[cfg(feature = "gpu")]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_info: wgpu::AdapterInfo,
    pub limits: wgpu::Limits,
}

#[cfg(not(feature = "gpu"))]
pub struct GpuContext;

static CONTEXT: Lazy<tokio::sync::OnceCell<PolyResult<Arc<GpuContext>>>> = Lazy::new(tokio::sync::OnceCell::new);

/// Acquire the process-wide compute device, requesting it on first use only.
pub async fn acquire() -> PolyResult<Arc<GpuContext>> {
    CONTEXT.get_or_init(open_device).await.clone()
}

#[cfg(feature = "gpu")]
async fn open_device() -> PolyResult<Arc<GpuContext>> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| PolyError::unavailable("no suitable GPU adapter"))?;

    let limits = adapter.limits();
    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("polyforge-device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
            },
            None,
        )
        .await
        .map_err(|err| PolyError::unavailable(format!("request_device failed: {}", err)))?;

    let adapter_info = adapter.get_info();
    log::info!(
        "acquired GPU adapter {} ({:?})",
        adapter_info.name,
        adapter_info.backend
    );

    Ok(Arc::new(GpuContext {
        device: Arc::new(device),
        queue: Arc::new(queue),
        adapter_info,
        limits,
    }))
}

#[cfg(not(feature = "gpu"))]
async fn open_device() -> PolyResult<Arc<GpuContext>> {
    Err(crate::error::PolyError::unavailable(
        "built without the gpu feature",
    ))
}
