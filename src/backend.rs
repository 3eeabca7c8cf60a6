//! Geometry backends consumed by the graph executor.

use glam::Vec2;

use crate::config::EngineConfig;
use crate::error::PolyResult;
use crate::geometry::{Geometry, Points, Shape};
use crate::histopyramid::{HistoPyramidEngine, HostDevice, UnionStats};

#[cfg(feature = "gpu")]
use crate::histopyramid::gpu::GpuDevice;

/// Operations the executor dispatches to.
#[allow(async_fn_in_trait)]
pub trait Backend {
    async fn create(&self, points: &[Vec2]) -> PolyResult<Geometry>;

    async fn union(&self, geometry: &[Shape]) -> PolyResult<Geometry>;

    async fn split(&self, geometry: &[Shape]) -> PolyResult<Geometry>;

    async fn intersection(&self, geometry: &[Shape]) -> PolyResult<Points>;

    /// Union several independent geometries. The default runs them one by one.
    async fn union_many(&self, geometries: &[Geometry]) -> PolyResult<Vec<Geometry>> {
        let mut results = Vec::with_capacity(geometries.len());
        for geometry in geometries {
            results.push(self.union(geometry).await?);
        }
        Ok(results)
    }
}

impl<B: Backend> Backend for &B {
    async fn create(&self, points: &[Vec2]) -> PolyResult<Geometry> {
        (**self).create(points).await
    }

    async fn union(&self, geometry: &[Shape]) -> PolyResult<Geometry> {
        (**self).union(geometry).await
    }

    async fn split(&self, geometry: &[Shape]) -> PolyResult<Geometry> {
        (**self).split(geometry).await
    }

    async fn intersection(&self, geometry: &[Shape]) -> PolyResult<Points> {
        (**self).intersection(geometry).await
    }

    async fn union_many(&self, geometries: &[Geometry]) -> PolyResult<Vec<Geometry>> {
        (**self).union_many(geometries).await
    }
}

/// HistoPyramid engine on the GPU, or on the host when no adapter exists.
pub enum HistoPyramidBackend {
    Host(HistoPyramidEngine<HostDevice>),
    #[cfg(feature = "gpu")]
    Gpu(HistoPyramidEngine<GpuDevice>),
}

impl HistoPyramidBackend {
    pub fn host(config: EngineConfig) -> Self {
        HistoPyramidBackend::Host(HistoPyramidEngine::host(config))
    }

    /// GPU engine; fails with the memoized `BackendUnavailable` when no device exists.
    #[cfg(feature = "gpu")]
    pub async fn gpu(config: EngineConfig) -> PolyResult<Self> {
        let ctx = crate::gpu::acquire().await?;
        let config = config.sanitized();
        let device = GpuDevice::new(ctx, &config);
        Ok(HistoPyramidBackend::Gpu(HistoPyramidEngine::new(device, config)))
    }

    #[cfg(not(feature = "gpu"))]
    pub async fn gpu(_config: EngineConfig) -> PolyResult<Self> {
        match crate::gpu::acquire().await {
            Ok(_) => Err(crate::error::PolyError::unavailable("built without the gpu feature")),
            Err(err) => Err(err),
        }
    }

    /// GPU engine when preferred and available, host engine otherwise.
    pub async fn auto(config: EngineConfig) -> Self {
        if !config.prefer_gpu {
            return Self::host(config);
        }
        match Self::gpu(config.clone()).await {
            Ok(backend) => backend,
            Err(err) => {
                log::warn!("{}; falling back to the host device", err);
                Self::host(config)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HistoPyramidBackend::Host(_) => "host",
            #[cfg(feature = "gpu")]
            HistoPyramidBackend::Gpu(_) => "gpu",
        }
    }

    pub fn config(&self) -> &EngineConfig {
        match self {
            HistoPyramidBackend::Host(engine) => engine.config(),
            #[cfg(feature = "gpu")]
            HistoPyramidBackend::Gpu(engine) => engine.config(),
        }
    }

    pub fn last_stats(&self) -> Option<UnionStats> {
        match self {
            HistoPyramidBackend::Host(engine) => engine.last_stats(),
            #[cfg(feature = "gpu")]
            HistoPyramidBackend::Gpu(engine) => engine.last_stats(),
        }
    }
}

impl Backend for HistoPyramidBackend {
    /// One counter-clockwise square of half-size `create_radius` per point.
    async fn create(&self, points: &[Vec2]) -> PolyResult<Geometry> {
        let radius = self.config().create_radius;
        Ok(points.iter().map(|&p| Shape::square(p, radius)).collect())
    }

    async fn union(&self, geometry: &[Shape]) -> PolyResult<Geometry> {
        match self {
            HistoPyramidBackend::Host(engine) => engine.union(geometry).await,
            #[cfg(feature = "gpu")]
            HistoPyramidBackend::Gpu(engine) => engine.union(geometry).await,
        }
    }

    async fn split(&self, geometry: &[Shape]) -> PolyResult<Geometry> {
        match self {
            HistoPyramidBackend::Host(engine) => engine.split(geometry).await,
            #[cfg(feature = "gpu")]
            HistoPyramidBackend::Gpu(engine) => engine.split(geometry).await,
        }
    }

    async fn intersection(&self, geometry: &[Shape]) -> PolyResult<Points> {
        match self {
            HistoPyramidBackend::Host(engine) => engine.intersection(geometry).await,
            #[cfg(feature = "gpu")]
            HistoPyramidBackend::Gpu(engine) => engine.intersection(geometry).await,
        }
    }

    async fn union_many(&self, geometries: &[Geometry]) -> PolyResult<Vec<Geometry>> {
        match self {
            HistoPyramidBackend::Host(engine) => engine.union_many(geometries).await,
            #[cfg(feature = "gpu")]
            HistoPyramidBackend::Gpu(engine) => engine.union_many(geometries).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_builds_squares() {
        let backend = HistoPyramidBackend::host(EngineConfig {
            create_radius: 0.5,
            ..EngineConfig::default()
        });
        let shapes = backend.create(&[Vec2::ZERO, Vec2::new(3.0, 0.0)]).await.unwrap();
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[1].bounds().unwrap().min, Vec2::new(2.5, -0.5));
        assert!(shapes[0].signed_area() > 0.0);
    }

    #[tokio::test]
    async fn test_auto_without_gpu_preference_is_host() {
        let backend = HistoPyramidBackend::auto(EngineConfig::default().with_prefer_gpu(false)).await;
        assert_eq!(backend.label(), "host");
    }
}
