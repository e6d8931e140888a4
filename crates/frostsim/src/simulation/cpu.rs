//! Explicit-array backend.

use super::backend::{BackendKind, FrostBackend, TextureRef};
use super::height::{GridSize, HeightBuffer};
use super::kernel::WaveParams;
use super::raster::{rasterize, StimulusEvent};
use super::texture::NormalHeightTexture;
use crate::error::Result;

#[cfg(feature = "wgpu")]
use super::wgpu_backend::{DeviceTexture, GpuContext};
#[cfg(feature = "wgpu")]
use std::sync::Arc;

/// Runs the update cell by cell on host memory.
///
/// When a GPU context is attached (typically after the accumulation path
/// failed) every encoded texture is re-uploaded to a device texture so the
/// renderer keeps sampling the same kind of resource.
pub struct CpuBackend {
    field: HeightBuffer,
    texture: NormalHeightTexture,
    normal_gain: f32,
    #[cfg(feature = "wgpu")]
    upload: Option<DeviceTexture>,
}

impl CpuBackend {
    /// Allocate a zeroed field and a flat texture.
    pub fn new(size: GridSize, normal_gain: f32) -> Result<Self> {
        let field = HeightBuffer::new(size)?;
        let mut texture = NormalHeightTexture::new(size)?;
        texture.encode_from(&field, normal_gain);

        Ok(Self {
            field,
            texture,
            normal_gain,
            #[cfg(feature = "wgpu")]
            upload: None,
        })
    }

    /// Also upload every encoded texture to the device.
    #[cfg(feature = "wgpu")]
    pub fn with_upload(mut self, context: Arc<GpuContext>) -> Self {
        let upload = DeviceTexture::new(context, self.field.size());
        upload.upload(&self.texture);
        self.upload = Some(upload);
        self
    }

    /// The height field.
    pub fn field(&self) -> &HeightBuffer {
        &self.field
    }
}

impl FrostBackend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn size(&self) -> GridSize {
        self.field.size()
    }

    fn rasterize(&mut self, event: &StimulusEvent) -> Result<()> {
        rasterize(&mut self.field, event);
        Ok(())
    }

    fn step(&mut self, params: &WaveParams) -> Result<()> {
        self.field.step(params);
        Ok(())
    }

    fn encode(&mut self) -> Result<()> {
        self.texture.encode_from(&self.field, self.normal_gain);

        #[cfg(feature = "wgpu")]
        if let Some(upload) = &self.upload {
            upload.upload(&self.texture);
        }

        Ok(())
    }

    fn texture(&self) -> TextureRef<'_> {
        #[cfg(feature = "wgpu")]
        if let Some(upload) = &self.upload {
            return TextureRef::Device(upload.texture());
        }

        TextureRef::Host(&self.texture)
    }

    fn read_texture(&mut self) -> Result<NormalHeightTexture> {
        Ok(self.texture.clone())
    }

    fn read_heights(&mut self) -> Result<Vec<f32>> {
        Ok(self.field.interior())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::raster::Point;

    fn params() -> WaveParams {
        WaveParams {
            dt_scaled: 0.3,
            fade: 0.99,
        }
    }

    #[test]
    fn test_cpu_backend_tick() {
        let size = GridSize::new(16, 12).unwrap();
        let mut backend = CpuBackend::new(size, 1.5).unwrap();
        assert_eq!(backend.kind(), BackendKind::Cpu);

        backend
            .rasterize(&StimulusEvent::point(Point::new(8, 6), 0.8).unwrap())
            .unwrap();
        assert_eq!(backend.read_heights().unwrap()[6 * 16 + 8], 0.8);

        backend.step(&params()).unwrap();
        backend.encode().unwrap();

        let texture = backend.read_texture().unwrap();
        assert_eq!((texture.width(), texture.height()), (16, 12));
        assert!(texture.texel(8, 6)[3] > 0, "height should reach the alpha channel");
    }

    #[test]
    fn test_texture_stale_until_encode() {
        let size = GridSize::new(8, 8).unwrap();
        let mut backend = CpuBackend::new(size, 1.5).unwrap();
        let before = backend.read_texture().unwrap();

        backend
            .rasterize(&StimulusEvent::point(Point::new(4, 4), 0.5).unwrap())
            .unwrap();
        backend.step(&params()).unwrap();
        assert_eq!(backend.read_texture().unwrap(), before);

        backend.encode().unwrap();
        assert_ne!(backend.read_texture().unwrap(), before);
    }

    #[test]
    fn test_host_texture_without_gpu() {
        let backend = CpuBackend::new(GridSize::new(4, 4).unwrap(), 1.5).unwrap();
        assert!(matches!(backend.texture(), TextureRef::Host(_)));
    }
}
