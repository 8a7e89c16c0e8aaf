// Buffers, textures and samplers
//
// Thin owners of native handles. Each one is shared through `Arc`; the native
// object is destroyed when the last holder (caller, command list, descriptor
// set or retention ledger) lets go.

use ash::vk;
use std::sync::Arc;

use crate::backend::GpuDevice;
use crate::error::{Result, RhiError};
use crate::upload::texel_size;

/// What a buffer is created for. Binding a buffer in a role it was not
/// created for is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Storage,
    /// Host-written source of a buffer-to-image copy
    Staging,
}

impl BufferUsage {
    pub fn flags(self) -> vk::BufferUsageFlags {
        match self {
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex buffer",
            Self::Index => "index buffer",
            Self::Uniform => "uniform buffer",
            Self::Storage => "storage buffer",
            Self::Staging => "staging buffer",
        }
    }

    pub(crate) fn expect(self, expected: BufferUsage) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(RhiError::BufferUsageMismatch {
                expected: expected.name(),
                actual: self.name(),
            })
        }
    }
}

/// Host-visible buffer
pub struct Buffer {
    device: Arc<dyn GpuDevice>,
    buffer: vk::Buffer,
    size: u64,
    usage: BufferUsage,
}

impl Buffer {
    pub(crate) fn new(device: Arc<dyn GpuDevice>, size: u64, usage: BufferUsage) -> Result<Self> {
        let buffer = device.create_buffer(size, usage.flags())?;
        Ok(Self {
            device,
            buffer,
            size,
            usage,
        })
    }

    /// Copy plain-old-data into the start of the buffer
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    pub fn write_bytes(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let in_bounds = offset
            .checked_add(bytes.len() as u64)
            .is_some_and(|end| end <= self.size);
        if !in_bounds {
            return Err(RhiError::BufferOverflow {
                size: self.size,
                offset,
                len: bytes.len(),
            });
        }
        self.device.write_buffer(self.buffer, offset, bytes)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.buffer);
    }
}

/// 2D image with a single view
pub struct Texture {
    device: Arc<dyn GpuDevice>,
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
}

impl Texture {
    pub(crate) fn new(
        device: Arc<dyn GpuDevice>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let (image, view) = device.create_image(&crate::backend::ImageDesc {
            width: extent.width,
            height: extent.height,
            format,
            usage,
            aspect,
        })?;

        Ok(Self {
            device,
            image,
            view,
            extent,
            format,
            aspect,
        })
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// Bytes a tightly packed copy of the whole image takes
    pub fn upload_size(&self) -> Result<u64> {
        let texel = texel_size(self.format).ok_or(RhiError::UnsupportedTextureFormat(self.format))?;
        Ok(u64::from(self.extent.width)
            .saturating_mul(u64::from(self.extent.height))
            .saturating_mul(texel))
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.device.destroy_image(self.image, self.view);
    }
}

pub struct Sampler {
    device: Arc<dyn GpuDevice>,
    sampler: vk::Sampler,
}

impl Sampler {
    pub(crate) fn new(device: Arc<dyn GpuDevice>, desc: &crate::backend::SamplerDesc) -> Result<Self> {
        let sampler = device.create_sampler(desc)?;
        Ok(Self { device, sampler })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.destroy_sampler(self.sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_usage_mismatch_is_misuse() {
        let err = BufferUsage::Vertex.expect(BufferUsage::Index).unwrap_err();
        assert!(matches!(
            err,
            RhiError::BufferUsageMismatch { expected: "index buffer", actual: "vertex buffer" }
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::ProgrammerMisuse);
    }

    #[test]
    fn test_write_stays_in_bounds() {
        let fixture = Fixture::new();
        let buffer = fixture.rhi.create_buffer(16, BufferUsage::Uniform).unwrap();

        buffer.write(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(
            fixture.device.buffer_contents(buffer.handle()).unwrap()[..4],
            1.0f32.to_le_bytes()
        );
        assert!(buffer.write(&[0u32; 5]).is_err());
    }

    #[test]
    fn test_write_at_huge_offset_is_rejected() {
        let fixture = Fixture::new();
        let buffer = fixture.rhi.create_buffer(16, BufferUsage::Uniform).unwrap();

        let err = buffer.write_bytes(u64::MAX, &[1]).unwrap_err();
        assert!(matches!(err, RhiError::BufferOverflow { size: 16, offset: u64::MAX, len: 1 }));
        assert!(buffer.write_bytes(15, &[1, 2]).is_err());
        buffer.write_bytes(15, &[1]).unwrap();
    }

    #[test]
    fn test_upload_size_by_format() {
        let fixture = Fixture::new();
        let rgba = fixture.rhi.create_texture(4, 2, vk::Format::R8G8B8A8_SRGB).unwrap();
        assert_eq!(rgba.upload_size().unwrap(), 32);

        let compressed = fixture.rhi.create_texture(4, 4, vk::Format::BC1_RGB_UNORM_BLOCK).unwrap();
        assert!(matches!(
            compressed.upload_size(),
            Err(RhiError::UnsupportedTextureFormat(vk::Format::BC1_RGB_UNORM_BLOCK))
        ));
    }
}
