// Buffer and image memory
//
// Buffers are host-visible (CpuToGpu) so uniform updates and staging writes
// are plain memcpys into the persistent mapping. Images live in device-local
// memory and are filled through a staging copy.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

use crate::backend::{ImageDesc, SamplerDesc};
use crate::error::{Result, RhiError, VkResultExt};

fn allocate(
    allocator: &mut Allocator,
    name: &str,
    requirements: vk::MemoryRequirements,
    location: MemoryLocation,
    linear: bool,
) -> Result<Allocation> {
    allocator
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| RhiError::OutOfMemory(format!("{}: {}", name, e)))
}

pub(crate) fn free(allocator: &mut Allocator, allocation: Allocation) {
    if let Err(e) = allocator.free(allocation) {
        log::error!("Failed to free GPU allocation: {}", e);
    }
}

/// Create a host-visible buffer with bound memory
pub fn create_buffer(
    device: &ash::Device,
    allocator: &mut Allocator,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> Result<(vk::Buffer, Allocation)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size.max(1))
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }.vk("vkCreateBuffer")?;
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let bound = allocate(allocator, "buffer", requirements, MemoryLocation::CpuToGpu, true).and_then(|allocation| {
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
            .vk("vkBindBufferMemory")
            .map(|()| allocation)
    });

    match bound {
        Ok(allocation) => Ok((buffer, allocation)),
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            Err(e)
        }
    }
}

/// Copy `data` into a buffer's persistent mapping
pub fn write_mapped(allocation: &mut Allocation, offset: u64, data: &[u8]) -> Result<()> {
    let size = allocation.size();
    let mapped = allocation.mapped_slice_mut().ok_or(RhiError::Vulkan {
        op: "vkMapMemory",
        result: vk::Result::ERROR_MEMORY_MAP_FAILED,
    })?;

    let range = usize::try_from(offset)
        .ok()
        .and_then(|start| Some(start..start.checked_add(data.len())?))
        .filter(|range| range.end <= mapped.len());
    let Some(range) = range else {
        return Err(RhiError::BufferOverflow {
            size,
            offset,
            len: data.len(),
        });
    };
    mapped[range].copy_from_slice(data);
    Ok(())
}

/// Create a device-local 2D image and a view covering it
pub fn create_image(
    device: &ash::Device,
    allocator: &mut Allocator,
    desc: &ImageDesc,
) -> Result<(vk::Image, vk::ImageView, Allocation)> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(desc.format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(desc.usage)
        .samples(vk::SampleCountFlags::TYPE_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = unsafe { device.create_image(&image_info, None) }.vk("vkCreateImage")?;
    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let allocation = match allocate(allocator, "image", requirements, MemoryLocation::GpuOnly, false) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(e);
        }
    };

    let view = unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        .vk("vkBindImageMemory")
        .and_then(|()| {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(desc.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: desc.aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe { device.create_image_view(&view_info, None) }.vk("vkCreateImageView")
        });

    match view {
        Ok(view) => Ok((image, view, allocation)),
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            free(allocator, allocation);
            Err(e)
        }
    }
}

pub fn create_sampler(device: &ash::Device, desc: &SamplerDesc, max_anisotropy: f32) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(desc.filter)
        .min_filter(desc.filter)
        .address_mode_u(desc.address_mode)
        .address_mode_v(desc.address_mode)
        .address_mode_w(desc.address_mode)
        .anisotropy_enable(desc.anisotropy)
        .max_anisotropy(if desc.anisotropy { max_anisotropy } else { 1.0 })
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

    unsafe { device.create_sampler(&sampler_info, None) }.vk("vkCreateSampler")
}
