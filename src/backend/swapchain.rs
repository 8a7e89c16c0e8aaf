// Swapchain - Window presentation
//
// Owns the window surface and the chain of images we render to and present.
// Implements `Presenter`; resize recreates the chain in place, handing the
// old swapchain to the driver so in-flight presents can finish.

use anyhow::Context;
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use std::time::Duration;

use super::{surface, timeout_ns, AcquiredImage, Presenter, VulkanDevice};
use crate::error::{Result, RhiError, VkResultExt};

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    swapchain_loader: khr::Swapchain,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    surface: vk::SurfaceKHR,
    surface_loader: khr::Surface,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Create a surface for `window` and a swapchain on it
    pub fn new<W>(
        device: Arc<VulkanDevice>,
        window: &W,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> anyhow::Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Creating swapchain: {}x{}", width, height);

        let display = window.display_handle().context("No display handle")?.as_raw();
        let window = window.window_handle().context("No window handle")?.as_raw();
        let surface = unsafe { surface::create_surface(device.entry(), &device.instance, display, window)? };
        let surface_loader = khr::Surface::new(device.entry(), &device.instance);

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )
        }
        .unwrap_or(false);
        if !supported {
            unsafe { surface_loader.destroy_surface(surface, None) };
            anyhow::bail!("Graphics queue cannot present to this surface");
        }

        // Choose surface format (prefer SRGB)
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }?;
        let surface_format = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.first())
            .copied()
            .context("No suitable surface format")?;

        // Honor the configured present mode when the surface has it; FIFO is
        // always available
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        }?;
        let present_mode = if present_modes.contains(&preferred_present_mode) {
            preferred_present_mode
        } else {
            log::warn!("{:?} not supported, falling back to FIFO", preferred_present_mode);
            vk::PresentModeKHR::FIFO
        };
        log::info!("Present mode: {:?}", present_mode);

        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent: vk::Extent2D { width, height },
            present_mode,
            surface,
            surface_loader,
            device,
        };
        swapchain.build(width, height)?;
        Ok(swapchain)
    }

    /// (Re)create the swapchain and its image views
    fn build(&mut self, width: u32, height: u32) -> Result<()> {
        let surface_caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.device.physical_device, self.surface)
        }
        .vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

        // Choose extent
        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(surface_caps.min_image_extent.width, surface_caps.max_image_extent.width),
                height: height.clamp(surface_caps.min_image_extent.height, surface_caps.max_image_extent.height),
            }
        };

        // One more than the minimum so acquire rarely waits on the driver
        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format)
            .image_color_space(self.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain =
            unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }.vk("vkCreateSwapchainKHR")?;

        self.destroy_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.extent = extent;

        self.images =
            unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }.vk("vkGetSwapchainImagesKHR")?;
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.device.create_image_view(&create_info, None) }
                .vk("vkCreateImageView")?;
            self.image_views.push(view);
        }

        log::info!(
            "Created swapchain with {} images ({}x{})",
            self.images.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn destroy_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.device.destroy_image_view(view, None) };
        }
    }
}

impl Presenter for Swapchain {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn image_view(&self, index: u32) -> vk::ImageView {
        self.image_views.get(index as usize).copied().unwrap_or_default()
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore, timeout: Duration) -> Result<AcquiredImage> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout_ns(timeout), signal, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RhiError::SurfaceOutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RhiError::SyncTimeout {
                what: "swapchain image",
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(result) => Err(RhiError::Vulkan {
                op: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    fn present(&mut self, index: u32, wait: vk::Semaphore) -> Result<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = self
            .device
            .with_queue(|queue| unsafe { self.swapchain_loader.queue_present(queue, &present_info) });

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            // Out of date is reported as "needs resize", not as a failure
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(result) => Err(RhiError::Vulkan {
                op: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.build(width, height)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views();
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
