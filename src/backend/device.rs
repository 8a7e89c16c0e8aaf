// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers and surface extensions
// - Physical device selection (prefer discrete GPU)
// - Logical device + queue creation
// - Memory allocator setup
// - The `GpuDevice` implementation the core drives

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Duration;

use super::{
    buffer, command, pipeline, shader, surface, timeout_ns, AttachmentLayout, DescriptorWrite, GpuDevice,
    GraphicsPipelineDesc, ImageDesc, SamplerDesc, Submission,
};
use crate::command_list::Command;
use crate::error::{self, RhiError, VkResultExt};
use crate::shader::LayoutBinding;
use crate::upload::DEPTH_FORMAT_CANDIDATES;

/// Required Vulkan device features for our renderer
const REQUIRED_DEVICE_FEATURES: vk::PhysicalDeviceFeatures = vk::PhysicalDeviceFeatures {
    sampler_anisotropy: vk::TRUE,
    ..unsafe { std::mem::zeroed() }
};

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand before the device is destroyed
    allocator: ManuallyDrop<Mutex<Allocator>>,
    buffers: Mutex<HashMap<vk::Buffer, Allocation>>,
    images: Mutex<HashMap<vk::Image, Allocation>>,

    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    entry: Entry,

    // Queue handles. vkQueueSubmit/vkQueuePresentKHR need external sync.
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    queue_lock: Mutex<()>,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached for performance)
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Create Vulkan device
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `display` - Display the surfaces will be created for
    pub fn new(app_name: &str, enable_validation: bool, display: RawDisplayHandle) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }.context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance = Self::create_instance(&entry, app_name, enable_validation, display)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Pick physical device (GPU)
        let (physical_device, graphics_queue_family) = Self::pick_physical_device(&instance)?;

        // Step 5: Create logical device
        let (device, graphics_queue) =
            Self::create_logical_device(&instance, physical_device, graphics_queue_family)?;

        // Step 6: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 7: Create memory allocator
        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            device,
            physical_device,
            instance,
            entry,
            graphics_queue,
            graphics_queue_family,
            queue_lock: Mutex::new(()),
            debug_utils,
            properties,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display: RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("kiln")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        // Surface extensions for this platform
        let mut extensions = surface::required_extensions(display)?;
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        // Validation layers
        let layer_names = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };

            // Check required features
            if features.sampler_anisotropy != vk::TRUE {
                continue;
            }

            // Find graphics queue family
            let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

            let graphics_family = queue_families
                .iter()
                .position(|props| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|i| i as u32);

            if let Some(graphics_family) = graphics_family {
                // Score device (prefer discrete GPU)
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };

                if score > best_score {
                    best_score = score;
                    best_device = Some((device, graphics_family));
                }
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&REQUIRED_DEVICE_FEATURES);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        Ok((device, graphics_queue))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(allocator)
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Run `f` with exclusive access to the graphics queue
    pub(crate) fn with_queue<R>(&self, f: impl FnOnce(vk::Queue) -> R) -> R {
        let _guard = self.queue_lock.lock();
        f(self.graphics_queue)
    }
}

impl GpuDevice for VulkanDevice {
    // ────────────────────────────────────────────────────────────────────────
    // Shaders and pipelines
    // ────────────────────────────────────────────────────────────────────────

    fn create_shader_module(&self, code: &[u32]) -> error::Result<vk::ShaderModule> {
        shader::create_shader_module(&self.device, code)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_descriptor_set_layout(&self, bindings: &[LayoutBinding]) -> error::Result<vk::DescriptorSetLayout> {
        pipeline::create_descriptor_set_layout(&self.device, bindings)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> error::Result<vk::PipelineLayout> {
        pipeline::create_pipeline_layout(&self.device, set_layouts)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> error::Result<vk::Pipeline> {
        pipeline::create_graphics_pipeline(&self.device, desc)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    // ────────────────────────────────────────────────────────────────────────
    // Descriptors
    // ────────────────────────────────────────────────────────────────────────

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> error::Result<vk::DescriptorPool> {
        // Sets are returned one by one when their owners drop
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe { self.device.create_descriptor_pool(&pool_info, None) }.vk("vkCreateDescriptorPool")
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> error::Result<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.vk("vkAllocateDescriptorSets")?;
        sets.into_iter().next().ok_or(RhiError::Vulkan {
            op: "vkAllocateDescriptorSets",
            result: vk::Result::ERROR_UNKNOWN,
        })
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        if let Err(e) = unsafe { self.device.free_descriptor_sets(pool, &[set]) } {
            log::error!("Failed to free descriptor set: {}", e);
        }
    }

    fn write_descriptor(&self, set: vk::DescriptorSet, binding: u32, write: &DescriptorWrite) {
        let mut buffer_info = [vk::DescriptorBufferInfo::default()];
        let mut image_info = [vk::DescriptorImageInfo::default()];

        let builder = vk::WriteDescriptorSet::builder().dst_set(set).dst_binding(binding).dst_array_element(0);
        let native = match *write {
            DescriptorWrite::UniformBuffer { buffer, offset, range } => {
                buffer_info[0] = vk::DescriptorBufferInfo { buffer, offset, range };
                builder
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info)
                    .build()
            }
            DescriptorWrite::StorageBuffer { buffer, offset, range } => {
                buffer_info[0] = vk::DescriptorBufferInfo { buffer, offset, range };
                builder
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(&buffer_info)
                    .build()
            }
            DescriptorWrite::CombinedImageSampler { view, sampler } => {
                image_info[0] = vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                };
                builder
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info)
                    .build()
            }
        };

        unsafe { self.device.update_descriptor_sets(&[native], &[]) };
    }

    // ────────────────────────────────────────────────────────────────────────
    // Render targets
    // ────────────────────────────────────────────────────────────────────────

    fn create_render_pass(&self, attachments: &AttachmentLayout) -> error::Result<vk::RenderPass> {
        pipeline::create_render_pass(&self.device, attachments)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> error::Result<vk::Framebuffer> {
        pipeline::create_framebuffer(&self.device, render_pass, attachments, extent)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    // ────────────────────────────────────────────────────────────────────────
    // Memory-backed resources
    // ────────────────────────────────────────────────────────────────────────

    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> error::Result<vk::Buffer> {
        let (buffer, allocation) = buffer::create_buffer(&self.device, &mut self.allocator.lock(), size, usage)?;
        self.buffers.lock().insert(buffer, allocation);
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> error::Result<()> {
        let mut buffers = self.buffers.lock();
        let allocation = buffers.get_mut(&buffer).ok_or(RhiError::Vulkan {
            op: "vkMapMemory",
            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
        })?;
        buffer::write_mapped(allocation, offset, data)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
        if let Some(allocation) = self.buffers.lock().remove(&buffer) {
            buffer::free(&mut self.allocator.lock(), allocation);
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> error::Result<(vk::Image, vk::ImageView)> {
        let (image, view, allocation) = buffer::create_image(&self.device, &mut self.allocator.lock(), desc)?;
        self.images.lock().insert(image, allocation);
        Ok((image, view))
    }

    fn destroy_image(&self, image: vk::Image, view: vk::ImageView) {
        unsafe {
            self.device.destroy_image_view(view, None);
            self.device.destroy_image(image, None);
        }
        if let Some(allocation) = self.images.lock().remove(&image) {
            buffer::free(&mut self.allocator.lock(), allocation);
        }
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> error::Result<vk::Sampler> {
        buffer::create_sampler(&self.device, desc, self.properties.limits.max_sampler_anisotropy)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn depth_format(&self) -> error::Result<vk::Format> {
        DEPTH_FORMAT_CANDIDATES
            .iter()
            .copied()
            .find(|&format| {
                let props =
                    unsafe { self.instance.get_physical_device_format_properties(self.physical_device, format) };
                props
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or_else(|| RhiError::UnsupportedFormat {
                name: "depth buffer".to_string(),
                element: "no candidate depth format".to_string(),
            })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Command recording
    // ────────────────────────────────────────────────────────────────────────

    fn create_command_pool(&self) -> error::Result<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.graphics_queue_family);
        unsafe { self.device.create_command_pool(&pool_info, None) }.vk("vkCreateCommandPool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> error::Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }.vk("vkAllocateCommandBuffers")?;
        buffers.into_iter().next().ok_or(RhiError::Vulkan {
            op: "vkAllocateCommandBuffers",
            result: vk::Result::ERROR_UNKNOWN,
        })
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[command_buffer]) };
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> error::Result<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }.vk("vkBeginCommandBuffer")
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> error::Result<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }.vk("vkEndCommandBuffer")
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: &Command) {
        command::record(&self.device, command_buffer, command);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Synchronization and submission
    // ────────────────────────────────────────────────────────────────────────

    fn create_fence(&self, signaled: bool) -> error::Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&fence_info, None) }.vk("vkCreateFence")
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> error::Result<()> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns(timeout)) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::SyncTimeout {
                what: "fence",
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(result) => Err(RhiError::Vulkan {
                op: "vkWaitForFences",
                result,
            }),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> error::Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }.vk("vkResetFences")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&self) -> error::Result<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&semaphore_info, None) }.vk("vkCreateSemaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn submit(&self, submission: &Submission) -> error::Result<()> {
        let command_buffers: Vec<vk::CommandBuffer> = submission.command_buffer.into_iter().collect();
        let (wait_semaphores, wait_stages): (Vec<vk::Semaphore>, Vec<vk::PipelineStageFlags>) =
            submission.wait.into_iter().unzip();
        let signal_semaphores: Vec<vk::Semaphore> = submission.signal.into_iter().collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        let fence = submission.fence.unwrap_or_else(vk::Fence::null);
        self.with_queue(|queue| unsafe { self.device.queue_submit(queue, &[submit_info], fence) })
            .vk("vkQueueSubmit")
    }

    fn wait_idle(&self) -> error::Result<()> {
        unsafe { self.device.device_wait_idle() }.vk("vkDeviceWaitIdle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = GpuDevice::wait_idle(self);

        let leaked = self.buffers.get_mut().len() + self.images.get_mut().len();
        if leaked > 0 {
            log::warn!("{} GPU allocation(s) still alive at device teardown", leaked);
        }

        // Cleanup in reverse order
        unsafe {
            let allocator = self.allocator.get_mut();
            for (buffer, allocation) in self.buffers.get_mut().drain() {
                self.device.destroy_buffer(buffer, None);
                buffer::free(allocator, allocation);
            }
            for (image, allocation) in self.images.get_mut().drain() {
                self.device.destroy_image(image, None);
                buffer::free(allocator, allocation);
            }
            ManuallyDrop::drop(&mut self.allocator);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
