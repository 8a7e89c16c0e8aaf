// Native back end seam
//
// The core never talks to ash directly. Every native call it issues goes
// through `GpuDevice`, and presentation goes through `Presenter`. The Vulkan
// implementations live in `device`/`swapchain`; `headless` provides a
// GPU-free implementation that simulates fences and records what happened.

pub mod buffer;
pub mod command;
pub mod device;
pub mod headless;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;

pub use device::VulkanDevice;
pub use headless::{DeviceEvent, HeadlessDevice, HeadlessSurface};
pub use swapchain::Swapchain;

use ash::vk;
use std::time::Duration;

use crate::command_list::Command;
use crate::error::Result;
use crate::pipeline::PipelineState;
use crate::shader::LayoutBinding;

/// Color/depth formats a render pass is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentLayout {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
}

/// Everything needed to build the fixed-function graphics pipeline
pub struct GraphicsPipelineDesc<'a> {
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub state: &'a PipelineState,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub anisotropy: bool,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            anisotropy: true,
        }
    }
}

/// One descriptor write, already resolved to native handles
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescriptorWrite {
    UniformBuffer { buffer: vk::Buffer, offset: u64, range: u64 },
    StorageBuffer { buffer: vk::Buffer, offset: u64, range: u64 },
    CombinedImageSampler { view: vk::ImageView, sampler: vk::Sampler },
}

/// A queue submission. `command_buffer: None` submits an empty batch that
/// still waits and signals, which keeps frame pacing intact.
#[derive(Debug, Clone, Copy, Default)]
pub struct Submission {
    pub command_buffer: Option<vk::CommandBuffer>,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    pub fence: Option<vk::Fence>,
}

/// Device/queue provider
pub trait GpuDevice: Send + Sync {
    // Shaders and pipelines
    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_descriptor_set_layout(&self, bindings: &[LayoutBinding]) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Descriptors
    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> Result<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet>;
    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet);
    fn write_descriptor(&self, set: vk::DescriptorSet, binding: u32, write: &DescriptorWrite);

    // Render targets
    fn create_render_pass(&self, attachments: &AttachmentLayout) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Memory-backed resources
    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> Result<vk::Buffer>;
    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn create_image(&self, desc: &ImageDesc) -> Result<(vk::Image, vk::ImageView)>;
    fn destroy_image(&self, image: vk::Image, view: vk::ImageView);
    fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);
    fn depth_format(&self) -> Result<vk::Format>;

    // Command recording
    fn create_command_pool(&self) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn record(&self, command_buffer: vk::CommandBuffer, command: &Command);

    // Synchronization and submission
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn submit(&self, submission: &Submission) -> Result<()>;
    fn wait_idle(&self) -> Result<()>;
}

/// Result of acquiring a presentable image
#[derive(Debug, Clone, Copy)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

/// Surface/swapchain provider
pub trait Presenter: Send {
    fn extent(&self) -> vk::Extent2D;
    fn format(&self) -> vk::Format;
    fn image_count(&self) -> usize;
    fn image_view(&self, index: u32) -> vk::ImageView;

    /// Acquire the next presentable image, signalling `signal` when it is ready
    fn acquire_next_image(&mut self, signal: vk::Semaphore, timeout: Duration) -> Result<AcquiredImage>;

    /// Queue `index` for presentation once `wait` is signalled.
    /// Returns true when the surface is suboptimal.
    fn present(&mut self, index: u32, wait: vk::Semaphore) -> Result<bool>;

    /// Recreate the presentable images for a new window size.
    /// Callers must ensure the device is idle.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
}

/// Convert a `Duration` to the nanosecond timeout Vulkan expects
pub(crate) fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}
