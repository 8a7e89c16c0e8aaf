// =============================================================================
// KILN RHI - Thin explicit rendering layer over Vulkan
// =============================================================================
//
// LAYERS:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Rhi (frame loop, resource creation, uploads)                   │
// │    ├── CommandList  (state machine + deferred descriptor binds) │
// │    ├── Pipeline     (layout merged from reflected shaders)      │
// │    ├── DescriptorAllocator / RenderTargetCache                  │
// │    └── FrameSynchronizer + RetentionLedger                      │
// │          └── GpuDevice / Presenter (Vulkan or headless)         │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. begin_frame: wait on the slot's fence, release its retained work,
//    acquire an image, reset the fence
// 2. Record a command list against the returned render target
// 3. submit: queue it and park it in the retention ledger
// 4. end_frame: present and move to the next slot
//
// =============================================================================

pub mod backend;
pub mod command_list;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod render_target;
pub mod resource;
pub mod retention;
pub mod rhi;
pub mod shader;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{GpuDevice, HeadlessDevice, HeadlessSurface, Presenter, Swapchain, VulkanDevice};
pub use command_list::{Command, CommandList, CommandListState};
pub use config::Config;
pub use descriptor::{BindingResource, DescriptorAllocator, DescriptorSet};
pub use error::{ErrorKind, Result, RhiError};
pub use frame::{FrameSynchronizer, MAX_FRAMES_IN_FLIGHT};
pub use pipeline::{Pipeline, PipelineState};
pub use render_target::{RenderTarget, RenderTargetCache};
pub use resource::{Buffer, BufferUsage, Sampler, Texture};
pub use retention::{Retained, RetentionLedger};
pub use rhi::Rhi;
pub use shader::{reflect, ResourceKind, ShaderModule, ShaderReflection, ShaderStage};
