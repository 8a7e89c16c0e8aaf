// Headless back end
//
// Implements `GpuDevice` and `Presenter` without a GPU. Handles are minted
// from a counter, fences follow a small state machine (a submitted fence is
// "pending" and becomes signaled the first time anyone waits on it), and
// every observable action is appended to an event log that tests inspect.

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    AcquiredImage, AttachmentLayout, DescriptorWrite, GpuDevice, GraphicsPipelineDesc, ImageDesc, Presenter,
    SamplerDesc, Submission,
};
use crate::command_list::Command;
use crate::error::{Result, RhiError};
use crate::shader::LayoutBinding;

/// Something the headless device observed
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Submit {
        command_buffer: Option<vk::CommandBuffer>,
        wait: Option<vk::Semaphore>,
        signal: Option<vk::Semaphore>,
        fence: Option<vk::Fence>,
    },
    FenceWait {
        fence: vk::Fence,
        /// The fence guarded submitted work, so a real device would have blocked
        blocked: bool,
    },
    FenceReset {
        fence: vk::Fence,
    },
    DescriptorWrite {
        set: vk::DescriptorSet,
        binding: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ObjectKind {
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    DescriptorPool,
    DescriptorSet,
    RenderPass,
    Framebuffer,
    Buffer,
    Image,
    ImageView,
    Sampler,
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

struct PoolState {
    max_sets: u32,
    allocated: u32,
}

#[derive(Default)]
struct HeadlessState {
    live: HashMap<ObjectKind, HashSet<u64>>,
    fences: HashMap<vk::Fence, FenceState>,
    pools: HashMap<vk::DescriptorPool, PoolState>,
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    events: Vec<DeviceEvent>,
}

impl HeadlessState {
    fn forget(&mut self, kind: ObjectKind, raw: u64) {
        let removed = self.live.get_mut(&kind).is_some_and(|set| set.remove(&raw));
        if !removed && raw != 0 {
            log::warn!("Destroying unknown {:?} {:#x}", kind, raw);
        }
    }

    fn is_live(&self, kind: ObjectKind, raw: u64) -> bool {
        self.live.get(&kind).is_some_and(|set| set.contains(&raw))
    }
}

pub struct HeadlessDevice {
    next_handle: AtomicU64,
    state: Mutex<HeadlessState>,
}

impl HeadlessDevice {
    pub fn new() -> Arc<Self> {
        log::info!("Using headless device");
        Arc::new(Self {
            next_handle: AtomicU64::new(1),
            state: Mutex::new(HeadlessState::default()),
        })
    }

    fn mint<H: Handle>(&self, kind: ObjectKind) -> H {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.state.lock().live.entry(kind).or_default().insert(raw);
        H::from_raw(raw)
    }

    fn forget<H: Handle>(&self, kind: ObjectKind, handle: H) {
        self.state.lock().forget(kind, handle.as_raw());
    }

    // ────────────────────────────────────────────────────────────────────────
    // Inspection
    // ────────────────────────────────────────────────────────────────────────

    /// Drain the event log
    pub fn take_events(&self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.state.lock().events)
    }

    /// Every fence wait since the log was last drained, in order
    pub fn fence_waits(&self) -> Vec<(vk::Fence, bool)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match *event {
                DeviceEvent::FenceWait { fence, blocked } => Some((fence, blocked)),
                _ => None,
            })
            .collect()
    }

    pub fn descriptor_writes(&self) -> Vec<(vk::DescriptorSet, u32)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match *event {
                DeviceEvent::DescriptorWrite { set, binding } => Some((set, binding)),
                _ => None,
            })
            .collect()
    }

    /// Number of native objects currently alive, across all kinds
    pub fn live_objects(&self) -> usize {
        self.state.lock().live.values().map(HashSet::len).sum()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().live.get(&ObjectKind::Buffer).map_or(0, HashSet::len)
    }

    pub fn is_live_buffer(&self, buffer: vk::Buffer) -> bool {
        self.state.lock().is_live(ObjectKind::Buffer, buffer.as_raw())
    }

    pub fn is_live_framebuffer(&self, framebuffer: vk::Framebuffer) -> bool {
        self.state.lock().is_live(ObjectKind::Framebuffer, framebuffer.as_raw())
    }

    pub fn is_live_descriptor_set(&self, set: vk::DescriptorSet) -> bool {
        self.state.lock().is_live(ObjectKind::DescriptorSet, set.as_raw())
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).cloned()
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_shader_module(&self, _code: &[u32]) -> Result<vk::ShaderModule> {
        Ok(self.mint(ObjectKind::ShaderModule))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.forget(ObjectKind::ShaderModule, module);
    }

    fn create_descriptor_set_layout(&self, _bindings: &[LayoutBinding]) -> Result<vk::DescriptorSetLayout> {
        Ok(self.mint(ObjectKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.forget(ObjectKind::DescriptorSetLayout, layout);
    }

    fn create_pipeline_layout(&self, _set_layouts: &[vk::DescriptorSetLayout]) -> Result<vk::PipelineLayout> {
        Ok(self.mint(ObjectKind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.forget(ObjectKind::PipelineLayout, layout);
    }

    fn create_graphics_pipeline(&self, _desc: &GraphicsPipelineDesc) -> Result<vk::Pipeline> {
        Ok(self.mint(ObjectKind::Pipeline))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.forget(ObjectKind::Pipeline, pipeline);
    }

    fn create_descriptor_pool(&self, max_sets: u32, _sizes: &[vk::DescriptorPoolSize]) -> Result<vk::DescriptorPool> {
        let pool = self.mint(ObjectKind::DescriptorPool);
        self.state.lock().pools.insert(pool, PoolState { max_sets, allocated: 0 });
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().pools.remove(&pool);
        self.forget(ObjectKind::DescriptorPool, pool);
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        {
            let mut state = self.state.lock();
            let Some(pool) = state.pools.get_mut(&pool) else {
                return Err(RhiError::Vulkan {
                    op: "vkAllocateDescriptorSets",
                    result: vk::Result::ERROR_UNKNOWN,
                });
            };
            if pool.allocated >= pool.max_sets {
                return Err(RhiError::Vulkan {
                    op: "vkAllocateDescriptorSets",
                    result: vk::Result::ERROR_OUT_OF_POOL_MEMORY,
                });
            }
            pool.allocated += 1;
        }
        Ok(self.mint(ObjectKind::DescriptorSet))
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        let mut state = self.state.lock();
        if let Some(pool) = state.pools.get_mut(&pool) {
            pool.allocated = pool.allocated.saturating_sub(1);
        }
        state.forget(ObjectKind::DescriptorSet, set.as_raw());
    }

    fn write_descriptor(&self, set: vk::DescriptorSet, binding: u32, _write: &DescriptorWrite) {
        self.state.lock().events.push(DeviceEvent::DescriptorWrite { set, binding });
    }

    fn create_render_pass(&self, _attachments: &AttachmentLayout) -> Result<vk::RenderPass> {
        Ok(self.mint(ObjectKind::RenderPass))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.forget(ObjectKind::RenderPass, render_pass);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        Ok(self.mint(ObjectKind::Framebuffer))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.forget(ObjectKind::Framebuffer, framebuffer);
    }

    fn create_buffer(&self, size: u64, _usage: vk::BufferUsageFlags) -> Result<vk::Buffer> {
        let len = usize::try_from(size).map_err(|_| RhiError::OutOfMemory(format!("{} byte buffer", size)))?;
        let buffer = self.mint(ObjectKind::Buffer);
        self.state.lock().buffers.insert(buffer, vec![0; len]);
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let contents = state.buffers.get_mut(&buffer).ok_or(RhiError::Vulkan {
            op: "vkMapMemory",
            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
        })?;
        let size = contents.len() as u64;
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(data.len())?))
            .filter(|range| range.end <= contents.len());
        let Some(range) = range else {
            return Err(RhiError::BufferOverflow {
                size,
                offset,
                len: data.len(),
            });
        };
        contents[range].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        state.buffers.remove(&buffer);
        state.forget(ObjectKind::Buffer, buffer.as_raw());
    }

    fn create_image(&self, _desc: &ImageDesc) -> Result<(vk::Image, vk::ImageView)> {
        Ok((self.mint(ObjectKind::Image), self.mint(ObjectKind::ImageView)))
    }

    fn destroy_image(&self, image: vk::Image, view: vk::ImageView) {
        self.forget(ObjectKind::ImageView, view);
        self.forget(ObjectKind::Image, image);
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<vk::Sampler> {
        Ok(self.mint(ObjectKind::Sampler))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.forget(ObjectKind::Sampler, sampler);
    }

    fn depth_format(&self) -> Result<vk::Format> {
        Ok(vk::Format::D32_SFLOAT)
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        Ok(self.mint(ObjectKind::CommandPool))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.forget(ObjectKind::CommandPool, pool);
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        Ok(self.mint(ObjectKind::CommandBuffer))
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        self.forget(ObjectKind::CommandBuffer, command_buffer);
    }

    fn begin_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn end_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: &Command) {
        log::trace!("{:#x}: {:?}", command_buffer.as_raw(), command);
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let fence = self.mint(ObjectKind::Fence);
        let state = if signaled { FenceState::Signaled } else { FenceState::Unsignaled };
        self.state.lock().fences.insert(fence, state);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        let blocked = match state.fences.get(&fence).copied() {
            Some(FenceState::Signaled) => false,
            Some(FenceState::Pending) => true,
            Some(FenceState::Unsignaled) | None => {
                return Err(RhiError::SyncTimeout {
                    what: "fence",
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };
        state.fences.insert(fence, FenceState::Signaled);
        state.events.push(DeviceEvent::FenceWait { fence, blocked });
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        state.fences.insert(fence, FenceState::Unsignaled);
        state.events.push(DeviceEvent::FenceReset { fence });
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence);
        state.forget(ObjectKind::Fence, fence.as_raw());
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        Ok(self.mint(ObjectKind::Semaphore))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.forget(ObjectKind::Semaphore, semaphore);
    }

    fn submit(&self, submission: &Submission) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(fence) = submission.fence {
            if state.fences.get(&fence) != Some(&FenceState::Unsignaled) {
                // Vulkan requires the fence to be unsignaled at submission
                return Err(RhiError::Vulkan {
                    op: "vkQueueSubmit",
                    result: vk::Result::ERROR_VALIDATION_FAILED_EXT,
                });
            }
            state.fences.insert(fence, FenceState::Pending);
        }
        state.events.push(DeviceEvent::Submit {
            command_buffer: submission.command_buffer,
            wait: submission.wait.map(|(semaphore, _)| semaphore),
            signal: submission.signal,
            fence: submission.fence,
        });
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        for state in self.state.lock().fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Presentation
// ────────────────────────────────────────────────────────────────────────────

/// Failure injection and counters shared with a `HeadlessSurface`
#[derive(Default)]
pub struct SurfaceControl {
    fail_acquire: AtomicBool,
    fail_present: AtomicBool,
    presented: AtomicU64,
}

impl SurfaceControl {
    /// Make the next acquire report the surface as out of date
    pub fn fail_next_acquire(&self) {
        self.fail_acquire.store(true, Ordering::SeqCst);
    }

    /// Make the next present report the surface as out of date
    pub fn fail_next_present(&self) {
        self.fail_present.store(true, Ordering::SeqCst);
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::SeqCst)
    }
}

/// Fixed set of fake presentable images handed out round-robin
pub struct HeadlessSurface {
    device: Arc<HeadlessDevice>,
    extent: vk::Extent2D,
    views: Vec<vk::ImageView>,
    next: u32,
    control: Arc<SurfaceControl>,
}

impl HeadlessSurface {
    pub fn new(device: Arc<HeadlessDevice>, width: u32, height: u32, image_count: usize) -> Self {
        let views = (0..image_count).map(|_| device.mint(ObjectKind::ImageView)).collect();
        Self {
            device,
            extent: vk::Extent2D { width, height },
            views,
            next: 0,
            control: Arc::new(SurfaceControl::default()),
        }
    }

    pub fn control(&self) -> Arc<SurfaceControl> {
        Arc::clone(&self.control)
    }

    fn release_views(&mut self) {
        for view in self.views.drain(..) {
            self.device.forget(ObjectKind::ImageView, view);
        }
    }
}

impl Presenter for HeadlessSurface {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        vk::Format::B8G8R8A8_SRGB
    }

    fn image_count(&self) -> usize {
        self.views.len()
    }

    fn image_view(&self, index: u32) -> vk::ImageView {
        self.views.get(index as usize).copied().unwrap_or_default()
    }

    fn acquire_next_image(&mut self, _signal: vk::Semaphore, _timeout: Duration) -> Result<AcquiredImage> {
        if self.control.fail_acquire.swap(false, Ordering::SeqCst) {
            return Err(RhiError::SurfaceOutOfDate);
        }
        let index = self.next;
        self.next = (self.next + 1) % self.views.len().max(1) as u32;
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn present(&mut self, _index: u32, _wait: vk::Semaphore) -> Result<bool> {
        if self.control.fail_present.swap(false, Ordering::SeqCst) {
            return Err(RhiError::SurfaceOutOfDate);
        }
        self.control.presented.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let count = self.views.len();
        self.release_views();
        self.views = (0..count).map(|_| self.device.mint(ObjectKind::ImageView)).collect();
        self.extent = vk::Extent2D { width, height };
        self.next = 0;
        Ok(())
    }
}

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        self.release_views();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_lifecycle() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();

        device
            .submit(&Submission {
                fence: Some(fence),
                ..Default::default()
            })
            .unwrap();
        device.wait_for_fence(fence, Duration::from_millis(1)).unwrap();
        device.wait_for_fence(fence, Duration::from_millis(1)).unwrap();
        assert_eq!(device.fence_waits(), vec![(fence, true), (fence, false)]);

        // Submitting against a signaled fence is a device error
        assert!(device
            .submit(&Submission {
                fence: Some(fence),
                ..Default::default()
            })
            .is_err());

        device.destroy_fence(fence);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_pool_limit() {
        let device = HeadlessDevice::new();
        let pool = device.create_descriptor_pool(1, &[]).unwrap();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();

        let set = device.allocate_descriptor_set(pool, layout).unwrap();
        let err = device.allocate_descriptor_set(pool, layout).unwrap_err();
        assert!(matches!(
            err,
            RhiError::Vulkan { result: vk::Result::ERROR_OUT_OF_POOL_MEMORY, .. }
        ));

        device.free_descriptor_set(pool, set);
        assert!(device.allocate_descriptor_set(pool, layout).is_ok());
    }

    #[test]
    fn test_out_of_range_writes_rejected() {
        let device = HeadlessDevice::new();
        let buffer = device.create_buffer(8, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();

        for offset in [u64::MAX, 8, 7] {
            let err = device.write_buffer(buffer, offset, &[1, 2]).unwrap_err();
            assert!(matches!(err, RhiError::BufferOverflow { size: 8, len: 2, .. }));
        }
        device.write_buffer(buffer, 6, &[1, 2]).unwrap();
        assert_eq!(device.buffer_contents(buffer).unwrap()[6..], [1, 2]);
    }

    #[test]
    fn test_surface_round_robin_and_resize() {
        let device = HeadlessDevice::new();
        let mut surface = HeadlessSurface::new(Arc::clone(&device), 64, 64, 2);
        let first_view = surface.image_view(0);

        let indices: Vec<u32> = (0..3)
            .map(|_| surface.acquire_next_image(vk::Semaphore::null(), Duration::ZERO).unwrap().index)
            .collect();
        assert_eq!(indices, vec![0, 1, 0]);

        surface.resize(32, 16).unwrap();
        assert_eq!(surface.extent().width, 32);
        assert_ne!(surface.image_view(0), first_view);
        assert_eq!(device.live_objects(), 2);

        drop(surface);
        assert_eq!(device.live_objects(), 0);
    }
}
