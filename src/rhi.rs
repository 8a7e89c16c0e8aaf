// =============================================================================
// RHI - Owns the device-side state and drives frames
// =============================================================================
//
// One `Rhi` per device/surface pair. Resource creation takes `&self`; anything
// that moves the frame forward (begin/submit/end, resize, wait_idle) takes
// `&mut self`, which keeps the frame protocol single-threaded.

use ash::vk;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AttachmentLayout, GpuDevice, Presenter, SamplerDesc, Submission};
use crate::command_list::{CommandList, CommandListState, CommandPool};
use crate::config::Config;
use crate::descriptor::DescriptorAllocator;
use crate::error::{Result, RhiError};
use crate::frame::FrameSynchronizer;
use crate::pipeline::Pipeline;
use crate::render_target::{RenderTarget, RenderTargetCache};
use crate::resource::{Buffer, BufferUsage, Sampler, Texture};
use crate::retention::RetentionLedger;
use crate::shader::{load_spirv, ShaderModule, ShaderStage};
use crate::upload::{aspect_for_format, record_texture_upload};

pub struct Rhi {
    // Field order is drop order: retained work first, the device last
    ledger: RetentionLedger,
    frames: FrameSynchronizer,
    render_targets: Arc<RenderTargetCache>,
    descriptors: Arc<DescriptorAllocator>,
    command_pool: Arc<CommandPool>,
    presenter: Box<dyn Presenter>,
    device: Arc<dyn GpuDevice>,

    clear_color: [f32; 4],
    depth: bool,
    timeout: Duration,
}

impl Rhi {
    pub fn new(device: Arc<dyn GpuDevice>, presenter: Box<dyn Presenter>, config: &Config) -> Result<Self> {
        let timeout = config.sync_timeout();
        let frames = FrameSynchronizer::new(
            Arc::clone(&device),
            config.graphics.frames_in_flight,
            presenter.image_count(),
            timeout,
        )?;
        let ledger = RetentionLedger::new(frames.frames_in_flight());
        let descriptors = DescriptorAllocator::new(Arc::clone(&device), &config.descriptors)?;
        let command_pool = CommandPool::new(Arc::clone(&device))?;
        let render_targets = Arc::new(RenderTargetCache::new(Arc::clone(&device), None));

        let rhi = Self {
            ledger,
            frames,
            render_targets,
            descriptors,
            command_pool,
            presenter,
            device,
            clear_color: config.graphics.clear_color,
            depth: config.graphics.depth,
            timeout,
        };

        if rhi.depth {
            let depth = rhi.create_depth_texture()?;
            rhi.render_targets.set_depth(Some(depth));
        }

        let extent = rhi.presenter.extent();
        log::info!(
            "RHI ready: {}x{} {:?}, depth {}",
            extent.width,
            extent.height,
            rhi.presenter.format(),
            if rhi.depth { "on" } else { "off" }
        );
        Ok(rhi)
    }

    fn create_depth_texture(&self) -> Result<Arc<Texture>> {
        let format = self.device.depth_format()?;
        let texture = Arc::new(Texture::new(
            Arc::clone(&self.device),
            self.presenter.extent(),
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect_for_format(format),
        )?);

        let mut commands = self.create_command_list()?;
        commands.begin()?;
        commands.transition_image(
            &texture,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )?;
        commands.end()?;
        self.submit_and_wait(commands)?;

        log::debug!("Created depth buffer ({:?})", format);
        Ok(texture)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Resource creation
    // ────────────────────────────────────────────────────────────────────────

    /// Reflect and create a shader module from SPIR-V words
    pub fn create_shader(&self, code: &[u32], stage: ShaderStage) -> Result<Arc<ShaderModule>> {
        ShaderModule::new(Arc::clone(&self.device), code, stage).map(Arc::new)
    }

    pub fn create_shader_from_file<P: AsRef<Path>>(&self, path: P, stage: ShaderStage) -> Result<Arc<ShaderModule>> {
        let path = path.as_ref();
        let code = load_spirv(path).map_err(|e| RhiError::InvalidShader(format!("{}: {}", path.display(), e)))?;
        log::debug!("Loaded {:?} shader from {:?}", stage, path);
        self.create_shader(&code, stage)
    }

    pub fn create_buffer(&self, size: u64, usage: BufferUsage) -> Result<Arc<Buffer>> {
        Buffer::new(Arc::clone(&self.device), size, usage).map(Arc::new)
    }

    /// Create a buffer sized for `data` and fill it
    pub fn create_buffer_with_data<T: bytemuck::Pod>(&self, usage: BufferUsage, data: &[T]) -> Result<Arc<Buffer>> {
        let buffer = self.create_buffer(std::mem::size_of_val(data) as u64, usage)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Sampled 2D texture that can be filled with `upload_texture`
    pub fn create_texture(&self, width: u32, height: u32, format: vk::Format) -> Result<Arc<Texture>> {
        Texture::new(
            Arc::clone(&self.device),
            vk::Extent2D { width, height },
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            aspect_for_format(format),
        )
        .map(Arc::new)
    }

    pub fn create_sampler(&self) -> Result<Arc<Sampler>> {
        self.create_sampler_with(&SamplerDesc::default())
    }

    pub fn create_sampler_with(&self, desc: &SamplerDesc) -> Result<Arc<Sampler>> {
        Sampler::new(Arc::clone(&self.device), desc).map(Arc::new)
    }

    /// Build a pipeline for the surface's color format and the current depth
    /// attachment
    pub fn create_graphics_pipeline(
        &self,
        vertex: &Arc<ShaderModule>,
        fragment: &Arc<ShaderModule>,
    ) -> Result<Arc<Pipeline>> {
        let attachments = AttachmentLayout {
            color_format: self.presenter.format(),
            depth_format: self.render_targets.depth().map(|texture| texture.format()),
        };
        Pipeline::new(Arc::clone(&self.device), vertex, fragment, attachments).map(Arc::new)
    }

    pub fn create_command_list(&self) -> Result<CommandList> {
        CommandList::new(
            Arc::clone(&self.command_pool),
            Arc::clone(&self.descriptors),
            Arc::clone(&self.render_targets),
            self.clear_color,
        )
    }

    // ────────────────────────────────────────────────────────────────────────
    // Frames
    // ────────────────────────────────────────────────────────────────────────

    pub fn begin_frame(&mut self) -> Result<RenderTarget> {
        self.frames.begin_frame(self.presenter.as_mut(), &mut self.ledger)
    }

    pub fn submit(&mut self, command_list: CommandList) -> Result<()> {
        self.frames.submit(command_list, &mut self.ledger)
    }

    /// Present the current frame. Returns true when the surface should be
    /// resized.
    pub fn end_frame(&mut self) -> Result<bool> {
        let suboptimal = self.frames.end_frame(self.presenter.as_mut())?;
        if suboptimal {
            log::warn!("Presented to a suboptimal surface");
        }
        Ok(suboptimal)
    }

    /// Recreate the presentable images and depth buffer for a new size
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.frames.in_frame() {
            return Err(RhiError::FrameOrder {
                op: "resize",
                reason: "a frame is in progress",
            });
        }

        self.wait_idle()?;
        self.presenter.resize(width, height)?;
        self.render_targets.invalidate();

        if self.depth {
            let depth = self.create_depth_texture()?;
            self.render_targets.set_depth(Some(depth));
        }

        let extent = self.presenter.extent();
        log::info!("Resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Block until the GPU is idle and release every retained command list
    pub fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        self.frames.wait_all()?;
        let released = self.ledger.release_all();
        if released > 0 {
            log::debug!("Released {} command list(s) after idle", released);
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Transfers
    // ────────────────────────────────────────────────────────────────────────

    /// Submit outside the frame loop and block until the GPU is done with it
    pub fn submit_and_wait(&self, mut command_list: CommandList) -> Result<()> {
        if command_list.state() != CommandListState::Ended {
            return Err(RhiError::InvalidState {
                op: "submit_and_wait",
                state: command_list.state(),
            });
        }

        let fence = self.device.create_fence(false)?;
        let result = self
            .device
            .submit(&Submission {
                command_buffer: Some(command_list.command_buffer()),
                fence: Some(fence),
                ..Default::default()
            })
            .and_then(|()| command_list.mark_submitted())
            .and_then(|()| self.device.wait_for_fence(fence, self.timeout));
        self.device.destroy_fence(fence);
        result?;

        command_list.mark_retired();
        Ok(())
    }

    /// Copy a staging buffer into `texture` and leave it ready for sampling
    pub fn copy_buffer_to_texture(&self, staging: &Arc<Buffer>, texture: &Arc<Texture>) -> Result<()> {
        let mut commands = self.create_command_list()?;
        commands.begin()?;
        record_texture_upload(&mut commands, staging, texture)?;
        commands.end()?;
        self.submit_and_wait(commands)
    }

    /// Upload tightly packed pixel data into `texture` through a temporary
    /// staging buffer
    pub fn upload_texture(&self, texture: &Arc<Texture>, pixels: &[u8]) -> Result<()> {
        let required = texture.upload_size()?;
        if (pixels.len() as u64) < required {
            return Err(RhiError::BufferOverflow {
                size: pixels.len() as u64,
                offset: 0,
                len: usize::try_from(required).unwrap_or(usize::MAX),
            });
        }

        let staging = self.create_buffer(pixels.len() as u64, BufferUsage::Staging)?;
        staging.write_bytes(0, pixels)?;
        self.copy_buffer_to_texture(&staging, texture)?;

        let extent = texture.extent();
        log::debug!("Uploaded {}x{} texture ({} bytes)", extent.width, extent.height, pixels.len());
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Accessors
    // ────────────────────────────────────────────────────────────────────────

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn presenter(&self) -> &dyn Presenter {
        self.presenter.as_ref()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.presenter.extent()
    }

    pub fn frames(&self) -> &FrameSynchronizer {
        &self.frames
    }

    pub fn render_targets(&self) -> &Arc<RenderTargetCache> {
        &self.render_targets
    }

    pub fn descriptors(&self) -> &Arc<DescriptorAllocator> {
        &self.descriptors
    }

    /// Command lists submitted but not yet known to be complete
    pub fn outstanding(&self) -> usize {
        self.ledger.total_outstanding()
    }
}

impl Drop for Rhi {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Failed to idle the device during shutdown: {}", e);
            self.ledger.release_all();
        }
        log::info!("RHI destroyed after {} frame(s)", self.frames.frame_number());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceEvent;
    use crate::testing::Fixture;

    #[test]
    fn test_resize_rebuilds_depth_and_targets() {
        let mut fixture = Fixture::new();
        let old_depth = fixture.rhi.render_targets().depth().unwrap().view();
        let target = fixture.rhi.begin_frame().unwrap();
        fixture.rhi.render_targets().get_or_create(&target).unwrap();

        assert!(matches!(
            fixture.rhi.resize(320, 240),
            Err(RhiError::FrameOrder { op: "resize", .. })
        ));
        fixture.rhi.end_frame().unwrap();

        fixture.rhi.resize(320, 240).unwrap();
        assert_eq!(fixture.rhi.extent().width, 320);
        assert!(fixture.rhi.render_targets().is_empty());
        assert_ne!(fixture.rhi.render_targets().depth().unwrap().view(), old_depth);
        assert_eq!(fixture.rhi.outstanding(), 0);
    }

    #[test]
    fn test_present_failure_still_advances() {
        let mut fixture = Fixture::new();
        fixture.rhi.begin_frame().unwrap();
        fixture.surface_control().fail_next_present();
        assert!(matches!(fixture.rhi.end_frame(), Err(RhiError::SurfaceOutOfDate)));
        assert_eq!(fixture.rhi.frames().current_slot(), 1);
        assert!(!fixture.rhi.frames().in_frame());

        fixture.rhi.resize(800, 600).unwrap();
        fixture.rhi.begin_frame().unwrap();
        fixture.rhi.end_frame().unwrap();
        assert_eq!(fixture.surface_control().presented(), 1);
    }

    #[test]
    fn test_submit_and_wait_requires_ended_list() {
        let fixture = Fixture::new();
        let mut commands = fixture.rhi.create_command_list().unwrap();
        commands.begin().unwrap();
        assert!(matches!(
            fixture.rhi.submit_and_wait(commands),
            Err(RhiError::InvalidState { op: "submit_and_wait", .. })
        ));
    }

    #[test]
    fn test_buffer_with_data() {
        let fixture = Fixture::new();
        let indices: [u16; 6] = [0, 1, 2, 2, 3, 0];
        let buffer = fixture.rhi.create_buffer_with_data(BufferUsage::Index, &indices).unwrap();
        assert_eq!(buffer.size(), 12);
        assert_eq!(fixture.device.buffer_contents(buffer.handle()).unwrap()[2..4], 1u16.to_le_bytes());
    }

    #[test]
    fn test_shader_from_missing_file() {
        let fixture = Fixture::new();
        let dir = tempfile::tempdir().unwrap();
        let err = fixture
            .rhi
            .create_shader_from_file(dir.path().join("missing.spv"), ShaderStage::Vertex)
            .err()
            .unwrap();
        assert!(matches!(err, RhiError::InvalidShader(_)));
    }

    #[test]
    fn test_drop_releases_everything() {
        let fixture = Fixture::new();
        let device = Arc::clone(&fixture.device);
        let mut rhi = fixture.rhi;

        let target = rhi.begin_frame().unwrap();
        let mut commands = rhi.create_command_list().unwrap();
        commands.begin().unwrap();
        commands.begin_render_pass(&target).unwrap();
        commands.end_render_pass().unwrap();
        commands.end().unwrap();
        rhi.submit(commands).unwrap();
        rhi.end_frame().unwrap();
        device.take_events();

        drop(rhi);
        assert_eq!(device.live_objects(), 0);
        assert!(device
            .take_events()
            .iter()
            .all(|event| !matches!(event, DeviceEvent::Submit { .. })));
    }
}
