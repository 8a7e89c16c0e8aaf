// Command list
//
// Records native commands and keeps everything they reference alive.
//
// Binding protocol:
// - bind_pipeline allocates one fresh descriptor set per declared set index
// - bind_uniform_buffer / bind_texture resolve a name and update a fresh set;
//   nothing is emitted yet
// - draw / draw_indexed emit one bind-descriptor-set per fresh set right
//   before the draw
//
// After a draw the fresh sets are consumed: updating them again requires a
// new bind_pipeline.

use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::GpuDevice;
use crate::descriptor::{BindingResource, DescriptorAllocator, DescriptorSet};
use crate::error::{Result, RhiError};
use crate::pipeline::Pipeline;
use crate::render_target::{RenderTarget, RenderTargetCache};
use crate::resource::{Buffer, BufferUsage, Sampler, Texture};
use crate::retention::Retained;
use crate::shader::ResourceKind;
use crate::upload::{aspect_for_format, LayoutTransition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    Initial,
    Recording,
    RenderPassActive,
    Ended,
    Submitted,
    Retired,
}

/// A recorded command, resolved to native handles
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        width: u32,
        height: u32,
        clear_color: [f32; 4],
        clear_depth: Option<f32>,
    },
    EndRenderPass,
    BindPipeline {
        pipeline: vk::Pipeline,
    },
    BindVertexBuffer {
        slot: u32,
        buffer: vk::Buffer,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    },
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    SetScissor {
        width: u32,
        height: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    ImageBarrier {
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        transition: LayoutTransition,
    },
    CopyBufferToImage {
        buffer: vk::Buffer,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        width: u32,
        height: u32,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeginRenderPass { .. } => "begin_render_pass",
            Self::EndRenderPass => "end_render_pass",
            Self::BindPipeline { .. } => "bind_pipeline",
            Self::BindVertexBuffer { .. } => "bind_vertex_buffer",
            Self::BindIndexBuffer { .. } => "bind_index_buffer",
            Self::BindDescriptorSet { .. } => "bind_descriptor_set",
            Self::SetViewport { .. } => "set_viewport",
            Self::SetScissor { .. } => "set_scissor",
            Self::Draw { .. } => "draw",
            Self::DrawIndexed { .. } => "draw_indexed",
            Self::ImageBarrier { .. } => "image_barrier",
            Self::CopyBufferToImage { .. } => "copy_buffer_to_image",
        }
    }
}

/// Command pool shared by every command list of one `Rhi`
pub(crate) struct CommandPool {
    device: Arc<dyn GpuDevice>,
    pool: vk::CommandPool,
}

impl CommandPool {
    pub(crate) fn new(device: Arc<dyn GpuDevice>) -> Result<Arc<Self>> {
        let pool = device.create_command_pool()?;
        Ok(Arc::new(Self { device, pool }))
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
    }
}

pub struct CommandList {
    device: Arc<dyn GpuDevice>,
    pool: Arc<CommandPool>,
    command_buffer: vk::CommandBuffer,
    descriptors: Arc<DescriptorAllocator>,
    render_targets: Arc<RenderTargetCache>,
    clear_color: [f32; 4],

    state: CommandListState,
    commands: Vec<Command>,
    pipeline: Option<Arc<Pipeline>>,
    fresh_sets: BTreeMap<u32, Arc<DescriptorSet>>,
    sets_consumed: bool,
    index_buffer_bound: bool,
    target_extent: Option<vk::Extent2D>,

    /// Every GPU-visible object the recorded commands reference
    owned: Vec<Retained>,
}

impl CommandList {
    pub(crate) fn new(
        pool: Arc<CommandPool>,
        descriptors: Arc<DescriptorAllocator>,
        render_targets: Arc<RenderTargetCache>,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let device = Arc::clone(&pool.device);
        let command_buffer = device.allocate_command_buffer(pool.pool)?;

        Ok(Self {
            device,
            pool,
            command_buffer,
            descriptors,
            render_targets,
            clear_color,
            state: CommandListState::Initial,
            commands: Vec::new(),
            pipeline: None,
            fresh_sets: BTreeMap::new(),
            sets_consumed: false,
            index_buffer_bound: false,
            target_extent: None,
            owned: Vec::new(),
        })
    }

    fn expect_state(&self, op: &'static str, valid: &[CommandListState]) -> Result<()> {
        if valid.contains(&self.state) {
            Ok(())
        } else {
            Err(RhiError::InvalidState { op, state: self.state })
        }
    }

    fn push(&mut self, command: Command) {
        self.device.record(self.command_buffer, &command);
        self.commands.push(command);
    }

    const RECORDING: &'static [CommandListState] = &[CommandListState::Recording];
    const RECORDING_ANY: &'static [CommandListState] =
        &[CommandListState::Recording, CommandListState::RenderPassActive];
    const IN_PASS: &'static [CommandListState] = &[CommandListState::RenderPassActive];

    // ────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ────────────────────────────────────────────────────────────────────────

    pub fn begin(&mut self) -> Result<()> {
        self.expect_state("begin", &[CommandListState::Initial])?;
        self.device.begin_command_buffer(self.command_buffer)?;
        self.state = CommandListState::Recording;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        self.expect_state("end", Self::RECORDING)?;
        self.device.end_command_buffer(self.command_buffer)?;
        self.state = CommandListState::Ended;
        Ok(())
    }

    /// Seal descriptor sets; called when the list is handed to the queue
    pub(crate) fn mark_submitted(&mut self) -> Result<()> {
        self.expect_state("submit", &[CommandListState::Ended])?;
        for retained in &self.owned {
            if let Retained::DescriptorSet(set) = retained {
                set.seal();
            }
        }
        self.state = CommandListState::Submitted;
        Ok(())
    }

    pub(crate) fn mark_retired(&mut self) {
        self.state = CommandListState::Retired;
    }

    // ────────────────────────────────────────────────────────────────────────
    // Render passes and dynamic state
    // ────────────────────────────────────────────────────────────────────────

    pub fn begin_render_pass(&mut self, target: &RenderTarget) -> Result<()> {
        self.expect_state("begin_render_pass", Self::RECORDING)?;
        let pair = self.render_targets.get_or_create(target)?;

        self.push(Command::BeginRenderPass {
            render_pass: pair.render_pass(),
            framebuffer: pair.framebuffer(),
            width: target.extent.width,
            height: target.extent.height,
            clear_color: self.clear_color,
            clear_depth: pair.has_depth().then_some(1.0),
        });
        self.owned.push(Retained::RenderTarget(pair));
        self.target_extent = Some(target.extent);
        self.state = CommandListState::RenderPassActive;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        self.expect_state("end_render_pass", Self::IN_PASS)?;
        self.push(Command::EndRenderPass);
        self.target_extent = None;
        self.state = CommandListState::Recording;
        Ok(())
    }

    fn active_extent(&self, op: &'static str) -> Result<vk::Extent2D> {
        self.expect_state(op, Self::IN_PASS)?;
        self.target_extent
            .ok_or(RhiError::InvalidState { op, state: self.state })
    }

    /// Viewport covering the whole active render target
    pub fn set_viewport(&mut self) -> Result<()> {
        let extent = self.active_extent("set_viewport")?;
        self.push(Command::SetViewport {
            width: extent.width as f32,
            height: extent.height as f32,
        });
        Ok(())
    }

    /// Scissor covering the whole active render target
    pub fn set_scissors(&mut self) -> Result<()> {
        let extent = self.active_extent("set_scissors")?;
        self.push(Command::SetScissor {
            width: extent.width,
            height: extent.height,
        });
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Binding
    // ────────────────────────────────────────────────────────────────────────

    pub fn bind_pipeline(&mut self, pipeline: &Arc<Pipeline>) -> Result<()> {
        self.expect_state("bind_pipeline", Self::RECORDING_ANY)?;

        let mut fresh_sets = BTreeMap::new();
        for set_index in pipeline.declared_sets() {
            let set = Arc::new(self.descriptors.allocate(pipeline, set_index)?);
            self.owned.push(Retained::DescriptorSet(Arc::clone(&set)));
            fresh_sets.insert(set_index, set);
        }

        self.push(Command::BindPipeline { pipeline: pipeline.handle() });
        self.owned.push(Retained::Pipeline(Arc::clone(pipeline)));
        // Sets from an earlier bind stay in `owned` until the list retires
        self.fresh_sets = fresh_sets;
        self.sets_consumed = false;
        self.pipeline = Some(Arc::clone(pipeline));
        Ok(())
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &Arc<Buffer>, slot: u32) -> Result<()> {
        self.expect_state("bind_vertex_buffer", Self::RECORDING_ANY)?;
        buffer.usage().expect(BufferUsage::Vertex)?;

        self.push(Command::BindVertexBuffer { slot, buffer: buffer.handle() });
        self.owned.push(Retained::Buffer(Arc::clone(buffer)));
        Ok(())
    }

    pub fn bind_index_buffer(&mut self, buffer: &Arc<Buffer>, index_type: vk::IndexType) -> Result<()> {
        self.expect_state("bind_index_buffer", Self::RECORDING_ANY)?;
        buffer.usage().expect(BufferUsage::Index)?;

        self.push(Command::BindIndexBuffer {
            buffer: buffer.handle(),
            index_type,
        });
        self.owned.push(Retained::Buffer(Arc::clone(buffer)));
        self.index_buffer_bound = true;
        Ok(())
    }

    /// Bind `size` bytes of `buffer` to the uniform block called `name`
    pub fn bind_uniform_buffer(&mut self, name: &str, buffer: &Arc<Buffer>, size: u64) -> Result<()> {
        self.update_named(
            "bind_uniform_buffer",
            name,
            BindingResource::UniformBuffer {
                buffer: Arc::clone(buffer),
                offset: 0,
                range: size,
            },
        )
    }

    pub fn bind_storage_buffer(&mut self, name: &str, buffer: &Arc<Buffer>, size: u64) -> Result<()> {
        self.update_named(
            "bind_storage_buffer",
            name,
            BindingResource::StorageBuffer {
                buffer: Arc::clone(buffer),
                offset: 0,
                range: size,
            },
        )
    }

    /// Bind a texture + sampler to the combined image sampler called `name`
    pub fn bind_texture(&mut self, name: &str, texture: &Arc<Texture>, sampler: &Arc<Sampler>) -> Result<()> {
        self.update_named(
            "bind_texture",
            name,
            BindingResource::CombinedImageSampler {
                texture: Arc::clone(texture),
                sampler: Arc::clone(sampler),
            },
        )
    }

    fn update_named(&mut self, op: &'static str, name: &str, resource: BindingResource) -> Result<()> {
        self.expect_state(op, Self::RECORDING_ANY)?;
        let pipeline = self.pipeline.as_ref().ok_or(RhiError::NoPipelineBound { op })?;
        let slot = pipeline.resolve(name)?;

        let actual: ResourceKind = resource.kind();
        if slot.kind != actual {
            return Err(RhiError::BindingKindMismatch {
                name: name.to_string(),
                expected: slot.kind,
                actual,
            });
        }
        if self.sets_consumed {
            return Err(RhiError::BindingsConsumed { name: name.to_string() });
        }

        let set = self
            .fresh_sets
            .get(&slot.set)
            .ok_or(RhiError::NoSuchSet { set: slot.set })?;
        set.update(slot.binding, resource)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Draws
    // ────────────────────────────────────────────────────────────────────────

    /// Emit one bind per fresh set, immediately ahead of a draw
    fn flush_bindings(&mut self, op: &'static str) -> Result<()> {
        self.expect_state(op, Self::IN_PASS)?;
        let layout = self
            .pipeline
            .as_ref()
            .ok_or(RhiError::NoPipelineBound { op })?
            .layout();

        let binds: Vec<Command> = self
            .fresh_sets
            .iter()
            .map(|(&set_index, set)| Command::BindDescriptorSet {
                layout,
                set_index,
                set: set.handle(),
            })
            .collect();
        for bind in binds {
            self.push(bind);
        }
        self.sets_consumed = true;
        Ok(())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        self.flush_bindings("draw")?;
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        if !self.index_buffer_bound {
            self.expect_state("draw_indexed", Self::IN_PASS)?;
            return Err(RhiError::MissingIndexBuffer);
        }
        self.flush_bindings("draw_indexed")?;
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Transfers
    // ────────────────────────────────────────────────────────────────────────

    pub fn transition_image(
        &mut self,
        texture: &Arc<Texture>,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        self.expect_state("transition_image", Self::RECORDING)?;
        let transition = LayoutTransition::between(old_layout, new_layout)?;

        self.push(Command::ImageBarrier {
            image: texture.image(),
            aspect: aspect_for_format(texture.format()),
            transition,
        });
        self.owned.push(Retained::Texture(Arc::clone(texture)));
        Ok(())
    }

    /// Copy a staging buffer into the whole of `texture`, which must be in
    /// TRANSFER_DST_OPTIMAL layout
    pub fn copy_buffer_to_image(&mut self, buffer: &Arc<Buffer>, texture: &Arc<Texture>) -> Result<()> {
        self.expect_state("copy_buffer_to_image", Self::RECORDING)?;
        buffer.usage().expect(BufferUsage::Staging)?;
        let required = texture.upload_size()?;
        if buffer.size() < required {
            return Err(RhiError::BufferOverflow {
                size: buffer.size(),
                offset: 0,
                len: usize::try_from(required).unwrap_or(usize::MAX),
            });
        }

        self.push(Command::CopyBufferToImage {
            buffer: buffer.handle(),
            image: texture.image(),
            aspect: texture.aspect(),
            width: texture.extent().width,
            height: texture.extent().height,
        });
        self.owned.push(Retained::Buffer(Arc::clone(buffer)));
        self.owned.push(Retained::Texture(Arc::clone(texture)));
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Inspection
    // ────────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn owned(&self) -> &[Retained] {
        &self.owned
    }

    /// Descriptor sets this list owns, fresh or not
    pub fn owned_descriptor_sets(&self) -> Vec<vk::DescriptorSet> {
        self.owned
            .iter()
            .filter_map(|retained| match retained {
                Retained::DescriptorSet(set) => Some(set.handle()),
                _ => None,
            })
            .collect()
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        if self.state == CommandListState::Submitted {
            log::warn!("Command list dropped while still submitted; its resources may be in use");
        }
        self.device.free_command_buffer(self.pool.pool, self.command_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::shader::spirv_builder::SpirvBuilder;
    use crate::testing::Fixture;

    /// Vertex shader with "position" and "color"; fragment shader with "ubo"
    /// at (0, 0) and "tex" at (0, 1)
    fn scenario_pipeline(fixture: &Fixture) -> Arc<Pipeline> {
        let vertex = fixture.vertex_shader(
            SpirvBuilder::vertex()
                .input("position", 0, 3)
                .input("color", 1, 3),
        );
        let fragment = fixture.fragment_shader(
            SpirvBuilder::fragment()
                .uniform_block("ubo", "UniformBufferObject", 0, 0)
                .sampled_image("tex", 0, 1),
        );
        fixture.rhi.create_graphics_pipeline(&vertex, &fragment).unwrap()
    }

    struct Bound {
        ubo: Arc<Buffer>,
        texture: Arc<Texture>,
        sampler: Arc<Sampler>,
        index: Arc<Buffer>,
    }

    fn resources(fixture: &Fixture) -> Bound {
        Bound {
            ubo: fixture.rhi.create_buffer(64, BufferUsage::Uniform).unwrap(),
            texture: fixture.rhi.create_texture(4, 4, vk::Format::R8G8B8A8_SRGB).unwrap(),
            sampler: fixture.rhi.create_sampler().unwrap(),
            index: fixture.rhi.create_buffer(12, BufferUsage::Index).unwrap(),
        }
    }

    fn recording_in_pass(fixture: &Fixture) -> CommandList {
        let mut commands = fixture.rhi.create_command_list().unwrap();
        commands.begin().unwrap();
        commands.begin_render_pass(&fixture.target(0)).unwrap();
        commands
    }

    fn assert_single_bind_before_draw(commands: &CommandList, set: vk::DescriptorSet) {
        let recorded = commands.commands();
        let binds: Vec<&Command> = recorded
            .iter()
            .filter(|command| matches!(command, Command::BindDescriptorSet { .. }))
            .collect();
        assert_eq!(binds.len(), 1);

        let draw_at = recorded
            .iter()
            .position(|command| matches!(command, Command::DrawIndexed { .. }))
            .unwrap();
        assert!(matches!(
            recorded[draw_at - 1],
            Command::BindDescriptorSet { set_index: 0, set: bound, .. } if bound == set
        ));
    }

    #[test]
    fn test_scenario_a_one_bind_before_draw() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);
        let bound = resources(&fixture);

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        commands.bind_index_buffer(&bound.index, vk::IndexType::UINT16).unwrap();
        commands.bind_uniform_buffer("ubo", &bound.ubo, 64).unwrap();
        commands.bind_texture("tex", &bound.texture, &bound.sampler).unwrap();
        commands.draw_indexed(6, 1, 0, 0, 0).unwrap();

        let set = commands.owned_descriptor_sets()[0];
        assert_single_bind_before_draw(&commands, set);
    }

    #[test]
    fn test_scenario_a_bind_order_does_not_matter() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);
        let bound = resources(&fixture);

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        commands.bind_index_buffer(&bound.index, vk::IndexType::UINT16).unwrap();
        commands.bind_texture("tex", &bound.texture, &bound.sampler).unwrap();
        commands.bind_uniform_buffer("ubo", &bound.ubo, 64).unwrap();
        commands.draw_indexed(6, 1, 0, 0, 0).unwrap();

        let set = commands.owned_descriptor_sets()[0];
        assert_single_bind_before_draw(&commands, set);
    }

    #[test]
    fn test_named_binds_update_only_their_slot() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);
        let bound = resources(&fixture);

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        let set = commands.owned_descriptor_sets()[0];

        fixture.device.take_events();
        commands.bind_texture("tex", &bound.texture, &bound.sampler).unwrap();
        assert_eq!(fixture.device.descriptor_writes(), vec![(set, 1)]);

        // Named binds emit nothing until the draw
        assert!(!commands
            .commands()
            .iter()
            .any(|command| matches!(command, Command::BindDescriptorSet { .. })));
    }

    #[test]
    fn test_unknown_name_fails_fast() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);
        let bound = resources(&fixture);

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        let err = commands.bind_uniform_buffer("camera", &bound.ubo, 64).unwrap_err();
        assert!(matches!(err, RhiError::UnknownBinding { ref name } if name == "camera"));
        assert_eq!(err.kind(), ErrorKind::ProgrammerMisuse);
    }

    #[test]
    fn test_wrong_kind_for_name() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);
        let bound = resources(&fixture);

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        let err = commands.bind_uniform_buffer("tex", &bound.ubo, 64).unwrap_err();
        assert!(matches!(err, RhiError::BindingKindMismatch { .. }));
    }

    #[test]
    fn test_zero_sized_uniform_bind_rejected() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);
        let bound = resources(&fixture);

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        let err = commands.bind_uniform_buffer("ubo", &bound.ubo, 0).unwrap_err();
        assert!(matches!(err, RhiError::EmptyBufferRange { offset: 0 }));
        commands.bind_uniform_buffer("ubo", &bound.ubo, 64).unwrap();
    }

    #[test]
    fn test_bind_without_pipeline() {
        let fixture = Fixture::new();
        let bound = resources(&fixture);

        let mut commands = recording_in_pass(&fixture);
        let err = commands.bind_uniform_buffer("ubo", &bound.ubo, 64).unwrap_err();
        assert!(matches!(err, RhiError::NoPipelineBound { .. }));
    }

    #[test]
    fn test_update_after_draw_needs_new_pipeline_bind() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);
        let bound = resources(&fixture);

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        commands.bind_uniform_buffer("ubo", &bound.ubo, 64).unwrap();
        commands.draw(3, 1, 0, 0).unwrap();

        let err = commands.bind_uniform_buffer("ubo", &bound.ubo, 64).unwrap_err();
        assert!(matches!(err, RhiError::BindingsConsumed { .. }));

        commands.bind_pipeline(&pipeline).unwrap();
        commands.bind_uniform_buffer("ubo", &bound.ubo, 64).unwrap();
        commands.draw(3, 1, 0, 0).unwrap();
        assert_eq!(commands.owned_descriptor_sets().len(), 2);
    }

    #[test]
    fn test_double_bind_pipeline_keeps_sets_owned() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);
        let allocator = fixture.rhi.descriptors();

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        commands.bind_pipeline(&pipeline).unwrap();

        let sets = commands.owned_descriptor_sets();
        assert_eq!(sets.len(), 2);
        assert_ne!(sets[0], sets[1]);
        assert_eq!(allocator.live(), 2);
        for set in &sets {
            assert!(fixture.device.is_live_descriptor_set(*set));
        }

        drop(commands);
        assert_eq!(allocator.live(), 0);
        for set in &sets {
            assert!(!fixture.device.is_live_descriptor_set(*set));
        }
    }

    #[test]
    fn test_scenario_c_pool_exhaustion() {
        let fixture = Fixture::with_max_sets(2);
        let pipeline = scenario_pipeline(&fixture);

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        commands.bind_pipeline(&pipeline).unwrap();
        let err = commands.bind_pipeline(&pipeline).unwrap_err();
        assert!(matches!(err, RhiError::PoolExhausted { capacity: 2 }));
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
    }

    #[test]
    fn test_state_machine_rejects_out_of_order_calls() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);

        let mut commands = fixture.rhi.create_command_list().unwrap();
        assert!(matches!(
            commands.bind_pipeline(&pipeline),
            Err(RhiError::InvalidState { state: CommandListState::Initial, .. })
        ));

        commands.begin().unwrap();
        assert!(matches!(
            commands.draw(3, 1, 0, 0),
            Err(RhiError::InvalidState { op: "draw", .. })
        ));
        assert!(commands.set_viewport().is_err());

        commands.begin_render_pass(&fixture.target(0)).unwrap();
        assert!(matches!(
            commands.end(),
            Err(RhiError::InvalidState { state: CommandListState::RenderPassActive, .. })
        ));

        commands.end_render_pass().unwrap();
        commands.end().unwrap();
        assert_eq!(commands.state(), CommandListState::Ended);
        assert!(commands.begin().is_err());
    }

    #[test]
    fn test_draw_indexed_requires_index_buffer() {
        let fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);

        let mut commands = recording_in_pass(&fixture);
        commands.bind_pipeline(&pipeline).unwrap();
        assert!(matches!(
            commands.draw_indexed(6, 1, 0, 0, 0),
            Err(RhiError::MissingIndexBuffer)
        ));
    }

    #[test]
    fn test_buffer_usage_checked_on_bind() {
        let fixture = Fixture::new();
        let bound = resources(&fixture);

        let mut commands = recording_in_pass(&fixture);
        assert!(matches!(
            commands.bind_vertex_buffer(&bound.index, 0),
            Err(RhiError::BufferUsageMismatch { .. })
        ));
    }

    #[test]
    fn test_viewport_and_scissor_cover_target() {
        let fixture = Fixture::new();
        let extent = fixture.rhi.extent();

        let mut commands = recording_in_pass(&fixture);
        commands.set_viewport().unwrap();
        commands.set_scissors().unwrap();

        let recorded = commands.commands();
        assert_eq!(
            recorded[1],
            Command::SetViewport { width: extent.width as f32, height: extent.height as f32 }
        );
        assert_eq!(
            recorded[2],
            Command::SetScissor { width: extent.width, height: extent.height }
        );
    }

    #[test]
    fn test_submission_seals_sets() {
        let mut fixture = Fixture::new();
        let pipeline = scenario_pipeline(&fixture);

        let target = fixture.rhi.begin_frame().unwrap();
        let mut commands = fixture.rhi.create_command_list().unwrap();
        commands.begin().unwrap();
        commands.begin_render_pass(&target).unwrap();
        commands.bind_pipeline(&pipeline).unwrap();
        commands.end_render_pass().unwrap();
        commands.end().unwrap();

        let set = match &commands.owned()[1] {
            Retained::DescriptorSet(set) => Arc::clone(set),
            other => panic!("expected a descriptor set, got {other:?}"),
        };
        assert!(!set.is_sealed());

        fixture.rhi.submit(commands).unwrap();
        assert!(set.is_sealed());
        fixture.rhi.end_frame().unwrap();
    }
}
