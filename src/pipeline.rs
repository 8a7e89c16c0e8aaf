// Pipeline layout builder
//
// Merges the reflected bindings of a vertex/fragment pair into positional
// descriptor-set layouts, one pipeline layout and a merged name directory,
// then builds the native pipeline with a fixed state policy.

use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{AttachmentLayout, GpuDevice, GraphicsPipelineDesc};
use crate::error::{Result, RhiError};
use crate::shader::{BindingDirectory, BindingSlot, LayoutBinding, ShaderModule, ShaderReflection, ShaderStage};

/// Fixed-function state every pipeline is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    pub topology: vk::PrimitiveTopology,
    pub front_face: vk::FrontFace,
    pub cull_mode: vk::CullModeFlags,
    pub blend_enable: bool,
    pub depth_test: bool,
    pub depth_compare: vk::CompareOp,
}

impl PipelineState {
    /// Triangle lists, counter-clockwise front faces, back-face culling, no
    /// blending; depth test and write only with a depth attachment.
    pub fn fixed(depth: bool) -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            cull_mode: vk::CullModeFlags::BACK,
            blend_enable: false,
            depth_test: depth,
            depth_compare: vk::CompareOp::LESS,
        }
    }
}

/// Bindings of both stages grouped by set, plus the merged directory
#[derive(Debug, Clone, Default)]
pub struct MergedLayout {
    pub sets: BTreeMap<u32, Vec<LayoutBinding>>,
    pub directory: BindingDirectory,
}

impl MergedLayout {
    /// Highest set index in use, if any
    pub fn max_set(&self) -> Option<u32> {
        self.sets.keys().next_back().copied()
    }
}

/// Merge two stages' reflections. A slot declared by both stages with the same
/// kind gets the union of their stage flags; different kinds are a conflict.
pub fn merge_stages(vertex: &ShaderReflection, fragment: &ShaderReflection) -> Result<MergedLayout> {
    let mut merged = MergedLayout::default();

    for reflection in [vertex, fragment] {
        for (&set, bindings) in &reflection.sets {
            let target = merged.sets.entry(set).or_default();
            for binding in bindings {
                match target.iter_mut().find(|existing| existing.binding == binding.binding) {
                    Some(existing) if existing.kind != binding.kind => {
                        return Err(RhiError::BindingConflict {
                            set,
                            binding: binding.binding,
                            first: existing.kind,
                            second: binding.kind,
                        });
                    }
                    Some(existing) => {
                        existing.stages |= binding.stages;
                        existing.count = existing.count.max(binding.count);
                    }
                    None => target.push(*binding),
                }
            }
            target.sort_by_key(|binding| binding.binding);
        }

        merged.directory.merge(&reflection.directory)?;
    }

    Ok(merged)
}

/// A built graphics pipeline and everything derived for it
pub struct Pipeline {
    device: Arc<dyn GpuDevice>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    /// Indexed by set number; gaps hold empty layouts
    set_layouts: Vec<vk::DescriptorSetLayout>,
    set_bindings: Vec<Vec<LayoutBinding>>,
    /// Render pass the pipeline was built against; framebuffers from the
    /// render target cache are compatible with it
    render_pass: vk::RenderPass,
    directory: BindingDirectory,
    state: PipelineState,
    attachments: AttachmentLayout,
    vertex_input_count: usize,
    vertex: Arc<ShaderModule>,
    fragment: Arc<ShaderModule>,
}

/// Native objects created so far, destroyed if a later step fails
struct PartialPipeline<'a> {
    device: &'a dyn GpuDevice,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    layout: Option<vk::PipelineLayout>,
    render_pass: Option<vk::RenderPass>,
}

impl PartialPipeline<'_> {
    fn release(&mut self) {
        if let Some(render_pass) = self.render_pass.take() {
            self.device.destroy_render_pass(render_pass);
        }
        if let Some(layout) = self.layout.take() {
            self.device.destroy_pipeline_layout(layout);
        }
        for layout in self.set_layouts.drain(..) {
            self.device.destroy_descriptor_set_layout(layout);
        }
    }
}

impl Pipeline {
    pub(crate) fn new(
        device: Arc<dyn GpuDevice>,
        vertex: &Arc<ShaderModule>,
        fragment: &Arc<ShaderModule>,
        attachments: AttachmentLayout,
    ) -> Result<Self> {
        if vertex.stage() != ShaderStage::Vertex {
            return Err(RhiError::StageMismatch { expected: ShaderStage::Vertex });
        }
        if fragment.stage() != ShaderStage::Fragment {
            return Err(RhiError::StageMismatch { expected: ShaderStage::Fragment });
        }

        let merged = merge_stages(vertex.reflection(), fragment.reflection())?;
        let state = PipelineState::fixed(attachments.depth_format.is_some());

        // Positional layouts: set N is always at index N
        let set_count = merged.max_set().map_or(0, |max| max as usize + 1);
        let set_bindings: Vec<Vec<LayoutBinding>> = (0..set_count as u32)
            .map(|set| merged.sets.get(&set).cloned().unwrap_or_default())
            .collect();

        let mut partial = PartialPipeline {
            device: device.as_ref(),
            set_layouts: Vec::with_capacity(set_count),
            layout: None,
            render_pass: None,
        };

        let built = (|| -> Result<(vk::PipelineLayout, vk::RenderPass, vk::Pipeline)> {
            for bindings in &set_bindings {
                partial.set_layouts.push(device.create_descriptor_set_layout(bindings)?);
            }
            let layout = device.create_pipeline_layout(&partial.set_layouts)?;
            partial.layout = Some(layout);
            let render_pass = device.create_render_pass(&attachments)?;
            partial.render_pass = Some(render_pass);

            let vertex_bindings = vertex.reflection().vertex_bindings();
            let vertex_attributes = vertex.reflection().vertex_attributes();
            let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc {
                vertex_module: vertex.handle(),
                fragment_module: fragment.handle(),
                layout,
                render_pass,
                vertex_bindings: &vertex_bindings,
                vertex_attributes: &vertex_attributes,
                state: &state,
            })?;
            Ok((layout, render_pass, pipeline))
        })();

        let (layout, render_pass, pipeline) = match built {
            Ok(handles) => handles,
            Err(err) => {
                partial.release();
                return Err(err);
            }
        };

        log::info!(
            "Created graphics pipeline: {} descriptor set(s), {} named resource(s), {} vertex input(s)",
            set_count,
            merged.directory.len(),
            vertex.reflection().vertex_inputs.len()
        );

        Ok(Self {
            pipeline,
            layout,
            set_layouts: std::mem::take(&mut partial.set_layouts),
            set_bindings,
            render_pass,
            directory: merged.directory,
            state,
            attachments,
            vertex_input_count: vertex.reflection().vertex_inputs.len(),
            vertex: Arc::clone(vertex),
            fragment: Arc::clone(fragment),
            device,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn set_count(&self) -> usize {
        self.set_layouts.len()
    }

    pub fn set_layout(&self, set: u32) -> Option<vk::DescriptorSetLayout> {
        self.set_layouts.get(set as usize).copied()
    }

    /// Set indices that have at least one binding
    pub fn declared_sets(&self) -> impl Iterator<Item = u32> + '_ {
        self.set_bindings
            .iter()
            .enumerate()
            .filter(|(_, bindings)| !bindings.is_empty())
            .map(|(set, _)| set as u32)
    }

    pub fn layout_binding(&self, set: u32, binding: u32) -> Option<&LayoutBinding> {
        self.set_bindings
            .get(set as usize)?
            .iter()
            .find(|candidate| candidate.binding == binding)
    }

    pub fn directory(&self) -> &BindingDirectory {
        &self.directory
    }

    pub fn resolve(&self, name: &str) -> Result<BindingSlot> {
        self.directory.resolve(name)
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn attachments(&self) -> AttachmentLayout {
        self.attachments
    }

    pub fn vertex_input_count(&self) -> usize {
        self.vertex_input_count
    }

    pub fn shaders(&self) -> (&Arc<ShaderModule>, &Arc<ShaderModule>) {
        (&self.vertex, &self.fragment)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        log::debug!("Destroying graphics pipeline {:?}", self.pipeline);
        self.device.destroy_pipeline(self.pipeline);
        self.device.destroy_render_pass(self.render_pass);
        self.device.destroy_pipeline_layout(self.layout);
        for &layout in &self.set_layouts {
            self.device.destroy_descriptor_set_layout(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::spirv_builder::SpirvBuilder;
    use crate::shader::{reflect, ResourceKind};
    use crate::testing::Fixture;

    #[test]
    fn test_merge_ors_stage_flags() {
        let vertex = reflect(
            &SpirvBuilder::vertex().input("position", 0, 3).uniform_block("ubo", "Ubo", 0, 0).build(),
            ShaderStage::Vertex,
        )
        .unwrap();
        let fragment = reflect(
            &SpirvBuilder::fragment()
                .uniform_block("ubo", "Ubo", 0, 0)
                .sampled_image("tex", 0, 1)
                .build(),
            ShaderStage::Fragment,
        )
        .unwrap();

        let merged = merge_stages(&vertex, &fragment).unwrap();
        let set0 = &merged.sets[&0];
        assert_eq!(set0.len(), 2);
        assert_eq!(
            set0[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(set0[1].stages, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(merged.directory.len(), 2);
    }

    #[test]
    fn test_merge_conflicting_kinds() {
        let vertex = reflect(
            &SpirvBuilder::vertex().uniform_block("ubo", "Ubo", 0, 0).build(),
            ShaderStage::Vertex,
        )
        .unwrap();
        let fragment = reflect(
            &SpirvBuilder::fragment().sampled_image("tex", 0, 0).build(),
            ShaderStage::Fragment,
        )
        .unwrap();

        let err = merge_stages(&vertex, &fragment).unwrap_err();
        assert!(matches!(
            err,
            RhiError::BindingConflict {
                first: ResourceKind::UniformBuffer,
                second: ResourceKind::CombinedImageSampler,
                ..
            }
        ));
    }

    #[test]
    fn test_merge_name_collision() {
        let vertex = reflect(
            &SpirvBuilder::vertex().uniform_block("camera", "Camera", 0, 0).build(),
            ShaderStage::Vertex,
        )
        .unwrap();
        let fragment = reflect(
            &SpirvBuilder::fragment().uniform_block("camera", "Camera", 1, 0).build(),
            ShaderStage::Fragment,
        )
        .unwrap();

        let err = merge_stages(&vertex, &fragment).unwrap_err();
        assert!(matches!(err, RhiError::NameCollision { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_every_name_resolves_through_pipeline() {
        let fixture = Fixture::new();
        let (vertex, fragment) = fixture.quad_shaders();
        let pipeline = fixture.rhi.create_graphics_pipeline(&vertex, &fragment).unwrap();

        for reflection in [vertex.reflection(), fragment.reflection()] {
            for (name, slot) in reflection.directory.iter() {
                let resolved = pipeline.resolve(name).unwrap();
                assert_eq!((resolved.set, resolved.binding), (slot.set, slot.binding));
                assert!(pipeline.layout_binding(resolved.set, resolved.binding).is_some());
            }
        }
    }

    #[test]
    fn test_set_gaps_become_empty_layouts() {
        let fixture = Fixture::new();
        let vertex = fixture.vertex_shader(SpirvBuilder::vertex().input("position", 0, 3));
        let fragment = fixture.fragment_shader(SpirvBuilder::fragment().sampled_image("tex", 2, 0));

        let pipeline = fixture.rhi.create_graphics_pipeline(&vertex, &fragment).unwrap();
        assert_eq!(pipeline.set_count(), 3);
        assert!(pipeline.set_layout(1).is_some());
        assert_eq!(pipeline.declared_sets().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_swapped_stages_rejected() {
        let fixture = Fixture::new();
        let (vertex, fragment) = fixture.quad_shaders();
        let err = fixture.rhi.create_graphics_pipeline(&fragment, &vertex).err().unwrap();
        assert!(matches!(err, RhiError::StageMismatch { expected: ShaderStage::Vertex }));
    }

    #[test]
    fn test_drop_destroys_native_objects() {
        let fixture = Fixture::new();
        let (vertex, fragment) = fixture.quad_shaders();
        let before = fixture.device.live_objects();

        let pipeline = fixture.rhi.create_graphics_pipeline(&vertex, &fragment).unwrap();
        assert!(fixture.device.live_objects() > before);
        drop(pipeline);
        assert_eq!(fixture.device.live_objects(), before);
    }
}
