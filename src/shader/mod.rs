// Shader modules and their reflected binding metadata
//
// A shader module is created from SPIR-V words. Reflection runs first, so an
// unsupported shader never reaches the driver.

mod reflect;
#[cfg(test)]
pub(crate) mod spirv_builder;

pub use reflect::reflect;

use ash::vk;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::backend::GpuDevice;
use crate::error::{Result, RhiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    pub(crate) fn execution_model(self) -> u32 {
        match self {
            Self::Vertex => spirv::ExecutionModel::Vertex as u32,
            Self::Fragment => spirv::ExecutionModel::Fragment as u32,
        }
    }
}

/// Descriptor kinds the binding tables support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
}

impl ResourceKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One slot of a descriptor-set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub kind: ResourceKind,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// Where a named resource lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    pub set: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

/// Name -> (set, binding) lookup table
#[derive(Debug, Clone, Default)]
pub struct BindingDirectory {
    entries: HashMap<String, BindingSlot>,
}

impl BindingDirectory {
    /// Add a name. Re-adding a name at the same slot is accepted; the same
    /// name at a different slot is a `NameCollision`.
    pub fn insert(&mut self, name: &str, slot: BindingSlot) -> Result<()> {
        match self.entries.get(name) {
            Some(existing) if existing.set == slot.set && existing.binding == slot.binding => Ok(()),
            Some(existing) => Err(RhiError::NameCollision {
                name: name.to_string(),
                first_set: existing.set,
                first_binding: existing.binding,
                second_set: slot.set,
                second_binding: slot.binding,
            }),
            None => {
                self.entries.insert(name.to_string(), slot);
                Ok(())
            }
        }
    }

    pub fn merge(&mut self, other: &BindingDirectory) -> Result<()> {
        for (name, slot) in other.iter() {
            self.insert(name, *slot)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<BindingSlot> {
        self.entries.get(name).copied()
    }

    /// Exact-match lookup; unknown names fail fast
    pub fn resolve(&self, name: &str) -> Result<BindingSlot> {
        self.get(name).ok_or_else(|| RhiError::UnknownBinding { name: name.to_string() })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BindingSlot)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A vertex attribute with its own vertex-buffer binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub name: String,
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub stride: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ShaderReflection {
    /// Bindings grouped by set index, sorted by binding number
    pub sets: BTreeMap<u32, Vec<LayoutBinding>>,
    /// Vertex stage inputs in declaration order
    pub vertex_inputs: Vec<VertexAttribute>,
    pub directory: BindingDirectory,
}

impl ShaderReflection {
    pub fn vertex_bindings(&self) -> Vec<vk::VertexInputBindingDescription> {
        self.vertex_inputs
            .iter()
            .map(|input| {
                vk::VertexInputBindingDescription::builder()
                    .binding(input.binding)
                    .stride(input.stride)
                    .input_rate(vk::VertexInputRate::VERTEX)
                    .build()
            })
            .collect()
    }

    pub fn vertex_attributes(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.vertex_inputs
            .iter()
            .map(|input| {
                vk::VertexInputAttributeDescription::builder()
                    .binding(input.binding)
                    .location(input.location)
                    .format(input.format)
                    .offset(0)
                    .build()
            })
            .collect()
    }
}

/// Compiled shader code plus what reflection found in it
pub struct ShaderModule {
    device: Arc<dyn GpuDevice>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    reflection: ShaderReflection,
}

impl ShaderModule {
    pub(crate) fn new(device: Arc<dyn GpuDevice>, code: &[u32], stage: ShaderStage) -> Result<Self> {
        let reflection = reflect(code, stage)?;
        let module = device.create_shader_module(code)?;

        log::debug!(
            "{:?} shader: {} set(s), {} named resource(s), {} vertex input(s)",
            stage,
            reflection.sets.len(),
            reflection.directory.len(),
            reflection.vertex_inputs.len()
        );

        Ok(Self {
            device,
            module,
            stage,
            reflection,
        })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.device.destroy_shader_module(self.module);
    }
}

/// Read a compiled `.spv` file into SPIR-V words
pub fn load_spirv<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<u32>> {
    let mut file = std::fs::File::open(path)?;
    ash::util::read_spv(&mut file)
}
