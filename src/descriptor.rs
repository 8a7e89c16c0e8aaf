// Descriptor set allocator
//
// One shared pool sized up front from configuration. Sets are allocated per
// pipeline set index and returned to the pool individually when their last
// holder drops them. Running out is a sizing bug and is never retried.

use ash::vk;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::backend::{DescriptorWrite, GpuDevice};
use crate::config::DescriptorConfig;
use crate::error::{Result, RhiError};
use crate::pipeline::Pipeline;
use crate::resource::{Buffer, BufferUsage, Sampler, Texture};
use crate::retention::Retained;
use crate::shader::ResourceKind;

pub struct DescriptorAllocator {
    device: Arc<dyn GpuDevice>,
    pool: vk::DescriptorPool,
    capacity: u32,
    live: AtomicU32,
}

impl DescriptorAllocator {
    pub fn new(device: Arc<dyn GpuDevice>, config: &DescriptorConfig) -> Result<Arc<Self>> {
        let sizes: Vec<vk::DescriptorPoolSize> = [
            (ResourceKind::UniformBuffer, config.uniform_buffers),
            (ResourceKind::StorageBuffer, config.storage_buffers),
            (ResourceKind::CombinedImageSampler, config.combined_image_samplers),
        ]
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .map(|(kind, count)| vk::DescriptorPoolSize {
            ty: kind.descriptor_type(),
            descriptor_count: count,
        })
        .collect();

        let pool = device.create_descriptor_pool(config.max_sets, &sizes)?;
        log::info!(
            "Created descriptor pool: {} sets, {} uniform buffers, {} storage buffers, {} image samplers",
            config.max_sets,
            config.uniform_buffers,
            config.storage_buffers,
            config.combined_image_samplers
        );

        Ok(Arc::new(Self {
            device,
            pool,
            capacity: config.max_sets,
            live: AtomicU32::new(0),
        }))
    }

    /// Allocate a set for `set_index` of `pipeline`'s layout
    pub fn allocate(self: &Arc<Self>, pipeline: &Arc<Pipeline>, set_index: u32) -> Result<DescriptorSet> {
        let layout = pipeline
            .set_layout(set_index)
            .ok_or(RhiError::NoSuchSet { set: set_index })?;

        let exhausted = RhiError::PoolExhausted { capacity: self.capacity };
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.capacity).then_some(live + 1)
            })
            .map_err(|_| exhausted)?;

        let set = match self.device.allocate_descriptor_set(self.pool, layout) {
            Ok(set) => set,
            Err(err) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                return Err(match err {
                    RhiError::Vulkan {
                        result: vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL,
                        ..
                    } => RhiError::PoolExhausted { capacity: self.capacity },
                    other => other,
                });
            }
        };

        Ok(DescriptorSet {
            allocator: Arc::clone(self),
            set,
            set_index,
            pipeline: Arc::clone(pipeline),
            bound: Mutex::new(BTreeMap::new()),
            sealed: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Sets currently allocated from the pool
    pub fn live(&self) -> u32 {
        self.live.load(Ordering::Acquire)
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        log::info!("Destroying descriptor pool");
        self.device.destroy_descriptor_pool(self.pool);
    }
}

/// What to write into one binding
#[derive(Clone)]
pub enum BindingResource {
    UniformBuffer { buffer: Arc<Buffer>, offset: u64, range: u64 },
    StorageBuffer { buffer: Arc<Buffer>, offset: u64, range: u64 },
    CombinedImageSampler { texture: Arc<Texture>, sampler: Arc<Sampler> },
}

impl BindingResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::UniformBuffer { .. } => ResourceKind::UniformBuffer,
            Self::StorageBuffer { .. } => ResourceKind::StorageBuffer,
            Self::CombinedImageSampler { .. } => ResourceKind::CombinedImageSampler,
        }
    }

    fn write(&self) -> DescriptorWrite {
        match self {
            Self::UniformBuffer { buffer, offset, range } => DescriptorWrite::UniformBuffer {
                buffer: buffer.handle(),
                offset: *offset,
                range: *range,
            },
            Self::StorageBuffer { buffer, offset, range } => DescriptorWrite::StorageBuffer {
                buffer: buffer.handle(),
                offset: *offset,
                range: *range,
            },
            Self::CombinedImageSampler { texture, sampler } => DescriptorWrite::CombinedImageSampler {
                view: texture.view(),
                sampler: sampler.handle(),
            },
        }
    }

    fn check_buffer(&self) -> Result<()> {
        match self {
            Self::UniformBuffer { buffer, offset, range } => {
                buffer.usage().expect(BufferUsage::Uniform)?;
                check_range(buffer, *offset, *range)
            }
            Self::StorageBuffer { buffer, offset, range } => {
                buffer.usage().expect(BufferUsage::Storage)?;
                check_range(buffer, *offset, *range)
            }
            Self::CombinedImageSampler { .. } => Ok(()),
        }
    }

    fn retained(&self) -> Vec<Retained> {
        match self {
            Self::UniformBuffer { buffer, .. } | Self::StorageBuffer { buffer, .. } => {
                vec![Retained::Buffer(Arc::clone(buffer))]
            }
            Self::CombinedImageSampler { texture, sampler } => vec![
                Retained::Texture(Arc::clone(texture)),
                Retained::Sampler(Arc::clone(sampler)),
            ],
        }
    }
}

fn check_range(buffer: &Buffer, offset: u64, range: u64) -> Result<()> {
    if range == 0 {
        return Err(RhiError::EmptyBufferRange { offset });
    }
    let in_bounds = offset.checked_add(range).is_some_and(|end| end <= buffer.size());
    if !in_bounds {
        return Err(RhiError::BufferOverflow {
            size: buffer.size(),
            offset,
            len: range as usize,
        });
    }
    Ok(())
}

/// One binding-table instance for one set index of one pipeline
pub struct DescriptorSet {
    allocator: Arc<DescriptorAllocator>,
    set: vk::DescriptorSet,
    set_index: u32,
    pipeline: Arc<Pipeline>,
    /// Resources written into the set, kept alive with it
    bound: Mutex<BTreeMap<u32, Vec<Retained>>>,
    sealed: AtomicBool,
}

impl DescriptorSet {
    /// Rewrite exactly one binding. The resource kind must match the layout.
    pub fn update(&self, binding: u32, resource: BindingResource) -> Result<()> {
        if self.is_sealed() {
            return Err(RhiError::SealedDescriptorSet { set: self.set_index });
        }

        let slot_name = || format!("set {} binding {}", self.set_index, binding);
        let layout = self
            .pipeline
            .layout_binding(self.set_index, binding)
            .ok_or_else(|| RhiError::UnknownBinding { name: slot_name() })?;

        if layout.kind != resource.kind() {
            return Err(RhiError::BindingKindMismatch {
                name: slot_name(),
                expected: layout.kind,
                actual: resource.kind(),
            });
        }
        resource.check_buffer()?;

        self.allocator.device.write_descriptor(self.set, binding, &resource.write());
        self.bound.lock().insert(binding, resource.retained());
        Ok(())
    }

    /// Freeze the set once the command list using it is submitted
    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn set_index(&self) -> u32 {
        self.set_index
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Bindings written so far
    pub fn bound_bindings(&self) -> Vec<u32> {
        self.bound.lock().keys().copied().collect()
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.allocator.device.free_descriptor_set(self.allocator.pool, self.set);
        self.allocator.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::Fixture;

    #[test]
    fn test_capacity_enforced_and_returned_on_drop() {
        let fixture = Fixture::with_max_sets(2);
        let pipeline = fixture.quad_pipeline();
        let allocator = fixture.rhi.descriptors();

        let first = allocator.allocate(&pipeline, 0).unwrap();
        let _second = allocator.allocate(&pipeline, 0).unwrap();
        assert_eq!(allocator.live(), 2);

        let err = allocator.allocate(&pipeline, 0).err().unwrap();
        assert!(matches!(err, RhiError::PoolExhausted { capacity: 2 }));
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);

        drop(first);
        assert_eq!(allocator.live(), 1);
        allocator.allocate(&pipeline, 0).unwrap();
    }

    #[test]
    fn test_unknown_set_index() {
        let fixture = Fixture::new();
        let pipeline = fixture.quad_pipeline();
        let err = fixture.rhi.descriptors().allocate(&pipeline, 5).err().unwrap();
        assert!(matches!(err, RhiError::NoSuchSet { set: 5 }));
    }

    #[test]
    fn test_update_writes_exactly_one_binding() {
        let fixture = Fixture::new();
        let pipeline = fixture.quad_pipeline();
        let set = fixture.rhi.descriptors().allocate(&pipeline, 0).unwrap();
        let ubo = fixture.rhi.create_buffer(64, BufferUsage::Uniform).unwrap();

        fixture.device.take_events();
        set.update(0, BindingResource::UniformBuffer { buffer: ubo, offset: 0, range: 64 })
            .unwrap();

        let writes = fixture.device.descriptor_writes();
        assert_eq!(writes, vec![(set.handle(), 0)]);
        assert_eq!(set.bound_bindings(), vec![0]);
    }

    #[test]
    fn test_update_kind_mismatch() {
        let fixture = Fixture::new();
        let pipeline = fixture.quad_pipeline();
        let set = fixture.rhi.descriptors().allocate(&pipeline, 0).unwrap();
        let ubo = fixture.rhi.create_buffer(64, BufferUsage::Uniform).unwrap();

        // Binding 1 is the sampler
        let err = set
            .update(1, BindingResource::UniformBuffer { buffer: ubo, offset: 0, range: 64 })
            .unwrap_err();
        assert!(matches!(
            err,
            RhiError::BindingKindMismatch {
                expected: ResourceKind::CombinedImageSampler,
                actual: ResourceKind::UniformBuffer,
                ..
            }
        ));
    }

    #[test]
    fn test_buffer_range_checked() {
        let fixture = Fixture::new();
        let pipeline = fixture.quad_pipeline();
        let set = fixture.rhi.descriptors().allocate(&pipeline, 0).unwrap();
        let ubo = fixture.rhi.create_buffer(64, BufferUsage::Uniform).unwrap();

        let empty = set
            .update(0, BindingResource::UniformBuffer { buffer: Arc::clone(&ubo), offset: 0, range: 0 })
            .unwrap_err();
        assert!(matches!(empty, RhiError::EmptyBufferRange { offset: 0 }));
        assert_eq!(empty.kind(), ErrorKind::ProgrammerMisuse);

        let wrapped = set
            .update(0, BindingResource::UniformBuffer { buffer: Arc::clone(&ubo), offset: u64::MAX, range: 2 })
            .unwrap_err();
        assert!(matches!(wrapped, RhiError::BufferOverflow { size: 64, .. }));

        fixture.device.take_events();
        set.update(0, BindingResource::UniformBuffer { buffer: ubo, offset: 32, range: 32 })
            .unwrap();
        assert_eq!(fixture.device.descriptor_writes(), vec![(set.handle(), 0)]);
    }

    #[test]
    fn test_sealed_set_rejects_updates() {
        let fixture = Fixture::new();
        let pipeline = fixture.quad_pipeline();
        let set = fixture.rhi.descriptors().allocate(&pipeline, 0).unwrap();
        let ubo = fixture.rhi.create_buffer(64, BufferUsage::Uniform).unwrap();

        set.seal();
        let err = set
            .update(0, BindingResource::UniformBuffer { buffer: ubo, offset: 0, range: 64 })
            .unwrap_err();
        assert!(matches!(err, RhiError::SealedDescriptorSet { set: 0 }));
        assert_eq!(err.kind(), ErrorKind::ProgrammerMisuse);
    }

    #[test]
    fn test_set_keeps_written_resources_alive() {
        let fixture = Fixture::new();
        let pipeline = fixture.quad_pipeline();
        let set = fixture.rhi.descriptors().allocate(&pipeline, 0).unwrap();
        let ubo = fixture.rhi.create_buffer(64, BufferUsage::Uniform).unwrap();
        let handle = ubo.handle();

        set.update(0, BindingResource::UniformBuffer { buffer: ubo, offset: 0, range: 64 })
            .unwrap();
        assert!(fixture.device.is_live_buffer(handle));

        drop(set);
        assert!(!fixture.device.is_live_buffer(handle));
    }
}
