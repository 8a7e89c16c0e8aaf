// Resource retention ledger
//
// Submitted command lists are parked here, one list per frame slot, until the
// slot's fence is observed. A command list owns `Arc`s to everything it
// referenced, so parking it keeps those resources alive no matter what the
// caller drops in the meantime.

use std::sync::Arc;

use crate::command_list::CommandList;
use crate::descriptor::DescriptorSet;
use crate::pipeline::Pipeline;
use crate::render_target::RenderTargetPair;
use crate::resource::{Buffer, Sampler, Texture};

/// A GPU-visible object referenced by recorded commands
#[derive(Clone)]
pub enum Retained {
    Buffer(Arc<Buffer>),
    Texture(Arc<Texture>),
    Sampler(Arc<Sampler>),
    Pipeline(Arc<Pipeline>),
    DescriptorSet(Arc<DescriptorSet>),
    RenderTarget(Arc<RenderTargetPair>),
}

impl std::fmt::Debug for Retained {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffer(buffer) => write!(f, "Buffer({:?})", buffer.handle()),
            Self::Texture(texture) => write!(f, "Texture({:?})", texture.image()),
            Self::Sampler(sampler) => write!(f, "Sampler({:?})", sampler.handle()),
            Self::Pipeline(pipeline) => write!(f, "Pipeline({:?})", pipeline.handle()),
            Self::DescriptorSet(set) => write!(f, "DescriptorSet({:?})", set.handle()),
            Self::RenderTarget(pair) => write!(f, "RenderTarget({:?})", pair.framebuffer()),
        }
    }
}

pub struct RetentionLedger {
    slots: Vec<Vec<CommandList>>,
}

impl RetentionLedger {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: (0..frames_in_flight).map(|_| Vec::new()).collect(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Park a submitted command list under `slot`
    pub fn retain(&mut self, slot: usize, command_list: CommandList) {
        self.slots[slot].push(command_list);
    }

    /// Retire and drop every command list parked under `slot`. Only call once
    /// the slot's fence has been observed.
    pub fn release(&mut self, slot: usize) -> usize {
        let retired = std::mem::take(&mut self.slots[slot]);
        let count = retired.len();
        for mut command_list in retired {
            command_list.mark_retired();
        }
        if count > 0 {
            log::debug!("Released {} command list(s) from frame slot {}", count, slot);
        }
        count
    }

    /// Release every slot. Only call after the device has gone idle.
    pub fn release_all(&mut self) -> usize {
        (0..self.slots.len()).map(|slot| self.release(slot)).sum()
    }

    pub fn outstanding(&self, slot: usize) -> usize {
        self.slots[slot].len()
    }

    pub fn total_outstanding(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Slots that still hold unretired work
    pub fn busy_slots(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_empty()).count()
    }
}

impl Drop for RetentionLedger {
    fn drop(&mut self) {
        let remaining = self.total_outstanding();
        if remaining > 0 {
            log::warn!("Retention ledger dropped with {} command list(s) still parked", remaining);
        }
    }
}
