// RHI error taxonomy
//
// Every failure the core can report falls into one of four kinds. None of
// them are retried: configuration and exhaustion errors are sizing or asset
// bugs, misuse errors are wrong call sequences, device errors are fatal.

use ash::vk;
use thiserror::Error;

use crate::command_list::CommandListState;
use crate::shader::{ResourceKind, ShaderStage};

pub type Result<T> = std::result::Result<T, RhiError>;

/// Coarse classification of an [`RhiError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unsupported shader content or layout transition, detected at build time
    Configuration,
    /// A fixed-capacity resource ran out
    ResourceExhaustion,
    /// The caller issued operations in an invalid order or with bad arguments
    ProgrammerMisuse,
    /// The native device or presentation engine failed
    Device,
}

#[derive(Debug, Error)]
pub enum RhiError {
    // ── configuration ───────────────────────────────────────────────────────
    #[error("vertex input `{name}` has unsupported element type ({element})")]
    UnsupportedFormat { name: String, element: String },

    #[error("shader resource `{name}` is not supported: {reason}")]
    UnsupportedResource { name: String, reason: &'static str },

    #[error("invalid SPIR-V module: {0}")]
    InvalidShader(String),

    #[error("shader has no {expected:?} entry point")]
    StageMismatch { expected: ShaderStage },

    #[error("set {set} binding {binding} declared as both {first:?} and {second:?}")]
    BindingConflict {
        set: u32,
        binding: u32,
        first: ResourceKind,
        second: ResourceKind,
    },

    #[error("resource `{name}` is declared at set {first_set} binding {first_binding} and at set {second_set} binding {second_binding}")]
    NameCollision {
        name: String,
        first_set: u32,
        first_binding: u32,
        second_set: u32,
        second_binding: u32,
    },

    #[error("texture format {0:?} cannot be uploaded from tightly packed pixel data")]
    UnsupportedTextureFormat(vk::Format),

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    // ── resource exhaustion ─────────────────────────────────────────────────
    #[error("descriptor pool exhausted ({capacity} sets)")]
    PoolExhausted { capacity: u32 },

    #[error("{requested} frames in flight requested, supported range is 1..={max}")]
    FramesInFlight { requested: usize, max: usize },

    #[error("device memory allocation failed: {0}")]
    OutOfMemory(String),

    // ── programmer misuse ───────────────────────────────────────────────────
    #[error("`{name}` is not a resource of the bound pipeline")]
    UnknownBinding { name: String },

    #[error("`{op}` is not valid while the command list is {state:?}")]
    InvalidState {
        op: &'static str,
        state: CommandListState,
    },

    #[error("`{op}` called out of frame order: {reason}")]
    FrameOrder { op: &'static str, reason: &'static str },

    #[error("`{name}` expects a {expected:?} but a {actual:?} was bound")]
    BindingKindMismatch {
        name: String,
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("`{name}` was bound after a draw consumed the current descriptor sets; bind the pipeline again")]
    BindingsConsumed { name: String },

    #[error("`{op}` requires a bound pipeline")]
    NoPipelineBound { op: &'static str },

    #[error("draw_indexed called without an index buffer")]
    MissingIndexBuffer,

    #[error("descriptor set {set} was sealed by submission and can no longer be updated")]
    SealedDescriptorSet { set: u32 },

    #[error("access of {len} bytes at offset {offset} overflows a {size}-byte buffer")]
    BufferOverflow { size: u64, offset: u64, len: usize },

    #[error("descriptor range at offset {offset} is empty")]
    EmptyBufferRange { offset: u64 },

    #[error("pipeline declares no descriptor set {set}")]
    NoSuchSet { set: u32 },

    #[error("buffer created for {actual} cannot be used as {expected}")]
    BufferUsageMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    // ── device ──────────────────────────────────────────────────────────────
    #[error("timed out after {timeout_ms} ms waiting for {what}")]
    SyncTimeout { what: &'static str, timeout_ms: u64 },

    #[error("presentation surface is out of date")]
    SurfaceOutOfDate,

    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },
}

impl RhiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. }
            | Self::UnsupportedResource { .. }
            | Self::InvalidShader(_)
            | Self::StageMismatch { .. }
            | Self::BindingConflict { .. }
            | Self::NameCollision { .. }
            | Self::UnsupportedTextureFormat(_)
            | Self::UnsupportedTransition { .. } => ErrorKind::Configuration,

            Self::PoolExhausted { .. } | Self::FramesInFlight { .. } | Self::OutOfMemory(_) => {
                ErrorKind::ResourceExhaustion
            }

            Self::UnknownBinding { .. }
            | Self::InvalidState { .. }
            | Self::FrameOrder { .. }
            | Self::BindingKindMismatch { .. }
            | Self::BindingsConsumed { .. }
            | Self::NoPipelineBound { .. }
            | Self::MissingIndexBuffer
            | Self::SealedDescriptorSet { .. }
            | Self::BufferOverflow { .. }
            | Self::EmptyBufferRange { .. }
            | Self::NoSuchSet { .. }
            | Self::BufferUsageMismatch { .. } => ErrorKind::ProgrammerMisuse,

            Self::SyncTimeout { .. } | Self::SurfaceOutOfDate | Self::Vulkan { .. } => {
                ErrorKind::Device
            }
        }
    }
}

/// Attach the failing operation to a raw `vk::Result`
pub(crate) trait VkResultExt<T> {
    fn vk(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn vk(self, op: &'static str) -> Result<T> {
        self.map_err(|result| RhiError::Vulkan { op, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_taxonomy() {
        let exhausted = RhiError::PoolExhausted { capacity: 2 };
        assert_eq!(exhausted.kind(), ErrorKind::ResourceExhaustion);

        let unknown = RhiError::UnknownBinding { name: "ubo".into() };
        assert_eq!(unknown.kind(), ErrorKind::ProgrammerMisuse);

        let transition = RhiError::UnsupportedTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        assert_eq!(transition.kind(), ErrorKind::Configuration);

        let timeout = RhiError::SyncTimeout { what: "frame fence", timeout_ms: 10 };
        assert_eq!(timeout.kind(), ErrorKind::Device);
    }

    #[test]
    fn test_vk_result_carries_operation() {
        let raw: std::result::Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = raw.vk("vkQueueSubmit").unwrap_err();
        assert!(err.to_string().starts_with("vkQueueSubmit failed"));
    }
}
