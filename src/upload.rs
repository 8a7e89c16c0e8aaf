// Resource upload path
//
// Image layout transitions follow a fixed table; anything outside it is a
// configuration error. Uploads record transition -> copy -> transition into a
// one-off command list that the caller submits and waits on.

use ash::vk;
use std::sync::Arc;

use crate::command_list::CommandList;
use crate::error::{Result, RhiError};
use crate::resource::{Buffer, Texture};

/// Access masks and pipeline stages for one supported layout change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    pub fn between(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Result<Self> {
        let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            ),
            (old, new) => return Err(RhiError::UnsupportedTransition { old, new }),
        };

        Ok(Self {
            old_layout,
            new_layout,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }
}

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Bytes per texel of the uncompressed color and depth formats a buffer copy
/// can fill from tightly packed data
pub fn texel_size(format: vk::Format) -> Option<u64> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SNORM | vk::Format::R8_UINT | vk::Format::R8_SRGB => 1,
        vk::Format::R8G8_UNORM | vk::Format::R8G8_UINT | vk::Format::R16_SFLOAT | vk::Format::R16_UNORM => 2,
        vk::Format::D16_UNORM => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::D32_SFLOAT => 4,
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT => 16,
        _ => return None,
    };
    Some(size)
}

/// Image aspect a view of `format` covers
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        format if has_stencil(format) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Record a full staging-buffer-to-texture upload, leaving the texture ready
/// for sampling
pub(crate) fn record_texture_upload(
    commands: &mut CommandList,
    staging: &Arc<Buffer>,
    texture: &Arc<Texture>,
) -> Result<()> {
    commands.transition_image(
        texture,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    commands.copy_buffer_to_image(staging, texture)?;
    commands.transition_image(
        texture,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_list::Command;
    use crate::error::ErrorKind;
    use crate::resource::BufferUsage;
    use crate::testing::Fixture;

    #[test]
    fn test_transition_table() {
        let upload =
            LayoutTransition::between(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(upload.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let sample = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(sample.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(sample.dst_access, vk::AccessFlags::SHADER_READ);

        let depth = LayoutTransition::between(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(depth.dst_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_unlisted_transition_rejected() {
        let err = LayoutTransition::between(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_depth_aspects() {
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for_format(vk::Format::R8G8B8A8_SRGB), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_upload_records_transition_copy_transition() {
        let fixture = Fixture::new();
        let texture = fixture.rhi.create_texture(4, 4, vk::Format::R8G8B8A8_SRGB).unwrap();
        let staging = fixture.rhi.create_buffer(64, BufferUsage::Staging).unwrap();

        let mut commands = fixture.rhi.create_command_list().unwrap();
        commands.begin().unwrap();
        record_texture_upload(&mut commands, &staging, &texture).unwrap();

        let kinds: Vec<&str> = commands.commands().iter().map(Command::name).collect();
        assert_eq!(kinds, ["image_barrier", "copy_buffer_to_image", "image_barrier"]);
    }

    #[test]
    fn test_texel_sizes() {
        assert_eq!(texel_size(vk::Format::R8G8B8A8_SRGB), Some(4));
        assert_eq!(texel_size(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(texel_size(vk::Format::R8_UNORM), Some(1));
        assert_eq!(texel_size(vk::Format::BC7_UNORM_BLOCK), None);
    }

    #[test]
    fn test_short_staging_buffer_rejected_before_recording() {
        let fixture = Fixture::new();
        let texture = fixture.rhi.create_texture(4, 4, vk::Format::R8G8B8A8_UNORM).unwrap();
        let staging = fixture.rhi.create_buffer(4, BufferUsage::Staging).unwrap();

        let mut commands = fixture.rhi.create_command_list().unwrap();
        commands.begin().unwrap();
        let err = commands.copy_buffer_to_image(&staging, &texture).unwrap_err();
        assert!(matches!(err, RhiError::BufferOverflow { size: 4, offset: 0, len: 64 }));
        assert!(commands.commands().is_empty());
    }

    #[test]
    fn test_upload_texture_rejects_short_pixels() {
        let fixture = Fixture::new();
        let texture = fixture.rhi.create_texture(4, 4, vk::Format::R8G8B8A8_UNORM).unwrap();
        let buffers_before = fixture.device.live_buffer_count();
        fixture.device.take_events();

        let err = fixture.rhi.upload_texture(&texture, &[255u8; 4]).unwrap_err();
        assert!(matches!(err, RhiError::BufferOverflow { size: 4, len: 64, .. }));
        assert_eq!(err.kind(), ErrorKind::ProgrammerMisuse);

        // Nothing was staged or submitted
        assert_eq!(fixture.device.live_buffer_count(), buffers_before);
        assert!(fixture.device.fence_waits().is_empty());
    }

    #[test]
    fn test_upload_texture_waits_and_releases_staging() {
        let fixture = Fixture::new();
        let texture = fixture.rhi.create_texture(2, 2, vk::Format::R8G8B8A8_SRGB).unwrap();
        let buffers_before = fixture.device.live_buffer_count();

        fixture.rhi.upload_texture(&texture, &[255u8; 16]).unwrap();

        // The staging buffer is gone once the upload has completed
        assert_eq!(fixture.device.live_buffer_count(), buffers_before);
        assert!(fixture.device.fence_waits().iter().all(|&(_, blocked)| blocked));
    }
}
