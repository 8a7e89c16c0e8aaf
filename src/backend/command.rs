// Command recording
//
// Translates a recorded `Command` into the matching vkCmd* call.

use ash::vk;

use crate::command_list::Command;

pub fn record(device: &ash::Device, command_buffer: vk::CommandBuffer, command: &Command) {
    unsafe {
        match *command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                width,
                height,
                clear_color,
                clear_depth,
            } => {
                let mut clear_values = vec![vk::ClearValue {
                    color: vk::ClearColorValue { float32: clear_color },
                }];
                if let Some(depth) = clear_depth {
                    clear_values.push(vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                    });
                }

                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: vk::Extent2D { width, height },
                    })
                    .clear_values(&clear_values);

                device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
            }

            Command::EndRenderPass => device.cmd_end_render_pass(command_buffer),

            Command::BindPipeline { pipeline } => {
                device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
            }

            Command::BindVertexBuffer { slot, buffer } => {
                device.cmd_bind_vertex_buffers(command_buffer, slot, &[buffer], &[0]);
            }

            Command::BindIndexBuffer { buffer, index_type } => {
                device.cmd_bind_index_buffer(command_buffer, buffer, 0, index_type);
            }

            Command::BindDescriptorSet { layout, set_index, set } => {
                device.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    set_index,
                    &[set],
                    &[],
                );
            }

            Command::SetViewport { width, height } => {
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width,
                    height,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            }

            Command::SetScissor { width, height } => {
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D { width, height },
                };
                device.cmd_set_scissor(command_buffer, 0, &[scissor]);
            }

            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => device.cmd_draw(command_buffer, vertex_count, instance_count, first_vertex, first_instance),

            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => device.cmd_draw_indexed(
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            ),

            Command::ImageBarrier { image, aspect, transition } => {
                let barrier = vk::ImageMemoryBarrier::builder()
                    .old_layout(transition.old_layout)
                    .new_layout(transition.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .src_access_mask(transition.src_access)
                    .dst_access_mask(transition.dst_access)
                    .build();

                device.cmd_pipeline_barrier(
                    command_buffer,
                    transition.src_stage,
                    transition.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            }

            Command::CopyBufferToImage {
                buffer,
                image,
                aspect,
                width,
                height,
            } => {
                // Tightly packed source, whole mip 0
                let region = vk::BufferImageCopy::builder()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: aspect,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                    .image_extent(vk::Extent3D { width, height, depth: 1 })
                    .build();

                device.cmd_copy_buffer_to_image(
                    command_buffer,
                    buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        }
    }
}
