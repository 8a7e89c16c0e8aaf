// Shader module creation
//
// Vulkan consumes SPIR-V as 4-byte words. Callers hand over `u32` words
// (see `shader::load_spirv`), so no alignment fix-up is needed here.

use ash::vk;

use crate::error::{Result, VkResultExt};

pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
    unsafe { device.create_shader_module(&create_info, None) }.vk("vkCreateShaderModule")
}
