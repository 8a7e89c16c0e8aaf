// Shared test fixture: an `Rhi` over the headless back end

use std::sync::Arc;

use crate::backend::headless::SurfaceControl;
use crate::backend::{GpuDevice, HeadlessDevice, HeadlessSurface};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::render_target::RenderTarget;
use crate::rhi::Rhi;
use crate::shader::spirv_builder::SpirvBuilder;
use crate::shader::{ShaderModule, ShaderStage};

pub(crate) struct Fixture {
    pub rhi: Rhi,
    pub device: Arc<HeadlessDevice>,
    surface: Arc<SurfaceControl>,
}

impl Fixture {
    /// Two frames in flight over three 800x600 images, with depth
    pub fn new() -> Self {
        Self::try_with_config(Config::default()).unwrap()
    }

    pub fn with_max_sets(max_sets: u32) -> Self {
        let mut config = Config::default();
        config.descriptors.max_sets = max_sets;
        Self::try_with_config(config).unwrap()
    }

    pub fn try_with_config(config: Config) -> Result<Self> {
        Self::try_with_images(config, 3)
    }

    pub fn try_with_images(config: Config, image_count: usize) -> Result<Self> {
        let device = HeadlessDevice::new();
        let surface = HeadlessSurface::new(Arc::clone(&device), 800, 600, image_count);
        let control = surface.control();
        let rhi = Rhi::new(Arc::clone(&device) as Arc<dyn GpuDevice>, Box::new(surface), &config)?;
        Ok(Self {
            rhi,
            device,
            surface: control,
        })
    }

    pub fn surface_control(&self) -> &SurfaceControl {
        &self.surface
    }

    pub fn vertex_shader(&self, builder: SpirvBuilder) -> Arc<ShaderModule> {
        self.rhi.create_shader(&builder.build(), ShaderStage::Vertex).unwrap()
    }

    pub fn fragment_shader(&self, builder: SpirvBuilder) -> Arc<ShaderModule> {
        self.rhi.create_shader(&builder.build(), ShaderStage::Fragment).unwrap()
    }

    /// Textured quad: "ubo" at (0, 0) in both stages, "tex" at (0, 1)
    pub fn quad_shaders(&self) -> (Arc<ShaderModule>, Arc<ShaderModule>) {
        let vertex = self.vertex_shader(
            SpirvBuilder::vertex()
                .input("position", 0, 3)
                .input("color", 1, 3)
                .input("uv", 2, 2)
                .uniform_block("ubo", "UniformBufferObject", 0, 0),
        );
        let fragment = self.fragment_shader(
            SpirvBuilder::fragment()
                .uniform_block("ubo", "UniformBufferObject", 0, 0)
                .sampled_image("tex", 0, 1),
        );
        (vertex, fragment)
    }

    pub fn quad_pipeline(&self) -> Arc<Pipeline> {
        let (vertex, fragment) = self.quad_shaders();
        self.rhi.create_graphics_pipeline(&vertex, &fragment).unwrap()
    }

    /// Render target for presentable image `image_index`, outside any frame
    pub fn target(&self, image_index: u32) -> RenderTarget {
        let presenter = self.rhi.presenter();
        RenderTarget {
            image_index,
            view: presenter.image_view(image_index),
            extent: presenter.extent(),
            format: presenter.format(),
        }
    }
}
