// =============================================================================
// KILN DEMO - Spinning textured quad on top of the RHI
// =============================================================================
//
// The demo drives the RHI the way an application would: it never touches
// fences, semaphores or descriptor sets directly. Everything below goes
// through `Rhi` and `CommandList`.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input)                               │
// │    └── App                                                      │
// │          └── Rhi (frames in flight, retention, render targets)  │
// │                └── VulkanDevice + Swapchain                     │
// │                      └── CommandList (bind by name, draw)       │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. begin_frame: wait for the slot's fence, acquire a swapchain image
// 2. Write this slot's uniform buffer
// 3. Record: render pass, pipeline, buffers, "ubo" + "tex", draw
// 4. submit: the list's resources are retained until the slot comes back
// 5. end_frame: present (and resize if the surface asked for it)
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3};
use kiln_rhi::{
    Buffer, BufferUsage, CommandList, Config, Pipeline, RenderTarget, Rhi, RhiError, Sampler, ShaderStage,
    Swapchain, Texture, VulkanDevice,
};
use raw_window_handle::HasDisplayHandle;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

const VERTEX_SHADER: &str = "shaders/quad.vert.spv";
const FRAGMENT_SHADER: &str = "shaders/quad.frag.spv";
const CHECKER_SIZE: u32 = 64;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting kiln demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// RUST_LOG wins over the configured level when set
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

// =============================================================================
// SCENE
// =============================================================================

/// Everything the quad needs. Uniform buffers are per frame slot so the CPU
/// never writes one the GPU may still be reading.
struct Scene {
    pipeline: Arc<Pipeline>,
    positions: Arc<Buffer>,
    colors: Arc<Buffer>,
    uvs: Arc<Buffer>,
    indices: Arc<Buffer>,
    uniforms: Vec<Arc<Buffer>>,
    texture: Arc<Texture>,
    sampler: Arc<Sampler>,
}

impl Scene {
    fn new(rhi: &Rhi) -> Result<Self> {
        let vertex = rhi
            .create_shader_from_file(VERTEX_SHADER, ShaderStage::Vertex)
            .with_context(|| format!("Failed to load {}", VERTEX_SHADER))?;
        let fragment = rhi
            .create_shader_from_file(FRAGMENT_SHADER, ShaderStage::Fragment)
            .with_context(|| format!("Failed to load {}", FRAGMENT_SHADER))?;
        let pipeline = rhi.create_graphics_pipeline(&vertex, &fragment)?;

        // One buffer per vertex input location
        let positions: [[f32; 3]; 4] = [
            [-0.5, -0.5, 0.0],
            [0.5, -0.5, 0.0],
            [0.5, 0.5, 0.0],
            [-0.5, 0.5, 0.0],
        ];
        let colors: [[f32; 3]; 4] = [[1.0, 0.3, 0.3], [0.3, 1.0, 0.3], [0.3, 0.3, 1.0], [1.0, 1.0, 1.0]];
        let uvs: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let indices: [u16; 6] = [0, 1, 2, 2, 3, 0];

        let uniforms = (0..rhi.frames().frames_in_flight())
            .map(|_| rhi.create_buffer(std::mem::size_of::<Mat4>() as u64, BufferUsage::Uniform))
            .collect::<kiln_rhi::Result<Vec<_>>>()?;

        let texture = rhi.create_texture(CHECKER_SIZE, CHECKER_SIZE, vk::Format::R8G8B8A8_SRGB)?;
        rhi.upload_texture(&texture, &checkerboard(CHECKER_SIZE))?;

        Ok(Self {
            pipeline,
            positions: rhi.create_buffer_with_data(BufferUsage::Vertex, &positions)?,
            colors: rhi.create_buffer_with_data(BufferUsage::Vertex, &colors)?,
            uvs: rhi.create_buffer_with_data(BufferUsage::Vertex, &uvs)?,
            indices: rhi.create_buffer_with_data(BufferUsage::Index, &indices)?,
            uniforms,
            texture,
            sampler: rhi.create_sampler()?,
        })
    }

    fn record(&self, rhi: &Rhi, target: &RenderTarget, uniforms: &Arc<Buffer>) -> kiln_rhi::Result<CommandList> {
        let mut cl = rhi.create_command_list()?;
        cl.begin()?;
        cl.begin_render_pass(target)?;
        cl.set_viewport()?;
        cl.set_scissors()?;

        cl.bind_pipeline(&self.pipeline)?;
        cl.bind_vertex_buffer(&self.positions, 0)?;
        cl.bind_vertex_buffer(&self.colors, 1)?;
        cl.bind_vertex_buffer(&self.uvs, 2)?;
        cl.bind_index_buffer(&self.indices, vk::IndexType::UINT16)?;
        cl.bind_uniform_buffer("ubo", uniforms, uniforms.size())?;
        cl.bind_texture("tex", &self.texture, &self.sampler)?;
        cl.draw_indexed(6, 1, 0, 0, 0)?;

        cl.end_render_pass()?;
        cl.end()?;
        Ok(cl)
    }
}

/// RGBA8 checkerboard, 8 pixel cells
fn checkerboard(size: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let value = if ((x / 8) + (y / 8)) % 2 == 0 { 230 } else { 40 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The scene's resources go before
/// the RHI, and the window outlives the surface the RHI presents to.
struct App {
    config: Config,
    scene: Option<Scene>,
    rhi: Option<Rhi>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Set when the window or the surface changed size
    needs_resize: bool,
    /// Set when the window is minimized (size = 0) - skip rendering
    is_minimized: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    start_time: Instant,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            scene: None,
            rhi: None,
            window: None,
            is_fullscreen,
            needs_resize: false,
            is_minimized: false,
            start_time: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_rhi(&mut self, event_loop: &ActiveEventLoop, window: &Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let display = event_loop.display_handle().context("No display handle")?.as_raw();
        let device = VulkanDevice::new(&self.config.window.title, self.config.debug.validation_layers, display)?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            Arc::clone(&device),
            &**window,
            size.width,
            size.height,
            self.config.get_present_mode(),
        )?;

        let rhi = Rhi::new(device, Box::new(swapchain), &self.config)?;
        let scene = Scene::new(&rhi)?;

        self.scene = Some(scene);
        self.rhi = Some(rhi);
        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let (Some(window), Some(rhi)) = (&self.window, self.rhi.as_mut()) else {
            return Ok(());
        };

        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }

        rhi.resize(size.width, size.height)?;
        self.needs_resize = false;
        Ok(())
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    /// Render one frame. Returns false when nothing was drawn (minimized, or
    /// the surface went out of date while acquiring).
    fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }
        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let (Some(rhi), Some(scene)) = (self.rhi.as_mut(), self.scene.as_ref()) else {
            return Ok(false);
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait for the slot and acquire an image
        // ─────────────────────────────────────────────────────────────────────
        let target = match rhi.begin_frame() {
            Ok(target) => target,
            Err(RhiError::SurfaceOutOfDate) => {
                self.needs_resize = true;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Update this slot's uniforms
        // ─────────────────────────────────────────────────────────────────────
        let extent = rhi.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let elapsed = self.start_time.elapsed().as_secs_f32();

        let model = Mat4::from_rotation_z(elapsed);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, Vec3::Y);
        let mut projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space has Y pointing down
        projection.y_axis.y *= -1.0;
        let mvp = projection * view * model;

        let uniforms = &scene.uniforms[rhi.frames().current_slot()];

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Record and submit
        // ─────────────────────────────────────────────────────────────────────
        // A recording error still ends the frame so the slot moves on
        let recorded = uniforms
            .write(&[mvp])
            .and_then(|_| scene.record(rhi, &target, uniforms))
            .and_then(|cl| rhi.submit(cl));
        if let Err(e) = recorded {
            log::error!("Failed to record frame {}: {}", rhi.frames().frame_number(), e);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Present
        // ─────────────────────────────────────────────────────────────────────
        if rhi.end_frame()? {
            self.needs_resize = true;
        }

        Ok(true)
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            let outstanding = self.rhi.as_ref().map_or(0, Rhi::outstanding);

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{} retained]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    outstanding
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_rhi(event_loop, &window) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref mut rhi) = self.rhi {
                    if let Err(e) = rhi.wait_idle() {
                        log::error!("wait_idle failed: {}", e);
                    }
                }
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => log::error!("Render error: {:?}", e),
            },

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up...");

        // The GPU must be done with the scene before its buffers go
        if let Some(ref mut rhi) = self.rhi {
            if let Err(e) = rhi.wait_idle() {
                log::error!("wait_idle failed: {}", e);
            }
        }
        self.scene = None;
        self.rhi = None;

        log::info!("Cleanup complete");
    }
}
