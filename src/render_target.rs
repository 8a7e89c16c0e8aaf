// Render target cache
//
// Render pass + framebuffer pairs are built lazily per presentable image and
// memoized. Pairs are reference counted; command lists that begin a render
// pass hold on to theirs, so invalidating the cache never destroys a pair
// that in-flight work still uses.

use ash::vk;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{AttachmentLayout, GpuDevice};
use crate::error::Result;
use crate::resource::Texture;

/// A presentable image handed out by `begin_frame`
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub image_index: u32,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

impl RenderTarget {
    pub fn key(&self) -> RenderTargetKey {
        RenderTargetKey { image_index: self.image_index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetKey {
    pub image_index: u32,
}

/// Render pass and framebuffer built for one render target
pub struct RenderTargetPair {
    device: Arc<dyn GpuDevice>,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
    depth: Option<Arc<Texture>>,
}

impl RenderTargetPair {
    fn new(device: Arc<dyn GpuDevice>, target: &RenderTarget, depth: Option<Arc<Texture>>) -> Result<Self> {
        let layout = AttachmentLayout {
            color_format: target.format,
            depth_format: depth.as_ref().map(|texture| texture.format()),
        };
        let render_pass = device.create_render_pass(&layout)?;

        let mut attachments = vec![target.view];
        if let Some(depth) = &depth {
            attachments.push(depth.view());
        }
        let framebuffer = match device.create_framebuffer(render_pass, &attachments, target.extent) {
            Ok(framebuffer) => framebuffer,
            Err(err) => {
                device.destroy_render_pass(render_pass);
                return Err(err);
            }
        };

        Ok(Self {
            device,
            render_pass,
            framebuffer,
            view: target.view,
            extent: target.extent,
            format: target.format,
            depth,
        })
    }

    /// Whether this pair was built for exactly `target` and `depth_view`
    fn matches(&self, target: &RenderTarget, depth_view: Option<vk::ImageView>) -> bool {
        self.view == target.view
            && self.format == target.format
            && self.extent.width == target.extent.width
            && self.extent.height == target.extent.height
            && self.depth.as_ref().map(|texture| texture.view()) == depth_view
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }
}

impl Drop for RenderTargetPair {
    fn drop(&mut self) {
        self.device.destroy_framebuffer(self.framebuffer);
        self.device.destroy_render_pass(self.render_pass);
    }
}

struct CacheState {
    entries: HashMap<RenderTargetKey, Arc<RenderTargetPair>>,
    depth: Option<Arc<Texture>>,
}

pub struct RenderTargetCache {
    device: Arc<dyn GpuDevice>,
    state: Mutex<CacheState>,
}

impl RenderTargetCache {
    pub fn new(device: Arc<dyn GpuDevice>, depth: Option<Arc<Texture>>) -> Self {
        Self {
            device,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                depth,
            }),
        }
    }

    /// Memoized pair for `target`, rebuilt if the cached one no longer fits
    pub fn get_or_create(&self, target: &RenderTarget) -> Result<Arc<RenderTargetPair>> {
        let mut state = self.state.lock();
        let depth_view = state.depth.as_ref().map(|texture| texture.view());
        let key = target.key();

        if let Some(pair) = state.entries.get(&key) {
            if pair.matches(target, depth_view) {
                return Ok(Arc::clone(pair));
            }
            log::warn!(
                "Render target {} changed ({}x{} {:?}), rebuilding its framebuffer",
                key.image_index,
                target.extent.width,
                target.extent.height,
                target.format
            );
        }

        let pair = Arc::new(RenderTargetPair::new(
            Arc::clone(&self.device),
            target,
            state.depth.clone(),
        )?);
        log::debug!(
            "Built render pass + framebuffer for image {} ({}x{})",
            key.image_index,
            target.extent.width,
            target.extent.height
        );
        state.entries.insert(key, Arc::clone(&pair));
        Ok(pair)
    }

    /// Forget every cached pair. Pairs still held elsewhere survive until
    /// their last holder drops them.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        log::debug!("Invalidated {} cached render target(s)", count);
    }

    /// Swap the depth attachment used for new pairs and drop cached ones
    pub fn set_depth(&self, depth: Option<Arc<Texture>>) {
        let mut state = self.state.lock();
        state.depth = depth;
        state.entries.clear();
    }

    pub fn depth(&self) -> Option<Arc<Texture>> {
        self.state.lock().depth.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
