// Swapchain-dependent render targets
//
// Owns every object that has to be rebuilt when the surface changes and
// the command pool the per-image command buffers come from. The pool lives
// as long as the targets; the command buffers are a stage like the rest.

use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;

use super::lifecycle::{self, Stage, StagedResources, SWAPCHAIN_STAGES};
use super::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use super::swapchain::{DepthBuffer, ImageViews, Swapchain};
use super::VulkanDevice;
use crate::error::{RenderError, RenderResult, VkResultExt};

#[derive(Debug, Clone)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

pub struct RenderTargets {
    pub swapchain: Option<Swapchain>,
    pub image_views: Option<ImageViews>,
    pub depth: Option<DepthBuffer>,
    pub render_pass: Option<RenderPass>,
    pub pipeline: Option<GraphicsPipeline>,
    pub framebuffers: Option<Framebuffers>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    command_pool: vk::CommandPool,
    window_extent: vk::Extent2D,
    shaders: ShaderPaths,
    device: Arc<VulkanDevice>,
}

impl RenderTargets {
    /// Create the command pool and every stage for `window_extent`.
    pub fn new(device: Arc<VulkanDevice>, window_extent: vk::Extent2D, shaders: ShaderPaths) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_families.graphics);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .stage("vkCreateCommandPool")?;
        log::info!("Command pool created");

        // Dropping on failure destroys the pool; every stage is already unwound.
        let mut targets = Self {
            swapchain: None,
            image_views: None,
            depth: None,
            render_pass: None,
            pipeline: None,
            framebuffers: None,
            command_buffers: Vec::new(),
            command_pool,
            window_extent,
            shaders,
            device,
        };

        lifecycle::create_in_order(&mut targets, &SWAPCHAIN_STAGES)?;
        Ok(targets)
    }

    pub fn recreate(&mut self, window_extent: vk::Extent2D) -> RenderResult<()> {
        lifecycle::recreate(self, window_extent)
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(|s| s.extent)
    }

    fn swapchain(&self) -> RenderResult<&Swapchain> {
        self.swapchain.as_ref().ok_or(RenderError::Missing("swapchain"))
    }

    fn render_pass(&self) -> RenderResult<vk::RenderPass> {
        self.render_pass
            .as_ref()
            .map(|r| r.render_pass)
            .ok_or(RenderError::Missing("render pass"))
    }

    fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }.stage("vkAllocateCommandBuffers")
    }
}

impl StagedResources for RenderTargets {
    fn create_stage(&mut self, stage: Stage) -> RenderResult<()> {
        let device = self.device.clone();
        match stage {
            Stage::Swapchain => {
                self.swapchain = Some(Swapchain::new(device, self.window_extent)?);
            }
            Stage::ImageViews => {
                let views = ImageViews::new(device, self.swapchain()?)?;
                self.image_views = Some(views);
            }
            Stage::DepthResources => {
                let extent = self.swapchain()?.extent;
                self.depth = Some(DepthBuffer::new(device, extent)?);
            }
            Stage::RenderPass => {
                let color_format = self.swapchain()?.format.format;
                let depth_format = self
                    .depth
                    .as_ref()
                    .map(|d| d.format)
                    .ok_or(RenderError::Missing("depth buffer"))?;
                self.render_pass = Some(RenderPass::new(device, color_format, depth_format)?);
            }
            Stage::Pipeline => {
                let extent = self.swapchain()?.extent;
                let pipeline = GraphicsPipeline::new(
                    device,
                    self.render_pass()?,
                    extent,
                    &self.shaders.vertex,
                    &self.shaders.fragment,
                )?;
                self.pipeline = Some(pipeline);
            }
            Stage::Framebuffers => {
                let extent = self.swapchain()?.extent;
                let views = self
                    .image_views
                    .as_ref()
                    .ok_or(RenderError::Missing("image views"))?;
                let depth_view = self
                    .depth
                    .as_ref()
                    .map(|d| d.view)
                    .ok_or(RenderError::Missing("depth buffer"))?;
                let framebuffers = Framebuffers::new(device, self.render_pass()?, &views.views, depth_view, extent)?;
                self.framebuffers = Some(framebuffers);
            }
            Stage::CommandBuffers => {
                let count = self.swapchain()?.image_count() as u32;
                self.command_buffers = self.allocate_command_buffers(count)?;
                log::info!("Allocated {} command buffers", count);
            }
        }
        Ok(())
    }

    fn destroy_stage(&mut self, stage: Stage) {
        match stage {
            Stage::Swapchain => self.swapchain = None,
            Stage::ImageViews => self.image_views = None,
            Stage::DepthResources => self.depth = None,
            Stage::RenderPass => self.render_pass = None,
            Stage::Pipeline => self.pipeline = None,
            Stage::Framebuffers => self.framebuffers = None,
            Stage::CommandBuffers => {
                if !self.command_buffers.is_empty() {
                    unsafe {
                        self.device
                            .device
                            .free_command_buffers(self.command_pool, &self.command_buffers)
                    };
                    self.command_buffers.clear();
                }
            }
        }
    }

    fn wait_idle(&self) -> RenderResult<()> {
        self.device.wait_idle()
    }

    fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.window_extent = extent;
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device before destroying render targets: {}", e);
        }
        lifecycle::destroy_in_reverse(self, &SWAPCHAIN_STAGES);
        unsafe { self.device.device.destroy_command_pool(self.command_pool, None) };
        log::info!("Render targets destroyed");
    }
}
