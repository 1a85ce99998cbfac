// Swapchain-dependent resource ordering
//
// Recreation, shutdown and partial-failure cleanup all walk the same table:
// creation runs front to back, destruction back to front. Anything that owns
// the stages implements `StagedResources`; the sequencing lives here once.

use ash::vk;

use crate::error::{RenderError, RenderResult};

/// Swapchain-dependent objects, producers before consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Swapchain,
    ImageViews,
    DepthResources,
    RenderPass,
    Pipeline,
    Framebuffers,
    CommandBuffers,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Swapchain => "swapchain",
            Stage::ImageViews => "image views",
            Stage::DepthResources => "depth resources",
            Stage::RenderPass => "render pass",
            Stage::Pipeline => "graphics pipeline",
            Stage::Framebuffers => "framebuffers",
            Stage::CommandBuffers => "command buffers",
        }
    }
}

/// Creation order. Destruction walks it in reverse.
pub const SWAPCHAIN_STAGES: [Stage; 7] = [
    Stage::Swapchain,
    Stage::ImageViews,
    Stage::DepthResources,
    Stage::RenderPass,
    Stage::Pipeline,
    Stage::Framebuffers,
    Stage::CommandBuffers,
];

pub trait StagedResources {
    /// Build one stage. Earlier stages in the table already exist. On error
    /// the stage must not leave half-created objects behind.
    fn create_stage(&mut self, stage: Stage) -> RenderResult<()>;

    /// Destroy one stage if it exists; a no-op otherwise.
    fn destroy_stage(&mut self, stage: Stage);

    /// Block until no submitted work can still reference the stages.
    fn wait_idle(&self) -> RenderResult<()>;

    /// Record the window extent the next creation should target.
    fn set_window_extent(&mut self, extent: vk::Extent2D);
}

/// Create `stages` in order. If one fails, everything created by this call
/// is destroyed again, newest first, and the error is returned.
pub fn create_in_order<R: StagedResources + ?Sized>(
    resources: &mut R,
    stages: &[Stage],
) -> RenderResult<()> {
    for (i, &stage) in stages.iter().enumerate() {
        log::debug!("Creating {}", stage.name());
        if let Err(e) = resources.create_stage(stage) {
            log::error!("Failed to create {}: {}", stage.name(), e);
            destroy_in_reverse(resources, &stages[..i]);
            return Err(e);
        }
    }
    Ok(())
}

/// Destroy `stages` back to front, skipping any that are absent.
pub fn destroy_in_reverse<R: StagedResources + ?Sized>(resources: &mut R, stages: &[Stage]) {
    for &stage in stages.iter().rev() {
        resources.destroy_stage(stage);
    }
}

/// Tear down and rebuild every swapchain-dependent stage for a new window
/// extent. A zero extent returns `Minimized` before anything is touched.
pub fn recreate<R: StagedResources + ?Sized>(
    resources: &mut R,
    window_extent: vk::Extent2D,
) -> RenderResult<()> {
    if window_extent.width == 0 || window_extent.height == 0 {
        log::warn!("Window minimised, skipping swapchain recreation");
        return Err(RenderError::Minimized);
    }

    log::info!(
        "Recreating swapchain for window {}x{}",
        window_extent.width,
        window_extent.height
    );

    resources.wait_idle()?;
    destroy_in_reverse(resources, &SWAPCHAIN_STAGES);
    resources.set_window_extent(window_extent);
    create_in_order(resources, &SWAPCHAIN_STAGES)?;

    log::info!("Swapchain recreation complete");
    Ok(())
}
