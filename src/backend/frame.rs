// Frame driver
//
// One frame in flight: wait for the previous submission, acquire, record,
// submit, present. Stale swapchain results move the driver to `Recreating`
// and the current frame is dropped; the next `advance` rebuilds the targets.

use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::sync::FrameSync;
use super::targets::{RenderTargets, ShaderPaths};
use super::VulkanDevice;
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::render_queue::DrawItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Ready,
    Recreating,
    Minimized,
}

/// What `advance` does next. Only `Record` goes on to reset the fence and
/// submit; every other step leaves the fence signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    Skip,
    Recreate,
    Acquire,
    Record(u32),
}

impl FrameState {
    /// First step of a frame in this state.
    pub fn begin(self) -> FrameStep {
        match self {
            FrameState::Minimized => FrameStep::Skip,
            FrameState::Recreating => FrameStep::Recreate,
            FrameState::Ready => FrameStep::Acquire,
        }
    }

    /// A resize always forces a rebuild, including out of `Minimized`.
    pub fn on_resize(self) -> FrameState {
        FrameState::Recreating
    }

    /// State after an attempted recreation. Anything but a zero extent
    /// failing is fatal.
    pub fn after_recreate(result: RenderResult<()>) -> RenderResult<FrameState> {
        match result {
            Ok(()) => Ok(FrameState::Ready),
            Err(RenderError::Minimized) => Ok(FrameState::Minimized),
            Err(e) => Err(e),
        }
    }

    /// A stale acquire drops the frame before anything is recorded.
    pub fn on_acquire(self, outcome: AcquireOutcome) -> (FrameState, FrameStep) {
        match outcome {
            AcquireOutcome::Image(index) => (self, FrameStep::Record(index)),
            AcquireOutcome::Stale => (FrameState::Recreating, FrameStep::Skip),
        }
    }

    /// The frame is already submitted; a stale present only affects the next one.
    pub fn on_present(self, outcome: PresentOutcome) -> FrameState {
        match outcome {
            PresentOutcome::Presented => self,
            PresentOutcome::Stale => FrameState::Recreating,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image(u32),
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Stale,
}

/// A suboptimal acquire still renders; out-of-date abandons the frame.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> RenderResult<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => {
            if suboptimal {
                log::debug!("Acquired image {} from a suboptimal swapchain", index);
            }
            Ok(AcquireOutcome::Image(index))
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            log::warn!("Swapchain out of date on acquire");
            Ok(AcquireOutcome::Stale)
        }
        Err(result) => Err(RenderError::vulkan("vkAcquireNextImageKHR", result)),
    }
}

/// Suboptimal and out-of-date both schedule a recreation.
pub fn classify_present(result: VkResult<bool>) -> RenderResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => {
            log::warn!("Swapchain suboptimal on present");
            Ok(PresentOutcome::Stale)
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            log::warn!("Swapchain out of date on present");
            Ok(PresentOutcome::Stale)
        }
        Err(result) => Err(RenderError::vulkan("vkQueuePresentKHR", result)),
    }
}

/// Colour from the caller, depth cleared to the far plane.
pub fn clear_values(colour: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: colour },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

pub struct FrameDriver {
    targets: RenderTargets,
    sync: FrameSync,
    state: FrameState,
    device: Arc<VulkanDevice>,
}

impl FrameDriver {
    pub fn new(device: Arc<VulkanDevice>, window_extent: vk::Extent2D, shaders: ShaderPaths) -> RenderResult<Self> {
        let sync = FrameSync::new(&device)?;

        let targets = match RenderTargets::new(device.clone(), window_extent, shaders) {
            Ok(targets) => targets,
            Err(e) => {
                sync.destroy(&device.device);
                return Err(e);
            }
        };

        log::info!("Frame driver ready");
        Ok(Self {
            targets,
            sync,
            state: FrameState::Ready,
            device,
        })
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// The surface changed size; rebuild before the next frame.
    pub fn notify_resized(&mut self) {
        let next = self.state.on_resize();
        if next != self.state {
            log::debug!("Resize noted, swapchain will be recreated");
        }
        self.state = next;
    }

    /// Render `items` and present. Returns `Skipped` when the frame was
    /// dropped because the swapchain is stale or the window has no area.
    pub fn advance(
        &mut self,
        items: &[DrawItem],
        clear_colour: [f32; 4],
        window_extent: vk::Extent2D,
    ) -> RenderResult<FrameStatus> {
        match self.state.begin() {
            FrameStep::Skip => return Ok(FrameStatus::Skipped),
            FrameStep::Recreate => {
                self.state = FrameState::after_recreate(self.targets.recreate(window_extent))?;
                if self.state.begin() != FrameStep::Acquire {
                    return Ok(FrameStatus::Skipped);
                }
            }
            FrameStep::Acquire | FrameStep::Record(_) => {}
        }

        let device = &self.device.device;
        let fence = self.sync.in_flight_fence;

        unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }.stage("vkWaitForFences")?;

        let swapchain = self
            .targets
            .swapchain
            .as_ref()
            .ok_or(RenderError::Missing("swapchain"))?;

        let acquired = classify_acquire(swapchain.acquire_next_image(self.sync.image_available))?;
        let (state, step) = self.state.on_acquire(acquired);
        self.state = state;
        let image_index = match step {
            FrameStep::Record(index) => index,
            _ => return Ok(FrameStatus::Skipped),
        };

        let cmd = self
            .targets
            .command_buffers
            .get(image_index as usize)
            .copied()
            .ok_or(RenderError::Missing("command buffer"))?;

        self.record(cmd, image_index, items, clear_colour)?;

        // Only reset once a submission is certain to signal it again.
        unsafe { device.reset_fences(&[fence]) }.stage("vkResetFences")?;

        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [self.sync.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe { device.queue_submit(self.device.graphics_queue, &[submit_info], fence) }
            .stage("vkQueueSubmit")?;

        let presented = swapchain.present(self.device.present_queue, image_index, &signal_semaphores);
        self.state = self.state.on_present(classify_present(presented)?);

        Ok(FrameStatus::Presented)
    }

    fn record(
        &self,
        cmd: vk::CommandBuffer,
        image_index: u32,
        items: &[DrawItem],
        clear_colour: [f32; 4],
    ) -> RenderResult<()> {
        let device = &self.device.device;
        let targets = &self.targets;

        let framebuffer = targets
            .framebuffers
            .as_ref()
            .and_then(|f| f.get(image_index))
            .ok_or(RenderError::Missing("framebuffer"))?;
        let render_pass = targets
            .render_pass
            .as_ref()
            .ok_or(RenderError::Missing("render pass"))?;
        let pipeline = targets
            .pipeline
            .as_ref()
            .ok_or(RenderError::Missing("graphics pipeline"))?;
        let extent = targets.extent().ok_or(RenderError::Missing("swapchain"))?;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .stage("vkResetCommandBuffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder();
            device
                .begin_command_buffer(cmd, &begin_info)
                .stage("vkBeginCommandBuffer")?;

            let clear = clear_values(clear_colour);
            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(render_pass.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear);

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);

            for item in items {
                let mvp = item.transform.compose();
                device.cmd_push_constants(
                    cmd,
                    pipeline.layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&mvp),
                );
                item.mesh.record(device, cmd);
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).stage("vkEndCommandBuffer")?;
        }

        Ok(())
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {}", e);
        }
        self.sync.destroy(&self.device.device);
        log::info!("Frame driver destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_suboptimal_still_renders() {
        assert_eq!(classify_acquire(Ok((2, false))).unwrap(), AcquireOutcome::Image(2));
        assert_eq!(classify_acquire(Ok((1, true))).unwrap(), AcquireOutcome::Image(1));
    }

    #[test]
    fn acquire_out_of_date_abandons_frame() {
        let outcome = classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap();
        assert_eq!(outcome, AcquireOutcome::Stale);
    }

    #[test]
    fn acquire_device_lost_is_fatal() {
        let err = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
    }

    #[test]
    fn present_outcomes() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Stale);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::Stale
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn recreation_result_drives_state() {
        assert_eq!(FrameState::after_recreate(Ok(())).unwrap(), FrameState::Ready);
        assert_eq!(
            FrameState::after_recreate(Err(RenderError::Minimized)).unwrap(),
            FrameState::Minimized
        );

        let fatal = RenderError::vulkan("vkCreateSwapchainKHR", vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(FrameState::after_recreate(Err(fatal)).is_err());
    }

    const STATES: [FrameState; 3] = [FrameState::Ready, FrameState::Recreating, FrameState::Minimized];

    #[test]
    fn minimized_skips_without_recreating() {
        assert_eq!(FrameState::Minimized.begin(), FrameStep::Skip);
        assert_eq!(FrameState::Recreating.begin(), FrameStep::Recreate);
        assert_eq!(FrameState::Ready.begin(), FrameStep::Acquire);
    }

    #[test]
    fn resize_schedules_recreation_from_any_state() {
        for state in STATES {
            assert_eq!(state.on_resize(), FrameState::Recreating, "from {:?}", state);
        }
        assert_eq!(FrameState::Ready.on_resize().begin(), FrameStep::Recreate);
    }

    #[test]
    fn stale_acquire_drops_frame_before_fence_reset() {
        let (state, step) = FrameState::Ready.on_acquire(AcquireOutcome::Stale);
        assert_eq!(state, FrameState::Recreating);
        assert_eq!(step, FrameStep::Skip);
        assert!(!matches!(step, FrameStep::Record(_)));
    }

    #[test]
    fn acquired_image_is_recorded() {
        let (state, step) = FrameState::Ready.on_acquire(AcquireOutcome::Image(1));
        assert_eq!(state, FrameState::Ready);
        assert_eq!(step, FrameStep::Record(1));
    }

    #[test]
    fn stale_present_recreates_next_frame() {
        assert_eq!(FrameState::Ready.on_present(PresentOutcome::Presented), FrameState::Ready);
        assert_eq!(FrameState::Ready.on_present(PresentOutcome::Stale), FrameState::Recreating);
        assert_eq!(
            FrameState::Ready
                .on_present(PresentOutcome::Stale)
                .begin(),
            FrameStep::Recreate
        );
    }

    #[test]
    fn clears_depth_to_far_plane() {
        let values = clear_values([0.5, 0.0, 0.4, 1.0]);
        unsafe {
            assert_eq!(values[0].color.float32, [0.5, 0.0, 0.4, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }
}
