// Synchronization primitives
//
// One frame in flight: a single fence guards command-buffer reuse, two
// semaphores order acquire -> submit -> present on the GPU.

use ash::vk;

use super::VulkanDevice;
use crate::error::{RenderResult, VkResultExt};

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> RenderResult<Self> {
        log::info!("Creating sync objects");

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled, so the first frame does not wait forever
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let device = &device.device;
        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .stage("vkCreateSemaphore")?;

            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(e).stage("vkCreateSemaphore");
                }
            };

            let in_flight_fence = match device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(render_finished, None);
                    device.destroy_semaphore(image_available, None);
                    return Err(e).stage("vkCreateFence");
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
        log::info!("Sync objects destroyed");
    }
}
