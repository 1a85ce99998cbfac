// Swapchain - Window presentation
//
// Negotiates format, present mode, extent and image count with the surface,
// then owns the presentable images, their views and the depth buffer that
// shares their extent.

use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::buffer::find_memory_type;
use super::VulkanDevice;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Upper bound on presentable images.
pub const MAX_SWAPCHAIN_IMAGES: usize = 8;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Prefer 8-bit BGRA sRGB with a non-linear sRGB colour space, else the
/// first format the surface lists. `None` only for an empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX: no tearing, low latency, triple buffered
/// FIFO: vsync, guaranteed to be available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent when it defines one, otherwise the window
/// size clamped into the surface's supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: window_extent.width.max(min.width).min(max.width),
        height: window_extent.height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, limited by the maximum when there is one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// First candidate usable as an optimal-tiling depth/stencil attachment.
pub fn choose_depth_format(
    candidates: &[vk::Format],
    mut properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    _device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(device: Arc<VulkanDevice>, window_extent: vk::Extent2D) -> RenderResult<Self> {
        let capabilities = device.surface_capabilities()?;
        let formats = device.surface_formats()?;
        let present_modes = device.present_modes()?;

        log::debug!(
            "Surface: {}..={} images, current {}x{}, min {}x{}, max {}x{}",
            capabilities.min_image_count,
            capabilities.max_image_count,
            capabilities.current_extent.width,
            capabilities.current_extent.height,
            capabilities.min_image_extent.width,
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.width,
            capabilities.max_image_extent.height,
        );
        log::debug!("Surface formats: {:?}", formats);
        log::debug!("Present modes: {:?}", present_modes);

        let format = choose_surface_format(&formats).ok_or(RenderError::NoSurfaceFormat)?;
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&capabilities, window_extent);
        let image_count = choose_image_count(&capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}/{:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            format.format,
            format.color_space,
            present_mode
        );

        // Images cross queues only when the families differ
        let families = device.queue_families;
        let family_indices = [families.graphics, families.present];
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .stage("vkCreateSwapchainKHR")?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) if images.len() <= MAX_SWAPCHAIN_IMAGES => images,
            other => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(match other {
                    Ok(images) => RenderError::TooManyImages {
                        count: images.len(),
                        capacity: MAX_SWAPCHAIN_IMAGES,
                    },
                    Err(result) => RenderError::vulkan("vkGetSwapchainImagesKHR", result),
                });
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            format,
            present_mode,
            extent,
            _device: device,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering. `Ok((index, suboptimal))`.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Present rendered image to screen. `Ok(suboptimal)`.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VkResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe { self.swapchain_loader.destroy_swapchain(self.swapchain, None) };
        log::info!("Destroyed swapchain");
    }
}

/// One colour view per presentable image.
pub struct ImageViews {
    pub views: Vec<vk::ImageView>,
    device: Arc<VulkanDevice>,
}

impl ImageViews {
    pub fn new(device: Arc<VulkanDevice>, swapchain: &Swapchain) -> RenderResult<Self> {
        let mut views = Vec::with_capacity(swapchain.images.len());

        for (i, &image) in swapchain.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(swapchain.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            match unsafe { device.device.create_image_view(&create_info, None) } {
                Ok(view) => views.push(view),
                Err(result) => {
                    log::error!("Failed to create image view {}: {}", i, result);
                    for view in views {
                        unsafe { device.device.destroy_image_view(view, None) };
                    }
                    return Err(RenderError::vulkan("vkCreateImageView", result));
                }
            }
        }

        log::info!("All {} image views created", views.len());
        Ok(Self { views, device })
    }
}

impl Drop for ImageViews {
    fn drop(&mut self) {
        for &view in &self.views {
            unsafe { self.device.device.destroy_image_view(view, None) };
        }
        log::info!("Destroyed {} image views", self.views.len());
    }
}

/// Depth image, its memory and view, sized to the swapchain.
pub struct DepthBuffer {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    device: Arc<VulkanDevice>,
}

impl DepthBuffer {
    pub fn new(device: Arc<VulkanDevice>, extent: vk::Extent2D) -> RenderResult<Self> {
        let format = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |f| device.format_properties(f))
            .ok_or(RenderError::NoDepthFormat)?;

        log::info!(
            "Creating depth buffer: {}x{} {:?}",
            extent.width,
            extent.height,
            format
        );

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let dev = &device.device;
        let image = unsafe { dev.create_image(&image_info, None) }.stage("vkCreateImage")?;

        let memory = match Self::allocate(&device, image) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { dev.destroy_image(image, None) };
                return Err(e);
            }
        };

        let aspect_mask = if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { dev.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(result) => {
                unsafe {
                    dev.destroy_image(image, None);
                    dev.free_memory(memory, None);
                }
                return Err(RenderError::vulkan("vkCreateImageView", result));
            }
        };

        Ok(Self {
            image,
            memory,
            view,
            format,
            device,
        })
    }

    fn allocate(device: &VulkanDevice, image: vk::Image) -> RenderResult<vk::DeviceMemory> {
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let memory_type_index = find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.device.allocate_memory(&alloc_info, None) }
            .stage("vkAllocateMemory")?;

        if let Err(result) = unsafe { device.device.bind_image_memory(image, memory, 0) } {
            unsafe { device.device.free_memory(memory, None) };
            return Err(RenderError::vulkan("vkBindImageMemory", result));
        }

        Ok(memory)
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
        log::info!("Destroyed depth resources");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn pair(format: Option<vk::SurfaceFormatKHR>) -> Option<(vk::Format, vk::ColorSpaceKHR)> {
        format.map(|f| (f.format, f.color_space))
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn dims(extent: vk::Extent2D) -> (u32, u32) {
        (extent.width, extent.height)
    }

    fn capabilities(current: vk::Extent2D, min: vk::Extent2D, max: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: current,
            min_image_extent: min,
            max_image_extent: max,
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    fn supported(formats: &'static [vk::Format]) -> impl FnMut(vk::Format) -> vk::FormatProperties {
        move |f| vk::FormatProperties {
            optimal_tiling_features: if formats.contains(&f) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    const SRGB: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const NONLINEAR: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

    #[test]
    fn preferred_format_wins_anywhere_in_list() {
        let preferred = surface_format(SRGB, NONLINEAR);
        let other = surface_format(vk::Format::R8G8B8A8_UNORM, NONLINEAR);
        let unorm = surface_format(vk::Format::B8G8R8A8_UNORM, NONLINEAR);

        for list in [
            [preferred, other, unorm],
            [other, preferred, unorm],
            [other, unorm, preferred],
        ] {
            assert_eq!(pair(choose_surface_format(&list)), Some((SRGB, NONLINEAR)));
        }
    }

    #[test]
    fn falls_back_to_first_format() {
        let wrong_space = surface_format(SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT);
        let unorm = surface_format(vk::Format::B8G8R8A8_UNORM, NONLINEAR);

        assert_eq!(
            pair(choose_surface_format(&[wrong_space, unorm])),
            Some((SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT))
        );
        assert_eq!(
            pair(choose_surface_format(&[unorm, wrong_space])),
            Some((vk::Format::B8G8R8A8_UNORM, NONLINEAR))
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_preferred_fifo_fallback() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE, M::MAILBOX]), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::IMMEDIATE, M::FIFO_RELAXED]), M::FIFO);
        assert_eq!(choose_present_mode(&[]), M::FIFO);
    }

    #[test]
    fn defined_current_extent_is_used_verbatim() {
        let caps = capabilities(extent(1920, 1080), extent(1, 1), extent(4096, 4096));
        assert_eq!(dims(choose_extent(&caps, extent(800, 600))), (1920, 1080));
    }

    #[test]
    fn undefined_extent_clamps_window_size() {
        let caps = capabilities(extent(u32::MAX, u32::MAX), extent(200, 100), extent(1000, 700));

        assert_eq!(dims(choose_extent(&caps, extent(800, 600))), (800, 600));
        assert_eq!(dims(choose_extent(&caps, extent(50, 2000))), (200, 700));
        assert_eq!(dims(choose_extent(&caps, extent(5000, 10))), (1000, 100));
    }

    #[test]
    fn image_count_is_min_plus_one_bounded_by_max() {
        let mut caps = capabilities(extent(1, 1), extent(1, 1), extent(1, 1));
        caps.min_image_count = 2;
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn depth_format_tries_candidates_in_order() {
        const BOTH: &[vk::Format] = &[vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT];
        const PACKED: &[vk::Format] = &[vk::Format::D24_UNORM_S8_UINT];

        assert_eq!(
            choose_depth_format(&DEPTH_FORMAT_CANDIDATES, supported(BOTH)),
            Some(vk::Format::D32_SFLOAT)
        );
        assert_eq!(
            choose_depth_format(&DEPTH_FORMAT_CANDIDATES, supported(PACKED)),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(choose_depth_format(&DEPTH_FORMAT_CANDIDATES, supported(&[])), None);
    }

    #[test]
    fn linear_tiling_support_is_not_enough() {
        let props = |_: vk::Format| vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        assert_eq!(choose_depth_format(&DEPTH_FORMAT_CANDIDATES, props), None);
    }

    #[test]
    fn stencil_formats_are_recognised() {
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil(vk::Format::D32_SFLOAT_S8_UINT));
    }
}
