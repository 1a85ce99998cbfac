// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Presentation surface for the caller's window
// - Physical device scoring and queue-family selection
// - Logical device + graphics/present queue creation

use ash::extensions::{ext::DebugUtils, khr::Surface};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::error::{RenderError, RenderResult, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const SCORE_DISCRETE: u32 = 1000;
const SCORE_INTEGRATED: u32 = 500;
const SCORE_CPU: u32 = 100;
const SCORE_QUEUES: u32 = 200;

/// Queue families chosen for rendering and presentation. They may be the
/// same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Scan families in index order, taking the first graphics-capable family
/// and, independently, the first one that can present to the surface.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;

    for (i, family) in families.iter().enumerate() {
        let index = i as u32;

        if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }
        if present.is_none() && supports_present(index) {
            present = Some(index);
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }

    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

pub fn score_device(device_type: vk::PhysicalDeviceType, has_queue_families: bool) -> u32 {
    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => SCORE_DISCRETE,
        vk::PhysicalDeviceType::INTEGRATED_GPU => SCORE_INTEGRATED,
        vk::PhysicalDeviceType::CPU => SCORE_CPU,
        _ => 0,
    };

    if has_queue_families {
        type_score + SCORE_QUEUES
    } else {
        type_score
    }
}

/// A physical device under consideration.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<T> {
    pub device: T,
    pub score: u32,
    pub queue_families: Option<QueueFamilies>,
}

impl<T> Candidate<T> {
    pub fn new(device: T, device_type: vk::PhysicalDeviceType, queue_families: Option<QueueFamilies>) -> Self {
        Self {
            device,
            score: score_device(device_type, queue_families.is_some()),
            queue_families,
        }
    }
}

/// Highest-scoring candidate among those that can both render and present.
/// Ties go to the earlier candidate.
pub fn pick_best<T>(candidates: impl IntoIterator<Item = Candidate<T>>) -> Option<(T, QueueFamilies)> {
    let mut best: Option<(u32, T, QueueFamilies)> = None;

    for candidate in candidates {
        let Some(families) = candidate.queue_families else {
            continue;
        };
        if best.as_ref().map_or(true, |(score, _, _)| candidate.score > *score) {
            best = Some((candidate.score, candidate.device, families));
        }
    }

    best.map(|(_, device, families)| (device, families))
}

/// Vulkan device context: instance, surface, chosen GPU and its queues.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: Surface,

    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Bootstrap Vulkan for presenting to the given window.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Request the Khronos validation layer
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> RenderResult<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let enable_validation = enable_validation && Self::validation_available(&entry);
        let instance = Self::create_instance(&entry, app_name, display_handle, enable_validation)?;
        let mut partial = PartialInstance::new(instance);

        if enable_validation {
            match Self::setup_debug_messenger(&entry, &partial.instance) {
                Ok(debug) => partial.debug_utils = Some(debug),
                Err(e) => log::warn!("Failed to create debug messenger: {}", e),
            }
        }

        let surface_loader = Surface::new(&entry, &partial.instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &partial.instance, display_handle, window_handle, None)
        }
        .stage("vkCreateSurfaceKHR")?;
        partial.surface = Some((surface_loader.clone(), surface));
        log::info!("Attached window surface");

        let (physical_device, queue_families) =
            Self::pick_physical_device(&partial.instance, &surface_loader, surface)?;

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&partial.instance, physical_device, queue_families)?;

        let properties = unsafe { partial.instance.get_physical_device_properties(physical_device) };
        let memory_properties = unsafe {
            partial
                .instance
                .get_physical_device_memory_properties(physical_device)
        };

        log::info!("Selected GPU: {}", device_name(&properties));
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let (instance, debug_utils) = partial.disarm();

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            queue_families,
            graphics_queue,
            present_queue,
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    fn validation_available(entry: &Entry) -> bool {
        let layers = match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers,
            Err(e) => {
                log::warn!("Could not enumerate instance layers: {}", e);
                return false;
            }
        };

        let found = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        if !found {
            log::warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        found
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> RenderResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name).unwrap_or_else(|_| c"asimotive".to_owned());
        let engine_name = c"asimotive";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        // Platform surface extensions come from the window system
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .stage("vkEnumerateInstanceExtensionProperties")?
            .to_vec();

        if enable_validation {
            log::info!("Enabling {:?}", DebugUtils::name());
            extensions.push(DebugUtils::name().as_ptr());
        }

        for &ext in &extensions {
            log::debug!("    instance extension: {:?}", unsafe { CStr::from_ptr(ext) });
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }.stage("vkCreateInstance")?;

        log::info!("Vulkan instance created");
        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .stage("vkCreateDebugUtilsMessengerEXT")?;

        log::info!("Created debug messenger");
        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
    ) -> RenderResult<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .stage("vkEnumeratePhysicalDevices")?;

        if devices.is_empty() {
            log::error!("No Vulkan-compatible GPU found");
            return Err(RenderError::NoSuitableDevice);
        }
        log::info!("Found {} devices", devices.len());

        let candidates = devices.into_iter().map(|device| {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

            let queue_families = find_queue_families(&families, |index| {
                let supported = unsafe {
                    surface_loader.get_physical_device_surface_support(device, index, surface)
                };
                supported.unwrap_or_else(|e| {
                    log::warn!("Surface support query failed for family {}: {}", index, e);
                    false
                })
            });

            log_queue_families(&families);

            let candidate = Candidate::new(device, props.device_type, queue_families);
            log::info!(
                "GPU {}: {:?}, score {}{}",
                device_name(&props),
                props.device_type,
                candidate.score,
                if queue_families.is_some() { "" } else { " (cannot render and present)" }
            );
            candidate
        });

        let (device, families) = pick_best(candidates).ok_or_else(|| {
            log::error!("Failed to find a suitable graphics device");
            RenderError::NoSuitableDevice
        })?;

        log::info!(
            "Queue families: graphics {}, present {}",
            families.graphics,
            families.present
        );
        Ok((device, families))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilies,
    ) -> RenderResult<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        // Presentation is the only extension we need
        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .stage("vkCreateDevice")?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        log::info!(
            "Logical device created with {} queue(s)",
            queue_create_infos.len()
        );
        Ok((device, graphics_queue, present_queue))
    }

    pub fn surface_capabilities(&self) -> RenderResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .stage("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    pub fn surface_formats(&self) -> RenderResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
        .stage("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    pub fn present_modes(&self) -> RenderResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
        .stage("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.stage("vkDeviceWaitIdle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::error!("Device did not go idle before teardown: {}", e);
        }

        unsafe {
            self.device.destroy_device(None);
            log::info!("Vulkan logical device destroyed");

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
                log::info!("Vulkan debug messenger destroyed");
            }

            self.surface_loader.destroy_surface(self.surface, None);
            log::info!("Vulkan surface destroyed");

            self.instance.destroy_instance(None);
            log::info!("Vulkan instance destroyed");
        }
    }
}

/// Instance-level objects created during bootstrap, destroyed again if
/// bootstrap fails before the device context takes them over.
struct PartialInstance {
    instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface: Option<(Surface, vk::SurfaceKHR)>,
    armed: bool,
}

impl PartialInstance {
    fn new(instance: ash::Instance) -> Self {
        Self {
            instance,
            debug_utils: None,
            surface: None,
            armed: true,
        }
    }

    fn disarm(mut self) -> (ash::Instance, Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>) {
        self.armed = false;
        (self.instance.clone(), self.debug_utils.take())
    }
}

impl Drop for PartialInstance {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        log::warn!("Device bootstrap failed, releasing instance objects");
        unsafe {
            if let Some((loader, surface)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn log_queue_families(families: &[vk::QueueFamilyProperties]) {
    for (i, family) in families.iter().enumerate() {
        log::debug!(
            "    queue family[{}]: {} queue(s), {:?}",
            i,
            family.queue_count,
            family.queue_flags
        );
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {}", message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan] {}", message);
    } else {
        log::debug!("[Vulkan] {}", message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    const BOTH: QueueFamilies = QueueFamilies {
        graphics: 0,
        present: 0,
    };

    #[test]
    fn scores_follow_device_type() {
        use vk::PhysicalDeviceType as T;
        assert_eq!(score_device(T::DISCRETE_GPU, true), 1200);
        assert_eq!(score_device(T::INTEGRATED_GPU, true), 700);
        assert_eq!(score_device(T::CPU, true), 300);
        assert_eq!(score_device(T::DISCRETE_GPU, false), 1000);
        assert_eq!(score_device(T::VIRTUAL_GPU, false), 0);
    }

    #[test]
    fn discrete_outranks_integrated() {
        let candidates = [
            Candidate::new("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, Some(BOTH)),
            Candidate::new("discrete", vk::PhysicalDeviceType::DISCRETE_GPU, Some(BOTH)),
        ];
        assert_eq!(candidates[0].score, 700);
        assert_eq!(candidates[1].score, 1200);
        assert_eq!(pick_best(candidates).unwrap().0, "discrete");
    }

    #[test]
    fn device_without_presentation_is_never_picked() {
        let candidates = [
            Candidate::new("discrete", vk::PhysicalDeviceType::DISCRETE_GPU, None),
            Candidate::new("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, Some(BOTH)),
        ];
        assert_eq!(candidates[0].score, 1000);
        assert_eq!(candidates[1].score, 700);
        assert_eq!(pick_best(candidates).unwrap().0, "integrated");
    }

    #[test]
    fn no_eligible_device_fails() {
        let candidates = [Candidate::new("discrete", vk::PhysicalDeviceType::DISCRETE_GPU, None)];
        assert!(pick_best(candidates).is_none());
        assert!(pick_best(Vec::<Candidate<u32>>::new()).is_none());
    }

    #[test]
    fn ties_keep_the_first_device() {
        let candidates = [
            Candidate::new(1, vk::PhysicalDeviceType::DISCRETE_GPU, Some(BOTH)),
            Candidate::new(2, vk::PhysicalDeviceType::DISCRETE_GPU, Some(BOTH)),
        ];
        assert_eq!(pick_best(candidates).unwrap().0, 1);
    }

    #[test]
    fn same_family_can_serve_both() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let found = find_queue_families(&families, |_| true).unwrap();
        assert_eq!(found, BOTH);
        assert!(found.is_shared());
        assert_eq!(found.unique(), vec![0]);
    }

    #[test]
    fn families_are_picked_independently_in_index_order() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let found = find_queue_families(&families, |i| i >= 3).unwrap();
        assert_eq!(
            found,
            QueueFamilies {
                graphics: 1,
                present: 3
            }
        );
        assert!(!found.is_shared());
        assert_eq!(found.unique(), vec![1, 3]);
    }

    #[test]
    fn missing_graphics_or_present_fails() {
        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert!(find_queue_families(&compute_only, |_| true).is_none());

        let graphics = [family(vk::QueueFlags::GRAPHICS)];
        assert!(find_queue_families(&graphics, |_| false).is_none());

        assert!(find_queue_families(&[], |_| true).is_none());
    }
}
