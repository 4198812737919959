// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Window surface
// - Physical device selection by static scoring
// - Logical device + graphics/present queues
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::deletion::DeletionQueue;
use super::surface;
use crate::scene::PushConstant;

/// Layers enabled with validation, when the loader has them
const VALIDATION_LAYERS: [&CStr; 2] = [
    c"VK_LAYER_KHRONOS_validation",
    c"VK_LAYER_KHRONOS_synchronization2",
];

/// Oldest device API version we accept
const MIN_DEVICE_API_VERSION: u32 = vk::API_VERSION_1_1;

/// What the caller wants from the device
pub struct DeviceSettings<'a> {
    pub app_name: &'a str,
    pub enable_validation: bool,
    /// Enables VK_KHR_pipeline_executable_properties for the pipeline dump
    pub capture_pipeline_executables: bool,
}

/// Queue family indices used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Prefer one family that does both; otherwise the first of each
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
    ) -> Option<Self> {
        let graphics_families: Vec<u32> = families
            .iter()
            .enumerate()
            .filter(|(_, props)| {
                props.queue_count > 0 && props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|(i, _)| i as u32)
            .collect();

        if let Some(&both) = graphics_families.iter().find(|&&i| supports_present(i)) {
            return Some(Self {
                graphics: both,
                present: both,
            });
        }

        let graphics = *graphics_families.first()?;
        let present = (0..families.len() as u32).find(|&i| supports_present(i))?;

        Some(Self { graphics, present })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Everything the scoring looks at, gathered per physical device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub max_push_constants_size: u32,
    pub multi_draw_indirect: bool,
    pub has_required_extensions: bool,
    pub queue_families: Option<QueueFamilies>,
}

/// Score a device; `None` means it cannot run the renderer at all
pub fn score_device(candidate: &DeviceCandidate) -> Option<u32> {
    candidate.queue_families?;

    if !candidate.has_required_extensions {
        return None;
    }
    if (candidate.max_push_constants_size as usize) < std::mem::size_of::<PushConstant>() {
        return None;
    }
    if candidate.api_version < MIN_DEVICE_API_VERSION {
        return None;
    }

    let mut score = match candidate.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1500,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
        _ => 0,
    };
    if candidate.multi_draw_indirect {
        score += 200;
    }

    Some(score)
}

/// Highest score wins; on a tie the earlier entry is kept
pub fn pick_best<T>(scored: impl IntoIterator<Item = (T, Option<u32>)>) -> Option<T> {
    let mut best: Option<(T, u32)> = None;
    for (item, score) in scored {
        let Some(score) = score else { continue };
        if best.as_ref().map_or(true, |(_, best_score)| score > *best_score) {
            best = Some((item, score));
        }
    }
    best.map(|(item, _)| item)
}

/// Keep the requested names that appear in `available`, in request order
pub fn filter_available<'a>(requested: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    requested
        .iter()
        .copied()
        .filter(|name| available.contains(name))
        .collect()
}

fn name_from_array(raw: &[c_char]) -> &CStr {
    // Vulkan guarantees these fixed arrays are nul-terminated
    unsafe { CStr::from_ptr(raw.as_ptr()) }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand before the device is destroyed
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Surface (owned here so it outlives the swapchain and dies before the instance)
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub pipeline_executable_properties: Option<khr::PipelineExecutableProperties>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub enabled_features: vk::PhysicalDeviceFeatures,
}

impl VulkanDevice {
    /// Create instance, surface and device for a window
    pub fn new(
        settings: &DeviceSettings,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", settings.app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let instance = Self::create_instance(&entry, settings, display_handle)?;

        // Until the wrapper owns everything, a failure unwinds by hand
        let mut partial: DeletionQueue<()> = DeletionQueue::new();
        let owned = instance.clone();
        partial.push("instance", move |_: &()| unsafe { owned.destroy_instance(None) });

        match Self::create_on_instance(
            &entry,
            instance,
            settings,
            display_handle,
            window_handle,
            &mut partial,
        ) {
            Ok(device) => {
                partial.dismiss();
                Ok(device)
            }
            Err(e) => {
                partial.flush(&());
                Err(e)
            }
        }
    }

    /// Everything after the instance; each object created here also lands
    /// in `partial` so a later failure can destroy it
    fn create_on_instance(
        entry: &Entry,
        instance: ash::Instance,
        settings: &DeviceSettings,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        partial: &mut DeletionQueue<()>,
    ) -> Result<Arc<Self>> {
        let debug_utils = if settings.enable_validation {
            let (loader, messenger) = Self::setup_debug_messenger(entry, &instance)?;
            let owned = loader.clone();
            partial.push("debug messenger", move |_: &()| unsafe {
                owned.destroy_debug_utils_messenger(messenger, None)
            });
            Some((loader, messenger))
        } else {
            None
        };

        let surface_loader = khr::Surface::new(entry, &instance);
        let surface =
            unsafe { surface::create_surface(entry, &instance, display_handle, window_handle)? };
        let owned = surface_loader.clone();
        partial.push("surface", move |_: &()| unsafe { owned.destroy_surface(surface, None) });

        let (physical_device, queue_families) = Self::pick_physical_device(
            &instance,
            &surface_loader,
            surface,
            settings.capture_pipeline_executables,
        )?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let supported = unsafe { instance.get_physical_device_features(physical_device) };

        log::info!("Selected GPU: {}", name_from_array(&properties.device_name).to_string_lossy());
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let enabled_features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: supported.sampler_anisotropy,
            multi_draw_indirect: supported.multi_draw_indirect,
            ..Default::default()
        };

        let device = Self::create_logical_device(
            &instance,
            physical_device,
            &queue_families,
            &enabled_features,
            settings.capture_pipeline_executables,
        )?;
        let owned = device.clone();
        partial.push("logical device", move |_: &()| unsafe { owned.destroy_device(None) });

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let pipeline_executable_properties = settings
            .capture_pipeline_executables
            .then(|| khr::PipelineExecutableProperties::new(&instance, &device));

        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry.clone(),
            surface,
            surface_loader,
            graphics_queue,
            present_queue,
            queue_families,
            debug_utils,
            pipeline_executable_properties,
            properties,
            enabled_features,
        }))
    }

    fn create_instance(
        entry: &Entry,
        settings: &DeviceSettings,
        display_handle: RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(settings.app_name)?;
        let engine_name = CString::new("Pyramid Renderer")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        // Layers are optional: enable what the loader has, warn about the rest
        let layer_names: Vec<&CStr> = if settings.enable_validation {
            let available = entry
                .enumerate_instance_layer_properties()
                .context("Failed to enumerate instance layers")?;
            let available: Vec<&CStr> = available
                .iter()
                .map(|layer| name_from_array(&layer.layer_name))
                .collect();

            let enabled = filter_available(&VALIDATION_LAYERS, &available);
            if enabled.len() != VALIDATION_LAYERS.len() {
                log::warn!(
                    "Could not find all validation layers, enabled: {:?}",
                    enabled
                );
            }
            enabled
        } else {
            Vec::new()
        };

        // Extensions are required: surface + platform (+ debug utils)
        let mut required = surface::required_extensions(display_handle)?;
        if settings.enable_validation {
            required.push(ext::DebugUtils::name());
        }

        let available = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;
        let available: Vec<&CStr> = available
            .iter()
            .map(|ext| name_from_array(&ext.extension_name))
            .collect();

        let enabled = filter_available(&required, &available);
        if enabled.len() != required.len() {
            let missing: Vec<_> = required.iter().filter(|name| !enabled.contains(*name)).collect();
            anyhow::bail!("Missing required instance extensions: {:?}", missing);
        }

        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();
        let extension_ptrs: Vec<*const c_char> = enabled.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        capture_pipeline_executables: bool,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut required_extensions = vec![khr::Swapchain::name()];
        if capture_pipeline_executables {
            required_extensions.push(khr::PipelineExecutableProperties::name());
        }

        let mut scored = Vec::with_capacity(devices.len());
        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            let queue_families = QueueFamilies::find(&families, |index| unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            });

            let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
                .context("Failed to enumerate device extensions")?;
            let extensions: Vec<&CStr> = extensions
                .iter()
                .map(|ext| name_from_array(&ext.extension_name))
                .collect();

            let candidate = DeviceCandidate {
                device_type: props.device_type,
                api_version: props.api_version,
                max_push_constants_size: props.limits.max_push_constants_size,
                multi_draw_indirect: features.multi_draw_indirect == vk::TRUE,
                has_required_extensions: filter_available(&required_extensions, &extensions).len()
                    == required_extensions.len(),
                queue_families,
            };

            let score = score_device(&candidate);
            log::debug!(
                "GPU candidate {} ({:?}): score {:?}",
                name_from_array(&props.device_name).to_string_lossy(),
                props.device_type,
                score
            );

            scored.push(((device, queue_families), score));
        }

        let (device, queue_families) =
            pick_best(scored).context("No suitable GPU found")?;
        let queue_families = queue_families.context("Selected GPU has no usable queues")?;

        Ok((device, queue_families))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilies,
        features: &vk::PhysicalDeviceFeatures,
        capture_pipeline_executables: bool,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let mut extensions = vec![khr::Swapchain::name().as_ptr()];
        if capture_pipeline_executables {
            extensions.push(khr::PipelineExecutableProperties::name().as_ptr());
        }

        let mut executable_features =
            vk::PhysicalDevicePipelineExecutablePropertiesFeaturesKHR::builder()
                .pipeline_executable_info(true);

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(features);
        if capture_pipeline_executables {
            create_info = create_info.push_next(&mut executable_features);
        }

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        Ok(allocator)
    }

    /// Lock the memory allocator
    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    /// Anisotropy to use for samplers, `None` when the feature is off
    pub fn max_sampler_anisotropy(&self) -> Option<f32> {
        (self.enabled_features.sampler_anisotropy == vk::TRUE)
            .then_some(self.properties.limits.max_sampler_anisotropy)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed waiting for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            // Allocator must release its memory blocks while the device lives
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::trace!("[Vulkan] {}", message.to_string_lossy());
        }
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

    fn candidate(device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            device_type,
            api_version: vk::API_VERSION_1_3,
            max_push_constants_size: 128,
            multi_draw_indirect: false,
            has_required_extensions: true,
            queue_families: Some(QueueFamilies {
                graphics: 0,
                present: 0,
            }),
        }
    }

    #[test]
    fn queue_family_prefers_combined_graphics_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let found = QueueFamilies::find(&families, |i| i == 1 || i == 2).unwrap();
        assert_eq!(found, QueueFamilies { graphics: 2, present: 2 });
        assert!(found.is_shared());
        assert_eq!(found.unique(), vec![2]);
    }

    #[test]
    fn queue_family_falls_back_to_separate_families() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let found = QueueFamilies::find(&families, |i| i == 1).unwrap();
        assert_eq!(found, QueueFamilies { graphics: 0, present: 1 });
        assert_eq!(found.unique(), vec![0, 1]);
    }

    #[test]
    fn queue_family_incomplete_is_none() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilies::find(&families, |_| true).is_none());

        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilies::find(&families, |_| false).is_none());
    }

    #[test]
    fn queue_family_ignores_empty_families() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let found = QueueFamilies::find(&families, |_| true).unwrap();
        assert_eq!(found.graphics, 1);
    }

    #[test]
    fn scores_rank_discrete_over_integrated() {
        let discrete = score_device(&candidate(vk::PhysicalDeviceType::DISCRETE_GPU));
        let integrated = score_device(&candidate(vk::PhysicalDeviceType::INTEGRATED_GPU));
        let cpu = score_device(&candidate(vk::PhysicalDeviceType::CPU));
        assert_eq!(discrete, Some(1500));
        assert_eq!(integrated, Some(500));
        assert_eq!(cpu, Some(0));
    }

    #[test]
    fn multi_draw_indirect_adds_bonus() {
        let mut c = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU);
        c.multi_draw_indirect = true;
        assert_eq!(score_device(&c), Some(700));
    }

    #[test]
    fn unsuitable_devices_are_excluded() {
        let mut no_queues = candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        no_queues.queue_families = None;
        assert_eq!(score_device(&no_queues), None);

        let mut no_ext = candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        no_ext.has_required_extensions = false;
        assert_eq!(score_device(&no_ext), None);

        let mut small_push = candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        small_push.max_push_constants_size = 32;
        assert_eq!(score_device(&small_push), None);

        let mut old = candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        old.api_version = vk::API_VERSION_1_0;
        assert_eq!(score_device(&old), None);
    }

    #[test]
    fn pick_best_takes_highest_and_first_on_tie() {
        let scored = vec![("a", Some(500)), ("b", None), ("c", Some(1500)), ("d", Some(1500))];
        assert_eq!(pick_best(scored), Some("c"));

        let none: Vec<(&str, Option<u32>)> = vec![("a", None), ("b", None)];
        assert_eq!(pick_best(none), None);

        // A zero score is still suitable
        assert_eq!(pick_best(vec![("cpu", Some(0))]), Some("cpu"));
    }

    #[test]
    fn filter_keeps_request_order() {
        let available = [c"B", c"C", c"A"];
        let requested = [c"A", c"X", c"B"];
        assert_eq!(filter_available(&requested, &available), vec![c"A", c"B"]);
    }
}
