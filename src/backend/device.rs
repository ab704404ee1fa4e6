// Vulkan Device - bootstrap that hands ready handles to the frame core
//
// Instance (+ validation when the layer is installed), physical device,
// one graphics queue and the gpu-allocator instance. Nothing past this
// file negotiates capabilities: the frame core receives a finished device.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue family indices the core submits and presents on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

/// What selection knows about one physical device
#[derive(Debug, Clone, Copy)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub graphics_family: Option<u32>,
    pub supports_swapchain: bool,
}

impl DeviceCandidate {
    /// Higher is better; `None` means unusable
    pub fn score(&self) -> Option<u32> {
        if self.graphics_family.is_none() || !self.supports_swapchain {
            return None;
        }
        Some(match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
            _ => 1,
        })
    }
}

/// Index of the best usable candidate; ties keep the first one enumerated
pub fn pick_best(candidates: &[DeviceCandidate]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        if let Some(score) = candidate.score() {
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
    }
    best.map(|(i, _)| i)
}

pub struct VulkanDevice {
    /// Dropped by hand in `Drop` before the device it allocates from
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub entry: Entry,

    pub graphics_queue: vk::Queue,
    pub queue_families: QueueFamilies,
    pub properties: vk::PhysicalDeviceProperties,

    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanDevice {
    /// `enable_validation` is a request: without the Khronos layer installed
    /// the device is created without it.
    pub fn new(app_name: &str, enable_validation: bool) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let validation = enable_validation && validation_layer_available(&entry);
        if enable_validation && !validation {
            log::warn!("{:?} not installed, continuing without validation", VALIDATION_LAYER);
        }

        let instance = create_instance(&entry, app_name, validation)?;

        let debug_utils = if validation {
            match setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let bootstrap = select_and_create(&instance);
        let (physical_device, graphics_family, device) = match bootstrap {
            Ok(v) => v,
            Err(e) => {
                unsafe {
                    if let Some((debug_utils, messenger)) = &debug_utils {
                        debug_utils.destroy_debug_utils_messenger(*messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {} ({:?}, Vulkan {}.{}.{})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            properties.device_type,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    if let Some((debug_utils, messenger)) = &debug_utils {
                        debug_utils.destroy_debug_utils_messenger(*messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(e).context("Failed to create GPU memory allocator");
            }
        };

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            entry,
            graphics_queue,
            // Presentation shares the graphics family; `VulkanContext` checks
            // the surface can present from it.
            queue_families: QueueFamilies {
                graphics: graphics_family,
                present: graphics_family,
            },
            properties,
            debug_utils,
        }))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        unsafe {
            let _ = self.device.device_wait_idle();

            ManuallyDrop::drop(&mut self.allocator);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

fn validation_layer_available(entry: &Entry) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .map(|layers| {
            layers
                .iter()
                .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
        })
        .unwrap_or(false)
}

fn create_instance(entry: &Entry, app_name: &str, validation: bool) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)?;

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"frame-core")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut extensions = vec![ash::extensions::khr::Surface::name().as_ptr()];
    #[cfg(target_os = "windows")]
    extensions.push(ash::extensions::khr::Win32Surface::name().as_ptr());
    if validation {
        extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
    }

    let layers = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    unsafe { entry.create_instance(&create_info, None) }.context("Failed to create Vulkan instance")
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

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
        .context("Failed to create debug messenger")?;

    Ok((debug_utils, messenger))
}

fn describe(instance: &ash::Instance, device: vk::PhysicalDevice) -> DeviceCandidate {
    let props = unsafe { instance.get_physical_device_properties(device) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let graphics_family = families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);

    let swapchain = ash::extensions::khr::Swapchain::name();
    let supports_swapchain = unsafe { instance.enumerate_device_extension_properties(device) }
        .map(|exts| {
            exts.iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == swapchain)
        })
        .unwrap_or(false);

    DeviceCandidate {
        device_type: props.device_type,
        graphics_family,
        supports_swapchain,
    }
}

fn select_and_create(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32, ash::Device)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;
    if devices.is_empty() {
        anyhow::bail!("No Vulkan-capable GPU found");
    }

    let candidates: Vec<_> = devices.iter().map(|&d| describe(instance, d)).collect();
    let best = pick_best(&candidates)
        .context("No GPU with a graphics queue and VK_KHR_swapchain support")?;
    let physical_device = devices[best];
    let graphics_family = candidates[best]
        .graphics_family
        .context("Selected GPU has no graphics queue")?;

    let priorities = [1.0];
    let queue_info = vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(graphics_family)
        .queue_priorities(&priorities)
        .build();

    let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .context("Failed to create logical device")?;

    Ok((physical_device, graphics_family, device))
}

fn log_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);
    log::log!(log_level(severity), "[Vulkan] {}", message.to_string_lossy());
    vk::FALSE
}
