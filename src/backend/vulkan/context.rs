use std::ffi::CStr;

use anyhow::Context;
use ash::{ext::debug_utils, vk};

use super::debug::{ENABLE_VALIDATION_LAYERS, Messenger, instance_layers, messenger_create_info};

/// A headless Vulkan 1.3 instance and device with synchronization2 and
/// dynamic rendering enabled. No surface is created.
pub struct VulkanContext {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub instance: ash::Instance,
    messenger: Option<Messenger>,
    _entry: ash::Entry,
}

impl VulkanContext {
    pub fn new() -> anyhow::Result<Self> {
        let entry = unsafe { ash::Entry::load().context("failed to load the Vulkan loader")? };
        let instance = create_instance(&entry).context("failed to create instance")?;
        let messenger = Messenger::create(&entry, &instance);

        let (physical_device, queue_family) =
            pick_physical_device(&instance).context("failed to pick physical device")?;
        let device = create_logical_device(&instance, physical_device, queue_family)?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok(Self {
            device,
            physical_device,
            queue,
            queue_family,
            instance,
            messenger,
            _entry: entry,
        })
    }

    pub fn wait_idle(&self) -> anyhow::Result<()> {
        unsafe { self.device.device_wait_idle() }.context("failed waiting for device idle")
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        log::trace!("Destroying Vulkan Context");
        unsafe {
            self.device.destroy_device(None);
        }
        if let Some(messenger) = &self.messenger {
            messenger.destroy();
        }
        log::trace!("Destroying instance");
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

fn create_instance(entry: &ash::Entry) -> anyhow::Result<ash::Instance> {
    let app_info = vk::ApplicationInfo::default()
        .api_version(vk::API_VERSION_1_3)
        .application_name(c"arbor-graph")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Arbor")
        .engine_version(vk::make_api_version(0, 0, 1, 0));

    let mut extension_names = Vec::new();
    if ENABLE_VALIDATION_LAYERS {
        extension_names.push(debug_utils::NAME.as_ptr());
    }
    let layer_names = instance_layers(entry).context("validation layers unavailable")?;

    let create_flags = if cfg!(any(target_os = "macos", target_os = "ios")) {
        extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::default()
    };

    let mut debug_create_info = messenger_create_info();
    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .flags(create_flags);
    if ENABLE_VALIDATION_LAYERS {
        create_info = create_info
            .enabled_layer_names(&layer_names)
            .push_next(&mut debug_create_info);
    }

    unsafe {
        entry
            .create_instance(&create_info, None)
            .context("failed to create ash::Instance")
    }
}

fn pick_physical_device(instance: &ash::Instance) -> anyhow::Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe {
        instance
            .enumerate_physical_devices()
            .context("failed to enumerate physical devices")?
    };
    let (device, queue_family) = devices
        .into_iter()
        .filter(|&device| supports_vulkan_13(instance, device))
        .find_map(|device| graphics_queue_family(instance, device).map(|family| (device, family)))
        .context("no suitable physical device")?;

    let props = unsafe { instance.get_physical_device_properties(device) };
    log::debug!("Selected physical device: {:?}", unsafe {
        CStr::from_ptr(props.device_name.as_ptr())
    });

    Ok((device, queue_family))
}

fn supports_vulkan_13(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let props = unsafe { instance.get_physical_device_properties(device) };
    if props.api_version < vk::API_VERSION_1_3 {
        return false;
    }

    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features13);
    unsafe { instance.get_physical_device_features2(device, &mut features) };
    features13.synchronization2 == vk::TRUE && features13.dynamic_rendering == vk::TRUE
}

fn graphics_queue_family(instance: &ash::Instance, device: vk::PhysicalDevice) -> Option<u32> {
    let props = unsafe { instance.get_physical_device_queue_family_properties(device) };
    props
        .iter()
        .position(|family| {
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|index| index as u32)
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> anyhow::Result<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities)];

    let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
        .synchronization2(true)
        .dynamic_rendering(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .push_next(&mut features13);

    let device = unsafe {
        instance
            .create_device(physical_device, &create_info, None)
            .context("failed to create logical device")?
    };
    log::trace!("Created logical device");

    Ok(device)
}
