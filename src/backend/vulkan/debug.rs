use std::{
    borrow::Cow,
    ffi::{CStr, CString, c_char, c_void},
};

use anyhow::{Context, bail};
use ash::{Entry, ext::debug_utils, vk};

#[cfg(debug_assertions)]
pub const ENABLE_VALIDATION_LAYERS: bool = true;
#[cfg(not(debug_assertions))]
pub const ENABLE_VALIDATION_LAYERS: bool = false;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

fn lossy(ptr: *const c_char) -> Cow<'static, str> {
    if ptr.is_null() {
        return Cow::Borrowed("");
    }
    Cow::Owned(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Forwards validation output to the `vulkan` log target, tagged with the
/// message id and the names of the objects involved.
unsafe extern "system" fn forward_to_log(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

    let data = unsafe { &*data };
    let objects = if data.object_count == 0 || data.p_objects.is_null() {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(data.p_objects, data.object_count as usize) }
    };
    let names = objects
        .iter()
        .map(|object| lossy(object.p_object_name))
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>();

    let level = match severity {
        Severity::VERBOSE => log::Level::Trace,
        Severity::INFO => log::Level::Debug,
        Severity::WARNING => log::Level::Warn,
        _ => log::Level::Error,
    };
    log::log!(
        target: "vulkan",
        level,
        "{:?} [{}] {} {:?}",
        kind,
        lossy(data.p_message_id_name),
        lossy(data.p_message),
        names
    );
    vk::FALSE
}

/// Layer name pointers for instance creation; empty when validation is off.
pub fn instance_layers(entry: &Entry) -> anyhow::Result<Vec<*const c_char>> {
    if !ENABLE_VALIDATION_LAYERS {
        return Ok(Vec::new());
    }

    let available = unsafe {
        entry
            .enumerate_instance_layer_properties()
            .context("failed to enumerate instance layers")?
    };
    let present = available
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
    if !present {
        bail!("{:?} requested but not installed", VALIDATION_LAYER);
    }
    Ok(vec![VALIDATION_LAYER.as_ptr()])
}

pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(forward_to_log))
}

/// The instance-level debug messenger. Absent in release builds or when the
/// driver refuses to create one.
pub struct Messenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl Messenger {
    pub fn create(entry: &Entry, instance: &ash::Instance) -> Option<Self> {
        if !ENABLE_VALIDATION_LAYERS {
            return None;
        }

        let loader = debug_utils::Instance::new(entry, instance);
        match unsafe { loader.create_debug_utils_messenger(&messenger_create_info(), None) } {
            Ok(handle) => Some(Self { loader, handle }),
            Err(e) => {
                log::warn!("validation enabled but no debug messenger: {:?}", e);
                None
            }
        }
    }

    pub fn destroy(&self) {
        log::trace!("Destroying debug messenger");
        unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
    }
}

/// Object names and command labels for captures and validation output.
/// Every call is a no-op when validation is disabled.
#[derive(Clone)]
pub struct DebugLabels {
    device: Option<debug_utils::Device>,
}

impl DebugLabels {
    pub fn new(instance: &ash::Instance, device: &ash::Device) -> Self {
        Self {
            device: ENABLE_VALIDATION_LAYERS.then(|| debug_utils::Device::new(instance, device)),
        }
    }

    pub fn name_object<T: vk::Handle>(&self, handle: T, name: &str) -> anyhow::Result<()> {
        let Some(debug) = &self.device else {
            return Ok(());
        };
        let cname = CString::new(name).context("debug name contains interior null byte")?;
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&cname);
        unsafe { debug.set_debug_utils_object_name(&info) }
            .with_context(|| format!("failed to name object '{name}'"))
    }

    pub fn begin_label(&self, cmd: vk::CommandBuffer, name: &str) {
        let Some(debug) = &self.device else {
            return;
        };
        let Ok(cname) = CString::new(name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&cname);
        unsafe { debug.cmd_begin_debug_utils_label(cmd, &label) };
    }

    pub fn end_label(&self, cmd: vk::CommandBuffer) {
        if let Some(debug) = &self.device {
            unsafe { debug.cmd_end_debug_utils_label(cmd) };
        }
    }
}
