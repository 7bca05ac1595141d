// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, VkContext};
use crate::RendererConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || unsafe { (*data).p_message.is_null() } {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

/// Loader, instance, optional validation messenger and the window surface.
/// Everything else is created from this and must be gone before it drops.
pub struct InstanceContext {
    pub(crate) entry: Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

fn has_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == name))
}

impl InstanceContext {
    /// # Safety
    /// The window behind `window`/`display` must outlive the returned
    /// context.
    ///
    // STRICT ORDER:
    // 1) instance with the WSI extensions the display needs
    // 2) debug messenger (instance scoped)
    // 3) surface from this instance; adapters are later judged against it
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        cfg: &RendererConfig,
    ) -> Result<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let entry = unsafe { Entry::load()? };
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("enumerate_instance_extension_properties")?;

        let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(dh)
            .context("enumerate_required_extensions")?
            .to_vec();

        let portability = has_extension(&available, ash::khr::portability_enumeration::NAME);
        if portability {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        }

        let validation = cfg.validation && {
            let layers = unsafe { entry.enumerate_instance_layer_properties() }
                .context("enumerate_instance_layer_properties")?;
            let found = layers
                .iter()
                .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
            if !found {
                warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
            }
            found && has_extension(&available, debug_utils::NAME)
        };
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }
        let layers: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app_name = CString::new(cfg.app_name.replace('\0', "")).unwrap_or_default();
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app_name.as_ptr(),
            application_version: 0,
            p_engine_name: c"prism".as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_2,
            ..Default::default()
        };
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            flags: if portability {
                vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
            } else {
                vk::InstanceCreateFlags::empty()
            },
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            ..Default::default()
        };
        let instance =
            unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?;

        // From here on `ctx` owns what exists, so an early return cleans up.
        let mut ctx = Self {
            surface_loader: surface::Instance::new(&entry, &instance),
            entry,
            instance,
            surface: vk::SurfaceKHR::null(),
            debug: None,
        };

        if validation {
            let loader = debug_utils::Instance::new(&ctx.entry, &ctx.instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
                .context("create_debug_utils_messenger")?;
            ctx.debug = Some((loader, messenger));
        }

        ctx.surface = unsafe { ash_window::create_surface(&ctx.entry, &ctx.instance, dh, wh, None) }
            .context("create_surface")?;

        info!(
            "Vulkan instance ready (validation={}, portability={})",
            validation, portability
        );
        Ok(ctx)
    }
}

// STRICT TEARDOWN ORDER: surface, messenger, instance. The device and
// everything it owns must already be destroyed.
impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
