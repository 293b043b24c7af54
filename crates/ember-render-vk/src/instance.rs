// SPDX-License-Identifier: CEPL-1.0
//! Loader, instance, debug messenger and the presentation surface.

use std::ffi::{c_char, c_void, CStr};

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};

use crate::error::{Result, VkResultExt};

const APP_NAME: &CStr = c"ember";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback struct for the call's duration.
    let msg_ptr = unsafe { (*data).p_message };
    if msg_ptr.is_null() {
        return vk::FALSE;
    }
    // SAFETY: non-null, NUL-terminated per the Vulkan spec.
    let msg = unsafe { CStr::from_ptr(msg_ptr) }.to_string_lossy();

    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        tracing::error!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(S::WARNING) {
        tracing::warn!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(S::INFO) {
        tracing::debug!(target: "vulkan", ?types, "{msg}");
    } else {
        tracing::trace!(target: "vulkan", ?types, "{msg}");
    }
    vk::FALSE
}

/// Everything that hangs off the `VkInstance`, including the window surface.
pub struct GpuInstance {
    pub entry: Entry,
    pub instance: ash::Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl GpuInstance {
    pub fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        // SAFETY: the loaded library lives as long as `entry`.
        let entry = unsafe { Entry::load()? };
        let validation = cfg!(debug_assertions) && has_layer(&entry, VALIDATION_LAYER);
        let instance = create_instance(&entry, dh, validation)?;

        let rest = (|| -> Result<_> {
            let debug = if validation {
                Some(create_debug_messenger(&entry, &instance)?)
            } else {
                None
            };
            let surface_loader = surface::Instance::new(&entry, &instance);
            // SAFETY: handles come from a live window owned by the caller, which
            // must outlive the engine.
            let surface = unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) }
                .during("vkCreateSurfaceKHR");
            match surface {
                Ok(surface) => Ok((debug, surface_loader, surface)),
                Err(e) => {
                    if let Some((loader, messenger)) = &debug {
                        // SAFETY: created above from this instance.
                        unsafe { loader.destroy_debug_utils_messenger(*messenger, None) };
                    }
                    Err(e)
                }
            }
        })();

        let (debug, surface_loader, surface) = match rest {
            Ok(parts) => parts,
            Err(e) => {
                // SAFETY: nothing else was created from the instance.
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        tracing::info!(validation, "vulkan instance ready");
        Ok(Self {
            entry,
            instance,
            surface_loader,
            surface,
            debug,
        })
    }
}

impl Drop for GpuInstance {
    fn drop(&mut self) {
        // SAFETY: the device and everything created from it are gone by now;
        // the engine drops its device before this value.
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn has_layer(entry: &Entry, name: &CStr) -> bool {
    // SAFETY: plain query on a loaded entry.
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let found = layers
        .iter()
        .any(|l| l.layer_name_as_c_str().map(|n| n == name).unwrap_or(false));
    if !found {
        tracing::warn!("validation layer not installed, continuing without it");
    }
    found
}

fn create_instance(entry: &Entry, dh: RawDisplayHandle, validation: bool) -> Result<ash::Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(dh)
        .during("enumerate_required_extensions")?
        .to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    // SAFETY: every pointer in `create_info` outlives the call.
    unsafe { entry.create_instance(&create_info, None) }.during("vkCreateInstance")
}

fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
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
    // SAFETY: instance was created with VK_EXT_debug_utils enabled.
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .during("vkCreateDebugUtilsMessengerEXT")?;
    Ok((loader, messenger))
}
