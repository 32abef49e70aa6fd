//! The debug-utils messenger: the optional diagnostics channel from the
//! validation layers back into [`tracing`].
//!
//! The messenger only exists when a [`VulkanLogLevel`] was configured at
//! instance creation. Two messengers are involved over an instance's
//! life: a bootstrap-time one chained onto `VkInstanceCreateInfo` (so
//! problems during `vkCreateInstance` itself are reported) and the
//! steady-state [`DebugMessenger`] created right after, owned by the
//! instance and destroyed just before it.

use std::ffi::CStr;

use ash::vk;
use thiserror::Error;

/// Minimum severity level for Vulkan validation layer messages.
///
/// Messages at or above the chosen level are forwarded to the
/// [`tracing`] subscriber; lower-severity messages are suppressed.
/// Variants are ordered least-to-most severe:
/// `Verbose < Info < Warning < Error`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Error)]
pub enum CreateDebugMessengerError {
    #[error(
        "vkCreateDebugUtilsMessengerEXT could not be resolved; \
         VK_EXT_debug_utils is not present on this instance"
    )]
    ExtensionNotPresent,
    #[error("Vulkan error creating debug messenger: {0}")]
    Creation(vk::Result),
}

/// The severity mask for a given minimum level.
pub fn severity_flags(
    level: VulkanLogLevel,
) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    match level {
        VulkanLogLevel::Verbose => {
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
        }
        VulkanLogLevel::Info => {
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
        }
        VulkanLogLevel::Warning => {
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
        }
        VulkanLogLevel::Error => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
    }
}

/// The message categories we subscribe to: all of them.
pub fn message_type_flags() -> vk::DebugUtilsMessageTypeFlagsEXT {
    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
}

/// Create-info for a messenger at the given level. Used both for the
/// bootstrap-time messenger (chained onto instance creation) and the
/// steady-state one.
pub fn messenger_create_info(
    level: VulkanLogLevel,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severity_flags(level))
        .message_type(message_type_flags())
        .pfn_user_callback(Some(vulkan_debug_callback))
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    //SAFETY: Vulkan guarantees p_callback_data is valid
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }
        .to_string_lossy();

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::trace!(
                target: "rvk-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(
                target: "rvk-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(
                target: "rvk-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(
                target: "rvk-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
        _ => {
            tracing::debug!(
                target: "rvk-debug-messenger",
                "[{}] {}",
                type_str,
                message
            );
        }
    }

    // Never ask the runtime to abort the triggering call; only layer
    // developers return true here.
    vk::FALSE
}

/// The steady-state diagnostics channel, owned by the instance.
///
/// Holds the extension loader alongside the messenger handle so the
/// destroy entry point is always available at drop time.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl std::fmt::Debug for DebugMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugMessenger")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl DebugMessenger {
    /// Resolve the debug-utils entry points on `instance` and create a
    /// messenger at `level`.
    ///
    /// The create/destroy functions are extension entry points, not
    /// core API, so they are looked up by name at the instance level
    /// first; an absent entry point is reported as
    /// [`CreateDebugMessengerError::ExtensionNotPresent`] without
    /// attempting creation.
    ///
    /// # Safety
    /// `instance` must be a live instance created from `entry` with
    /// `VK_EXT_debug_utils` requested, and must outlive the returned
    /// messenger.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        level: VulkanLogLevel,
    ) -> Result<Self, CreateDebugMessengerError> {
        // SAFETY: instance is a live instance handle created from entry.
        let create_fn = unsafe {
            entry.get_instance_proc_addr(
                instance.handle(),
                c"vkCreateDebugUtilsMessengerEXT".as_ptr(),
            )
        };
        if create_fn.is_none() {
            return Err(CreateDebugMessengerError::ExtensionNotPresent);
        }

        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = messenger_create_info(level);
        // SAFETY: The create info is fully initialised above and the
        // entry point was just resolved.
        let handle = unsafe {
            loader.create_debug_utils_messenger(&create_info, None)
        }
        .map_err(CreateDebugMessengerError::Creation)?;

        Ok(Self { loader, handle })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        tracing::debug!("Dropping debug messenger {:?}", self.handle);
        //SAFETY: last use of this messenger; the owning instance is
        //still alive because it drops us before destroying itself
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.handle, None)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_level_subscribes_to_errors_only() {
        assert_eq!(
            severity_flags(VulkanLogLevel::Error),
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
        );
    }

    #[test]
    fn verbose_level_subscribes_to_everything() {
        let flags = severity_flags(VulkanLogLevel::Verbose);
        assert!(flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
        assert!(flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING));
        assert!(flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
    }

    #[test]
    fn each_level_includes_the_more_severe_ones() {
        let levels = [
            VulkanLogLevel::Verbose,
            VulkanLogLevel::Info,
            VulkanLogLevel::Warning,
            VulkanLogLevel::Error,
        ];
        for pair in levels.windows(2) {
            assert!(
                severity_flags(pair[0]).contains(severity_flags(pair[1])),
                "{:?} should include everything {:?} reports",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn all_message_categories_are_subscribed() {
        let flags = message_type_flags();
        assert!(flags.contains(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL));
        assert!(flags.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION));
        assert!(flags.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE));
    }

    #[test]
    fn create_info_carries_the_callback() {
        let create_info = messenger_create_info(VulkanLogLevel::Warning);
        assert!(create_info.pfn_user_callback.is_some());
        assert_eq!(
            create_info.message_severity,
            severity_flags(VulkanLogLevel::Warning)
        );
    }
}
