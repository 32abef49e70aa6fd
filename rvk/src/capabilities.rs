//! Capability negotiation for instance creation.
//!
//! Vulkan does not report a clean error when an instance is created with
//! an unsupported layer or extension, so every name we intend to request
//! is verified against the runtime-reported sets *before*
//! `vkCreateInstance` is called. [`missing_names`] is the core check;
//! the surrounding helpers adapt the `ash` property structs into plain
//! name lists.

use std::ffi::CStr;

use ash::vk;

/// The single validation layer this crate knows how to request.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Layers that must be enabled on the instance.
///
/// Empty unless diagnostics are enabled; the layer list is part of the
/// configuration handed to `Instance::new`, never process-global state.
pub fn required_layers(diagnostics_enabled: bool) -> Vec<&'static CStr> {
    if diagnostics_enabled {
        vec![VALIDATION_LAYER]
    } else {
        Vec::new()
    }
}

/// Instance extensions that must be enabled: the windowing
/// collaborator's platform surface extensions, plus the debug-utils
/// extension when diagnostics are enabled.
pub fn required_extensions<'a>(
    platform_surface_extensions: &[&'a CStr],
    diagnostics_enabled: bool,
) -> Vec<&'a CStr> {
    let mut extensions = platform_surface_extensions.to_vec();
    if diagnostics_enabled {
        extensions.push(ash::ext::debug_utils::NAME);
    }
    extensions
}

/// Every requested name that is absent from `available`, in request
/// order, converted to owned strings for error reporting.
///
/// Matching is exact byte-for-byte `CStr` equality. An empty request
/// list is trivially satisfied regardless of what is available.
pub fn missing_names(requested: &[&CStr], available: &[&CStr]) -> Vec<String> {
    requested
        .iter()
        .filter(|&&requested_name| {
            !available.iter().any(|&avail| avail == requested_name)
        })
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Extension names out of the runtime-reported property structs.
///
/// Entries whose name field is not valid UTF-8-agnostic C-string data
/// are skipped; they could never match a requested name anyway.
pub fn extension_names(
    properties: &[vk::ExtensionProperties],
) -> Vec<&CStr> {
    properties
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .collect()
}

/// Layer names out of the runtime-reported property structs.
pub fn layer_names(properties: &[vk::LayerProperties]) -> Vec<&CStr> {
    properties
        .iter()
        .filter_map(|layer| layer.layer_name_as_c_str().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_layers_is_empty_without_diagnostics() {
        assert!(required_layers(false).is_empty());
    }

    #[test]
    fn required_layers_requests_validation_with_diagnostics() {
        assert_eq!(required_layers(true), vec![VALIDATION_LAYER]);
    }

    #[test]
    fn required_extensions_without_diagnostics_is_the_platform_list() {
        let platform = [c"VK_KHR_surface", c"VK_KHR_wayland_surface"];
        let extensions = required_extensions(&platform, false);
        assert_eq!(extensions, platform);
    }

    #[test]
    fn required_extensions_appends_debug_utils_for_diagnostics() {
        let platform = [c"VK_KHR_surface"];
        let extensions = required_extensions(&platform, true);
        assert_eq!(
            extensions,
            vec![c"VK_KHR_surface", ash::ext::debug_utils::NAME]
        );
    }

    #[test]
    fn empty_request_is_satisfied_by_anything() {
        assert!(missing_names(&[], &[]).is_empty());
        assert!(missing_names(&[], &[c"VK_KHR_surface"]).is_empty());
    }

    #[test]
    fn missing_names_reports_every_absent_name() {
        let requested =
            [c"VK_KHR_surface", c"VK_KHR_xlib_surface", c"VK_EXT_debug_utils"];
        let available = [c"VK_KHR_surface"];

        let missing = missing_names(&requested, &available);
        assert_eq!(
            missing,
            vec![
                "VK_KHR_xlib_surface".to_owned(),
                "VK_EXT_debug_utils".to_owned()
            ]
        );
    }

    #[test]
    fn matching_is_exact() {
        // A prefix of an available name must not count as present.
        let missing = missing_names(&[c"VK_KHR_surf"], &[c"VK_KHR_surface"]);
        assert_eq!(missing, vec!["VK_KHR_surf".to_owned()]);
    }

    #[test]
    fn extension_names_adapts_property_structs() {
        let mut ext = vk::ExtensionProperties::default();
        let name = b"VK_KHR_surface\0";
        for (dst, src) in ext.extension_name.iter_mut().zip(name.iter()) {
            *dst = *src as core::ffi::c_char;
        }

        let exts = [ext];
        let names = extension_names(&exts);
        assert_eq!(names, vec![c"VK_KHR_surface"]);
    }
}
