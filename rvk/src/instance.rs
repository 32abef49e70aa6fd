//! Vulkan instance creation and physical device enumeration.
//!
//! The central type is [`Instance`], which wraps an `ash::Instance` and
//! owns the entry-point loader, the optional [`DebugMessenger`], and an
//! optional surface instance extension loader. It exposes physical
//! device queries and unsafe constructors for surfaces and logical
//! devices.
//!
//! Everything the instance will request (platform surface extensions,
//! the debug-utils extension, validation layers) is verified against
//! the runtime-reported sets before `vkCreateInstance` is attempted
//! (see [`crate::capabilities`]); a missing name aborts creation with
//! the offending names in the error.
//!
//! [`VkVersion`] is a thin newtype over the packed Vulkan version word.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::capabilities;
use crate::debug::{
    CreateDebugMessengerError, DebugMessenger, VulkanLogLevel,
};
use crate::surface::{CreateSurfaceError, SurfaceSupportError};
use std::{
    ffi::{CStr, CString},
    fmt::Debug,
    str::FromStr,
};

/// A packed Vulkan API version number.
///
/// Wraps the 32-bit encoding used by `VkApplicationInfo` and
/// `vkEnumerateInstanceVersion`. Construct from components with
/// [`new`](Self::new), or wrap an already-encoded word with
/// [`from_raw`](Self::from_raw).
#[derive(Debug, Clone, Copy)]
pub struct VkVersion(u32);

impl VkVersion {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(variant, major, minor, patch))
    }

    pub fn variant(&self) -> u32 {
        vk::api_version_variant(self.0)
    }

    pub fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }
    pub fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }
    pub fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    pub fn to_tuple(&self) -> (u32, u32, u32, u32) {
        (self.variant(), self.major(), self.minor(), self.patch())
    }

    pub fn from_tuple(tuple: (u32, u32, u32, u32)) -> Self {
        Self::new(tuple.0, tuple.1, tuple.2, tuple.3)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }
}

/// Everything [`Instance::new`] needs to know, passed by value rather
/// than read from process-global state so tests and callers can vary
/// diagnostics and identity freely.
///
/// The identity strings and versions are presentation metadata for the
/// driver; they have no behavioral effect. `diagnostics` is the switch
/// for the whole diagnostics subsystem: `None` means no validation
/// layer is requested, no debug-utils extension is enabled, and no
/// messenger of any kind is created.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub app_name: String,
    pub app_version: VkVersion,
    pub engine_name: String,
    pub engine_version: VkVersion,
    pub diagnostics: Option<VulkanLogLevel>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: "rvk-app".to_owned(),
            app_version: VkVersion::new(0, 0, 1, 0),
            engine_name: "rvk".to_owned(),
            engine_version: VkVersion::new(0, 0, 1, 0),
            diagnostics: None,
        }
    }
}

/// Optional instance-level extensions for [`Instance::new`].
///
/// Defaults to all `false`. Set `surface` to `true` to request the
/// platform-specific surface extensions for `VkSurfaceKHR` support.
/// A `display_handle_source` must also be provided so the required
/// extension names can be enumerated.
#[derive(Debug, Default)]
pub struct InstanceExtensions {
    pub surface: bool,
}

/// The root Vulkan object.
///
/// Owns the `ash::Entry` loader, the `ash::Instance` handle, the
/// optional debug messenger, and optional surface extension state.
/// All objects derived from an instance hold an `Arc<Instance>` to
/// keep it alive; exactly one instance exists per run.
///
/// Construct via [`Instance::new`], which is `unsafe` because it
/// loads a Vulkan shared library through `libloading`.
pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    surface_instance: Option<ash::khr::surface::Instance>,
    ver: VkVersion,
}

impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.handle())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum InstanceCreationError {
    #[error("Could not load Vulkan: {0}")]
    Loading(ash::LoadingError),
    #[error("Couldn't get display handle from passed value: {0}")]
    InvalidDisplayHandle(crate::RwhHandleError),
    #[error("Missing mandatory instance extensions: {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("Missing requested instance layers: {0:?}")]
    MissingLayers(Vec<String>),
    #[error("Failed to create debug messenger: {0}")]
    DebugMessenger(CreateDebugMessengerError),
    #[error("Unknown Vulkan Error {0}")]
    UnknownVulkan(vk::Result),
    #[error("Invalid app name was passed to Instance::new")]
    InvalidAppName,
    #[error("Invalid engine name was passed to Instance::new")]
    InvalidEngineName,
}

impl From<vk::Result> for InstanceCreationError {
    fn from(value: vk::Result) -> Self {
        InstanceCreationError::UnknownVulkan(value)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        // The messenger was created from this instance and must be
        // destroyed first. It is None when diagnostics were disabled,
        // in which case there is nothing to destroy.
        self.debug_messenger = None;
        //SAFETY: We are in drop so this is the last use of instance. Any given
        //derived object should be gone
        unsafe { self.handle.destroy_instance(None) };
    }
}

impl Instance {
    /// Creates a new instance by loading Vulkan and running capability
    /// negotiation for the requested configuration.
    ///
    /// When `config.diagnostics` is set, the validation layer and the
    /// debug-utils extension become part of the verified capability
    /// set, a bootstrap messenger create-info is chained onto instance
    /// creation so the runtime can report problems during
    /// `vkCreateInstance` itself, and the steady-state messenger is
    /// created immediately afterwards. A capability missing from the
    /// runtime fails here, before any Vulkan object exists.
    ///
    /// # Safety
    /// This loads vulkan using libloading, meaning that there can be
    /// arbitrary code executed. This is not great but it's *probably*
    /// fine?
    pub unsafe fn new(
        config: &InstanceConfig,
        display_handle_source: Option<&impl HasDisplayHandle>,
        enabled_exts: InstanceExtensions,
    ) -> Result<Self, InstanceCreationError> {
        use InstanceCreationError as Error;

        let app_name_cstring = match CString::from_str(&config.app_name) {
            Ok(cstr) => cstr,
            Err(_) => Err(Error::InvalidAppName)?,
        };
        let engine_name_cstring = match CString::from_str(&config.engine_name)
        {
            Ok(cstr) => cstr,
            Err(_) => Err(Error::InvalidEngineName)?,
        };

        //SAFETY: We pass on the burden of the safety from loading dlls to the
        //caller. As for Entry, we ensure all other vulkan objects are dropped
        //before Entry is dropped (handled in the Drop impl of Instance)
        let entry = unsafe { ash::Entry::load() }.map_err(Error::Loading)?;

        // SAFETY: entry is a live Vulkan entry;
        // vkEnumerateInstanceVersion has no preconditions beyond a
        // valid entry point.
        let api_version = unsafe { entry.try_enumerate_instance_version() }
            .unwrap_or(Some(vk::API_VERSION_1_0))
            .unwrap_or(vk::API_VERSION_1_0);

        let mut platform_surface_exts: Vec<&CStr> = Vec::with_capacity(8);

        // Tracks whether surface extensions were actually enabled on
        // the instance. Being requested (`enabled_exts.surface`) is
        // not enough — the platform extensions are only added to
        // `platform_surface_exts` when a display handle source is
        // provided.
        let mut surface_ext_loaded = false;

        if let Some(display_handle_source) = display_handle_source
            && enabled_exts.surface
        {
            surface_ext_loaded = true;
            // ash_window will be necessary to get a surface later,
            // but surfaces are an extension. This gets those extensions
            // to start as a base to the set of mandatory extensions we
            // will almost always need.
            let ash_window_exts = ash_window::enumerate_required_extensions(
                display_handle_source
                    .display_handle()
                    .map_err(Error::InvalidDisplayHandle)?
                    .as_raw(),
            )?;

            platform_surface_exts.extend(
                ash_window_exts
                    .iter()
                    //SAFETY: ash_window promises to hand us null
                    //terminated C strings in its API. This isn't
                    //enforced anywhere through any safety means
                    //but it is documented
                    .map(|ext_cstr_ptr| unsafe {
                        CStr::from_ptr(*ext_cstr_ptr)
                    }),
            );
        }

        let mandatory_exts = capabilities::required_extensions(
            &platform_surface_exts,
            config.diagnostics.is_some(),
        );
        let required_layers =
            capabilities::required_layers(config.diagnostics.is_some());

        // Verify every name we are about to request. Creation is never
        // attempted with an unverified set: the runtime does not report
        // a clean error for unsupported layer/extension combinations.
        // SAFETY: entry is a live Vulkan entry; passing None queries
        // global extensions and does not dereference any layer name.
        let instance_exts_avail =
            unsafe { entry.enumerate_instance_extension_properties(None) }?;
        let missing_exts = capabilities::missing_names(
            &mandatory_exts,
            &capabilities::extension_names(&instance_exts_avail),
        );
        if !missing_exts.is_empty() {
            return Err(Error::MissingExtensions(missing_exts));
        }

        if !required_layers.is_empty() {
            // SAFETY: entry is a live Vulkan entry;
            // vkEnumerateInstanceLayerProperties has no additional
            // preconditions.
            let instance_layers_avail =
                unsafe { entry.enumerate_instance_layer_properties() }?;
            let missing_layers = capabilities::missing_names(
                &required_layers,
                &capabilities::layer_names(&instance_layers_avail),
            );
            if !missing_layers.is_empty() {
                return Err(Error::MissingLayers(missing_layers));
            }
        }

        let enabled_ext_ptrs: Vec<_> =
            mandatory_exts.iter().map(|ext| ext.as_ptr()).collect();
        let enabled_layer_ptrs: Vec<_> =
            required_layers.iter().map(|layer| layer.as_ptr()).collect();

        // A second, bootstrap-time messenger config chained onto the
        // create info. It covers vkCreateInstance/vkDestroyInstance
        // themselves; the steady-state messenger below covers
        // everything in between.
        let mut bootstrap_messenger_ci =
            config.diagnostics.map(crate::debug::messenger_create_info);

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstring)
            .application_version(config.app_version.to_raw())
            .engine_name(&engine_name_cstring)
            .engine_version(config.engine_version.to_raw())
            .api_version(api_version);

        let mut instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_ext_ptrs)
            .enabled_layer_names(&enabled_layer_ptrs);

        if let Some(ref mut debug_info) = bootstrap_messenger_ci {
            instance_create_info = instance_create_info.push_next(debug_info);
        }

        //SAFETY: We made a valid instance_create_info
        let instance =
            unsafe { entry.create_instance(&instance_create_info, None) }?;

        let debug_messenger = match config.diagnostics {
            // SAFETY: instance was created from entry with
            // VK_EXT_debug_utils enabled (verified above) and outlives
            // the messenger by ownership.
            Some(level) => match unsafe {
                DebugMessenger::new(&entry, &instance, level)
            } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    // The instance will never be returned; release it
                    // before surfacing the error so the failure path
                    // tears down in reverse order too.
                    //SAFETY: No objects were derived from instance yet
                    unsafe { instance.destroy_instance(None) };
                    return Err(Error::DebugMessenger(e));
                }
            },
            None => None,
        };

        let surface_instance = surface_ext_loaded
            .then(|| ash::khr::surface::Instance::new(&entry, &instance));

        Ok(Instance {
            entry,
            handle: instance,
            debug_messenger,
            surface_instance,
            ver: VkVersion::from_raw(api_version),
        })
    }

    /// Get a vector of handles to available physical devices. These handles are
    /// ONLY valid in the context of this instance.
    pub fn fetch_raw_physical_devices(
        &self,
    ) -> Result<Vec<vk::PhysicalDevice>, FetchPhysicalDeviceError> {
        //SAFETY: Pretty much always fine
        match unsafe { self.handle.enumerate_physical_devices() } {
            Ok(v) => Ok(v),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            | Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                Err(FetchPhysicalDeviceError::MemoryExhaustion)
            }
            Err(e) => Err(FetchPhysicalDeviceError::UnknownVulkan(e)),
        }
    }

    /// Get the properties of a physical device.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        //SAFETY: physical_device was derived from this instance
        unsafe { self.handle.get_physical_device_properties(physical_device) }
    }

    /// Get the queue family properties of a physical device.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        //SAFETY: physical_device was derived from this instance
        unsafe {
            self.handle
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    /// Create a logical device from a physical device.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    /// `create_info` must be a valid DeviceCreateInfo.
    /// Any handles referenced by `create_info` must also be derived from this
    /// instance and remain valid for the duration of the call.
    pub unsafe fn create_ash_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<ash::Device, vk::Result> {
        //SAFETY: physical_device was derived from this instance,
        //create_info is valid
        unsafe {
            self.handle
                .create_device(physical_device, create_info, None)
        }
    }

    /// Whether the diagnostics channel was created on this instance.
    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// The Vulkan API version negotiated at instance creation time.
    ///
    /// This is the version reported by `vkEnumerateInstanceVersion`,
    /// not necessarily the version requested by the application.
    pub fn supported_ver(&self) -> VkVersion {
        self.ver
    }

    pub fn raw_instance(&self) -> vk::Instance {
        self.handle.handle()
    }

    pub fn ash_instance(&self) -> &ash::Instance {
        &self.handle
    }
}

#[derive(Debug, Error)]
pub enum FetchPhysicalDeviceError {
    #[error("Error fetching physical devices, memory exhaustion")]
    MemoryExhaustion,
    #[error("Error fetching physical devices, Unknown vulkan: {0}")]
    UnknownVulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum DestroyRawSurfaceError {
    #[error("Surface extension is not loaded")]
    ExtensionNotLoaded,
}

// Extensions related to surface functionality
impl Instance {
    /// Check if a queue family on a physical device supports presenting to
    /// a surface.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    /// `surface` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, SurfaceSupportError> {
        if let Some(ref surface_instance) = self.surface_instance {
            //SAFETY: physical_device and surface were derived from
            //this instance
            unsafe {
                surface_instance.get_physical_device_surface_support(
                    physical_device,
                    queue_family_index,
                    surface,
                )
            }
            .map_err(SurfaceSupportError::Vulkan)
        } else {
            Err(SurfaceSupportError::ExtensionNotLoaded)
        }
    }

    ///Create a raw VkSurfaceKHR.
    ///
    /// # Safety
    /// The returned surface must be destroyed before source is dropped, or when
    /// the surface is invalidated due to something like a suspend event in
    /// winit. There is a parent child relationship between both the instance
    /// and source and the returned surface.
    ///
    /// The returned surface must only be used with this instance.
    pub unsafe fn create_raw_surface<T: HasDisplayHandle + HasWindowHandle>(
        &self,
        source: &T,
    ) -> Result<vk::SurfaceKHR, CreateSurfaceError> {
        use CreateSurfaceError as Error;
        if self.surface_instance.is_some() {
            //SAFETY:
            unsafe {
                ash_window::create_surface(
                    &self.entry,
                    &self.handle,
                    source
                        .display_handle()
                        .map_err(Error::InvalidDisplayHandle)?
                        .as_raw(),
                    source
                        .window_handle()
                        .map_err(Error::InvalidWindowHandle)?
                        .as_raw(),
                    None,
                )
            }
            .map_err(Error::VulkanError)
        } else {
            Err(Error::MissingExtension)
        }
    }

    /// Destroy the raw VkSurfaceKHR.
    ///
    /// # Safety
    /// All objects derived from surf must be destroyed first.
    /// No in-flight GPU work may still reference `surf`.
    ///
    /// You can't use surf after this function is called (for obvious reasons)
    ///
    /// surf must be derived from this instance
    pub unsafe fn destroy_raw_surface(
        &self,
        surf: vk::SurfaceKHR,
    ) -> Result<(), DestroyRawSurfaceError> {
        if let Some(ref surface_instance) = self.surface_instance {
            // SAFETY: Surf is derived from this instance (passed on to caller)
            unsafe {
                surface_instance.destroy_surface(surf, None);
            };
            Ok(())
        } else {
            Err(DestroyRawSurfaceError::ExtensionNotLoaded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_version_tuple_roundtrip() {
        let version = VkVersion::new(1, 2, 3, 4);
        let tuple = version.to_tuple();
        let rebuilt = VkVersion::from_tuple(tuple);

        assert_eq!(version.to_raw(), rebuilt.to_raw());
    }

    #[test]
    fn vk_version_raw_roundtrip() {
        let raw = vk::make_api_version(0, 1, 3, 275);
        let version = VkVersion::from_raw(raw);

        assert_eq!(version.to_raw(), raw);
        assert_eq!(version.variant(), 0);
        assert_eq!(version.major(), 1);
        assert_eq!(version.minor(), 3);
        assert_eq!(version.patch(), 275);
    }

    #[test]
    fn default_config_disables_diagnostics() {
        let config = InstanceConfig::default();
        assert!(config.diagnostics.is_none());
    }
}
