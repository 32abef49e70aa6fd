//! Presentation surface wrapper ([`Surface`]).
//!
//! A surface binds one native window (any `HasWindowHandle +
//! HasDisplayHandle` source) to one instance for the wrapper's whole
//! lifetime. It holds no rendering state of its own; its job is to
//! exist as a presentation target and to answer per-queue-family
//! present-support queries during device selection.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::instance::Instance;

#[derive(Debug, Error)]
pub enum CreateSurfaceError {
    #[error("Couldn't get display handle: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Couldn't get window handle: {0}")]
    InvalidWindowHandle(raw_window_handle::HandleError),
    #[error("Vulkan surface creation failed: {0}")]
    VulkanError(ash::vk::Result),
    #[error(
        "Parent instance did not have the surface extensions \
         for this platform loaded"
    )]
    MissingExtension,
}

#[derive(Debug, Error)]
pub enum SurfaceSupportError {
    #[error("Surface extension is not loaded")]
    ExtensionNotLoaded,
    #[error("Vulkan error checking surface support: {0}")]
    Vulkan(vk::Result),
}

pub struct Surface<T: HasWindowHandle + HasDisplayHandle> {
    parent_instance: Arc<Instance>,
    handle: ash::vk::SurfaceKHR,
    _surface_source: Arc<T>,
}

impl<T: HasWindowHandle + HasDisplayHandle> std::fmt::Debug for Surface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("handle", &self.handle)
            .field("parent", &self.parent_instance)
            .finish_non_exhaustive()
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Surface<T> {
    /// Creates a new surface associated with the source. We might want to
    /// separate the DisplayHandle source and the WindowHandle source but rn
    /// winit doesn't seem to require it and I feel like any good windowing lib
    /// wouldn't. We'll do some research in the future
    ///
    /// # Safety
    /// This must be dropped on events like suspend in winit due to the surface
    /// being implicitly invalidated. I'm not sure if this actually requires
    /// unsafe but I'm being aggressive here.
    ///
    /// Callers are responsible for ensuring no in-flight GPU work still
    /// references resources derived from this surface at destruction time.
    pub unsafe fn new(
        instance: &Arc<Instance>,
        source: Arc<T>,
    ) -> Result<Self, CreateSurfaceError> {
        //SAFETY: We hold Arc references to the instance and source, ensuring
        //they outlive the surface
        let surface = unsafe { instance.create_raw_surface(&source) }?;

        Ok(Self {
            parent_instance: Arc::clone(instance),
            handle: surface,
            _surface_source: source,
        })
    }

    pub fn parent(&self) -> &Arc<Instance> {
        &self.parent_instance
    }

    pub fn raw_handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Check if a queue family on a physical device supports presenting to
    /// this surface.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from the same instance
    /// as this surface.
    pub unsafe fn supports_queue_family(
        &self,
        physical_device: ash::vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool, SurfaceSupportError> {
        //SAFETY: physical_device was derived from the same instance as this
        //surface (caller guarantees), self.handle is valid
        unsafe {
            self.parent_instance
                .get_raw_physical_device_surface_support(
                    physical_device,
                    queue_family_index,
                    self.handle,
                )
        }
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Drop for Surface<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping surface {:?}", self.handle);
        //SAFETY: This is being dropped which means all derived objects should
        //also be being dropped and no in-flight work may still reference it.
        let _ =
            unsafe { self.parent_instance.destroy_raw_surface(self.handle) }
                .inspect_err(|e| {
                    tracing::error!(
                        "Error while dropping surface {:?}: {e}",
                        self.handle
                    )
                });
    }
}
