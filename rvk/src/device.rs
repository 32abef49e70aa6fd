//! Physical device selection and the logical device wrapper
//! ([`Device`]).
//!
//! Selection is deliberately minimal: a device is suitable iff its
//! queue families can cover graphics submission and presentation to
//! the target surface ([`QueueFamilyIndices::is_complete`]); no
//! feature, extension, or limits filtering is applied. Extend the
//! suitability predicate here when real feature requirements appear.
//!
//! The scan picks the FIRST suitable device in enumeration order and
//! stops. Enumeration order is whatever the driver reports, so on
//! multi-GPU systems the chosen device is not guaranteed stable across
//! runs. That is a known limitation of first-fit selection, kept
//! deliberately rather than papered over with an unstated preference
//! order.

use std::collections::BTreeSet;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::{
    instance::{FetchPhysicalDeviceError, Instance},
    surface::{Surface, SurfaceSupportError},
};

/// Which queue families on a candidate device can serve which role.
///
/// Recomputed per candidate during selection, never cached: it is pure
/// derived data over the device's reported family list and the target
/// surface. The two roles may land on the same family or on different
/// ones; either is complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// The deduplicated family set to request queues from, ascending.
    /// `None` while incomplete.
    pub fn unique_families(&self) -> Option<Vec<u32>> {
        let families: BTreeSet<u32> =
            [self.graphics_family?, self.present_family?]
                .into_iter()
                .collect();
        Some(families.into_iter().collect())
    }
}

/// Scan `families` in reported order, filling each role with the first
/// index that supports it.
///
/// Present support comes from the caller as a closure (a query against
/// the target surface) so this stays pure and testable. The scan
/// short-circuits as soon as both roles are filled; a family
/// satisfying both at once therefore wins both implicitly. The
/// closure is only consulted while the present role is unfilled.
pub fn scan_queue_families<E>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> Result<bool, E>,
) -> Result<QueueFamilyIndices, E> {
    let mut indices = QueueFamilyIndices::default();

    for (idx, props) in families.iter().enumerate() {
        let idx = idx as u32;
        if indices.graphics_family.is_none()
            && props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(idx);
        }
        if indices.present_family.is_none() && supports_present(idx)? {
            indices.present_family = Some(idx);
        }
        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// First-fit pick over `devices` in enumeration order.
///
/// Returns the first device whose queue-family scan comes back
/// complete, together with that scan result, without looking at any
/// later device. `None` when no device qualifies.
pub fn first_suitable_device<E>(
    devices: &[vk::PhysicalDevice],
    mut queue_families_for: impl FnMut(
        vk::PhysicalDevice,
    ) -> Result<QueueFamilyIndices, E>,
) -> Result<Option<(vk::PhysicalDevice, QueueFamilyIndices)>, E> {
    for &device in devices {
        let indices = queue_families_for(device)?;
        if indices.is_complete() {
            return Ok(Some((device, indices)));
        }
    }
    Ok(None)
}

/// One queue create-info per unique family: a single queue at fixed
/// priority 1.0 each. `priorities` is caller-owned storage because the
/// create-infos borrow it.
fn queue_create_infos<'a>(
    families: &[u32],
    priorities: &'a [f32; 1],
) -> Vec<vk::DeviceQueueCreateInfo<'a>> {
    families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(priorities)
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum CreateCompatibleError {
    #[error(
        "Mismatched parameters to Device::create_compatible. All \
         parameters must be derived from the same instance"
    )]
    MismatchedParams,

    #[error("Host memory exhaustion while enumerating physical devices")]
    MemoryExhaustion,

    #[error("Unknown Vulkan error while creating a compatible device: {0}")]
    UnknownVulkan(vk::Result),

    #[error("No Vulkan-capable physical device was enumerated")]
    NoVulkanGpu,

    #[error(
        "No enumerated physical device has both a graphics queue family \
         and a queue family that can present to the surface"
    )]
    NoSuitableDevice,

    #[error("Failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("Error checking surface support: {0}")]
    SurfaceSupport(#[from] SurfaceSupportError),
}

impl From<FetchPhysicalDeviceError> for CreateCompatibleError {
    fn from(value: FetchPhysicalDeviceError) -> Self {
        match value {
            FetchPhysicalDeviceError::MemoryExhaustion => {
                CreateCompatibleError::MemoryExhaustion
            }
            FetchPhysicalDeviceError::UnknownVulkan(e) => {
                CreateCompatibleError::UnknownVulkan(e)
            }
        }
    }
}

/// A logical Vulkan device plus the graphics and present queues driven
/// through it.
///
/// Constructed via [`Device::create_compatible`], which runs the
/// first-fit selection documented at module level. The two queue
/// handles are identical when graphics and present resolved to the
/// same family. No optional device features are requested; the
/// feature set is the empty baseline until something needs more.
pub struct Device {
    parent: Arc<Instance>,
    handle: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    graphics_queue: (vk::Queue, u32),
    present_queue: (vk::Queue, u32),
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        //SAFETY: All objects derived from this device should be dropped
        //before this device is dropped.
        unsafe { self.handle.destroy_device(None) };
    }
}

impl Device {
    /// Create a logical device compatible with `surf`.
    ///
    /// Enumerates physical devices, picks the first one (enumeration
    /// order) whose queue families cover graphics and presentation to
    /// `surf`, and creates a logical device with one queue per unique
    /// family at priority 1.0.
    ///
    /// The name `create_compatible` is intentional: the API does not yet
    /// expose physical devices as a first-class concept, so callers
    /// cannot select one themselves. This name signals that the
    /// selection is automatic and may change in a future API revision
    /// once physical-device enumeration is surfaced.
    pub fn create_compatible<T: HasDisplayHandle + HasWindowHandle>(
        instance: &Arc<Instance>,
        surf: &Surface<T>,
    ) -> Result<Self, CreateCompatibleError> {
        if !std::sync::Arc::ptr_eq(surf.parent(), instance) {
            return Err(CreateCompatibleError::MismatchedParams);
        }

        let physical_devices = instance.fetch_raw_physical_devices()?;
        if physical_devices.is_empty() {
            return Err(CreateCompatibleError::NoVulkanGpu);
        }

        let selected = first_suitable_device(&physical_devices, |dev| {
            // SAFETY: dev was derived from instance.
            let families = unsafe {
                instance.get_raw_physical_device_queue_family_properties(dev)
            };
            let indices = scan_queue_families(&families, |family_index| {
                // SAFETY: dev and surf are both derived from the same
                // instance (validated at the top of this fn).
                unsafe { surf.supports_queue_family(dev, family_index) }
            })?;
            if !indices.is_complete() {
                // SAFETY: dev was derived from instance.
                let props = unsafe {
                    instance.get_raw_physical_device_properties(dev)
                };
                tracing::debug!(
                    "Skipping {:?}: queue families cover neither graphics \
                     nor present completely ({:?})",
                    props.device_name_as_c_str().unwrap_or(c"unknown"),
                    indices,
                );
            }
            Ok::<_, SurfaceSupportError>(indices)
        })?;

        let Some((physical_device, indices)) = selected else {
            return Err(CreateCompatibleError::NoSuitableDevice);
        };

        // SAFETY: physical_device was selected from this instance.
        let properties = unsafe {
            instance.get_raw_physical_device_properties(physical_device)
        };
        tracing::info!(
            "Selected physical device: {:?} (type: {:?}, queue families: \
             graphics {:?}, present {:?})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            properties.device_type,
            indices.graphics_family,
            indices.present_family,
        );

        // Selection only returns complete indices; anything else here
        // is a bug in this module, not a runtime condition.
        let unique_families = indices
            .unique_families()
            .expect("device selection yielded incomplete queue families");

        let queue_priorities = [1.0f32];
        let queue_infos =
            queue_create_infos(&unique_families, &queue_priorities);

        // Empty feature set: the minimal baseline until something
        // needs an optional feature.
        let enabled_features = vk::PhysicalDeviceFeatures::default();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_features(&enabled_features);

        // SAFETY: physical_device was derived from instance;
        // device_create_info is fully initialised above.
        let device = unsafe {
            instance.create_ash_device(physical_device, &device_create_info)
        }
        .map_err(CreateCompatibleError::DeviceCreationFailed)?;

        let graphics_family = indices
            .graphics_family
            .expect("device selection yielded incomplete queue families");
        let present_family = indices
            .present_family
            .expect("device selection yielded incomplete queue families");

        // SAFETY: device was just created with one queue in each of
        // these families.
        let graphics_queue =
            unsafe { device.get_device_queue(graphics_family, 0) };
        // SAFETY: as above; when the families alias this returns the
        // same handle, which is fine.
        let present_queue =
            unsafe { device.get_device_queue(present_family, 0) };

        Ok(Self {
            parent: instance.clone(),
            handle: device,
            physical_device,
            properties,
            graphics_queue: (graphics_queue, graphics_family),
            present_queue: (present_queue, present_family),
        })
    }

    pub fn parent(&self) -> &Arc<Instance> {
        &self.parent
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn ash_device(&self) -> &ash::Device {
        &self.handle
    }

    pub fn raw_device(&self) -> vk::Device {
        self.handle.handle()
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue.0
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue.1
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue.0
    }

    pub fn present_queue_family(&self) -> u32 {
        self.present_queue.1
    }

    /// Whether graphics and present resolved to one underlying queue.
    pub fn has_unified_queue(&self) -> bool {
        self.graphics_queue.0 == self.present_queue.0
    }

    /// Wait until all submitted work on this device has completed.
    ///
    /// This may block the calling thread and should generally be used for
    /// coarse-grained transitions (shutdown, suspend) rather than hot
    /// per-frame paths.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // SAFETY: `self.handle` is a valid logical device for the lifetime of
        // `self`, and this call has no additional pointer preconditions.
        unsafe { self.handle.device_wait_idle() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::convert::Infallible;

    fn graphics_family() -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn compute_family() -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::COMPUTE,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn one_family_can_serve_both_roles() {
        let families = [graphics_family()];

        let indices = scan_queue_families(&families, |_| {
            Ok::<_, Infallible>(true)
        })
        .unwrap();

        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
        assert!(indices.is_complete());
    }

    #[test]
    fn roles_may_split_across_families() {
        // Family 0 can only present, family 1 can only do graphics.
        let families = [compute_family(), graphics_family()];

        let indices = scan_queue_families(&families, |idx| {
            Ok::<_, Infallible>(idx == 0)
        })
        .unwrap();

        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(0));
    }

    #[test]
    fn zero_families_yields_incomplete_without_error() {
        let indices = scan_queue_families(&[], |_| Ok::<_, Infallible>(true))
            .unwrap();

        assert!(!indices.is_complete());
        assert_eq!(indices, QueueFamilyIndices::default());
    }

    #[test]
    fn returned_indices_stay_within_family_count() {
        let families = [compute_family(), compute_family(), graphics_family()];

        let indices = scan_queue_families(&families, |idx| {
            Ok::<_, Infallible>(idx == 1)
        })
        .unwrap();

        let count = families.len() as u32;
        assert!(indices.graphics_family.is_some_and(|idx| idx < count));
        assert!(indices.present_family.is_some_and(|idx| idx < count));
    }

    #[test]
    fn scan_stops_once_both_roles_are_filled() {
        let families =
            [graphics_family(), graphics_family(), graphics_family()];
        let present_queries = RefCell::new(0u32);

        let indices = scan_queue_families(&families, |_| {
            *present_queries.borrow_mut() += 1;
            Ok::<_, Infallible>(true)
        })
        .unwrap();

        assert!(indices.is_complete());
        // Family 0 satisfied both roles; later families are never
        // consulted.
        assert_eq!(*present_queries.borrow(), 1);
    }

    #[test]
    fn present_errors_propagate() {
        let families = [graphics_family()];

        let result = scan_queue_families(&families, |_| Err("boom"));
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn first_fit_takes_the_first_suitable_device_in_order() {
        let devices = [
            vk::PhysicalDevice::from_raw(1),
            vk::PhysicalDevice::from_raw(2),
            vk::PhysicalDevice::from_raw(3),
        ];
        let scanned = RefCell::new(Vec::new());

        let selected = first_suitable_device(&devices, |dev| {
            scanned.borrow_mut().push(dev.as_raw());
            // Only devices 2 and 3 are suitable.
            let indices = if dev.as_raw() >= 2 {
                QueueFamilyIndices {
                    graphics_family: Some(0),
                    present_family: Some(0),
                }
            } else {
                QueueFamilyIndices::default()
            };
            Ok::<_, Infallible>(indices)
        })
        .unwrap();

        let (device, _) = selected.expect("a suitable device exists");
        assert_eq!(device.as_raw(), 2);
        // Device 3 is suitable too but must never be scanned.
        assert_eq!(scanned.borrow().as_slice(), &[1, 2]);
    }

    #[test]
    fn no_suitable_device_yields_none() {
        let devices =
            [vk::PhysicalDevice::from_raw(1), vk::PhysicalDevice::from_raw(2)];

        let selected = first_suitable_device(&devices, |_| {
            Ok::<_, Infallible>(QueueFamilyIndices::default())
        })
        .unwrap();

        assert!(selected.is_none());
    }

    #[test]
    fn empty_enumeration_scans_nothing() {
        let selected = first_suitable_device(
            &[],
            |_| -> Result<QueueFamilyIndices, Infallible> {
                panic!("no device should be scanned for an empty list")
            },
        )
        .unwrap();

        assert!(selected.is_none());
    }

    #[test]
    fn aliased_families_deduplicate_to_one_queue_request() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(3),
            present_family: Some(3),
        };

        let families = indices.unique_families().unwrap();
        assert_eq!(families, vec![3]);

        let priorities = [1.0f32];
        let infos = queue_create_infos(&families, &priorities);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].queue_family_index, 3);
        assert_eq!(infos[0].queue_count, 1);
    }

    #[test]
    fn distinct_families_get_one_queue_request_each() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(0),
        };

        let families = indices.unique_families().unwrap();
        assert_eq!(families, vec![0, 2]);

        let priorities = [1.0f32];
        let infos = queue_create_infos(&families, &priorities);
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].queue_family_index, 0);
        assert_eq!(infos[1].queue_family_index, 2);
    }

    #[test]
    fn incomplete_indices_have_no_family_set() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };

        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_none());
    }
}
