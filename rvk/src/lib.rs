//! Thin RAII wrappers around the Vulkan bootstrap sequence, built on
//! [`ash`].
//!
//! > **Personal project.** This crate is not intended for general use
//! > and makes no API stability guarantees.
//!
//! # Object hierarchy
//!
//! ```text
//! Instance
//! ├── DebugMessenger (optional, owned)
//! ├── Surface<T>
//! └── Device
//!     └── graphics / present queues
//! ```
//!
//! Each wrapper holds its parent via `Arc` so parents cannot be
//! destroyed while children are alive; the optional debug messenger is
//! owned directly by [`instance::Instance`] and torn down just before
//! `vkDestroyInstance`. Teardown order therefore falls out of drop
//! order rather than a hand-maintained cleanup function.
//!
//! # Naming conventions
//!
//! | prefix  | meaning                                   |
//! |---------|-------------------------------------------|
//! | `raw_*` | accepts or returns a raw `ash::vk` handle |
//! | `ash_*` | returns the `ash` wrapper object          |

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod capabilities;
pub mod debug;
pub mod device;
pub mod instance;
pub mod surface;

pub use ash;
pub use raw_window_handle::HandleError as RwhHandleError;
