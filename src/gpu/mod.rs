//! Host emulation of the device resources the OIT backends run on.

pub mod allocator;
pub mod buffer;
pub mod caps;
pub mod tiling;
