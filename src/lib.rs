#![forbid(unsafe_code)]

pub mod config;
pub mod foundation;
pub mod gpu;
pub mod oit;
pub mod raster;
pub mod renderer;
pub mod scene;

pub use config::{
    DepthRange, MomentBasis, MomentCount, OitSettings, OverflowPolicy, SettingChange,
    StorageBitDepth, WboitWeight,
};
pub use foundation::core::{Fragment, PremulRgba, Rect, Resolution, Rgba};
pub use foundation::error::{OitError, OitResult};
pub use foundation::metrics::{MemoryMetrics, MemorySnapshot};
pub use gpu::caps::DeviceCaps;
pub use gpu::tiling::TileAddressing;
pub use oit::depth_complexity::DepthComplexityStats;
pub use oit::sort::SortAlgorithm;
pub use oit::{GatherStats, OitBackend, OitMethod, create_backend};
pub use raster::pass::{GatherPass, PassStats, Scene};
pub use raster::primitive::TransparentQuad;
pub use raster::target::FrameTarget;
pub use renderer::{FrameReport, OitRenderer};
pub use scene::QuadScene;
