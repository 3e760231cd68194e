//! Engine settings.
//!
//! Settings are plain serde data so hosts can keep them in JSON next to their own configuration.
//! Every option can be changed independently at runtime through [`SettingChange`].

use std::path::Path;

use anyhow::Context as _;

use crate::foundation::error::{OitError, OitResult};
use crate::gpu::tiling::TileAddressing;
use crate::oit::OitMethod;
use crate::oit::sort::SortAlgorithm;

/// What a full fixed-capacity array does with one more fragment.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the nearest fragments; a nearer arrival evicts the farthest stored one.
    #[default]
    ReplaceFarthest,
    /// Keep the first arrivals; everything after the array is full is dropped.
    RejectNew,
}

/// Precision of per-pixel storage.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StorageBitDepth {
    /// Colors as unorm16, accumulators as half floats.
    Bits16,
    #[default]
    Bits32,
}

impl StorageBitDepth {
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits16 => 16,
            Self::Bits32 => 32,
        }
    }
}

/// Number of moments MBOIT keeps per pixel (besides the zeroth).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum MomentCount {
    #[default]
    Four,
    Six,
    Eight,
}

impl MomentCount {
    pub fn get(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Six => 6,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u32> for MomentCount {
    type Error = String;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            4 => Ok(Self::Four),
            6 => Ok(Self::Six),
            8 => Ok(Self::Eight),
            other => Err(format!("moment count must be 4, 6 or 8, got {other}")),
        }
    }
}

impl From<MomentCount> for u32 {
    fn from(v: MomentCount) -> Self {
        v.get() as u32
    }
}

impl serde::Serialize for MomentCount {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(u32::from(*self))
    }
}

impl<'de> serde::Deserialize<'de> for MomentCount {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = <u32 as serde::Deserialize>::deserialize(d)?;
        Self::try_from(v).map_err(serde::de::Error::custom)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MomentBasis {
    /// `z^k` of the warped depth.
    #[default]
    Power,
    /// `e^{ikφ}` of the warped depth mapped to a phase.
    Trigonometric,
}

/// Depth weighting heuristic of weighted blended OIT.
///
/// Variants are named after the equations of McGuire and Bavoil, "Weighted Blended
/// Order-Independent Transparency" (JCGT 2013).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WboitWeight {
    #[default]
    Eq7,
    Eq8,
    Eq9,
    Eq10,
}

/// View-space depth interval `[near, far]`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepthRange {
    pub near: f32,
    pub far: f32,
}

impl DepthRange {
    pub fn new(near: f32, far: f32) -> OitResult<Self> {
        let r = Self { near, far };
        r.validate()?;
        Ok(r)
    }

    pub fn validate(&self) -> OitResult<()> {
        if !(self.near.is_finite() && self.far.is_finite() && self.near > 0.0 && self.far > self.near)
        {
            return Err(OitError::config(format!(
                "depth range must satisfy 0 < near < far, got [{}, {}]",
                self.near, self.far
            )));
        }
        Ok(())
    }

    /// Position of `depth` in the range, clamped to `[0, 1]`.
    pub fn normalize(&self, depth: f32) -> f32 {
        ((depth - self.near) / (self.far - self.near)).clamp(0.0, 1.0)
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            near: 0.1,
            far: 100.0,
        }
    }
}

/// Full engine configuration.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OitSettings {
    pub method: OitMethod,
    /// Per-pixel capacity of the K-buffer, MLAB layer count and hybrid head size.
    pub layer_count: u32,
    pub overflow_policy: OverflowPolicy,
    pub num_buckets: u32,
    pub nodes_per_bucket: u32,
    /// Scene depth bounds, used for bucket routing and moment depth warping.
    pub depth_range: DepthRange,
    /// Linked-list pool size in nodes per pixel.
    pub expected_depth_complexity: u32,
    /// Grow the linked-list pool after a frame that exhausted it.
    pub grow_pool_on_overflow: bool,
    /// Linked-list resolve keeps at most this many (nearest) fragments per pixel.
    pub max_fragments_sorting: u32,
    pub sort_algorithm: SortAlgorithm,
    pub moment_count: MomentCount,
    pub moment_basis: MomentBasis,
    /// Share of a fragment's own absorbance applied to itself during moment reconstruction.
    pub moment_overestimation: f32,
    pub wboit_weight: WboitWeight,
    pub tile_addressing: TileAddressing,
    pub bit_depth: StorageBitDepth,
    /// Restrict resolve passes to pixels touched by transparent geometry.
    pub stencil_mask: bool,
    /// Upper bound on depth peeling iterations.
    pub max_peel_layers: u32,
}

impl Default for OitSettings {
    fn default() -> Self {
        Self {
            method: OitMethod::default(),
            layer_count: 8,
            overflow_policy: OverflowPolicy::default(),
            num_buckets: 4,
            nodes_per_bucket: 4,
            depth_range: DepthRange::default(),
            expected_depth_complexity: 16,
            grow_pool_on_overflow: true,
            max_fragments_sorting: 256,
            sort_algorithm: SortAlgorithm::default(),
            moment_count: MomentCount::default(),
            moment_basis: MomentBasis::default(),
            moment_overestimation: 0.25,
            wboit_weight: WboitWeight::default(),
            tile_addressing: TileAddressing::default(),
            bit_depth: StorageBitDepth::default(),
            stencil_mask: true,
            max_peel_layers: 64,
        }
    }
}

impl OitSettings {
    pub fn with_method(method: OitMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> OitResult<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| OitError::config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_path(path: &Path) -> OitResult<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read settings '{}'", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> OitResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| OitError::config(e.to_string()))
    }

    pub fn validate(&self) -> OitResult<()> {
        check_range("layer_count", self.layer_count, 1, 64)?;
        check_range("num_buckets", self.num_buckets, 1, 32)?;
        check_range("nodes_per_bucket", self.nodes_per_bucket, 1, 32)?;
        check_range(
            "expected_depth_complexity",
            self.expected_depth_complexity,
            1,
            1024,
        )?;
        check_range("max_fragments_sorting", self.max_fragments_sorting, 1, 4096)?;
        check_range("max_peel_layers", self.max_peel_layers, 1, u32::MAX)?;
        self.depth_range.validate()?;
        if !(0.0..=1.0).contains(&self.moment_overestimation) {
            return Err(OitError::config(format!(
                "moment_overestimation must be in [0, 1], got {}",
                self.moment_overestimation
            )));
        }
        self.tile_addressing.validate()
    }

    /// Apply one change and validate the result. On error the settings are unchanged.
    pub fn apply(&mut self, change: SettingChange) -> OitResult<()> {
        let mut next = self.clone();
        match change {
            SettingChange::Method(v) => next.method = v,
            SettingChange::LayerCount(v) => next.layer_count = v,
            SettingChange::OverflowPolicy(v) => next.overflow_policy = v,
            SettingChange::BucketCount(v) => next.num_buckets = v,
            SettingChange::NodesPerBucket(v) => next.nodes_per_bucket = v,
            SettingChange::DepthRange(v) => next.depth_range = v,
            SettingChange::ExpectedDepthComplexity(v) => next.expected_depth_complexity = v,
            SettingChange::GrowPoolOnOverflow(v) => next.grow_pool_on_overflow = v,
            SettingChange::MaxFragmentsSorting(v) => next.max_fragments_sorting = v,
            SettingChange::SortAlgorithm(v) => next.sort_algorithm = v,
            SettingChange::MomentCount(v) => next.moment_count = v,
            SettingChange::MomentBasis(v) => next.moment_basis = v,
            SettingChange::MomentOverestimation(v) => next.moment_overestimation = v,
            SettingChange::WboitWeight(v) => next.wboit_weight = v,
            SettingChange::TileAddressing(v) => next.tile_addressing = v,
            SettingChange::BitDepth(v) => next.bit_depth = v,
            SettingChange::StencilMask(v) => next.stencil_mask = v,
            SettingChange::MaxPeelLayers(v) => next.max_peel_layers = v,
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

fn check_range(name: &str, v: u32, lo: u32, hi: u32) -> OitResult<()> {
    if !(lo..=hi).contains(&v) {
        return Err(OitError::config(format!(
            "{name} must be in {lo}..={hi}, got {v}"
        )));
    }
    Ok(())
}

/// One independently settable option.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SettingChange {
    Method(OitMethod),
    LayerCount(u32),
    OverflowPolicy(OverflowPolicy),
    BucketCount(u32),
    NodesPerBucket(u32),
    DepthRange(DepthRange),
    ExpectedDepthComplexity(u32),
    GrowPoolOnOverflow(bool),
    MaxFragmentsSorting(u32),
    SortAlgorithm(SortAlgorithm),
    MomentCount(MomentCount),
    MomentBasis(MomentBasis),
    MomentOverestimation(f32),
    WboitWeight(WboitWeight),
    TileAddressing(TileAddressing),
    BitDepth(StorageBitDepth),
    StencilMask(bool),
    MaxPeelLayers(u32),
}

impl SettingChange {
    /// Whether the change alters storage layout, forcing a full reallocation.
    pub fn requires_reallocation(&self) -> bool {
        matches!(
            self,
            Self::Method(_)
                | Self::LayerCount(_)
                | Self::BucketCount(_)
                | Self::NodesPerBucket(_)
                | Self::ExpectedDepthComplexity(_)
                | Self::MomentCount(_)
                | Self::TileAddressing(_)
                | Self::BitDepth(_)
        )
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
