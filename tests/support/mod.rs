#![allow(dead_code)]

use oitkit::{
    DeviceCaps, FrameReport, FrameTarget, OitMethod, OitRenderer, OitSettings, QuadScene,
};

/// Methods that reproduce the sorted composite while capacity suffices.
pub const EXACT: [OitMethod; 6] = [
    OitMethod::KBuffer,
    OitMethod::LinkedList,
    OitMethod::Mlab,
    OitMethod::MlabBucket,
    OitMethod::Hybrid,
    OitMethod::DepthPeeling,
];

/// Settings with enough per-pixel capacity for scenes of up to eight overlapping quads.
pub fn roomy(method: OitMethod) -> OitSettings {
    OitSettings {
        layer_count: 8,
        nodes_per_bucket: 8,
        ..OitSettings::with_method(method)
    }
}

pub fn render(settings: OitSettings, scene: &QuadScene) -> (FrameTarget, FrameReport) {
    let mut renderer = OitRenderer::new(DeviceCaps::host(), settings).unwrap();
    render_with(&mut renderer, scene)
}

pub fn render_with(renderer: &mut OitRenderer, scene: &QuadScene) -> (FrameTarget, FrameReport) {
    let resolution = scene.resolution().unwrap();
    if renderer.resolution() != Some(resolution) {
        renderer
            .resolution_changed(resolution.width, resolution.height)
            .unwrap();
    }
    let mut target = FrameTarget::new(resolution);
    let mut scene = scene.clone();
    let report = renderer.render_frame(&mut scene, &mut target).unwrap();
    (target, report)
}

pub fn max_diff(a: &FrameTarget, b: &FrameTarget) -> f32 {
    oitkit::scene::max_abs_diff(a, b).unwrap()
}
