use super::*;
use crate::config::OverflowPolicy;
use crate::foundation::core::{Rect, Rgba};
use crate::raster::primitive::TransparentQuad;

fn renderer(method: OitMethod) -> OitRenderer {
    let settings = OitSettings {
        stencil_mask: false,
        ..OitSettings::with_method(method)
    };
    OitRenderer::new(DeviceCaps::host(), settings).unwrap()
}

fn quads() -> Vec<TransparentQuad> {
    vec![
        TransparentQuad::new(
            Rect::new(0.0, 0.0, 4.0, 4.0),
            2.0,
            Rgba::new(0.0, 1.0, 0.0, 0.5),
        ),
        TransparentQuad::new(
            Rect::new(1.0, 1.0, 3.0, 3.0),
            1.0,
            Rgba::new(1.0, 0.0, 0.0, 0.5),
        ),
    ]
}

fn draw(renderer: &mut OitRenderer, target: &mut FrameTarget) -> OitResult<FrameReport> {
    let quads = quads();
    let mut scene = move |pass: &mut GatherPass<'_>| {
        let shader = pass.gather_shader();
        pass.draw_quads(shader, &quads)
    };
    renderer.render_frame(&mut scene, target)
}

#[test]
fn frame_before_resolution_is_rejected() {
    let mut r = renderer(OitMethod::KBuffer);
    let mut target = FrameTarget::new(Resolution::new(4, 4).unwrap());
    let err = draw(&mut r, &mut target).unwrap_err();
    assert!(matches!(err, OitError::Validation(_)), "{err}");
    assert_eq!(r.render_state(), RenderState::default());
}

#[test]
fn target_size_must_match_storage() {
    let mut r = renderer(OitMethod::KBuffer);
    r.resolution_changed(4, 4).unwrap();
    let mut target = FrameTarget::new(Resolution::new(2, 2).unwrap());
    assert!(matches!(
        draw(&mut r, &mut target),
        Err(OitError::Validation(_))
    ));
}

#[test]
fn frame_report_counts_the_gather_pass() {
    let mut r = renderer(OitMethod::KBuffer);
    r.resolution_changed(4, 4).unwrap();
    let mut target = FrameTarget::new(Resolution::new(4, 4).unwrap());

    let report = draw(&mut r, &mut target).unwrap();
    assert_eq!(report.frame_index, 0);
    assert_eq!(report.method, OitMethod::KBuffer);
    assert_eq!(report.gather.draw_calls, 1);
    assert_eq!(report.gather.fragments_shaded, 16 + 4);
    assert_eq!(report.backend.fragments_stored, 20);
    assert_eq!(report.backend.geometry_passes, 1);
    assert!(report.complexity.is_none());
    assert_eq!(report.memory.live_bytes, r.metrics().live_bytes());
    assert_eq!(r.render_state(), RenderState::default());

    let second = draw(&mut r, &mut target).unwrap();
    assert_eq!(second.frame_index, 1);
    assert_eq!(r.total_gather_stats().fragments_shaded, 40);
}

#[test]
fn method_switch_keeps_memory_balanced() {
    let mut r = renderer(OitMethod::KBuffer);
    r.resolution_changed(4, 4).unwrap();
    let kbuffer_bytes = r.metrics().live_bytes();
    let kbuffer_shader = r.gather_shader();

    r.apply(SettingChange::Method(OitMethod::Wboit)).unwrap();
    assert_eq!(r.method(), OitMethod::Wboit);
    assert_ne!(r.gather_shader(), kbuffer_shader);
    assert_eq!(r.metrics().bytes_for("kbuffer.records"), 0);

    r.apply(SettingChange::Method(OitMethod::KBuffer)).unwrap();
    assert_eq!(r.metrics().live_bytes(), kbuffer_bytes);
    assert_eq!(r.gather_shader(), kbuffer_shader);

    let mut target = FrameTarget::new(Resolution::new(4, 4).unwrap());
    draw(&mut r, &mut target).unwrap();
}

#[test]
fn missing_capability_keeps_previous_backend() {
    let settings = OitSettings::with_method(OitMethod::Wboit);
    let caps = DeviceCaps::host().without_pixel_interlock();
    let mut r = OitRenderer::new(caps, settings).unwrap();
    r.resolution_changed(2, 2).unwrap();

    let err = r
        .apply(SettingChange::Method(OitMethod::LinkedList))
        .unwrap_err();
    assert!(matches!(err, OitError::MissingCapability(_)));
    assert_eq!(r.method(), OitMethod::Wboit);
    assert_eq!(r.settings().method, OitMethod::Wboit);

    assert!(matches!(
        OitRenderer::new(caps, OitSettings::with_method(OitMethod::Mlab)),
        Err(OitError::MissingCapability(_))
    ));
}

#[test]
fn failed_reallocation_restores_settings() {
    let caps = DeviceCaps::host().with_max_storage_buffer_bytes(4096);
    let mut r = OitRenderer::new(caps, OitSettings::default()).unwrap();
    r.resolution_changed(4, 4).unwrap();
    let before = r.metrics().live_bytes();

    let err = r.apply(SettingChange::LayerCount(64)).unwrap_err();
    assert!(matches!(err, OitError::Allocation { .. }), "{err}");
    assert_eq!(r.settings().layer_count, 8);
    assert_eq!(r.metrics().live_bytes(), before);

    let mut target = FrameTarget::new(Resolution::new(4, 4).unwrap());
    let report = draw(&mut r, &mut target).unwrap();
    assert_eq!(report.backend.fragments_stored, 20);
}

#[test]
fn invalid_change_is_ignored() {
    let mut r = renderer(OitMethod::KBuffer);
    assert!(r.apply(SettingChange::LayerCount(0)).is_err());
    assert_eq!(r.settings().layer_count, 8);
    r.apply(SettingChange::OverflowPolicy(OverflowPolicy::RejectNew))
        .unwrap();
    assert_eq!(r.settings().overflow_policy, OverflowPolicy::RejectNew);
}

#[test]
fn release_all_returns_every_byte() {
    let mut r = renderer(OitMethod::Moments);
    r.resolution_changed(8, 8).unwrap();
    assert!(r.metrics().live_bytes() > 0);
    r.release_all();
    assert_eq!(r.metrics().live_bytes(), 0);
    assert_eq!(r.metrics().live_buffers(), 0);
    assert_eq!(r.resolution(), None);
}
