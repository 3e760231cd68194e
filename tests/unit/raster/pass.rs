use super::*;
use crate::foundation::core::{Rect, Resolution, Rgba};
use crate::raster::shader::ShaderVariant;
use std::sync::Mutex;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(u32, u32)>>,
}

impl FragmentProgram for Recorder {
    fn invoke(&self, fragment: &Fragment) {
        self.seen.lock().unwrap().push((fragment.x, fragment.y));
    }
}

#[derive(Default)]
struct ColorRecorder {
    seen: Mutex<Vec<Rgba>>,
}

impl FragmentProgram for ColorRecorder {
    fn invoke(&self, fragment: &Fragment) {
        self.seen.lock().unwrap().push(fragment.color);
    }
}

fn red(a: f32) -> Rgba {
    Rgba::new(1.0, 0.0, 0.0, a)
}

#[test]
fn draw_with_wrong_shader_is_rejected() {
    let target = FrameTarget::new(Resolution::new(2, 2).unwrap());
    let program = Recorder::default();
    let active = ShaderVariant::new("A").id();
    let other = ShaderVariant::new("B").id();
    let mut pass = GatherPass::new(active, &program, &target, &RenderState::gather(false));

    let err = pass
        .draw_fragments(other, &[Fragment::new(0, 0, 1.0, red(1.0))])
        .unwrap_err();
    assert!(matches!(err, OitError::ShaderMismatch { .. }));
    assert!(program.seen.lock().unwrap().is_empty());
}

#[test]
fn opaque_depth_and_bounds_reject_fragments() {
    let mut target = FrameTarget::new(Resolution::new(2, 1).unwrap());
    target.set_opaque_depth(1, 0, 2.0);
    let program = Recorder::default();
    let shader = ShaderVariant::new("A").id();
    let mut pass = GatherPass::new(shader, &program, &target, &RenderState::gather(true));

    pass.draw_fragments(
        shader,
        &[
            Fragment::new(0, 0, 5.0, red(0.5)),
            Fragment::new(1, 0, 1.0, red(0.5)),
            Fragment::new(1, 0, 3.0, red(0.5)),
            Fragment::new(7, 0, 1.0, red(0.5)),
            Fragment::new(0, 0, f32::NAN, red(0.5)),
        ],
    )
    .unwrap();
    let stats = pass.stats();
    assert_eq!(stats.fragments_shaded, 2);
    assert_eq!(stats.fragments_rejected, 3);
    assert_eq!(stats.draw_calls, 1);
    drop(pass);

    let mut seen = program.seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![(0, 0), (1, 0)]);
    assert!(target.is_touched(0, 0));
    assert!(target.is_touched(1, 0));
}

#[test]
fn closures_are_scenes() {
    let target = FrameTarget::new(Resolution::new(4, 4).unwrap());
    let program = Recorder::default();
    let shader = ShaderVariant::new("A").id();
    let mut pass = GatherPass::new(shader, &program, &target, &RenderState::gather(false));

    let mut scene = |pass: &mut GatherPass<'_>| {
        let s = pass.gather_shader();
        pass.draw_quads(
            s,
            &[TransparentQuad::new(
                Rect::new(0.0, 0.0, 2.0, 2.0),
                1.0,
                red(0.5),
            )],
        )
    };
    scene.render(&mut pass).unwrap();
    assert_eq!(pass.stats().fragments_shaded, 4);
    assert_eq!(target.touched_count(), 0);
}

#[test]
fn raw_fragment_colors_are_clamped_before_shading() {
    let target = FrameTarget::new(Resolution::new(1, 1).unwrap());
    let program = ColorRecorder::default();
    let shader = ShaderVariant::new("A").id();
    let mut pass = GatherPass::new(shader, &program, &target, &RenderState::gather(false));

    pass.draw_fragments(
        shader,
        &[
            Fragment::new(0, 0, 1.0, Rgba::new(2.0, -0.5, 0.5, 1.5)),
            Fragment::new(0, 0, 2.0, Rgba::new(f32::NAN, 0.25, 1.0, -1.0)),
        ],
    )
    .unwrap();
    drop(pass);

    let mut seen = program.seen.lock().unwrap().clone();
    seen.sort_by(|a, b| a.a.total_cmp(&b.a));
    assert_eq!(
        seen,
        vec![Rgba::new(0.0, 0.25, 1.0, 0.0), Rgba::new(1.0, 0.0, 0.5, 1.0)]
    );
}
