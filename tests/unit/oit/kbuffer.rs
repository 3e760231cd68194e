use super::*;
use crate::foundation::core::Rgba;
use crate::foundation::metrics::MemoryMetrics;
use crate::gpu::caps::DeviceCaps;
use crate::raster::pass::GatherPass;

fn frag(depth: f32) -> Fragment {
    Fragment::new(0, 0, depth, Rgba::new(depth / 10.0, 0.0, 0.0, 0.5))
}

fn settings(capacity: u32, policy: OverflowPolicy) -> OitSettings {
    OitSettings {
        layer_count: capacity,
        overflow_policy: policy,
        stencil_mask: false,
        ..OitSettings::default()
    }
}

fn kbuffer(settings: &OitSettings, metrics: &mut MemoryMetrics) -> KBuffer {
    let mut kb = KBuffer::new();
    kb.create(settings).unwrap();
    let caps = DeviceCaps::host();
    let mut alloc = ResourceAllocator::new(&caps, metrics);
    kb.resolution_changed(Resolution::new(1, 1).unwrap(), &mut alloc)
        .unwrap();
    kb
}

fn stored_depths(kb: &KBuffer) -> Vec<f32> {
    let s = kb.storage().unwrap();
    let n = s.counts.load(0) as usize;
    let mut d: Vec<f32> = (0..n)
        .map(|i| s.layout.read(&s.records, s.base(0, i)).depth)
        .collect();
    d.sort_by(f32::total_cmp);
    d
}

#[test]
fn replace_farthest_keeps_nearest_in_any_order() {
    let mut metrics = MemoryMetrics::new();
    for order in [[5.0, 1.0, 4.0, 2.0, 3.0], [1.0, 2.0, 3.0, 4.0, 5.0], [5.0, 4.0, 3.0, 2.0, 1.0]] {
        let kb = kbuffer(&settings(3, OverflowPolicy::ReplaceFarthest), &mut metrics);
        let program = kb.gather_program().unwrap();
        for d in order {
            program.invoke(&frag(d));
        }
        assert_eq!(stored_depths(&kb), vec![1.0, 2.0, 3.0], "{order:?}");
    }
}

#[test]
fn reject_new_keeps_first_arrivals() {
    let mut metrics = MemoryMetrics::new();
    let mut kb = kbuffer(&settings(3, OverflowPolicy::RejectNew), &mut metrics);
    let program = kb.gather_program().unwrap();
    for d in [5.0, 1.0, 4.0, 2.0, 3.0] {
        program.invoke(&frag(d));
    }
    assert_eq!(stored_depths(&kb), vec![1.0, 4.0, 5.0]);
    let stats = kb.take_stats();
    assert_eq!(stats.fragments_stored, 3);
    assert_eq!(stats.fragments_discarded, 2);
}

#[test]
fn resolve_composites_and_clears() {
    let mut metrics = MemoryMetrics::new();
    let mut kb = kbuffer(&settings(4, OverflowPolicy::ReplaceFarthest), &mut metrics);
    {
        let program = kb.gather_program().unwrap();
        program.invoke(&Fragment::new(0, 0, 2.0, Rgba::new(0.0, 1.0, 0.0, 0.5)));
        program.invoke(&Fragment::new(0, 0, 1.0, Rgba::new(1.0, 0.0, 0.0, 0.5)));
    }
    let mut target = FrameTarget::new(Resolution::new(1, 1).unwrap());
    let mut state = RenderState::default();
    let mut scene = |_: &mut GatherPass<'_>| Ok::<(), OitError>(());
    kb.render_to_screen(&mut scene, &mut target, &mut state)
        .unwrap();

    let expected = PremulRgba::new(0.5, 0.25, 0.0, 0.75);
    assert!(target.pixel(0, 0).max_abs_diff(expected) < 1e-6);
    assert!(stored_depths(&kb).is_empty());
    assert_eq!(state, RenderState::default());
}

#[test]
fn reallocation_releases_previous_storage() {
    let mut metrics = MemoryMetrics::new();
    let mut kb = kbuffer(&settings(4, OverflowPolicy::ReplaceFarthest), &mut metrics);
    let one_pixel = metrics.live_bytes();
    let caps = DeviceCaps::host();
    {
        let mut alloc = ResourceAllocator::new(&caps, &mut metrics);
        kb.resolution_changed(Resolution::new(8, 8).unwrap(), &mut alloc)
            .unwrap();
        kb.resolution_changed(Resolution::new(1, 1).unwrap(), &mut alloc)
            .unwrap();
    }
    assert_eq!(metrics.live_bytes(), one_pixel);
    {
        let mut alloc = ResourceAllocator::new(&caps, &mut metrics);
        kb.release_resources(&mut alloc);
    }
    assert_eq!(metrics.live_bytes(), 0);
    assert!(kb.gather_program().is_err());
}
