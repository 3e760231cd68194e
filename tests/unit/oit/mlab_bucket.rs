use super::*;
use crate::foundation::core::Rgba;
use crate::foundation::metrics::MemoryMetrics;
use crate::gpu::caps::DeviceCaps;
use crate::oit::composite::reference_composite;

fn range() -> DepthRange {
    DepthRange::new(1.0, 101.0).unwrap()
}

fn bucketed(buckets: u32, nodes: u32, metrics: &mut MemoryMetrics) -> MlabBucket {
    let settings = OitSettings {
        method: OitMethod::MlabBucket,
        num_buckets: buckets,
        nodes_per_bucket: nodes,
        depth_range: range(),
        stencil_mask: false,
        ..OitSettings::default()
    };
    let mut backend = MlabBucket::new();
    backend.create(&settings).unwrap();
    let caps = DeviceCaps::host();
    let mut alloc = ResourceAllocator::new(&caps, metrics);
    backend
        .resolution_changed(Resolution::new(1, 1).unwrap(), &mut alloc)
        .unwrap();
    backend
}

fn frag(depth: f32) -> Fragment {
    Fragment::new(0, 0, depth, Rgba::new(0.2, depth / 100.0, 0.6, 0.5))
}

#[test]
fn bucket_index_covers_range() {
    let r = range();
    assert_eq!(bucket_index(&r, 0.0, 4), 0);
    assert_eq!(bucket_index(&r, 1.0, 4), 0);
    assert_eq!(bucket_index(&r, 26.0, 4), 1);
    assert_eq!(bucket_index(&r, 100.9, 4), 3);
    assert_eq!(bucket_index(&r, 101.0, 4), 3);
    assert_eq!(bucket_index(&r, 1e9, 4), 3);
}

#[test]
fn merges_stay_inside_bucket() {
    let mut metrics = MemoryMetrics::new();
    let mut backend = bucketed(2, 1, &mut metrics);
    {
        let program = backend.gather_program().unwrap();
        for d in [48.0, 52.0, 2.0] {
            program.invoke(&frag(d));
        }
    }
    let storage = backend.storage().unwrap();
    let near = storage.store.read(0, 0);
    let far = storage.store.read(0, 1);
    assert_eq!(near.len(), 1);
    assert_eq!(near[0].depth, 2.0);
    assert!((near[0].transmittance - 0.25).abs() < 1e-6);
    assert_eq!(far.len(), 1);
    assert_eq!(far[0].depth, 52.0);

    let stats = backend.take_stats();
    assert_eq!(stats.fragments_stored, 2);
    assert_eq!(stats.fragments_merged, 1);
}

#[test]
fn resolve_walks_buckets_front_to_back() {
    let mut metrics = MemoryMetrics::new();
    let mut backend = bucketed(4, 2, &mut metrics);
    let depths = [90.0, 10.0, 60.0, 30.0];
    {
        let program = backend.gather_program().unwrap();
        for d in depths {
            program.invoke(&frag(d));
        }
    }
    let mut target = FrameTarget::new(Resolution::new(1, 1).unwrap());
    let mut state = RenderState::default();
    let mut scene = |_: &mut crate::raster::pass::GatherPass<'_>| Ok::<(), OitError>(());
    backend
        .render_to_screen(&mut scene, &mut target, &mut state)
        .unwrap();

    let mut records: Vec<_> = depths
        .iter()
        .map(|&d| FragmentRecord::from_fragment(&frag(d)))
        .collect();
    assert!(target.pixel(0, 0).max_abs_diff(reference_composite(&mut records)) < 1e-6);
    assert!(backend.storage().unwrap().store.read(0, 0).is_empty());
}
