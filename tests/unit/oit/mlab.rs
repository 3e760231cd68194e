use super::*;
use crate::foundation::core::Rgba;
use crate::oit::composite::composite_back_to_front;

fn layer(depth: f32, r: f32) -> Layer {
    Layer::from_record(&FragmentRecord::new(depth, Rgba::new(r, 0.0, 1.0 - r, 0.5)))
}

#[test]
fn insertion_keeps_depth_order() {
    let mut v = LayerVec::new();
    for d in [3.0, 1.0, 2.0] {
        assert!(!insert_layer(&mut v, layer(d, 0.5), 4));
    }
    let depths: Vec<f32> = v.iter().map(|l| l.depth).collect();
    assert_eq!(depths, vec![1.0, 2.0, 3.0]);
}

#[test]
fn overflow_merges_closest_pair() {
    let mut v = LayerVec::new();
    for d in [1.0, 5.0, 5.5] {
        insert_layer(&mut v, layer(d, 0.5), 3);
    }
    assert!(insert_layer(&mut v, layer(9.0, 0.5), 3));
    let depths: Vec<f32> = v.iter().map(|l| l.depth).collect();
    assert_eq!(depths, vec![1.0, 5.0, 9.0]);
    // 0.5 * 0.5 transmittance after merging two half-transparent layers
    assert!((v[1].transmittance - 0.25).abs() < 1e-6);
}

#[test]
fn merging_preserves_total_coverage() {
    let records: Vec<FragmentRecord> = [1.0, 2.0, 3.0, 4.0]
        .iter()
        .map(|&d| FragmentRecord::new(d, Rgba::new(d / 4.0, 0.0, 0.0, 0.4)))
        .collect();
    let mut v = LayerVec::new();
    for r in records.iter().rev() {
        insert_layer(&mut v, Layer::from_record(r), 2);
    }
    assert_eq!(v.len(), 2);
    let approx = composite_front_to_back(&v);
    let exact = composite_back_to_front(&records);
    assert!((approx.a - exact.a).abs() < 1e-6);
}
