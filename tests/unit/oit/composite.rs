use super::*;
use crate::foundation::core::Rgba;

fn three_layers() -> Vec<FragmentRecord> {
    vec![
        FragmentRecord::new(1.0, Rgba::new(1.0, 0.0, 0.0, 0.5)),
        FragmentRecord::new(2.0, Rgba::new(0.0, 1.0, 0.0, 0.5)),
        FragmentRecord::new(3.0, Rgba::new(0.0, 0.0, 1.0, 0.5)),
    ]
}

#[test]
fn back_to_front_matches_hand_computed_over() {
    let out = composite_back_to_front(&three_layers());
    assert!(out.max_abs_diff(PremulRgba::new(0.5, 0.25, 0.125, 0.875)) < 1e-6);
}

#[test]
fn reference_composite_sorts_first() {
    let mut v = three_layers();
    v.reverse();
    let out = reference_composite(&mut v);
    assert!(out.max_abs_diff(PremulRgba::new(0.5, 0.25, 0.125, 0.875)) < 1e-6);
}

#[test]
fn front_to_back_layers_equal_back_to_front_records() {
    let records = three_layers();
    let layers: Vec<Layer> = records.iter().map(Layer::from_record).collect();
    let a = composite_front_to_back(&layers);
    let b = composite_back_to_front(&records);
    assert!(a.max_abs_diff(b) < 1e-6);
}

#[test]
fn merged_layer_composites_like_its_parts() {
    let records = three_layers();
    let layers: Vec<Layer> = records.iter().map(Layer::from_record).collect();
    let merged = layers[0].merge(layers[1]);
    assert_eq!(merged.depth, 1.0);
    let a = composite_front_to_back(&[merged, layers[2]]);
    let b = composite_front_to_back(&layers);
    assert!(a.max_abs_diff(b) < 1e-6);
}
