use super::*;

#[test]
fn defaults_are_valid() {
    OitSettings::default().validate().unwrap();
    for method in OitMethod::ALL {
        OitSettings::with_method(method).validate().unwrap();
    }
}

#[test]
fn partial_json_fills_defaults() {
    let s = OitSettings::from_json_str(
        r#"{
            "method": "mlab_bucket",
            "num_buckets": 8,
            "moment_count": 6,
            "tile_addressing": { "mode": "tiled", "tile_width": 8, "tile_height": 4 }
        }"#,
    )
    .unwrap();
    assert_eq!(s.method, OitMethod::MlabBucket);
    assert_eq!(s.num_buckets, 8);
    assert_eq!(s.moment_count, MomentCount::Six);
    assert_eq!(
        s.tile_addressing,
        TileAddressing::Tiled {
            tile_width: 8,
            tile_height: 4
        }
    );
    assert_eq!(s.layer_count, OitSettings::default().layer_count);
}

#[test]
fn json_roundtrip_preserves_settings() {
    let mut s = OitSettings::with_method(OitMethod::Moments);
    s.moment_basis = MomentBasis::Trigonometric;
    s.moment_count = MomentCount::Eight;
    s.bit_depth = StorageBitDepth::Bits16;
    s.tile_addressing = TileAddressing::Morton8x8;
    let json = s.to_json_pretty().unwrap();
    assert!(json.contains("\"moment_count\": 8"));
    assert_eq!(OitSettings::from_json_str(&json).unwrap(), s);
}

#[test]
fn invalid_values_are_config_errors() {
    for json in [
        r#"{ "moment_count": 5 }"#,
        r#"{ "layer_count": 0 }"#,
        r#"{ "depth_range": { "near": 0.0, "far": 10.0 } }"#,
        r#"{ "depth_range": { "near": 5.0, "far": 1.0 } }"#,
        r#"{ "moment_overestimation": 1.5 }"#,
        r#"{ "unknown_option": true }"#,
        r#"{ "method": "a_buffer" }"#,
    ] {
        let err = OitSettings::from_json_str(json).unwrap_err();
        assert!(matches!(err, OitError::Config(_)), "{json}: {err}");
    }
}

#[test]
fn apply_keeps_settings_on_invalid_change() {
    let mut s = OitSettings::default();
    s.apply(SettingChange::LayerCount(16)).unwrap();
    assert_eq!(s.layer_count, 16);
    assert!(s.apply(SettingChange::LayerCount(1000)).is_err());
    assert_eq!(s.layer_count, 16);
}

#[test]
fn layout_changes_require_reallocation() {
    assert!(SettingChange::LayerCount(4).requires_reallocation());
    assert!(SettingChange::BitDepth(StorageBitDepth::Bits16).requires_reallocation());
    assert!(!SettingChange::SortAlgorithm(SortAlgorithm::Heap).requires_reallocation());
    assert!(!SettingChange::OverflowPolicy(OverflowPolicy::RejectNew).requires_reallocation());
}

#[test]
fn depth_range_normalize_clamps() {
    let r = DepthRange::new(1.0, 3.0).unwrap();
    assert_eq!(r.normalize(0.0), 0.0);
    assert_eq!(r.normalize(2.0), 0.5);
    assert_eq!(r.normalize(9.0), 1.0);
}
