use super::*;
use std::collections::HashSet;

fn assert_bijective(mode: TileAddressing, width: u32, height: u32) {
    let addressing = PixelAddressing::new(mode, Resolution::new(width, height).unwrap());
    let mut seen = HashSet::new();
    for y in 0..height {
        for x in 0..width {
            let a = addressing.address(x, y);
            assert!(a < addressing.slot_count(), "{mode:?} ({x},{y}) -> {a}");
            assert!(seen.insert(a), "{mode:?} duplicate address {a}");
            assert_eq!(addressing.coords(a), (x, y));
        }
    }
}

#[test]
fn every_mode_maps_pixels_to_distinct_slots() {
    for mode in [
        TileAddressing::Linear,
        TileAddressing::Tiled {
            tile_width: 4,
            tile_height: 2,
        },
        TileAddressing::Morton8x8,
    ] {
        assert_bijective(mode, 13, 7);
        assert_bijective(mode, 16, 16);
    }
}

#[test]
fn tiled_modes_pad_to_whole_tiles() {
    let res = Resolution::new(13, 7).unwrap();
    assert_eq!(
        PixelAddressing::new(TileAddressing::Linear, res).padded_size(),
        (13, 7)
    );
    assert_eq!(
        PixelAddressing::new(TileAddressing::Morton8x8, res).padded_size(),
        (16, 8)
    );
    let tiled = PixelAddressing::new(
        TileAddressing::Tiled {
            tile_width: 4,
            tile_height: 4,
        },
        res,
    );
    assert_eq!(tiled.padded_size(), (16, 8));
    assert_eq!(tiled.slot_count(), 128);
}

#[test]
fn morton_orders_first_quad_in_z() {
    let a = PixelAddressing::new(TileAddressing::Morton8x8, Resolution::new(8, 8).unwrap());
    assert_eq!(a.address(0, 0), 0);
    assert_eq!(a.address(1, 0), 1);
    assert_eq!(a.address(0, 1), 2);
    assert_eq!(a.address(1, 1), 3);
    assert_eq!(a.address(2, 0), 4);
}

#[test]
fn validate_rejects_non_power_of_two_tiles() {
    assert!(
        TileAddressing::Tiled {
            tile_width: 3,
            tile_height: 4
        }
        .validate()
        .is_err()
    );
    assert!(
        TileAddressing::Tiled {
            tile_width: 128,
            tile_height: 4
        }
        .validate()
        .is_err()
    );
    assert!(TileAddressing::Morton8x8.validate().is_ok());
}
