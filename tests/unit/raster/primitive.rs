use super::*;

fn fragments(rect: Rect, w: u32, h: u32) -> Vec<Fragment> {
    let quad = TransparentQuad::new(rect, 1.0, Rgba::new(1.0, 0.0, 0.0, 0.5));
    let mut out = Vec::new();
    quad.rasterize(Resolution::new(w, h).unwrap(), &mut out);
    out
}

#[test]
fn integer_rect_covers_exact_pixels() {
    let frags = fragments(Rect::new(1.0, 1.0, 3.0, 2.0), 4, 4);
    let coords: Vec<_> = frags.iter().map(|f| (f.x, f.y)).collect();
    assert_eq!(coords, vec![(1, 1), (2, 1)]);
}

#[test]
fn pixel_center_rule_is_half_open() {
    // center 0.5 inside [0.5, 1.5) but center 1.5 is not
    let frags = fragments(Rect::new(0.5, 0.0, 1.5, 1.0), 4, 1);
    assert_eq!(frags.len(), 1);
    assert_eq!(frags[0].x, 0);
    assert!(fragments(Rect::new(0.6, 0.0, 1.4, 1.0), 4, 1).is_empty());
}

#[test]
fn rasterization_is_clipped_to_target() {
    let frags = fragments(Rect::new(-10.0, -10.0, 100.0, 100.0), 3, 2);
    assert_eq!(frags.len(), 6);
    assert!(frags.iter().all(|f| f.x < 3 && f.y < 2));
}

#[test]
fn reversed_rect_is_normalized() {
    assert_eq!(fragments(Rect::new(3.0, 2.0, 1.0, 1.0), 4, 4).len(), 2);
}

#[test]
fn covers_matches_rasterize() {
    let quad = TransparentQuad::new(
        Rect::new(0.7, 1.2, 3.3, 2.9),
        1.0,
        Rgba::new(0.0, 1.0, 0.0, 1.0),
    );
    let mut out = Vec::new();
    quad.rasterize(Resolution::new(5, 5).unwrap(), &mut out);
    for y in 0..5 {
        for x in 0..5 {
            let hit = out.iter().any(|f| f.x == x && f.y == y);
            assert_eq!(hit, quad.covers(x, y), "({x},{y})");
        }
    }
}
