use super::*;

fn buffer(words: usize) -> StorageBuffer {
    StorageBuffer::new("test", words, 0)
}

#[test]
fn total_order_breaks_depth_ties_by_color() {
    let a = FragmentRecord::new(1.0, Rgba::new(0.2, 0.0, 0.0, 1.0));
    let b = FragmentRecord::new(1.0, Rgba::new(0.3, 0.0, 0.0, 1.0));
    let c = FragmentRecord::new(0.5, Rgba::new(0.9, 0.0, 0.0, 1.0));
    assert_eq!(a.total_cmp(&b), Ordering::Less);
    assert_eq!(c.total_cmp(&a), Ordering::Less);
    assert_eq!(a.total_cmp(&a), Ordering::Equal);
}

#[test]
fn full_precision_layout_is_exact() {
    let layout = RecordLayout::new(StorageBitDepth::Bits32);
    let buf = buffer(layout.words() * 2);
    let rec = FragmentRecord::new(3.25, Rgba::new(0.1, 0.2, 0.3, 0.4));
    layout.write(&buf, layout.words(), &rec);
    assert_eq!(layout.read(&buf, layout.words()), rec);
    assert_eq!(layout.depth(&buf, layout.words()), 3.25);
    assert_eq!(layout.quantize(rec), rec);
}

#[test]
fn half_precision_layout_matches_quantize() {
    let layout = RecordLayout::new(StorageBitDepth::Bits16);
    assert_eq!(layout.words(), 3);
    let buf = buffer(layout.words());
    let rec = FragmentRecord::new(7.5, Rgba::new(0.1, 0.2, 0.3, 0.4));
    layout.write(&buf, 0, &rec);
    let back = layout.read(&buf, 0);
    assert_eq!(back, layout.quantize(rec));
    assert_eq!(back.depth, 7.5);
    assert!((back.color.g - 0.2).abs() < 1e-4);
}
