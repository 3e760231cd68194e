use super::*;

#[test]
fn allocation_and_release_balance() {
    let mut m = MemoryMetrics::new();
    m.record_allocation("a", 100);
    m.record_allocation("b", 50);
    m.record_allocation("a", 10);
    assert_eq!(m.live_bytes(), 160);
    assert_eq!(m.live_buffers(), 3);
    assert_eq!(m.bytes_for("a"), 110);

    m.record_release("a", 100);
    m.record_release("a", 10);
    assert_eq!(m.bytes_for("a"), 0);
    assert_eq!(m.live_labels().collect::<Vec<_>>(), vec!["b"]);

    m.record_release("b", 50);
    let s = m.snapshot();
    assert_eq!(s.live_bytes, 0);
    assert_eq!(s.live_buffers, 0);
    assert_eq!(s.peak_bytes, 160);
    assert_eq!(s.allocations, 3);
    assert_eq!(s.releases, 3);
}

#[test]
fn budget_tracks_live_bytes() {
    let mut m = MemoryMetrics::with_budget(64);
    m.record_allocation("x", 64);
    assert!(m.within_budget());
    m.record_allocation("y", 1);
    assert!(!m.within_budget());
    m.record_release("y", 1);
    assert!(m.within_budget());
}

#[test]
fn release_never_underflows() {
    let mut m = MemoryMetrics::new();
    m.record_release("ghost", 10);
    assert_eq!(m.live_bytes(), 0);
    assert_eq!(m.live_buffers(), 0);
}
