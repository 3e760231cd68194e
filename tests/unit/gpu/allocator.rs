use super::*;

#[test]
fn oversized_request_is_rejected_before_allocation() {
    let caps = DeviceCaps::host().with_max_storage_buffer_bytes(1024);
    let mut metrics = MemoryMetrics::new();
    let alloc = ResourceAllocator::new(&caps, &mut metrics);
    let err = alloc
        .validate(&[
            BufferRequest::new("small", 16, 0),
            BufferRequest::new("huge", 1024, 0),
        ])
        .unwrap_err();
    assert!(matches!(err, OitError::Allocation { ref label, .. } if label == "huge"));
    assert_eq!(metrics.live_bytes(), 0);
}

#[test]
fn allocate_and_release_are_reported() {
    let caps = DeviceCaps::host();
    let mut metrics = MemoryMetrics::new();
    {
        let mut alloc = ResourceAllocator::new(&caps, &mut metrics);
        let buf = alloc.allocate(BufferRequest::new("heads", 8, u32::MAX));
        assert_eq!(buf.len_words(), 8);
        assert_eq!(buf.load(7), u32::MAX);
        assert_eq!(alloc.metrics().bytes_for("heads"), 32);
        alloc.release(buf);
    }
    assert_eq!(metrics.live_bytes(), 0);
    assert_eq!(metrics.snapshot().allocations, 1);
    assert_eq!(metrics.snapshot().releases, 1);
}

#[test]
fn float_update_is_atomic_under_contention() {
    use rayon::prelude::*;

    let caps = DeviceCaps::host();
    let mut metrics = MemoryMetrics::new();
    let mut alloc = ResourceAllocator::new(&caps, &mut metrics);
    let buf = alloc.allocate(BufferRequest::new("accum", 1, 0f32.to_bits()));
    (0..1000).into_par_iter().for_each(|_| {
        buf.update_f32(0, |v| v + 1.0);
    });
    assert_eq!(buf.load_f32(0), 1000.0);
    alloc.release(buf);
}
