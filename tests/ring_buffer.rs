mod common;

use std::sync::Arc;

use uvcap_rs::{
    encoders::ring_buffer::{ring_capacity, SlotFlag, VideoRingBuffer, MIN_RING_SIZE},
    types::{error::UvcapError, video_frame::FrameRate},
};

#[test]
fn test_overrun_rejects_push_and_keeps_slots() {
    common::init_test_logging();
    for fps in [1, 10, 13, 30, 60] {
        let capacity = ring_capacity(FrameRate::new(fps, 1));
        assert!(capacity >= MIN_RING_SIZE);
        let ring = VideoRingBuffer::new(capacity, 8).unwrap();

        for i in 0..capacity {
            ring.push_frame(&[i as u8; 8], i as u64 * 10, i == 0).unwrap();
        }
        assert_eq!(ring.len(), capacity);

        let err = ring.push_frame(&[0xFF; 8], 9_999, false).unwrap_err();
        assert!(matches!(err, UvcapError::RingBufferOverrun { dropped: 1 }));
        assert_eq!(ring.stats().dropped, 1);

        for i in 0..capacity {
            let frame = ring.pop_frame().unwrap();
            assert_eq!(frame.data, vec![i as u8; 8]);
            assert_eq!(frame.timestamp_ns, i as u64 * 10);
            assert_eq!(frame.is_keyframe, i == 0);
        }
        assert!(ring.pop_frame().is_none());
    }
}

#[test]
fn test_timestamps_are_relative_to_first_push() {
    let ring = VideoRingBuffer::new(MIN_RING_SIZE, 4).unwrap();
    ring.push_frame(&[1], 5_000_000_000, true).unwrap();
    ring.push_frame(&[2], 5_033_000_000, false).unwrap();

    assert_eq!(ring.pop_frame().unwrap().timestamp_ns, 0);
    assert_eq!(ring.pop_frame().unwrap().timestamp_ns, 33_000_000);
}

#[test]
fn test_slot_flags_follow_push_and_pop() {
    let ring = VideoRingBuffer::new(MIN_RING_SIZE, 4).unwrap();
    assert_eq!(ring.slot_flag(0), SlotFlag::Free);

    ring.push_frame(&[1, 2], 0, false).unwrap();
    assert_eq!(ring.slot_flag(0), SlotFlag::Used);
    assert_eq!(ring.slot_flag(1), SlotFlag::Free);

    let frame = ring.pop_frame().unwrap();
    assert_eq!(frame.data, vec![1, 2]);
    assert_eq!(ring.slot_flag(0), SlotFlag::Free);
    assert!(ring.is_empty());
}

#[test]
fn test_oversized_frames_are_clipped() {
    let ring = VideoRingBuffer::new(MIN_RING_SIZE, 4).unwrap();
    ring.push_frame(&[1, 2, 3, 4, 5, 6], 0, false).unwrap();

    assert_eq!(ring.pop_frame().unwrap().data, vec![1, 2, 3, 4]);
    assert_eq!(ring.stats().clipped, 1);
}

#[test]
fn test_wraps_around_many_times() {
    let ring = VideoRingBuffer::new(MIN_RING_SIZE, 2).unwrap();
    for i in 0..(MIN_RING_SIZE as u64 * 5) {
        ring.push_frame(&[i as u8, 0], i, false).unwrap();
        let frame = ring.pop_frame().unwrap();
        assert_eq!(frame.data[0], i as u8);
    }
    let stats = ring.stats();
    assert_eq!(stats.pushed, stats.popped);
    assert_eq!(stats.dropped, 0);
}

#[test]
fn test_concurrent_producer_and_consumer_keep_order() {
    let ring = Arc::new(VideoRingBuffer::new(MIN_RING_SIZE, 8).unwrap());
    let total = 2_000u64;

    let producer_ring = Arc::clone(&ring);
    let producer = std::thread::spawn(move || {
        let mut pushed = 0u64;
        while pushed < total {
            if producer_ring
                .push_frame(&pushed.to_le_bytes(), pushed, false)
                .is_ok()
            {
                pushed += 1;
            } else {
                std::thread::yield_now();
            }
        }
    });

    let mut expected = 0u64;
    while expected < total {
        match ring.pop_frame() {
            Some(frame) => {
                let value = u64::from_le_bytes(frame.data[..8].try_into().unwrap());
                assert_eq!(value, expected);
                expected += 1;
            }
            None => std::thread::yield_now(),
        }
    }
    producer.join().unwrap();
    assert!(ring.is_empty());
}

#[test]
fn test_zero_sized_ring_is_rejected() {
    assert!(matches!(
        VideoRingBuffer::new(0, 16),
        Err(UvcapError::Validation(_))
    ));
}
