mod common;

use std::time::Duration;

use ringbuf::traits::Consumer;
use uvcap_rs::{
    encoders::{
        muxer::ChannelMuxer,
        video::{
            encoded_queue_size, DrainStatus, EncoderContext, EncoderWorker, VideoEncoder,
        },
    },
    types::{
        config::{PtsMode, VideoCodec},
        error::UvcapError,
        video_frame::{EncodedVideoFrame, FrameRate, PixelFormat},
    },
    SchedulerMode,
};

use common::{CollectingMuxer, FixedDelayCodec};

const MS: u64 = 1_000_000;

fn yu12_context(width: u32, height: u32) -> EncoderContext {
    EncoderContext::new(PixelFormat::Yu12, width, height, FrameRate::new(30, 1))
}

fn drain_all(encoder: &mut VideoEncoder) -> Vec<EncodedVideoFrame> {
    let mut recv = encoder.take_encoded_recv().unwrap();
    while encoder.drain_one().unwrap() != DrainStatus::Empty {}
    let mut packets = Vec::new();
    while let Some(packet) = recv.try_pop() {
        packets.push(packet);
    }
    packets
}

#[test]
fn test_raw_passthrough_keeps_frames_and_timing() {
    common::init_test_logging();
    let ctx = EncoderContext::new(PixelFormat::Mjpeg, 16, 8, FrameRate::new(30, 1));
    let mut encoder = VideoEncoder::open(ctx).unwrap();
    assert_eq!(encoder.codec(), VideoCodec::Raw);

    let frame = |i: usize| vec![i as u8; 100 + i * 5];
    for i in 0..10u64 {
        encoder
            .submit_raw_frame(&frame(i as usize), 7_000 * MS + i * 33 * MS, i == 0)
            .unwrap();
    }
    let packets = drain_all(&mut encoder);

    assert_eq!(packets.len(), 10);
    for (i, packet) in packets.iter().enumerate() {
        assert_eq!(packet.data, frame(i));
        assert_eq!(packet.pts, (i as u64 * 33 * MS) as i64);
        assert_eq!(packet.dts, packet.pts);
        assert_eq!(packet.is_keyframe, i == 0);
        let expected_duration = if i == 0 { 0 } else { (33 * MS) as i64 };
        assert_eq!(packet.duration, expected_duration);
    }
}

#[test]
fn test_fixed_fps_pts_ignores_capture_jitter() {
    let ctx = yu12_context(16, 8)
        .with_codec(VideoCodec::Raw)
        .with_pts_mode(PtsMode::FixedFps);
    let mut encoder = VideoEncoder::open(ctx).unwrap();
    let frame = vec![0u8; 16 * 8 * 3 / 2];

    for ts in [0, 40 * MS, 45 * MS, 130 * MS] {
        encoder.submit_raw_frame(&frame, ts, false).unwrap();
    }
    let packets = drain_all(&mut encoder);
    let interval = FrameRate::new(30, 1).frame_interval_ns() as i64;

    let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
    assert_eq!(pts, vec![0, interval, 2 * interval, 3 * interval]);
}

#[test]
fn test_overrun_end_to_end() {
    for (fps, capacity) in [(10, 20usize), (30, 45)] {
        let ctx = EncoderContext::new(PixelFormat::Yuyv, 640, 480, FrameRate::new(fps, 1))
            .with_codec(VideoCodec::Raw);
        let mut encoder = VideoEncoder::open(ctx).unwrap();
        assert_eq!(encoder.ring().capacity(), capacity);

        let frame = vec![0x80u8; 640 * 480 * 2];
        let mut rejected = 0;
        for i in 0..30u64 {
            match encoder.submit_raw_frame(&frame, i * 33 * MS, false) {
                Ok(()) => {}
                Err(UvcapError::RingBufferOverrun { .. }) => rejected += 1,
                Err(e) => panic!("unexpected error {e}"),
            }
        }

        let report = encoder.flush().unwrap();
        let expected = 30.min(capacity);
        assert_eq!(report.drained_frames, expected);
        assert_eq!(report.total_packets, expected as u64);
        assert_eq!(report.ring.dropped, (30 - expected) as u64);
        assert_eq!(rejected, 30 - expected);
    }
}

#[test]
fn test_flush_of_large_ring_delivers_every_packet() {
    let ctx = EncoderContext::new(PixelFormat::Yu12, 16, 8, FrameRate::new(100, 1))
        .with_codec(VideoCodec::Raw);
    let mut encoder = VideoEncoder::open(ctx).unwrap();
    assert_eq!(encoder.ring().capacity(), 150);
    let mut recv = encoder.take_encoded_recv().unwrap();

    let frame = vec![5u8; 16 * 8 * 3 / 2];
    for i in 0..150u64 {
        encoder.submit_raw_frame(&frame, i * 10 * MS, false).unwrap();
    }
    let report = encoder.flush().unwrap();
    assert_eq!(report.drained_frames, 150);

    let mut delivered = Vec::new();
    while let Some(packet) = recv.try_pop() {
        delivered.push(packet.pts);
    }
    assert_eq!(delivered.len(), 150);
    assert_eq!(report.total_packets, delivered.len() as u64);
    assert_eq!(*delivered.last().unwrap(), (149 * 10 * MS) as i64);
}

#[test]
fn test_flush_of_full_ring_and_delayed_codec_fits_queue() {
    let ctx = EncoderContext::new(PixelFormat::Yu12, 16, 8, FrameRate::new(60, 1));
    let mut encoder =
        VideoEncoder::open_with_codec(ctx, Box::new(FixedDelayCodec::new(60))).unwrap();
    let capacity = encoder.ring().capacity();
    assert_eq!(capacity, 90);
    assert!(encoded_queue_size(capacity) > capacity + 60);
    let mut recv = encoder.take_encoded_recv().unwrap();

    let frame = vec![1u8; 16 * 8 * 3 / 2];
    for i in 0..capacity as u64 {
        encoder.submit_raw_frame(&frame, i * MS, false).unwrap();
    }
    let report = encoder.flush().unwrap();
    assert_eq!(report.flushed_packets, 60);

    let mut delivered = 0u64;
    while recv.try_pop().is_some() {
        delivered += 1;
    }
    assert_eq!(delivered, capacity as u64);
    assert_eq!(report.total_packets, delivered);
}

#[test]
fn test_worker_at_high_frame_rate_loses_nothing_on_stop() {
    let ctx = EncoderContext::new(PixelFormat::Yu12, 16, 8, FrameRate::new(120, 1))
        .with_codec(VideoCodec::Raw);
    let mut encoder = VideoEncoder::open(ctx).unwrap();
    let capacity = encoder.ring().capacity();
    assert_eq!(capacity, 180);
    let mut producer = encoder.take_producer().unwrap();

    let frame = vec![2u8; 16 * 8 * 3 / 2];
    for i in 0..capacity as u64 {
        producer.push_frame(&frame, i * 8 * MS, false).unwrap();
    }
    let muxer = CollectingMuxer::new();
    let log = muxer.log.clone();
    let worker = EncoderWorker::spawn(encoder, Box::new(muxer)).unwrap();
    let report = worker.stop().unwrap();

    let log = log.lock().unwrap();
    assert!(log.finished);
    assert_eq!(log.packets.len(), capacity);
    assert_eq!(report.total_packets, capacity as u64);
}

#[test]
fn test_delayed_codec_keeps_order_and_flushes() {
    let ctx = yu12_context(16, 8);
    let mut encoder =
        VideoEncoder::open_with_codec(ctx, Box::new(FixedDelayCodec::new(3))).unwrap();
    let mut recv = encoder.take_encoded_recv().unwrap();
    let frame = vec![1u8; 16 * 8 * 3 / 2];

    let mut statuses = Vec::new();
    for i in 0..10u64 {
        encoder.submit_raw_frame(&frame, i * 10 * MS, false).unwrap();
        statuses.push(encoder.drain_one().unwrap());
    }
    assert_eq!(&statuses[..3], &[DrainStatus::Delayed; 3]);
    assert!(statuses[3..].iter().all(|s| *s == DrainStatus::Encoded(1)));
    assert_eq!(encoder.delayed_frames(), Some(3));
    assert_eq!(encoder.pending_frames(), 3);

    let report = encoder.flush().unwrap();
    assert_eq!(report.flushed_packets, 3);
    assert_eq!(report.total_packets, 10);
    assert_eq!(encoder.pending_frames(), 0);

    let mut pts = Vec::new();
    while let Some(packet) = recv.try_pop() {
        pts.push(packet.pts);
    }
    let expected: Vec<i64> = (0..10).map(|i| (i * 10 * MS) as i64).collect();
    assert_eq!(pts, expected);
}

#[test]
fn test_flush_gives_up_on_stuck_codec() {
    let ctx = yu12_context(16, 8);
    let mut encoder =
        VideoEncoder::open_with_codec(ctx, Box::new(FixedDelayCodec::stuck(2))).unwrap();
    let frame = vec![1u8; 16 * 8 * 3 / 2];

    for i in 0..5u64 {
        encoder.submit_raw_frame(&frame, i * MS, false).unwrap();
    }
    let err = encoder.flush().unwrap_err();
    assert!(matches!(err, UvcapError::FlushTimeout { flushed: 3, .. }));

    encoder.close();
    encoder.close();
}

#[test]
fn test_close_flushes_once() {
    let ctx = yu12_context(16, 8);
    let mut encoder =
        VideoEncoder::open_with_codec(ctx, Box::new(FixedDelayCodec::new(2))).unwrap();
    let mut recv = encoder.take_encoded_recv().unwrap();
    let frame = vec![1u8; 16 * 8 * 3 / 2];

    for i in 0..4u64 {
        encoder.submit_raw_frame(&frame, i * MS, false).unwrap();
    }
    encoder.close();
    encoder.close();
    assert_eq!(encoder.drain_one().unwrap(), DrainStatus::Empty);

    let mut count = 0;
    while recv.try_pop().is_some() {
        count += 1;
    }
    assert_eq!(count, 4);
}

#[test]
fn test_scheduler_throttles_producer() {
    let ctx = yu12_context(16, 8)
        .with_codec(VideoCodec::Raw)
        .with_scheduler_mode(SchedulerMode::Linear)
        .with_scheduler_threshold(0.5)
        .with_max_delay_ms(1000);
    let mut encoder = VideoEncoder::open(ctx).unwrap();
    let capacity = encoder.ring().capacity();
    let mut producer = encoder.take_producer().unwrap();
    let frame = vec![0u8; 16 * 8 * 3 / 2];

    assert_eq!(producer.delay(), Duration::ZERO);
    for i in 0..capacity as u64 {
        producer.push_frame(&frame, i * MS, false).unwrap();
    }
    assert_eq!(producer.delay(), Duration::from_millis(1000));
    assert_eq!(encoder.scheduler_delay(), Duration::from_millis(1000));

    assert!(encoder.submit_raw_frame(&frame, 0, false).is_err());
}

#[test]
fn test_unsupported_codec_input_is_rejected() {
    let ctx = EncoderContext::new(PixelFormat::Nv12, 16, 8, FrameRate::new(30, 1));
    assert!(matches!(
        VideoEncoder::open_with_codec(ctx, Box::new(FixedDelayCodec::new(0))),
        Err(UvcapError::Validation(_))
    ));
}

#[test]
fn test_compressed_input_defaults_to_raw() {
    let ctx = EncoderContext::new(PixelFormat::Mjpeg, 640, 480, FrameRate::new(30, 1));
    assert_eq!(ctx.codec, VideoCodec::Raw);
    let ctx = EncoderContext::new(PixelFormat::Yuyv, 640, 480, FrameRate::new(30, 1));
    assert_eq!(ctx.codec, VideoCodec::Mpeg4);
}

#[test]
fn test_mpeg4_encodes_frames() {
    common::init_test_logging();
    let (w, h) = (64usize, 48usize);
    let ctx = yu12_context(w as u32, h as u32).with_codec(VideoCodec::Mpeg4);
    let mut encoder = VideoEncoder::open(ctx).unwrap();
    assert_eq!(encoder.codec(), VideoCodec::Mpeg4);
    let mut recv = encoder.take_encoded_recv().unwrap();

    for i in 0..8u64 {
        let mut frame = vec![0x80u8; w * h * 3 / 2];
        frame[..w * h].fill((i * 20) as u8);
        encoder
            .submit_raw_frame(&frame, i * common::FRAME_INTERVAL_NS, false)
            .unwrap();
        encoder.drain_one().unwrap();
    }
    let report = encoder.flush().unwrap();
    assert_eq!(report.total_packets, 8);

    let mut packets = Vec::new();
    while let Some(packet) = recv.try_pop() {
        packets.push(packet);
    }
    assert_eq!(packets.len(), 8);
    assert!(packets[0].is_keyframe);
    assert!(packets.iter().all(|p| !p.data.is_empty()));
    assert!(packets.windows(2).all(|w| w[1].pts > w[0].pts));
}

#[test]
fn test_worker_feeds_muxer_until_stopped() {
    let ctx = yu12_context(16, 8);
    let mut encoder =
        VideoEncoder::open_with_codec(ctx, Box::new(FixedDelayCodec::new(2))).unwrap();
    let mut producer = encoder.take_producer().unwrap();
    let muxer = CollectingMuxer::new();
    let log = muxer.log.clone();
    let worker = EncoderWorker::spawn(encoder, Box::new(muxer)).unwrap();

    let frame = vec![3u8; 16 * 8 * 3 / 2];
    for i in 0..12u64 {
        while producer.push_frame(&frame, i * 33 * MS, false).is_err() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    assert!(common::wait_until(Duration::from_secs(5), || {
        log.lock().unwrap().packets.len() >= 10
    }));

    let report = worker.stop().unwrap();
    assert_eq!(report.total_packets, 12);

    let log = log.lock().unwrap();
    assert!(log.finished);
    assert_eq!(log.packets.len(), 12);
    assert_eq!(log.packets.last().unwrap().pts, (11 * 33 * MS) as i64);
}

#[test]
fn test_channel_muxer_delivers_packets() {
    let ctx = yu12_context(16, 8).with_codec(VideoCodec::Raw);
    let mut encoder = VideoEncoder::open(ctx).unwrap();
    let mut producer = encoder.take_producer().unwrap();
    let (muxer, receiver) = ChannelMuxer::new(32);
    let worker = EncoderWorker::spawn(encoder, Box::new(muxer)).unwrap();

    let frame = vec![9u8; 16 * 8 * 3 / 2];
    for i in 0..5u64 {
        producer.push_frame(&frame, i * 33 * MS, false).unwrap();
    }
    let first = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first.pts, 0);
    assert_eq!(first.data, frame);

    worker.stop().unwrap();
    assert_eq!(receiver.try_iter().count(), 4);
}
