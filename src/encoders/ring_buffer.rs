use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::types::{
    config::SchedulerMode,
    error::{Result, UvcapError},
    video_frame::{FrameRate, PixelFormat},
};

/// Smallest ring ever allocated, in frames.
pub const MIN_RING_SIZE: usize = 20;
/// Upper bound on any scheduler delay, whatever the configured maximum.
pub const SCHEDULER_CEILING_MS: u64 = 1000;

/// About one and a half seconds worth of frames, never fewer than [`MIN_RING_SIZE`].
pub fn ring_capacity(frame_rate: FrameRate) -> usize {
    (frame_rate.whole_fps() as usize * 3 / 2).max(MIN_RING_SIZE)
}

/// Largest payload one slot has to hold for frames of `input_format`.
pub fn slot_payload_size(input_format: PixelFormat, width: u32, height: u32) -> usize {
    let pixels = width as usize * height as usize;
    match input_format {
        PixelFormat::Yu12 => pixels * 3 / 2,
        PixelFormat::Yuyv | PixelFormat::Uyvy | PixelFormat::Yvyu | PixelFormat::Yyuv => {
            pixels * 2
        }
        _ => pixels * 3,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub mode: SchedulerMode,
    /// Fill ratio above which the producer is throttled, clamped to `[0.2, 0.9]`
    pub threshold: f64,
    pub max_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::Linear,
            threshold: 0.5,
            max_delay_ms: SCHEDULER_CEILING_MS,
        }
    }
}

/// Producer throttle for a ring holding `diff` of `capacity` frames.
///
/// Zero up to `round(capacity * threshold)` frames, then rising linearly or
/// exponentially to `max_delay_ms` when the ring is full.
pub fn compute_delay(
    mode: SchedulerMode,
    diff: usize,
    capacity: usize,
    threshold: f64,
    max_delay_ms: u64,
) -> Duration {
    let threshold = threshold.clamp(0.2, 0.9);
    let th = (capacity as f64 * threshold).round() as usize;
    if diff <= th || capacity <= th || max_delay_ms == 0 {
        return Duration::ZERO;
    }

    let over = (diff.min(capacity) - th) as f64;
    let span = (capacity - th) as f64;
    let max = max_delay_ms as f64;
    let ms = match mode {
        SchedulerMode::Linear => over * max / span,
        SchedulerMode::Exponential if span <= 1.0 => max,
        SchedulerMode::Exponential => over.powf(max.log10() / span.log10()),
    };

    let ms = ms.clamp(0.0, SCHEDULER_CEILING_MS as f64);
    Duration::from_micros((ms * 1000.0) as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFlag {
    Free,
    Used,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub pushed: u64,
    pub popped: u64,
    /// Frames rejected because the ring was full
    pub dropped: u64,
    /// Frames truncated to the slot size
    pub clipped: u64,
}

/// A frame taken out of the ring.
#[derive(Debug, Clone)]
pub struct RingFrame {
    pub data: Vec<u8>,
    /// Nanoseconds since the first frame pushed into the ring
    pub timestamp_ns: u64,
    pub is_keyframe: bool,
}

#[derive(Debug, Default)]
struct SlotData {
    data: Vec<u8>,
    size: usize,
    timestamp_ns: u64,
    is_keyframe: bool,
}

struct RingIndex {
    write: usize,
    read: usize,
    flags: Vec<SlotFlag>,
    used: usize,
    reference_ts: Option<u64>,
    stats: RingStats,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed size single producer, single consumer queue of raw frames.
///
/// One lock guards the indices and slot flags. Payloads are copied under each
/// slot's own lock, which the producer and consumer never contend for because a
/// slot is only touched by the side that currently owns it.
pub struct VideoRingBuffer {
    index: Mutex<RingIndex>,
    slots: Vec<Mutex<SlotData>>,
    slot_size: usize,
}

impl VideoRingBuffer {
    pub fn new(capacity: usize, slot_size: usize) -> Result<Self> {
        if capacity == 0 || slot_size == 0 {
            return Err(UvcapError::Validation(format!(
                "ring buffer needs a non zero size, got {capacity} slots of {slot_size} bytes"
            )));
        }

        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        for _ in 0..capacity {
            let mut data = Vec::new();
            data.try_reserve_exact(slot_size)?;
            data.resize(slot_size, 0);
            slots.push(Mutex::new(SlotData {
                data,
                ..Default::default()
            }));
        }
        log::debug!("Allocated video ring of {capacity} slots x {slot_size} bytes");

        Ok(Self {
            index: Mutex::new(RingIndex {
                write: 0,
                read: 0,
                flags: vec![SlotFlag::Free; capacity],
                used: 0,
                reference_ts: None,
                stats: RingStats::default(),
            }),
            slots,
            slot_size,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots currently holding a frame.
    pub fn len(&self) -> usize {
        lock(&self.index).used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RingStats {
        lock(&self.index).stats
    }

    pub fn slot_flag(&self, slot: usize) -> SlotFlag {
        lock(&self.index).flags[slot % self.capacity()]
    }

    /// Copies a frame into the slot at the write index.
    ///
    /// Fails with [`UvcapError::RingBufferOverrun`] and leaves the ring untouched
    /// when that slot still holds an unread frame.
    pub fn push_frame(&self, data: &[u8], timestamp_ns: u64, is_keyframe: bool) -> Result<()> {
        let (slot_idx, relative_ts) = {
            let mut index = lock(&self.index);
            let write = index.write;
            if index.flags[write] == SlotFlag::Used {
                index.stats.dropped += 1;
                return Err(UvcapError::RingBufferOverrun {
                    dropped: index.stats.dropped,
                });
            }
            let reference = *index.reference_ts.get_or_insert(timestamp_ns);
            (write, timestamp_ns.saturating_sub(reference))
        };

        let clipped = data.len() > self.slot_size;
        {
            let mut slot = lock(&self.slots[slot_idx]);
            let size = data.len().min(self.slot_size);
            slot.data[..size].copy_from_slice(&data[..size]);
            slot.size = size;
            slot.timestamp_ns = relative_ts;
            slot.is_keyframe = is_keyframe;
        }
        if clipped {
            log::warn!(
                "Frame of {} bytes clipped to the {} byte ring slot",
                data.len(),
                self.slot_size
            );
        }

        let mut index = lock(&self.index);
        index.flags[slot_idx] = SlotFlag::Used;
        index.write = (slot_idx + 1) % self.capacity();
        index.used += 1;
        index.stats.pushed += 1;
        if clipped {
            index.stats.clipped += 1;
        }
        Ok(())
    }

    /// Takes the frame at the read index, `None` when the ring is empty.
    pub fn pop_frame(&self) -> Option<RingFrame> {
        let slot_idx = {
            let index = lock(&self.index);
            if index.flags[index.read] != SlotFlag::Used {
                return None;
            }
            index.read
        };

        let frame = {
            let slot = lock(&self.slots[slot_idx]);
            RingFrame {
                data: slot.data[..slot.size].to_vec(),
                timestamp_ns: slot.timestamp_ns,
                is_keyframe: slot.is_keyframe,
            }
        };

        let mut index = lock(&self.index);
        index.flags[slot_idx] = SlotFlag::Free;
        index.read = (slot_idx + 1) % self.capacity();
        index.used -= 1;
        index.stats.popped += 1;
        Some(frame)
    }

    /// Producer throttle for the current fill level.
    pub fn scheduler_delay(&self, config: &SchedulerConfig) -> Duration {
        compute_delay(
            config.mode,
            self.len(),
            self.capacity(),
            config.threshold,
            config.max_delay_ms,
        )
    }
}

/// The single writing end of a [`VideoRingBuffer`].
pub struct FrameProducer {
    ring: Arc<VideoRingBuffer>,
    scheduler: SchedulerConfig,
}

impl FrameProducer {
    pub(crate) fn new(ring: Arc<VideoRingBuffer>, scheduler: SchedulerConfig) -> Self {
        Self { ring, scheduler }
    }

    pub fn push_frame(&mut self, data: &[u8], timestamp_ns: u64, is_keyframe: bool) -> Result<()> {
        self.ring.push_frame(data, timestamp_ns, is_keyframe)
    }

    /// How long the producer should wait before pushing its next frame.
    pub fn delay(&self) -> Duration {
        self.ring.scheduler_delay(&self.scheduler)
    }

    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }
}
