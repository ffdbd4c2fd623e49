use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MAX_INTERVALS: usize = 90;

/// Ticks elapsed since the previous call. A monitor captures once per call
/// with `frames_advanced > 0`, no matter how many frames were skipped.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tick {
    pub frames_advanced: u32,
}

impl Tick {
    pub fn is_due(&self) -> bool {
        self.frames_advanced > 0
    }
}

/// Fixed-rate frame pacing for the monitor window.
#[derive(Debug)]
pub struct FrameClock {
    fps: f32,
    frame_count: u64,
    last_tick: Instant,
    accumulator: Duration,
    intervals: VecDeque<Duration>,
}

impl FrameClock {
    pub fn new(fps: f32, now: Instant) -> Self {
        Self {
            fps: fps.max(1.0),
            frame_count: 0,
            last_tick: now,
            accumulator: Duration::ZERO,
            intervals: VecDeque::with_capacity(MAX_INTERVALS),
        }
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn set_fps(&mut self, fps: f32) {
        self.fps = fps.max(1.0);
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.fps)
    }

    pub fn next_deadline(&self) -> Instant {
        let remaining = self
            .frame_duration()
            .checked_sub(self.accumulator)
            .unwrap_or_default();
        self.last_tick + remaining
    }

    pub fn measured_fps(&self) -> f32 {
        if self.intervals.is_empty() {
            return 0.0;
        }

        let total: Duration = self.intervals.iter().sum();
        let average = total / self.intervals.len() as u32;

        if average.is_zero() {
            0.0
        } else {
            1.0 / average.as_secs_f32()
        }
    }

    pub fn tick(&mut self, now: Instant) -> Tick {
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.accumulator += elapsed;

        let frame_duration = self.frame_duration();
        let mut frames_advanced = 0;

        while self.accumulator >= frame_duration {
            self.accumulator -= frame_duration;
            frames_advanced += 1;
        }

        if frames_advanced > 0 {
            self.frame_count += u64::from(frames_advanced);
            self.intervals.push_back(elapsed);
            if self.intervals.len() > MAX_INTERVALS {
                self.intervals.pop_front();
            }
        }

        Tick { frames_advanced }
    }
}
