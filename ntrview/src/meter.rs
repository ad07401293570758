//! Per-screen frame rate tracking for the status log.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ntrview_core::ScreenId;

/// Keep this many inter-frame gaps per screen.
const SAMPLES: usize = 60;

#[derive(Debug, Default)]
struct ScreenMeter {
    last: Option<Instant>,
    gaps: VecDeque<Duration>,
    frames: u64,
    bytes: u64,
}

impl ScreenMeter {
    fn record(&mut self, at: Instant, len: usize) {
        if let Some(last) = self.last {
            if self.gaps.len() == SAMPLES {
                self.gaps.pop_front();
            }
            self.gaps.push_back(at.saturating_duration_since(last));
        }
        self.last = Some(at);
        self.frames += 1;
        self.bytes += len as u64;
    }

    fn fps(&self) -> f64 {
        if self.gaps.is_empty() {
            return 0.0;
        }
        let avg = self.gaps.iter().map(Duration::as_secs_f64).sum::<f64>() / self.gaps.len() as f64;
        if avg > 0.0 { 1.0 / avg } else { 0.0 }
    }
}

/// Smoothed frames-per-second for both screens.
#[derive(Debug, Default)]
pub struct FrameMeter {
    top: ScreenMeter,
    bottom: ScreenMeter,
}

impl FrameMeter {
    pub fn new() -> Self {
        Self::default()
    }

    fn screen_mut(&mut self, screen: ScreenId) -> &mut ScreenMeter {
        if screen.is_top() { &mut self.top } else { &mut self.bottom }
    }

    fn screen(&self, screen: ScreenId) -> &ScreenMeter {
        if screen.is_top() { &self.top } else { &self.bottom }
    }

    pub fn record(&mut self, screen: ScreenId, len: usize) {
        self.record_at(screen, len, Instant::now());
    }

    pub fn record_at(&mut self, screen: ScreenId, len: usize, at: Instant) {
        self.screen_mut(screen).record(at, len);
    }

    pub fn fps(&self, screen: ScreenId) -> f64 {
        self.screen(screen).fps()
    }

    pub fn frames(&self, screen: ScreenId) -> u64 {
        self.screen(screen).frames
    }

    pub fn bytes(&self, screen: ScreenId) -> u64 {
        self.screen(screen).bytes
    }

    /// One status line, e.g. `top 29.8 fps (120 frames), bottom idle`.
    pub fn summary(&self) -> String {
        [ScreenId::TOP, ScreenId::BOTTOM]
            .into_iter()
            .map(|screen| match self.frames(screen) {
                0 => format!("{screen} idle"),
                n => format!("{screen} {:.1} fps ({n} frames)", self.fps(screen)),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_rate() {
        let mut meter = FrameMeter::new();
        let start = Instant::now();
        for i in 0..11 {
            meter.record_at(ScreenId::TOP, 1000, start + Duration::from_millis(i * 50));
        }
        assert!((meter.fps(ScreenId::TOP) - 20.0).abs() < 0.01);
        assert_eq!(meter.frames(ScreenId::TOP), 11);
        assert_eq!(meter.bytes(ScreenId::TOP), 11_000);
        assert_eq!(meter.fps(ScreenId::BOTTOM), 0.0);
    }

    #[test]
    fn window_is_bounded() {
        let mut meter = FrameMeter::new();
        let start = Instant::now();
        // Slow frames first, then a long run of fast ones.
        for i in 0..10 {
            meter.record_at(ScreenId::BOTTOM, 1, start + Duration::from_secs(i));
        }
        let fast_start = start + Duration::from_secs(10);
        for i in 0..=SAMPLES as u64 {
            meter.record_at(ScreenId::BOTTOM, 1, fast_start + Duration::from_millis(i * 10));
        }
        assert!((meter.fps(ScreenId::BOTTOM) - 100.0).abs() < 0.01);
    }

    #[test]
    fn summary_mentions_idle_screens() {
        let mut meter = FrameMeter::new();
        meter.record(ScreenId::TOP, 10);
        let line = meter.summary();
        assert!(line.contains("top"));
        assert!(line.contains("bottom idle"));
    }
}
