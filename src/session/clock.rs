//! Time accounting for speaking slots
//!
//! Timers are stored as absolute wall-clock anchors, never as a counting-down
//! value, so every surface computes the same remaining time from the same
//! snapshot. Pausing freezes the deadline and resuming slides it forward by
//! exactly the paused duration.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of "now" in milliseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to (for tests and replays)
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Timing fields of an active slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerFields {
    pub base_duration_sec: u32,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub paused: bool,
    pub paused_at_ms: Option<i64>,
    pub accumulated_pause_ms: i64,
}

impl TimerFields {
    /// A running timer anchored at `now_ms`
    pub fn armed(now_ms: i64, base_duration_sec: u32) -> Self {
        Self {
            base_duration_sec,
            start_time_ms: now_ms,
            end_time_ms: now_ms + i64::from(base_duration_sec) * 1000,
            paused: false,
            paused_at_ms: None,
            accumulated_pause_ms: 0,
        }
    }

    /// Remaining milliseconds, never negative
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        let reference = match (self.paused, self.paused_at_ms) {
            (true, Some(paused_at)) => paused_at,
            _ => now_ms,
        };
        (self.end_time_ms - reference).max(0)
    }

    pub fn remaining_secs(&self, now_ms: i64) -> f64 {
        self.remaining_ms(now_ms) as f64 / 1000.0
    }

    /// True once a running timer has reached zero
    pub fn is_expired(&self, now_ms: i64) -> bool {
        !self.paused && self.remaining_ms(now_ms) == 0
    }

    /// Freeze the timer. Returns `None` if already paused.
    pub fn pause(&self, now_ms: i64) -> Option<Self> {
        if self.paused {
            return None;
        }
        Some(Self {
            paused: true,
            paused_at_ms: Some(now_ms),
            ..*self
        })
    }

    /// Unfreeze the timer, shifting the deadline by the paused duration.
    /// Returns `None` if not paused.
    pub fn resume(&self, now_ms: i64) -> Option<Self> {
        if !self.paused {
            return None;
        }
        let delta = (now_ms - self.paused_at_ms.unwrap_or(now_ms)).max(0);
        Some(Self {
            paused: false,
            paused_at_ms: None,
            accumulated_pause_ms: self.accumulated_pause_ms + delta,
            end_time_ms: self.end_time_ms + delta,
            ..*self
        })
    }

    /// Re-anchor at `now_ms` with the same base duration
    pub fn reset(&self, now_ms: i64) -> Self {
        Self::armed(now_ms, self.base_duration_sec)
    }
}

/// Format seconds as `MM:SS`, or `HH:MM:SS` past the hour
pub fn format_clock(secs: f64) -> String {
    let total = secs.max(0.0).floor() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_while_running() {
        let t = TimerFields::armed(10_000, 120);
        assert_eq!(t.remaining_ms(10_000), 120_000);
        assert_eq!(t.remaining_ms(70_000), 60_000);
        assert_eq!(t.remaining_ms(500_000), 0);
        assert!(t.is_expired(130_000));
        assert!(!t.is_expired(129_999));
    }

    #[test]
    fn test_pause_freezes_remaining() {
        let t = TimerFields::armed(0, 60).pause(15_000).unwrap();
        assert_eq!(t.remaining_ms(15_000), 45_000);
        assert_eq!(t.remaining_ms(400_000), 45_000);
        assert!(!t.is_expired(400_000));
        assert!(t.pause(20_000).is_none());
    }

    #[test]
    fn test_resume_shifts_deadline_by_pause() {
        let t = TimerFields::armed(0, 60);
        let paused = t.pause(15_000).unwrap();
        let resumed = paused.resume(25_000).unwrap();

        assert_eq!(resumed.end_time_ms, t.end_time_ms + 10_000);
        assert_eq!(resumed.accumulated_pause_ms, 10_000);
        assert_eq!(resumed.remaining_ms(25_000), 45_000);
        assert!(resumed.resume(30_000).is_none());
    }

    #[test]
    fn test_repeated_pauses_accumulate() {
        let mut t = TimerFields::armed(0, 100);
        let before = t.remaining_ms(5_000);
        let mut now = 5_000;
        for gap in [1_000, 7_500, 250, 12_000] {
            t = t.pause(now).unwrap();
            now += gap;
            t = t.resume(now).unwrap();
        }
        assert_eq!(t.remaining_ms(now), before);
        assert_eq!(t.accumulated_pause_ms, 20_750);
    }

    #[test]
    fn test_reset_reanchors_and_clears_pause() {
        let t = TimerFields::armed(0, 30).pause(10_000).unwrap();
        let r = t.reset(50_000);
        assert_eq!(r.start_time_ms, 50_000);
        assert_eq!(r.end_time_ms, 80_000);
        assert!(!r.paused);
        assert_eq!(r.paused_at_ms, None);
        assert_eq!(r.accumulated_pause_ms, 0);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "00:00");
        assert_eq!(format_clock(59.9), "00:59");
        assert_eq!(format_clock(125.0), "02:05");
        assert_eq!(format_clock(3_725.0), "01:02:05");
        assert_eq!(format_clock(-3.0), "00:00");
    }
}
