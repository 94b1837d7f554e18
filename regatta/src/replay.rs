//! Replay clock: a cursor over the dataset's time range that advances by a
//! fixed step while playing. Timers live elsewhere (see `player`).

use serde::{Deserialize, Serialize};

use crate::{Race, RaceError};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: i64) -> Result<Self, RaceError> {
        if end_ms < start_ms {
            return Err(RaceError::InvalidParameter(format!(
                "time range ends before it starts ({} < {})",
                end_ms, start_ms
            )));
        }
        Ok(Self { start_ms, end_ms })
    }

    /// Earliest and latest sample timestamps across the roster.
    pub fn of_race(race: &Race) -> Option<Self> {
        let mut bounds: Option<(i64, i64)> = None;
        for sample in race.boats.iter().flat_map(|b| b.samples.iter()) {
            let t = sample.timestamp_ms;
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(t), hi.max(t)),
                None => (t, t),
            });
        }
        bounds.map(|(start_ms, end_ms)| Self { start_ms, end_ms })
    }

    pub fn clamp(&self, t: i64) -> i64 {
        t.clamp(self.start_ms, self.end_ms)
    }

    pub fn span_ms(&self) -> i64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClockState {
    Idle,
    Playing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Cursor moved and playback continues.
    Advanced(i64),
    /// Cursor reached the upper bound; the clock is idle again.
    Finished(i64),
    /// The clock was idle; nothing changed.
    Ignored,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReplayClock {
    range: TimeRange,
    cursor_ms: i64,
    step_ms: i64,
    state: ClockState,
}

impl ReplayClock {
    pub fn new(range: TimeRange, step_ms: i64) -> Result<Self, RaceError> {
        if step_ms <= 0 {
            return Err(RaceError::InvalidParameter(format!(
                "replay step must be positive, got {} ms",
                step_ms
            )));
        }
        Ok(Self {
            range,
            cursor_ms: range.start_ms,
            step_ms,
            state: ClockState::Idle,
        })
    }

    pub fn for_race(race: &Race, step_ms: i64) -> Result<Self, RaceError> {
        let range = TimeRange::of_race(race).ok_or(RaceError::NoData)?;
        Self::new(range, step_ms)
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn cursor(&self) -> i64 {
        self.cursor_ms
    }

    pub fn step_ms(&self) -> i64 {
        self.step_ms
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == ClockState::Playing
    }

    /// Start playing. A clock parked at the upper bound rewinds first.
    pub fn play(&mut self) {
        if self.cursor_ms >= self.range.end_ms {
            self.cursor_ms = self.range.start_ms;
        }
        self.state = ClockState::Playing;
    }

    pub fn pause(&mut self) {
        self.state = ClockState::Idle;
    }

    pub fn tick(&mut self) -> Tick {
        if self.state != ClockState::Playing {
            return Tick::Ignored;
        }
        let next = self.cursor_ms.saturating_add(self.step_ms);
        self.cursor_ms = self.range.clamp(next);
        if self.cursor_ms >= self.range.end_ms {
            self.state = ClockState::Idle;
            Tick::Finished(self.cursor_ms)
        } else {
            Tick::Advanced(self.cursor_ms)
        }
    }

    /// Move the cursor without touching the play state.
    pub fn seek(&mut self, t: i64) -> i64 {
        self.cursor_ms = self.range.clamp(t);
        self.cursor_ms
    }

    pub fn reset(&mut self) {
        self.cursor_ms = self.range.start_ms;
        self.state = ClockState::Idle;
    }

    pub fn set_step(&mut self, step_ms: i64) -> Result<(), RaceError> {
        if step_ms <= 0 {
            return Err(RaceError::InvalidParameter(format!(
                "replay step must be positive, got {} ms",
                step_ms
            )));
        }
        self.step_ms = step_ms;
        Ok(())
    }

    /// Fraction of the range already replayed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        let span = self.range.span_ms();
        if span <= 0 {
            return 1.0;
        }
        self.cursor_ms.saturating_sub(self.range.start_ms) as f64 / span as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Boat, Sample};

    fn clock(start: i64, end: i64, step: i64) -> ReplayClock {
        ReplayClock::new(TimeRange::new(start, end).unwrap(), step).unwrap()
    }

    #[test]
    fn test_range_of_race() {
        let mut a = Boat::new("a", "A", "IRC");
        a.samples = vec![Sample::new(0.0, 0.0, 50), Sample::new(0.0, 0.0, 90)];
        let mut b = Boat::new("b", "B", "IRC");
        b.samples = vec![Sample::new(0.0, 0.0, 20), Sample::new(0.0, 0.0, 70)];
        let race = Race {
            boats: vec![a, b, Boat::new("c", "C", "IRC")],
            ..Race::default()
        };
        assert_eq!(TimeRange::of_race(&race), Some(TimeRange { start_ms: 20, end_ms: 90 }));
        assert!(TimeRange::of_race(&Race::default()).is_none());
        assert!(ReplayClock::for_race(&Race::default(), 10).is_err());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(TimeRange::new(10, 5).is_err());
        let range = TimeRange::new(0, 10).unwrap();
        assert!(ReplayClock::new(range, 0).is_err());
        let mut c = clock(0, 10, 1);
        assert!(c.set_step(-5).is_err());
        assert_eq!(c.step_ms(), 1);
    }

    #[test]
    fn test_play_until_upper_bound() {
        let mut c = clock(0, 250, 100);
        assert_eq!(c.tick(), Tick::Ignored);
        assert_eq!(c.cursor(), 0);

        c.play();
        assert_eq!(c.tick(), Tick::Advanced(100));
        assert_eq!(c.tick(), Tick::Advanced(200));
        assert_eq!(c.tick(), Tick::Finished(250));
        assert_eq!(c.state(), ClockState::Idle);
        assert_eq!(c.tick(), Tick::Ignored);
        assert_eq!(c.cursor(), 250);
        assert_eq!(c.progress(), 1.0);
    }

    #[test]
    fn test_play_at_end_rewinds() {
        let mut c = clock(100, 200, 50);
        c.seek(500);
        assert_eq!(c.cursor(), 200);
        c.play();
        assert_eq!(c.cursor(), 100);
        assert_eq!(c.tick(), Tick::Advanced(150));
    }

    #[test]
    fn test_seek_keeps_state_and_clamps() {
        let mut c = clock(0, 1_000, 10);
        c.play();
        assert_eq!(c.seek(-50), 0);
        assert!(c.is_playing());
        assert_eq!(c.seek(400), 400);
        assert_eq!(c.tick(), Tick::Advanced(410));
        c.pause();
        assert_eq!(c.seek(2_000), 1_000);
        assert_eq!(c.state(), ClockState::Idle);
    }

    #[test]
    fn test_pause_stops_mutation() {
        let mut c = clock(0, 1_000, 10);
        c.play();
        c.pause();
        for _ in 0..5 {
            assert_eq!(c.tick(), Tick::Ignored);
        }
        assert_eq!(c.cursor(), 0);
    }

    #[test]
    fn test_reset() {
        let mut c = clock(0, 1_000, 300);
        c.play();
        c.tick();
        c.reset();
        assert_eq!(c.cursor(), 0);
        assert_eq!(c.state(), ClockState::Idle);
    }

    #[test]
    fn test_cursor_always_within_range() {
        let mut c = clock(-500, 700, 137);
        c.play();
        for i in 0..50 {
            if i % 7 == 0 {
                c.seek(i * 100 - 900);
            }
            if !c.is_playing() {
                c.play();
            }
            c.tick();
            assert!(c.cursor() >= -500 && c.cursor() <= 700);
            assert!((0.0..=1.0).contains(&c.progress()));
        }
    }

    #[test]
    fn test_extreme_range_does_not_overflow() {
        let range = TimeRange::new(i64::MIN, i64::MAX).unwrap();
        assert_eq!(range.span_ms(), i64::MAX);
        let mut c = ReplayClock::new(range, i64::MAX).unwrap();
        c.play();
        assert_eq!(c.tick(), Tick::Advanced(-1));
        assert_eq!(c.tick(), Tick::Advanced(i64::MAX - 1));
        assert_eq!(c.tick(), Tick::Finished(i64::MAX));
        assert!((0.0..=1.0).contains(&c.progress()));
    }

    #[test]
    fn test_degenerate_range_finishes_immediately() {
        let mut c = clock(42, 42, 10);
        c.play();
        assert_eq!(c.tick(), Tick::Finished(42));
        assert_eq!(c.progress(), 1.0);
    }
}
