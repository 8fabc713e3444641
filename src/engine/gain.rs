//! Per-talkgroup gain stage: time-stamped linear ramps on the audio clock.

use std::time::Duration;
use tokio::time::Instant;

/// One scheduled gain movement, evaluated by the audio runtime.
///
/// The value at any instant is the linear interpolation between `from` and
/// `to` across `[start, start + length]`, clamped to the endpoints outside
/// that window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GainRamp {
    /// Gain at the ramp's start.
    pub from: f32,
    /// Gain once the ramp has completed.
    pub to: f32,
    /// Audio-clock instant the ramp begins.
    pub start: Instant,
    /// Ramp duration; zero applies `to` immediately.
    pub length: Duration,
}

impl GainRamp {
    fn value_at(&self, now: Instant) -> f32 {
        if now <= self.start || self.length.is_zero() {
            if self.length.is_zero() && now >= self.start {
                self.to
            } else {
                self.from
            }
        } else {
            let elapsed = now.duration_since(self.start);
            if elapsed >= self.length {
                self.to
            } else {
                let frac = elapsed.as_secs_f32() / self.length.as_secs_f32();
                self.from + (self.to - self.from) * frac
            }
        }
    }
}

/// Gain stage for one talkgroup.
///
/// Holds the most recently scheduled ramp; scheduling a new command cancels
/// anything pending, so the audio clock always evaluates exactly one ramp.
#[derive(Clone, Debug)]
pub struct GainController {
    ramp: GainRamp,
}

impl GainController {
    /// Creates a controller resting at `initial`.
    #[must_use]
    pub fn new(initial: f32, at: Instant) -> Self {
        Self {
            ramp: GainRamp {
                from: initial,
                to: initial,
                start: at,
                length: Duration::ZERO,
            },
        }
    }

    /// Gain as evaluated on the audio clock at `now`.
    #[must_use]
    pub fn gain_at(&self, now: Instant) -> f32 {
        self.ramp.value_at(now)
    }

    /// Target of the most recently scheduled ramp.
    #[must_use]
    pub fn target(&self) -> f32 {
        self.ramp.to
    }

    /// The ramp currently owned by the audio clock.
    #[must_use]
    pub fn ramp(&self) -> &GainRamp {
        &self.ramp
    }

    /// Cancels any pending command and schedules a linear ramp to `target`
    /// starting at `start`.
    ///
    /// The new ramp departs from the gain the old schedule would have
    /// produced at `start`, so replacement never causes a discontinuity.
    pub fn schedule(&mut self, target: f32, length: Duration, start: Instant) {
        let from = self.gain_at(start);
        self.ramp = GainRamp {
            from,
            to: target,
            start,
            length,
        };
    }

    /// Applies `target` with no ramp (an immediate jump at `start`).
    pub fn set_immediate(&mut self, target: f32, start: Instant) {
        self.schedule(target, Duration::ZERO, start);
    }
}
