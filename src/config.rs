use crate::{constants::*, model::TalkgroupKind, session::retry::Retry};
use std::time::Duration;

/// Configuration for the ducking engine and session coordinator.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct Config {
    /// Master switch for priority ducking.
    ///
    /// When disabled, every recomputation schedules plain user volumes and
    /// no channel is ducked; an emergency override in force still pins its
    /// target channel.
    ///
    /// Defaults to `true`.
    pub ducking_enabled: bool,
    /// Gain-scheduling response applied to priority-static speech.
    ///
    /// Defaults to 50 ms.
    pub emergency_response: Duration,
    /// Gain-scheduling response applied to secondary-static speech.
    ///
    /// Defaults to 100 ms.
    pub secondary_response: Duration,
    /// Gain-scheduling response applied to dynamic and adhoc speech.
    ///
    /// Defaults to 150 ms.
    pub dynamic_response: Duration,
    /// Hold time used when a room descriptor does not carry its own.
    ///
    /// Defaults to 3 s.
    pub default_hold: Duration,
    /// Cap on concurrently tracked speakers; lowest-priority extras are
    /// dropped once exceeded.
    ///
    /// Defaults to `3`.
    pub max_simultaneous_speakers: usize,
    /// Connection retry logic for each talkgroup's media session.
    ///
    /// This controls how many times a session open is retried, and how long
    /// to wait between attempts.
    ///
    /// *Defaults to an [`ExponentialBackoff`] from 1 s to 5 s with three
    /// total attempts.*
    ///
    /// [`ExponentialBackoff`]: crate::session::retry::ExponentialBackoff
    pub session_retry: Retry,
    /// Overall deadline for a single session's connection, retries
    /// included.
    ///
    /// Defaults to 15 seconds. If set to `None`, connections never time
    /// out.
    pub session_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ducking_enabled: true,
            emergency_response: EMERGENCY_RESPONSE,
            secondary_response: SECONDARY_RESPONSE,
            dynamic_response: DYNAMIC_RESPONSE,
            default_hold: DEFAULT_HOLD,
            max_simultaneous_speakers: DEFAULT_MAX_SPEAKERS,
            session_retry: Retry::default(),
            session_timeout: Some(SESSION_CONNECT_DEADLINE),
        }
    }
}

impl Config {
    /// Sets whether priority ducking is applied at all.
    #[must_use]
    pub fn ducking_enabled(mut self, ducking_enabled: bool) -> Self {
        self.ducking_enabled = ducking_enabled;
        self
    }

    /// Sets this `Config`'s response time for priority-static speech.
    #[must_use]
    pub fn emergency_response(mut self, emergency_response: Duration) -> Self {
        self.emergency_response = emergency_response;
        self
    }

    /// Sets this `Config`'s response time for secondary-static speech.
    #[must_use]
    pub fn secondary_response(mut self, secondary_response: Duration) -> Self {
        self.secondary_response = secondary_response;
        self
    }

    /// Sets this `Config`'s response time for dynamic and adhoc speech.
    #[must_use]
    pub fn dynamic_response(mut self, dynamic_response: Duration) -> Self {
        self.dynamic_response = dynamic_response;
        self
    }

    /// Sets this `Config`'s fallback hold time.
    #[must_use]
    pub fn default_hold(mut self, default_hold: Duration) -> Self {
        self.default_hold = default_hold;
        self
    }

    /// Sets this `Config`'s concurrent speaker cap.
    #[must_use]
    pub fn max_simultaneous_speakers(mut self, max_simultaneous_speakers: usize) -> Self {
        self.max_simultaneous_speakers = max_simultaneous_speakers;
        self
    }

    /// Sets this `Config`'s session connection retry configuration.
    #[must_use]
    pub fn session_retry(mut self, session_retry: Retry) -> Self {
        self.session_retry = session_retry;
        self
    }

    /// Sets this `Config`'s deadline for establishing a media session.
    #[must_use]
    pub fn session_timeout(mut self, session_timeout: Option<Duration>) -> Self {
        self.session_timeout = session_timeout;
        self
    }

    /// Response time applied to speech on the given kind.
    #[must_use]
    pub fn response_for(&self, kind: TalkgroupKind) -> Duration {
        match kind {
            TalkgroupKind::PriorityStatic => self.emergency_response,
            TalkgroupKind::SecondaryStatic => self.secondary_response,
            TalkgroupKind::Dynamic | TalkgroupKind::Adhoc => self.dynamic_response,
        }
    }
}
