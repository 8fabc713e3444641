//! Static priority model for talkgroup kinds, and the admitted talkgroup
//! descriptor.
//!
//! The tables here encode the DMR-style pecking order: a kind ducks every
//! kind of strictly lower priority, with fixed duck depths and response
//! times. All lookups are total and side-effect free; deployments needing
//! different response times override them through [`Config`].
//!
//! [`Config`]: crate::Config

use crate::{constants::*, id::TalkgroupId, info::RoomDescriptor};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classes of talkgroup, ordered by precedence for ducking decisions.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum TalkgroupKind {
    /// Emergency channel: preempts everything, is never ducked.
    #[serde(rename = "priority-static")]
    PriorityStatic,
    /// Department-wide channel: ducks dynamic and adhoc traffic.
    #[serde(rename = "secondary-static")]
    SecondaryStatic,
    /// User-created channel: ducks adhoc traffic only.
    #[serde(rename = "dynamic")]
    Dynamic,
    /// Incident scratch channel: ducks no one.
    #[serde(rename = "adhoc")]
    Adhoc,
}

impl TalkgroupKind {
    /// Default priority value for the kind. Higher wins.
    #[must_use]
    pub fn priority(self) -> u32 {
        match self {
            Self::PriorityStatic => 100,
            Self::SecondaryStatic => 80,
            Self::Dynamic => 50,
            Self::Adhoc => 40,
        }
    }

    /// Gain multiplier applied to the user volume of channels this kind
    /// ducks while one of its speakers is active.
    #[must_use]
    pub fn duck_level(self) -> f32 {
        match self {
            Self::PriorityStatic => EMERGENCY_DUCK_LEVEL,
            Self::SecondaryStatic => SECONDARY_DUCK_LEVEL,
            Self::Dynamic => DYNAMIC_DUCK_LEVEL,
            Self::Adhoc => NO_DUCK_LEVEL,
        }
    }

    /// Default post-speech hold before ducking is released.
    #[must_use]
    pub fn default_hold(self) -> Duration {
        match self {
            Self::PriorityStatic => Duration::ZERO,
            Self::SecondaryStatic => Duration::from_secs(2),
            Self::Dynamic | Self::Adhoc => DEFAULT_HOLD,
        }
    }

    /// Default gain-scheduling response time for speech on this kind.
    #[must_use]
    pub fn default_response(self) -> Duration {
        match self {
            Self::PriorityStatic => EMERGENCY_RESPONSE,
            Self::SecondaryStatic => SECONDARY_RESPONSE,
            Self::Dynamic | Self::Adhoc => DYNAMIC_RESPONSE,
        }
    }

    /// Whether speech on this kind ducks channels of `other`'s kind.
    ///
    /// Derived from the priority table: any kind ducks every kind with
    /// strictly lower priority.
    #[must_use]
    pub fn ducks(self, other: Self) -> bool {
        self.priority() > other.priority()
    }
}

/// An admitted talkgroup: the immutable descriptor the coordinator and
/// engine operate on for the lifetime of a session.
#[derive(Clone, Debug, PartialEq)]
pub struct Talkgroup {
    /// Stable identity assigned by the configuration service.
    pub id: TalkgroupId,
    /// Human-readable name for display and room derivation.
    pub name: String,
    /// Kind, fixing the ducking relations this group participates in.
    pub kind: TalkgroupKind,
    /// Priority value; higher preempts lower. Usually the kind's default,
    /// but the configuration service may assign a bespoke value.
    pub priority: u32,
    /// Post-speech hold before ducking is released.
    pub hold_time: Duration,
    /// Whether the local participant may publish a microphone here.
    pub can_publish: bool,
    /// Whether the local participant receives inbound audio here.
    pub can_subscribe: bool,
    /// Derived media room name for the underlying session.
    pub room: String,
}

impl Talkgroup {
    /// Builds an admitted talkgroup from a wire room descriptor.
    #[must_use]
    pub fn from_room(room: &RoomDescriptor) -> Self {
        Self {
            id: room.talkgroup_id.clone(),
            name: room.talkgroup_name.clone(),
            kind: room.kind,
            priority: room.priority,
            hold_time: room.hold_time(),
            can_publish: room.can_publish,
            can_subscribe: room.can_subscribe,
            room: room.room_name(),
        }
    }
}
