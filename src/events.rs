//! Event payloads crossing the session boundary and the alert channel.

use crate::{
    id::{ParticipantId, TalkgroupId},
    session::InboundTrack,
};
use std::collections::HashSet;
use tokio::time::Instant;

/// A change in a talkgroup's single collapsed voice.
///
/// The coordinator synthesises one of these per talkgroup from the session
/// layer's active-speaker sets; the engine treats one talkgroup as one voice
/// for ducking purposes.
#[derive(Clone, Debug)]
pub struct SpeakerEvent {
    /// Talkgroup the speech belongs to.
    pub talkgroup: TalkgroupId,
    /// Reported speaker, or [`ParticipantId::unknown`] when the session
    /// did not name one.
    pub participant: ParticipantId,
    /// Whether speech started (`true`) or stopped (`false`).
    pub speaking: bool,
    /// Audio-clock instant the change was observed.
    pub timestamp: Instant,
}

/// Connection state reported by a single media session.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum SessionConnState {
    /// The transport is performing its initial handshake.
    Connecting,
    /// Media is flowing.
    Connected,
    /// The transport dropped and is re-establishing itself.
    Reconnecting,
    /// The transport has given up or was closed.
    Disconnected,
}

/// Events emitted by a single talkgroup's media session.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionEvent {
    /// The set of participants currently producing audio changed.
    ActiveSpeakersChanged(HashSet<ParticipantId>),
    /// The transport's connection state changed.
    StateChanged(SessionConnState),
    /// A remote participant's audio track became available for routing
    /// into the talkgroup's gain stage.
    TrackSubscribed(InboundTrack),
}

/// Out-of-band notifications for the embedding UI.
///
/// Published only when the matching user preference is enabled; consumers
/// may lag or disappear without affecting coordination.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Alert {
    /// An emergency talkgroup gained an active speaker or an override was
    /// invoked.
    EmergencyStarted(TalkgroupId),
    /// The last emergency speaker (or override) ended.
    EmergencyEnded(TalkgroupId),
}
