//! The external media-session abstraction consumed by the coordinator.
//!
//! The coordinator never touches packets, codecs, or negotiation: it drives
//! sessions through these capability-typed traits and reacts to the event
//! stream each session emits. Production deployments implement them over
//! their media SDK of choice; tests drive the coordinator with fakes.

pub mod retry;

use crate::{error::SessionResult, events::SessionEvent, id::ParticipantId};
use async_trait::async_trait;
use flume::Receiver;
use std::fmt;
use url::Url;

/// A live connection to one talkgroup's media room.
///
/// Implementations must coalesce inbound audio into per-participant tracks
/// and deliver them through [`SessionEvent::TrackSubscribed`].
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Enables or disables publishing of the local microphone.
    async fn enable_microphone(&self, enable: bool) -> SessionResult<()>;

    /// Closes the session; further events cease.
    async fn close(&self);
}

/// Factory opening sessions against a media server.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Opens the named room with the shared multi-room credential.
    ///
    /// Returns the session handle and the channel its events arrive on.
    async fn open(
        &self,
        server_url: &Url,
        credential: &str,
        room: &str,
    ) -> SessionResult<(Box<dyn MediaSession>, Receiver<SessionEvent>)>;
}

/// A remote participant's audio track, ready to be routed into its
/// talkgroup's gain stage.
///
/// The payload is opaque to the coordinator; the audio runtime attaches it
/// to the output graph. Only identity is inspected here.
pub struct InboundTrack {
    /// Participant the track belongs to.
    pub participant: ParticipantId,
    /// Transport-assigned track identity, for re-attachment after
    /// reconnects.
    pub sid: String,
}

impl fmt::Debug for InboundTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundTrack")
            .field("participant", &self.participant)
            .field("sid", &self.sid)
            .finish()
    }
}
