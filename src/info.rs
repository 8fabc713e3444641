//! Wire format of the connection details handed to [`Coordinator::connect`].
//!
//! [`Coordinator::connect`]: crate::Coordinator::connect

use crate::{
    error::ConfigError,
    id::TalkgroupId,
    model::TalkgroupKind,
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use url::Url;

/// Parameters needed to open every talkgroup session: the media server, one
/// multi-room credential, and the admitted room list.
///
/// Issued by the external configuration service; consumed verbatim by the
/// coordinator.
#[derive(Clone, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    /// URL of the media server hosting every talkgroup's room.
    pub server_url: String,
    /// Opaque credential carrying grants for all listed rooms.
    pub participant_token: String,
    /// Display name of the local participant.
    pub participant_name: String,
    /// One descriptor per admitted talkgroup.
    pub rooms: Vec<RoomDescriptor>,
}

impl ConnectionDetails {
    /// Checks the details before any session is opened.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        if self.server_url.is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }

        let url = Url::parse(&self.server_url).map_err(|_| ConfigError::InvalidServerUrl)?;

        if self.participant_token.is_empty() {
            return Err(ConfigError::MissingCredential);
        }

        if self.rooms.is_empty() {
            return Err(ConfigError::NoRooms);
        }

        Ok(url)
    }
}

impl fmt::Debug for ConnectionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDetails")
            .field("server_url", &self.server_url)
            .field("participant_token", &"<secret>")
            .field("participant_name", &self.participant_name)
            .field("rooms", &self.rooms)
            .finish()
    }
}

/// Wire descriptor of a single talkgroup room.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDescriptor {
    /// Media room name as assigned by the configuration service; when
    /// empty, the deterministic derivation of [`room_name`] is used.
    ///
    /// [`room_name`]: Self::room_name
    #[serde(default)]
    pub room_name: String,
    /// Stable talkgroup identity.
    pub talkgroup_id: TalkgroupId,
    /// Display name.
    pub talkgroup_name: String,
    /// Talkgroup kind tag.
    #[serde(rename = "type")]
    pub kind: TalkgroupKind,
    /// Priority value; higher preempts lower.
    pub priority: u32,
    /// Post-speech hold, in whole seconds.
    pub hold_time_seconds: u64,
    /// Whether the credential grants publishing here.
    pub can_publish: bool,
    /// Whether the credential grants subscribing here.
    pub can_subscribe: bool,
}

impl RoomDescriptor {
    /// Deterministic media room identity:
    /// `talkgroup_<id>_<lowercased name, non-alphanumerics replaced by '_'>`.
    #[must_use]
    pub fn room_name(&self) -> String {
        if !self.room_name.is_empty() {
            return self.room_name.clone();
        }

        derive_room_name(&self.talkgroup_id, &self.talkgroup_name)
    }

    /// Hold time as a [`Duration`].
    #[must_use]
    pub fn hold_time(&self) -> Duration {
        Duration::from_secs(self.hold_time_seconds)
    }
}

/// Derives the deterministic room identity used when the wire descriptor
/// does not carry one.
#[must_use]
pub fn derive_room_name(id: &TalkgroupId, name: &str) -> String {
    let sanitised: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    format!("talkgroup_{}_{}", id, sanitised)
}
