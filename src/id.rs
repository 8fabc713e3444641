//! Newtypes around the string identities carried on the wire.

use serde::{Deserialize, Serialize};
use std::{
    borrow::Borrow,
    fmt::{Display, Formatter, Result as FmtResult},
    sync::Arc,
};

/// Stable identity of a talkgroup.
///
/// Identities are opaque strings assigned by the configuration service and
/// are immutable for the lifetime of a session. Ordering on ids is the
/// tie-break used for deterministic priority ordering.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct TalkgroupId(Arc<str>);

/// Identity of a remote participant within a talkgroup's media session.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ParticipantId(Arc<str>);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Views this id as a plain string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                Display::fmt(&self.0, f)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(Arc::from(id))
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(Arc::from(id.as_str()))
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(TalkgroupId);
string_id!(ParticipantId);

impl ParticipantId {
    /// Participant id attached to speaker entries synthesised by an
    /// emergency override.
    #[must_use]
    pub fn synthetic_override() -> Self {
        Self::from("override")
    }

    /// Placeholder used when a session reports activity without naming
    /// a participant.
    #[must_use]
    pub fn unknown() -> Self {
        Self::from("unknown")
    }
}
