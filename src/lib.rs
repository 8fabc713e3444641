#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Trunkline is an async, DMR-style multi-talkgroup audio coordinator,
//! written in Rust. The library offers:
//!  * A priority-based ducking engine: one gain stage per talkgroup,
//!  speaker-driven duck scheduling with per-kind response times, post-speech
//!  hold timers, and emergency preemption with a hard audibility floor.
//!  * A multi-room session controller that opens one media session per
//!  talkgroup (in parallel, with retry and backoff), collapses each room's
//!  speaker set into a single voice, and keeps the microphone published to
//!  at most one talkgroup at a time.
//!  * A single observable coordinator state for UI consumption, with
//!  idempotent mutators and a persisted user-preference subset.
//!
//! ## Sessions
//! Trunkline owns no transport: implement [`SessionFactory`] and
//! [`MediaSession`] over your media SDK of choice, and hand
//! [`Coordinator::connect`] the connection details issued by your
//! configuration service. Inbound audio arrives as per-participant tracks
//! which the engine routes through each talkgroup's gain stage; the audio
//! runtime evaluates the scheduled ramps on its own clock.
//!
//! ## Priorities
//! Four talkgroup kinds carry fixed precedence: `priority-static`
//! (emergency) preempts everything, `secondary-static` (department) ducks
//! user and incident traffic, `dynamic` (user) ducks incident traffic, and
//! `adhoc` (incident) yields to all. Any kind ducks every kind of strictly
//! lower priority; the duck depths and response times live in
//! [`constants`] and [`Config`].
//!
//! [`SessionFactory`]: crate::session::SessionFactory
//! [`MediaSession`]: crate::session::MediaSession
//! [`Coordinator::connect`]: crate::Coordinator::connect

#![warn(clippy::pedantic, rust_2018_idioms)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_link_with_quotes,
)]

mod config;
pub mod constants;
mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod id;
pub mod info;
pub mod model;
pub mod prefs;
pub mod session;
pub mod state;
#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::{
    config::Config,
    coordinator::Coordinator,
    engine::{DuckingEngine, EngineHandle, EngineSnapshot},
    error::{ConnectError, ConnectResult, ControlError, ControlResult},
    events::{Alert, SessionConnState, SessionEvent, SpeakerEvent},
    id::{ParticipantId, TalkgroupId},
    info::{ConnectionDetails, RoomDescriptor},
    model::{Talkgroup, TalkgroupKind},
    prefs::Preferences,
    state::{ConnectionStatus, CoordinatorState},
};
